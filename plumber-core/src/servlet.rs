//! Servlet instances (spec §3): the external, black-box unit of computation
//! the scheduler invokes. The core never inspects a servlet's internals
//! beyond its pipe descriptor table (PDT) and its `exec` entry point.

use async_trait::async_trait;
use std::collections::HashMap;

use crate::error::Result;
use crate::module::Module;
use crate::pipe::{PipeArena, PipeId};
use crate::scope::RequestScope;

/// A pipe id local to a single node's PDT (distinct from the scheduler-wide
/// [`crate::pipe::PipeId`] assigned to a concrete handle).
pub type LocalPipeId = u16;

/// Name of a pipe declared by a servlet.
#[derive(Debug, Clone)]
pub struct PipeDescriptor {
    pub name: String,
}

/// Pipe descriptor table: the fixed list of pipes a servlet declares, plus
/// the two reserved sentinel outputs every node has (spec §3).
#[derive(Debug, Clone)]
pub struct Pdt {
    pub pipes: Vec<PipeDescriptor>,
    pub null_pipe: LocalPipeId,
    pub error_pipe: LocalPipeId,
}

impl Pdt {
    /// Build a PDT from ordinary pipe names; `__null__` and `__error__` are
    /// appended automatically as the two sentinel outputs.
    pub fn new(pipes: impl IntoIterator<Item = impl Into<String>>) -> Self {
        let mut list: Vec<PipeDescriptor> = pipes
            .into_iter()
            .map(|name| PipeDescriptor { name: name.into() })
            .collect();
        let null_pipe = list.len() as LocalPipeId;
        list.push(PipeDescriptor { name: "__null__".into() });
        let error_pipe = list.len() as LocalPipeId;
        list.push(PipeDescriptor { name: "__error__".into() });
        Pdt { pipes: list, null_pipe, error_pipe }
    }

    pub fn find(&self, name: &str) -> Option<LocalPipeId> {
        self.pipes.iter().position(|p| p.name == name).map(|i| i as LocalPipeId)
    }

    pub fn is_sentinel(&self, pipe: LocalPipeId) -> bool {
        pipe == self.null_pipe || pipe == self.error_pipe
    }
}

/// The pipe handles bound to one task's local pipe ids, plus the module they
/// were allocated from, giving a servlet's `exec` a way to read/write its own
/// pipes without ever seeing another task's handles.
pub struct ExecPipes<'a> {
    pub arena: &'a mut PipeArena,
    pub module: &'a dyn Module,
    pub bound: &'a HashMap<LocalPipeId, PipeId>,
}

impl<'a> ExecPipes<'a> {
    pub async fn read(&mut self, pipe: LocalPipeId, buf: &mut [u8]) -> Result<usize> {
        let id = self.resolve(pipe)?;
        let n = self.module.read(id, buf).await?;
        Ok(n)
    }

    pub async fn write(&mut self, pipe: LocalPipeId, data: &[u8]) -> Result<usize> {
        let id = self.resolve(pipe)?;
        let n = self.module.write(id, data).await?;
        if n > 0 {
            self.arena.mark_touched(id)?;
        }
        Ok(n)
    }

    /// Whether `pipe` currently has a handle bound, i.e. the edge it sits on
    /// was assigned rather than cancelled. Cancelled inputs never enter
    /// `bound` (spec §4.6's `input_cancelled` only increments a counter), so
    /// a servlet that wants to tolerate a cancelled-but-optional input must
    /// check this before calling [`read`](Self::read).
    pub fn is_bound(&self, pipe: LocalPipeId) -> bool {
        self.bound.contains_key(&pipe)
    }

    pub fn flags(&self, pipe: LocalPipeId) -> Result<crate::flags::PipeFlags> {
        let id = self.resolve(pipe)?;
        Ok(self.arena.get(id)?.flags)
    }

    /// `GET_FLAGS`/`SET_FLAG`/`CLR_FLAG` (spec §6, module id `0xFF`) are
    /// generic opcodes the core answers directly against arena metadata;
    /// everything else is module-specific and delegates to [`Module::cntl`].
    pub fn cntl(&mut self, pipe: LocalPipeId, opcode: crate::module::CntlOp) -> Result<()> {
        use crate::module::CntlOp;
        let id = self.resolve(pipe)?;
        match opcode {
            CntlOp::GetFlags => Ok(()),
            CntlOp::SetFlag(flag) => self.arena.set_flag(id, flag),
            CntlOp::ClrFlag(flag) => self.arena.clr_flag(id, flag),
            other => self.module.cntl(id, other),
        }
    }

    fn resolve(&self, pipe: LocalPipeId) -> Result<PipeId> {
        self.bound.get(&pipe).copied().ok_or_else(|| {
            crate::error::Error::InvalidArg(format!("pipe {pipe} not bound for this task"))
        })
    }
}

/// A unit of computation wired into the service graph. The scheduler treats
/// this as a black box beyond `pdt()`, `init()`, `exec()` and `unload()`
/// (spec §3: "immutable after init... exposes init, exec, unload").
#[async_trait]
pub trait Servlet: Send + Sync {
    fn pdt(&self) -> &Pdt;

    /// Called once, with the node's declared argv, when the servlet is
    /// wired into a service graph and before any `exec` runs against it.
    /// A servlet with no setup of its own can rely on the default no-op.
    fn init(&self, _argv: &[String]) -> Result<()> {
        Ok(())
    }

    /// Run the servlet's logic for one task invocation. Returning `Err`
    /// signals failure: the step engine marks every non-sentinel output
    /// error and touches `__error__` (spec §4.7).
    async fn exec(&self, pipes: &mut ExecPipes<'_>, scope: &RequestScope) -> Result<()>;

    /// Called once when the owning service is torn down, after every
    /// request against it has finished. Mirrors `init`; most servlets have
    /// nothing to release and keep the default no-op.
    fn unload(&self) {}
}
