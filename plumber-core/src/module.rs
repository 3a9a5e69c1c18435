//! The module interface (spec §4.1, §6, C2): the uniform contract an I/O or
//! transport module exposes to the scheduler.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bitflags::bitflags;

use crate::error::{Error, Result};
use crate::flags::PipeFlags;
use crate::pipe::{ModuleId, PipeArena, PipeId};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ModuleFlags: u32 {
        /// This module's `accept` can block the event thread waiting for work.
        const EVENT_LOOP      = 0b01;
        /// The module's event source has been drained and will produce no more events.
        const EVENT_EXHAUSTED = 0b10;
    }
}

/// Parameters used when allocating or accepting a pipe pair (spec §4.1,
/// `itc_module_pipe_param_t` in the original ABI).
#[derive(Debug, Clone, Default)]
pub struct PipeParam {
    pub input_flags: PipeFlags,
    pub output_flags: PipeFlags,
    pub input_header: usize,
    pub output_header: usize,
    /// Module-specific extra argument. Spec §4.1 warns this should not be
    /// used by ordinary pipes; kept opaque on purpose.
    pub args: Option<Vec<u8>>,
}

/// Per-module control opcodes (spec §6). The upper 8 bits of the wire
/// representation identify the module (or `0xFF` for a generic opcode); here
/// that's expressed as the enum discriminant plus an optional module id
/// rather than manual bit-packing, since Rust callers address opcodes by
/// value, not by parsing a `u32` by hand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CntlOp {
    GetFlags,
    SetFlag(PipeFlags),
    ClrFlag(PipeFlags),
    /// End-of-message with a body offset.
    Eom(usize),
    PushState,
    PopState,
    Invoke(u32),
    ReadHdr,
    WriteHdr,
    Nop,
}

/// A data-request descriptor letting the BIO layer peel off a prefix of a
/// scope token for small-write coalescing (spec §4.1).
#[derive(Debug, Clone, Copy, Default)]
pub struct DataRequest {
    pub offset: usize,
    pub limit: Option<usize>,
}

/// Uniform contract an I/O or transport module exposes to the scheduler.
///
/// Implementors store their own byte-stream state; the scheduler only ever
/// addresses that state indirectly through a [`PipeId`], never touching the
/// bytes directly (spec §4.2).
#[async_trait]
pub trait Module: Send + Sync {
    fn flags(&self) -> ModuleFlags;

    /// Block (logically — this is `async`, so it suspends the calling task)
    /// until a new boundary request arrives, returning the pipe pair that
    /// forms the request's input/output endpoints.
    async fn accept(&self, arena: &mut PipeArena, param: PipeParam) -> Result<(PipeId, PipeId)>;

    /// Create a new intra-graph pipe pair with the given flags and header sizes.
    async fn allocate(&self, arena: &mut PipeArena, param: PipeParam) -> Result<(PipeId, PipeId)>;

    /// Create a new input end that observes `src`'s byte stream (a shadow pipe).
    fn fork(
        &self,
        arena: &mut PipeArena,
        src: PipeId,
        flags: PipeFlags,
        header_size: usize,
    ) -> Result<PipeId>;

    async fn read(&self, handle: PipeId, buf: &mut [u8]) -> Result<usize>;

    async fn write(&self, handle: PipeId, data: &[u8]) -> Result<usize>;

    /// Default implementation falls back to repeated `write` calls, matching
    /// the original's "if the module doesn't provide write_callback, call
    /// write again and again" fallback (spec §4.1).
    async fn write_callback(
        &self,
        handle: PipeId,
        data: &[u8],
        _data_req: DataRequest,
    ) -> Result<usize> {
        self.write(handle, data).await
    }

    fn eof(&self, handle: PipeId) -> Result<bool>;

    fn cntl(&self, handle: PipeId, opcode: CntlOp) -> Result<()>;

    /// Drop the handle's module-owned state. If the pipe never produced
    /// output and `purge` is set, downstream observers see EOF with zero
    /// bytes.
    fn deallocate(&self, arena: &mut PipeArena, handle: PipeId, error: bool, purge: bool)
        -> Result<()>;

    /// Write a pre-serialized scope entity's bytes, honoring `data_req`'s
    /// prefix peel-off for small-write coalescing. Defaults to plain
    /// `write`, the same fallback `write_callback` uses, since most modules
    /// have no cheaper splice path than copying the bytes through.
    async fn write_scope_token(
        &self,
        handle: PipeId,
        data: &[u8],
        data_req: DataRequest,
    ) -> Result<usize> {
        let start = data_req.offset.min(data.len());
        let end = data_req.limit.map(|l| (start + l).min(data.len())).unwrap_or(data.len());
        self.write(handle, &data[start..end]).await
    }

    /// Notification that the module's event-producing thread has been
    /// killed; a no-op default since most modules have no teardown beyond
    /// what `cleanup` already does.
    fn event_thread_killed(&self) {}
}

/// The set of modules registered with a running scheduler, addressed by the
/// small integer id every [`PipeHandle`](crate::pipe::PipeHandle) carries.
#[derive(Default)]
pub struct ModuleRegistry {
    modules: HashMap<ModuleId, Arc<dyn Module>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        ModuleRegistry::default()
    }

    pub fn register(&mut self, id: ModuleId, module: Arc<dyn Module>) {
        self.modules.insert(id, module);
    }

    pub fn get(&self, id: ModuleId) -> Result<&Arc<dyn Module>> {
        self.modules
            .get(&id)
            .ok_or_else(|| Error::InvalidArg(format!("no module registered with id {id}")))
    }

    pub fn ids(&self) -> impl Iterator<Item = ModuleId> + '_ {
        self.modules.keys().copied()
    }
}
