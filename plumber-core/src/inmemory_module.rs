//! An in-memory [`Module`] implementation used by every scenario test in
//! spec §8, standing in for a concrete I/O module (TCP, file, ...) the same
//! way `bpmn-lite`'s `MemoryStore` stands in for a Postgres-backed store in
//! its own test suite. Not part of the scheduler core's feature surface —
//! concrete I/O modules are an out-of-scope external collaborator (spec §1).

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::flags::PipeFlags;
use crate::module::{CntlOp, Module, ModuleFlags, PipeParam};
use crate::pipe::{PipeArena, PipeHandle, PipeId};

/// Append-only body shared between the two ends of a pipe pair (and every
/// shadow fork of either end); each reader tracks its own cursor separately.
#[derive(Default)]
struct Body {
    bytes: Vec<u8>,
    eof: bool,
}

#[derive(Default)]
pub struct InMemoryModule {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    bodies: HashMap<PipeId, std::sync::Arc<Mutex<Body>>>,
    cursors: HashMap<PipeId, usize>,
    pending_requests: VecDeque<Vec<u8>>,
    latest_out: Option<PipeId>,
}

impl InMemoryModule {
    pub fn new() -> Self {
        InMemoryModule::default()
    }

    /// Queue bytes that the next `accept()` call will deliver on the
    /// boundary input pipe.
    pub fn seed_request(&self, bytes: impl Into<Vec<u8>>) {
        self.inner.lock().unwrap().pending_requests.push_back(bytes.into());
    }

    /// Read back everything written to an output pipe so far (test assertion helper).
    pub fn peek(&self, handle: PipeId) -> Vec<u8> {
        let inner = self.inner.lock().unwrap();
        match inner.bodies.get(&handle) {
            Some(body) => body.lock().unwrap().bytes.clone(),
            None => Vec::new(),
        }
    }

    /// Read back the output body of the most recent `accept()` call. A
    /// correlation-id-free convenience for callers (demos, single-request
    /// tests) that only have one request in flight at a time.
    pub fn peek_latest(&self) -> Vec<u8> {
        let handle = self.inner.lock().unwrap().latest_out;
        handle.map(|h| self.peek(h)).unwrap_or_default()
    }

    fn body_for(&self, handle: PipeId) -> Result<std::sync::Arc<Mutex<Body>>> {
        self.inner
            .lock()
            .unwrap()
            .bodies
            .get(&handle)
            .cloned()
            .ok_or_else(|| Error::InvalidArg(format!("no body registered for {:?}", handle)))
    }
}

#[async_trait]
impl Module for InMemoryModule {
    fn flags(&self) -> ModuleFlags {
        ModuleFlags::EVENT_LOOP
    }

    /// Returns `(in_pipe, out_pipe)`: the boundary input the graph reads the
    /// external request from, and the boundary output the graph will write
    /// its response to.
    async fn accept(&self, arena: &mut PipeArena, param: PipeParam) -> Result<(PipeId, PipeId)> {
        let request = {
            let mut inner = self.inner.lock().unwrap();
            inner.pending_requests.pop_front()
        };
        let Some(request) = request else {
            return Err(Error::ModuleError("no pending request to accept".into()));
        };

        let in_id = arena.allocate(PipeHandle::new(0, param.input_flags | PipeFlags::INPUT, param.input_header));
        let out_id = arena.allocate(PipeHandle::new(0, param.output_flags | PipeFlags::OUTPUT, param.output_header));

        let in_body = std::sync::Arc::new(Mutex::new(Body { bytes: request, eof: true }));
        let out_body = std::sync::Arc::new(Mutex::new(Body::default()));

        let mut inner = self.inner.lock().unwrap();
        inner.bodies.insert(in_id, in_body);
        inner.bodies.insert(out_id, out_body);
        inner.cursors.insert(in_id, 0);
        inner.latest_out = Some(out_id);

        Ok((in_id, out_id))
    }

    /// Returns `(out_pipe, in_pipe)` for a fresh intra-graph pair.
    async fn allocate(&self, arena: &mut PipeArena, param: PipeParam) -> Result<(PipeId, PipeId)> {
        let out_id = arena.allocate(PipeHandle::new(0, param.output_flags | PipeFlags::OUTPUT, param.output_header));
        let in_id = arena.allocate(PipeHandle::new(0, param.input_flags | PipeFlags::INPUT, param.input_header));

        let body = std::sync::Arc::new(Mutex::new(Body::default()));
        let mut inner = self.inner.lock().unwrap();
        inner.bodies.insert(out_id, body.clone());
        inner.bodies.insert(in_id, body);
        inner.cursors.insert(in_id, 0);

        Ok((out_id, in_id))
    }

    fn fork(
        &self,
        arena: &mut PipeArena,
        src: PipeId,
        flags: PipeFlags,
        header_size: usize,
    ) -> Result<PipeId> {
        let body = self.body_for(src)?;
        let forked = arena.allocate(PipeHandle::new(0, flags | PipeFlags::SHADOW | PipeFlags::INPUT, header_size));
        let mut inner = self.inner.lock().unwrap();
        inner.bodies.insert(forked, body);
        inner.cursors.insert(forked, 0);
        Ok(forked)
    }

    async fn read(&self, handle: PipeId, buf: &mut [u8]) -> Result<usize> {
        let body = self.body_for(handle)?;
        let body = body.lock().unwrap();
        let mut inner = self.inner.lock().unwrap();
        let cursor = inner.cursors.entry(handle).or_insert(0);
        let available = body.bytes.len().saturating_sub(*cursor);
        let n = available.min(buf.len());
        buf[..n].copy_from_slice(&body.bytes[*cursor..*cursor + n]);
        *cursor += n;
        Ok(n)
    }

    async fn write(&self, handle: PipeId, data: &[u8]) -> Result<usize> {
        let body = self.body_for(handle)?;
        body.lock().unwrap().bytes.extend_from_slice(data);
        Ok(data.len())
    }

    fn eof(&self, handle: PipeId) -> Result<bool> {
        let body = self.body_for(handle)?;
        let body = body.lock().unwrap();
        let inner = self.inner.lock().unwrap();
        let cursor = inner.cursors.get(&handle).copied().unwrap_or(0);
        Ok(body.eof && cursor >= body.bytes.len())
    }

    fn cntl(&self, _handle: PipeId, opcode: CntlOp) -> Result<()> {
        match opcode {
            CntlOp::Nop | CntlOp::GetFlags => Ok(()),
            other => Err(Error::ProtocolError(format!(
                "InMemoryModule does not implement cntl opcode {other:?}"
            ))),
        }
    }

    fn deallocate(
        &self,
        _arena: &mut PipeArena,
        handle: PipeId,
        _error: bool,
        _purge: bool,
    ) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.bodies.remove(&handle);
        inner.cursors.remove(&handle);
        Ok(())
    }
}
