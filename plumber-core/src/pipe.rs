//! Pipe handle and ownership (spec §3, §4.2, C3).
//!
//! A handle is an opaque value owned by exactly one task at a time. The
//! original C keeps a raw back-pointer to the owning task embedded in the
//! handle; here the handle only carries a [`PipeId`], and the arena that owns
//! the handle's metadata is a plain `Vec`, so the "handle owns task, task
//! owns handle" cycle described in spec §9 is broken by going through ids
//! instead of references.

use crate::error::{Error, Result};
use crate::flags::PipeFlags;
use crate::task::TaskKey;

/// Identifies a module implementation within a running scheduler.
pub type ModuleId = u8;

/// Index into a [`PipeArena`]. Stable for the lifetime of the handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PipeId(pub u32);

/// Per-pipe metadata tracked by the scheduler. The actual byte stream lives
/// in whichever [`crate::module::Module`] allocated the handle; this struct
/// only carries the bookkeeping the scheduler itself needs.
#[derive(Debug, Clone)]
pub struct PipeHandle {
    pub module: ModuleId,
    pub flags: PipeFlags,
    pub header_size: usize,
    pub error: bool,
    pub touched: bool,
    pub cancelled: bool,
    pub owner: Option<TaskKey>,
}

impl PipeHandle {
    pub fn new(module: ModuleId, flags: PipeFlags, header_size: usize) -> Self {
        PipeHandle {
            module,
            flags,
            header_size,
            error: false,
            touched: false,
            cancelled: false,
            owner: None,
        }
    }

    pub fn is_shadow(&self) -> bool {
        self.flags.is_shadow()
    }

    pub fn is_input(&self) -> bool {
        self.flags.is_input()
    }
}

/// Arena of live pipe handles, indexed by [`PipeId`]. Freed slots are reused
/// via a free list so long-running schedulers don't grow the arena
/// unboundedly.
#[derive(Debug, Default)]
pub struct PipeArena {
    slots: Vec<Option<PipeHandle>>,
    free: Vec<u32>,
}

impl PipeArena {
    pub fn new() -> Self {
        PipeArena::default()
    }

    /// Create a new handle, returning the id it was allocated at.
    pub fn allocate(&mut self, handle: PipeHandle) -> PipeId {
        if let Some(idx) = self.free.pop() {
            self.slots[idx as usize] = Some(handle);
            PipeId(idx)
        } else {
            self.slots.push(Some(handle));
            PipeId((self.slots.len() - 1) as u32)
        }
    }

    pub fn get(&self, id: PipeId) -> Result<&PipeHandle> {
        self.slots
            .get(id.0 as usize)
            .and_then(|slot| slot.as_ref())
            .ok_or_else(|| Error::InvalidArg(format!("no such pipe handle {:?}", id)))
    }

    pub fn get_mut(&mut self, id: PipeId) -> Result<&mut PipeHandle> {
        self.slots
            .get_mut(id.0 as usize)
            .and_then(|slot| slot.as_mut())
            .ok_or_else(|| Error::InvalidArg(format!("no such pipe handle {:?}", id)))
    }

    /// Transfer ownership of a handle to a new task. This is the only place
    /// the owner back-pointer is overwritten, keeping ownership transfer an
    /// atomic id swap rather than a pointer rewrite.
    pub fn assign_owner(&mut self, id: PipeId, owner: TaskKey) -> Result<()> {
        self.get_mut(id)?.owner = Some(owner);
        Ok(())
    }

    /// Destroy a handle, freeing its slot for reuse.
    pub fn deallocate(&mut self, id: PipeId) -> Result<PipeHandle> {
        let slot = self
            .slots
            .get_mut(id.0 as usize)
            .ok_or_else(|| Error::InvalidArg(format!("no such pipe handle {:?}", id)))?;
        let handle = slot
            .take()
            .ok_or_else(|| Error::InvalidArg(format!("pipe {:?} already deallocated", id)))?;
        self.free.push(id.0);
        Ok(handle)
    }

    pub fn mark_error(&mut self, id: PipeId) -> Result<()> {
        self.get_mut(id)?.error = true;
        Ok(())
    }

    pub fn mark_touched(&mut self, id: PipeId) -> Result<()> {
        self.get_mut(id)?.touched = true;
        Ok(())
    }

    pub fn mark_cancelled(&mut self, id: PipeId) -> Result<()> {
        self.get_mut(id)?.cancelled = true;
        Ok(())
    }

    /// Generic `SET_FLAG`/`CLR_FLAG` cntl opcodes (spec §6) operate on this
    /// scheduler-owned metadata directly rather than through a module, since
    /// `PipeFlags` lives in the arena, not in module-private state.
    pub fn set_flag(&mut self, id: PipeId, flag: PipeFlags) -> Result<()> {
        let handle = self.get_mut(id)?;
        handle.flags |= flag;
        Ok(())
    }

    pub fn clr_flag(&mut self, id: PipeId, flag: PipeFlags) -> Result<()> {
        let handle = self.get_mut(id)?;
        handle.flags -= flag;
        Ok(())
    }
}
