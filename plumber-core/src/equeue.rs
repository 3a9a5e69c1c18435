//! Event queue (spec §4.8, C10): the channel modules use to tell the
//! dispatcher "something happened on one of your pipes".
//!
//! Grounded on the original `itc/equeue.c`'s wait/take/put contract — an
//! interest-masked, multi-producer single-consumer queue — but rendered with
//! `tokio::sync::mpsc` per REDESIGN FLAG #3 in SPEC_FULL.md rather than a
//! hand-rolled ring buffer guarded by two condvars. Events outside the
//! current interest mask are held in a small side buffer instead of being
//! re-queued into the channel, since `mpsc` has no "push back to the front"
//! primitive.

use std::collections::{HashSet, VecDeque};

use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::pipe::{ModuleId, PipeId};

/// One thing a module reported to the dispatcher.
#[derive(Debug, Clone)]
pub enum Event {
    /// A new boundary request is ready for `accept()`.
    Accept { module: ModuleId },
    /// New bytes (or EOF) are available to read on `pipe`.
    DataReady { module: ModuleId, pipe: PipeId },
    /// The module's event source is exhausted; no more events will follow.
    Exhausted { module: ModuleId },
}

impl Event {
    pub fn module(&self) -> ModuleId {
        match self {
            Event::Accept { module } => *module,
            Event::DataReady { module, .. } => *module,
            Event::Exhausted { module } => *module,
        }
    }
}

/// A cloneable producer handle, given out to each registered module.
#[derive(Clone)]
pub struct EventHandle {
    tx: mpsc::Sender<Event>,
}

impl EventHandle {
    pub async fn post(&self, event: Event) -> Result<()> {
        self.tx.send(event).await.map_err(|_| Error::Shutdown)
    }

    pub fn try_post(&self, event: Event) -> Result<()> {
        self.tx.try_send(event).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => Error::WouldBlock,
            mpsc::error::TrySendError::Closed(_) => Error::Shutdown,
        })
    }
}

/// The dispatcher's consuming end: bounded capacity (spec §4.8's backpressure
/// requirement) plus a small side buffer for events outside the current
/// interest mask.
pub struct EventQueue {
    rx: mpsc::Receiver<Event>,
    tx: mpsc::Sender<Event>,
    deferred: VecDeque<Event>,
}

impl EventQueue {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        EventQueue { rx, tx, deferred: VecDeque::new() }
    }

    pub fn handle(&self) -> EventHandle {
        EventHandle { tx: self.tx.clone() }
    }

    /// Wait for the next event whose module is in `interest`. Events for
    /// modules outside the mask are held back, in arrival order, until a
    /// later call's mask admits them.
    pub async fn wait(&mut self, interest: &HashSet<ModuleId>) -> Option<Event> {
        if let Some(pos) = self.deferred.iter().position(|e| interest.contains(&e.module())) {
            return self.deferred.remove(pos);
        }
        loop {
            let event = self.rx.recv().await?;
            if interest.contains(&event.module()) {
                return Some(event);
            }
            self.deferred.push_back(event);
        }
    }
}
