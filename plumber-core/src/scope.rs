//! Request scope / RLS (spec §4.5, C7): a per-request lifetime container for
//! side objects, destroyed when the request's pending task count hits zero.

use crate::error::{Error, Result};

/// The closed `{free, copy, open, read, eos, close}` capability set from
/// spec §9 — only `free` is mandatory, the byte-stream half is optional and
/// defaults to "unsupported".
pub trait ScopeEntity: Send + Sync {
    /// Called once, in insertion order, when the owning scope is destroyed.
    fn free(&mut self) {}

    /// Clone this entity into a new scope slot, if it supports copying.
    fn copy(&self) -> Option<Box<dyn ScopeEntity>> {
        None
    }

    fn open(&mut self) -> Result<()> {
        Err(Error::InvalidArg("scope entity has no byte-stream interface".into()))
    }

    fn read(&mut self, _buf: &mut [u8]) -> Result<usize> {
        Err(Error::InvalidArg("scope entity has no byte-stream interface".into()))
    }

    fn eos(&self) -> bool {
        true
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// An application-visible scope token. Internally tokens are dense vector
/// indices starting at zero; the value handed out here is `index + 1` so
/// that zero is never a valid application-visible token (spec §3, §9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeToken(pub u64);

impl ScopeToken {
    fn index(self) -> Result<usize> {
        self.0
            .checked_sub(1)
            .ok_or_else(|| Error::InvalidArg("scope token 0 is never valid".into()))
            .map(|i| i as usize)
    }
}

/// Per-request container of side objects. Entities are freed, in insertion
/// order, when the scope itself is dropped — which happens exactly when the
/// owning request's pending task count reaches zero (spec §4.5, enforced by
/// [`crate::task::TaskTable`]).
#[derive(Default)]
pub struct RequestScope {
    entities: Vec<Option<Box<dyn ScopeEntity>>>,
}

impl RequestScope {
    pub fn new() -> Self {
        RequestScope::default()
    }

    pub fn add(&mut self, entity: Box<dyn ScopeEntity>) -> ScopeToken {
        self.entities.push(Some(entity));
        ScopeToken(self.entities.len() as u64)
    }

    pub fn get(&self, token: ScopeToken) -> Result<&dyn ScopeEntity> {
        let idx = token.index()?;
        self.entities
            .get(idx)
            .and_then(|slot| slot.as_deref())
            .ok_or_else(|| Error::InvalidArg(format!("no scope entity at token {token:?}")))
    }

    pub fn get_mut(&mut self, token: ScopeToken) -> Result<&mut Box<dyn ScopeEntity>> {
        let idx = token.index()?;
        self.entities
            .get_mut(idx)
            .and_then(|slot| slot.as_mut())
            .ok_or_else(|| Error::InvalidArg(format!("no scope entity at token {token:?}")))
    }

    /// Clone the entity at `token` via its `copy` callback into a new slot.
    pub fn copy(&mut self, token: ScopeToken) -> Result<ScopeToken> {
        let copied = self.get(token)?.copy().ok_or_else(|| {
            Error::InvalidArg(format!("scope entity at {token:?} does not support copy"))
        })?;
        Ok(self.add(copied))
    }

    pub fn len(&self) -> usize {
        self.entities.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for RequestScope {
    fn drop(&mut self) {
        for slot in self.entities.iter_mut() {
            if let Some(entity) = slot {
                entity.free();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Counted(Arc<AtomicUsize>);
    impl ScopeEntity for Counted {
        fn free(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn token_zero_is_never_valid() {
        let scope = RequestScope::new();
        assert!(scope.get(ScopeToken(0)).is_err());
    }

    #[test]
    fn entities_free_in_insertion_order_when_scope_drops() {
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        struct Tagged(usize, Arc<std::sync::Mutex<Vec<usize>>>);
        impl ScopeEntity for Tagged {
            fn free(&mut self) {
                self.1.lock().unwrap().push(self.0);
            }
        }

        let mut scope = RequestScope::new();
        scope.add(Box::new(Tagged(1, order.clone())));
        scope.add(Box::new(Tagged(2, order.clone())));
        scope.add(Box::new(Tagged(3, order.clone())));
        drop(scope);

        assert_eq!(*order.lock().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn free_runs_exactly_once_on_drop() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut scope = RequestScope::new();
        scope.add(Box::new(Counted(counter.clone())));
        drop(scope);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
