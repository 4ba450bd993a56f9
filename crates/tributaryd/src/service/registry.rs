//! Directory of requests currently admitted for execution.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::query::Request;

/// Active-request registry used for monitoring and cancellation.
pub trait RequestRegistry: Send + Sync {
    /// Registers `request` under its id.
    fn put(&self, request: Arc<Request>);

    /// Looks up a registered request.
    fn get(&self, id: &str) -> Option<Arc<Request>>;

    /// Removes a request; returns true if it was present.
    fn delete(&self, id: &str) -> bool;

    /// Visits every registered request until `visit` returns false.
    fn foreach(&self, visit: &mut dyn FnMut(&Arc<Request>) -> bool);

    /// Number of registered requests.
    fn count(&self) -> usize;
}

/// In-memory [`RequestRegistry`].
#[derive(Debug, Default)]
pub struct ActiveRequests {
    entries: RwLock<HashMap<String, Arc<Request>>>,
}

impl ActiveRequests {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl RequestRegistry for ActiveRequests {
    fn put(&self, request: Arc<Request>) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.insert(request.id().to_owned(), request);
    }

    fn get(&self, id: &str) -> Option<Arc<Request>> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.get(id).cloned()
    }

    fn delete(&self, id: &str) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.remove(id).is_some()
    }

    fn foreach(&self, visit: &mut dyn FnMut(&Arc<Request>) -> bool) {
        // Snapshot first so visitors may call back into the registry.
        let snapshot: Vec<Arc<Request>> = {
            let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
            entries.values().cloned().collect()
        };
        for request in &snapshot {
            if !visit(request) {
                break;
            }
        }
    }

    fn count(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_get_delete_round_trip() {
        let registry = ActiveRequests::new();
        let request = Arc::new(Request::default());
        let id = request.id().to_owned();

        registry.put(Arc::clone(&request));
        assert_eq!(registry.count(), 1);
        assert!(registry.get(&id).is_some_and(|found| Arc::ptr_eq(&found, &request)));

        assert!(registry.delete(&id));
        assert!(!registry.delete(&id), "second delete finds nothing");
        assert!(registry.get(&id).is_none());
    }

    #[test]
    fn foreach_stops_when_visitor_declines() {
        let registry = ActiveRequests::new();
        for _ in 0..3 {
            registry.put(Arc::new(Request::default()));
        }
        let mut seen = 0;
        registry.foreach(&mut |_| {
            seen += 1;
            seen < 2
        });
        assert_eq!(seen, 2);
    }

    #[test]
    fn visitors_may_remove_entries() {
        let registry = ActiveRequests::new();
        registry.put(Arc::new(Request::default()));
        registry.foreach(&mut |request| registry.delete(request.id()));
        assert_eq!(registry.count(), 0);
    }
}
