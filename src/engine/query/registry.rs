use ahash::AHashMap;
use std::sync::{Arc, Mutex};
use tracing::debug;

use crate::engine::errors::QueryError;
use crate::engine::query::query::Query;
use crate::engine::query::query_id::QueryId;
use crate::shared::config::CONFIG;

const LOG_TARGET: &str = "engine::query::registry";

/// Process-wide map of live queries, capped by configuration.
pub struct QueryRegistry {
    queries: Mutex<AHashMap<QueryId, Arc<Query>>>,
    cap: usize,
}

impl QueryRegistry {
    pub fn new() -> Self {
        Self {
            queries: Mutex::new(AHashMap::new()),
            cap: CONFIG.server.requests_cap.max(1),
        }
    }

    pub fn with_cap(cap: usize) -> Self {
        Self {
            queries: Mutex::new(AHashMap::new()),
            cap: cap.max(1),
        }
    }

    pub fn insert(&self, query: Arc<Query>) -> Result<(), QueryError> {
        let mut queries = self.queries.lock().unwrap();
        if queries.contains_key(&query.id()) {
            return Err(QueryError::DuplicateId(query.id().to_string()));
        }
        if queries.len() >= self.cap {
            return Err(QueryError::ResourceBusy);
        }
        debug!(target: LOG_TARGET, query_id = %query.id(), total = queries.len() + 1, "Registered query");
        queries.insert(query.id(), query);
        Ok(())
    }

    pub fn get(&self, id: QueryId) -> Result<Arc<Query>, QueryError> {
        self.queries
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or_else(|| QueryError::NotFound(id.to_string()))
    }

    pub fn remove(&self, id: QueryId) -> Option<Arc<Query>> {
        let removed = self.queries.lock().unwrap().remove(&id);
        if removed.is_some() {
            debug!(target: LOG_TARGET, query_id = %id, "Freed query");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.queries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queries.lock().unwrap().is_empty()
    }

    /// Snapshot of all live queries, for liveness fan-out.
    pub fn all(&self) -> Vec<Arc<Query>> {
        self.queries.lock().unwrap().values().cloned().collect()
    }
}

impl Default for QueryRegistry {
    fn default() -> Self {
        Self::new()
    }
}
