use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use cadence_core::error::Result;
use cadence_core::event::EventBus;
use cadence_core::types::{CadenceEvent, ExecutionId};
use cadence_store::SqliteStore;

/// In-memory chain state of one running execution.
///
/// Remaining steps form a singly-linked chain: `head` is the first unsent
/// step and `links[i]` the step after `i`. `current` is the step most
/// recently handed to the sender.
struct RuntimeState {
    token: CancellationToken,
    node_ids: Vec<String>,
    head: Option<usize>,
    links: Vec<Option<usize>>,
    current: Option<usize>,
}

impl RuntimeState {
    fn successor(&self) -> Option<usize> {
        match self.current {
            None => self.head,
            Some(i) => self.links.get(i).copied().flatten(),
        }
    }
}

/// Chain state of every execution with steps still to fire.
#[derive(Default)]
pub struct ExecutionRegistry {
    inner: Mutex<HashMap<ExecutionId, RuntimeState>>,
}

impl ExecutionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ExecutionId, RuntimeState>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Start tracking a chain over `node_ids`, in firing order.
    pub fn register(&self, id: &ExecutionId, node_ids: Vec<String>, token: CancellationToken) {
        let len = node_ids.len();
        let links = (0..len).map(|i| (i + 1 < len).then_some(i + 1)).collect();
        let state = RuntimeState {
            token,
            head: (len > 0).then_some(0),
            node_ids,
            links,
            current: None,
        };
        self.lock().insert(id.clone(), state);
    }

    pub fn contains(&self, id: &ExecutionId) -> bool {
        self.lock().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Index and node id of the next step to fire, if any.
    pub fn successor(&self, id: &ExecutionId) -> Option<(usize, String)> {
        let map = self.lock();
        let state = map.get(id)?;
        let idx = state.successor()?;
        Some((idx, state.node_ids[idx].clone()))
    }

    /// Move `current` to `idx`, provided `idx` is still the successor and the
    /// chain has not been cut. Returns false otherwise.
    pub fn advance(&self, id: &ExecutionId, idx: usize) -> bool {
        let mut map = self.lock();
        let Some(state) = map.get_mut(id) else {
            return false;
        };
        if state.token.is_cancelled() || state.successor() != Some(idx) {
            return false;
        }
        state.current = Some(idx);
        true
    }

    /// Stop tracking an execution that ran to the end. Returns false when the
    /// chain had already been cut.
    pub fn remove(&self, id: &ExecutionId) -> bool {
        self.lock().remove(id).is_some()
    }

    /// Cancel the execution's token, collect every step downstream of
    /// `current` and sever the chain. `None` when the execution is not
    /// tracked.
    pub fn cut(&self, id: &ExecutionId) -> Option<Vec<String>> {
        let mut map = self.lock();
        // Removing the entry severs the chain: `successor` and `advance`
        // see nothing for this id from here on.
        let state = map.remove(id)?;
        state.token.cancel();

        let mut downstream = Vec::new();
        let mut next = state.successor();
        while let Some(i) = next {
            downstream.push(state.node_ids[i].clone());
            next = state.links.get(i).copied().flatten();
        }
        Some(downstream)
    }
}

/// Outcome of a cancellation request for one execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    Cancelled { steps: usize },
    AlreadyCancelled,
}

/// Stops executions: cuts the in-memory chain and moves pending steps to
/// `cancelled`. Each execution is cancelled at most once.
pub struct CancellationController {
    registry: Arc<ExecutionRegistry>,
    store: Arc<SqliteStore>,
    events: Arc<EventBus>,
}

impl CancellationController {
    pub fn new(
        registry: Arc<ExecutionRegistry>,
        store: Arc<SqliteStore>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            registry,
            store,
            events,
        }
    }

    pub fn cancel(&self, id: &ExecutionId) -> Result<CancelOutcome> {
        // Errors on an unknown id before touching anything.
        self.store.execution_status(id)?;

        let downstream = self.registry.cut(id);
        if !self.store.mark_cancelled_once(id, Utc::now())? {
            debug!(execution_id = %id, "Execution already cancelled");
            return Ok(CancelOutcome::AlreadyCancelled);
        }

        let steps = match downstream {
            Some(node_ids) => self.store.cancel_steps(id, &node_ids)?,
            None => self.store.cancel_all_pending(id)?,
        };

        info!(execution_id = %id, cancelled_steps = steps, "Execution cancelled");
        self.events.publish(CadenceEvent::ExecutionCancelled {
            execution_id: id.clone(),
            cancelled_steps: steps,
        });
        Ok(CancelOutcome::Cancelled { steps })
    }

    /// Cancel every live execution of `cadence_id` for one contact. Returns
    /// how many were newly cancelled.
    pub fn cancel_execution(
        &self,
        owner_id: &str,
        contact_id: &str,
        cadence_id: &str,
    ) -> Result<usize> {
        let mut cancelled = 0;
        for id in self
            .store
            .active_executions_for(owner_id, contact_id, cadence_id)?
        {
            if let CancelOutcome::Cancelled { .. } = self.cancel(&id)? {
                cancelled += 1;
            }
        }
        Ok(cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain(ids: &[&str]) -> (ExecutionRegistry, ExecutionId, CancellationToken) {
        let registry = ExecutionRegistry::new();
        let id = ExecutionId::new();
        let token = CancellationToken::new();
        registry.register(
            &id,
            ids.iter().map(|s| s.to_string()).collect(),
            token.clone(),
        );
        (registry, id, token)
    }

    #[test]
    fn test_walk_chain_in_order() {
        let (registry, id, _) = chain(&["a", "b", "c"]);
        let mut seen = Vec::new();
        while let Some((idx, node)) = registry.successor(&id) {
            assert!(registry.advance(&id, idx));
            seen.push(node);
        }
        assert_eq!(seen, vec!["a", "b", "c"]);
        assert!(registry.remove(&id));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_cut_collects_downstream_and_severs() {
        let (registry, id, token) = chain(&["a", "b", "c"]);
        let (idx, _) = registry.successor(&id).unwrap();
        registry.advance(&id, idx);

        let downstream = registry.cut(&id).unwrap();
        assert_eq!(downstream, vec!["b", "c"]);
        assert!(token.is_cancelled());
        assert!(registry.successor(&id).is_none());
        assert!(!registry.advance(&id, 1));
        assert!(!registry.remove(&id));
        assert!(registry.cut(&id).is_none());
    }

    #[test]
    fn test_cut_before_first_step() {
        let (registry, id, _) = chain(&["a", "b"]);
        assert_eq!(registry.cut(&id).unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn test_stale_index_does_not_advance() {
        let (registry, id, _) = chain(&["a", "b"]);
        assert!(!registry.advance(&id, 1));
        assert!(registry.advance(&id, 0));
        assert!(!registry.advance(&id, 0));
    }
}
