//! In-process registry of running job controllers.

use std::collections::HashMap;
use std::sync::RwLock;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::manifest::{JobId, JobState};

/// Handle to a running controller: its cancellation token and a watch on its
/// current lifecycle state.
#[derive(Clone)]
pub struct JobHandle {
    pub cancel: CancellationToken,
    pub state: watch::Receiver<JobState>,
}

/// Map of live controllers, keyed by job id. A job appears here for exactly
/// the span of its controller task.
pub struct JobRegistry {
    jobs: RwLock<HashMap<JobId, JobHandle>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
        }
    }

    pub fn register(&self, id: JobId, handle: JobHandle) {
        self.jobs.write().unwrap().insert(id, handle);
    }

    pub fn remove(&self, id: JobId) {
        self.jobs.write().unwrap().remove(&id);
    }

    pub fn get(&self, id: JobId) -> Option<JobHandle> {
        self.jobs.read().unwrap().get(&id).cloned()
    }

    pub fn contains(&self, id: JobId) -> bool {
        self.jobs.read().unwrap().contains_key(&id)
    }

    /// Number of live controllers.
    pub fn len(&self) -> usize {
        self.jobs.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_and_remove() {
        let registry = JobRegistry::new();
        assert!(registry.is_empty());

        let (_tx, rx) = watch::channel(JobState::Queued);
        registry.register(
            3,
            JobHandle {
                cancel: CancellationToken::new(),
                state: rx,
            },
        );
        assert!(registry.contains(3));
        assert_eq!(registry.len(), 1);
        assert!(registry.get(3).is_some());
        assert!(registry.get(4).is_none());

        registry.remove(3);
        assert!(registry.is_empty());
    }
}
