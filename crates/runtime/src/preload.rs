use roam_common::WorldUrl;
use std::collections::VecDeque;

/// Queue of resident worlds still waiting for collision geometry.
///
/// Rebuilt at the end of every sync; drained one entry per pump by the
/// orchestrator so background collision loading never blocks the main
/// loop. Entries can go stale (world flushed, or collision loaded eagerly
/// by a later sync); the orchestrator re-validates each entry when its
/// turn comes and simply drops stale ones.
#[derive(Debug, Clone, Default)]
pub struct CollisionBacklog {
    queue: VecDeque<WorldUrl>,
}

impl CollisionBacklog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the backlog with a fresh set of candidates, nearest first.
    pub fn rebuild(&mut self, candidates: impl IntoIterator<Item = WorldUrl>) {
        self.queue = candidates.into_iter().collect();
    }

    pub fn pop(&mut self) -> Option<WorldUrl> {
        self.queue.pop_front()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}
