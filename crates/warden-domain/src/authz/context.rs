//! Per-path traversal state for the evaluator.

use std::collections::HashSet;
use std::sync::Arc;

/// Depth and visited `object#member` keys along the current path.
///
/// Branches share the visited set until one of them adds a key.
#[derive(Debug, Clone)]
pub(crate) struct TraversalContext {
    pub(crate) depth: u32,
    pub(crate) visited: Arc<HashSet<String>>,
}

impl TraversalContext {
    pub(crate) fn new() -> Self {
        Self {
            depth: 0,
            visited: Arc::new(HashSet::new()),
        }
    }

    /// Descends one level, recording `key` on the path.
    pub(crate) fn descend(&self, key: &str) -> Self {
        let mut visited = (*self.visited).clone();
        visited.insert(key.to_string());
        Self {
            depth: self.depth + 1,
            visited: Arc::new(visited),
        }
    }

    pub(crate) fn has_visited(&self, key: &str) -> bool {
        self.visited.contains(key)
    }
}
