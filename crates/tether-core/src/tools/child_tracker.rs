// Child tracker for agent-as-tool
//
// Tracks the tool calls a nested run discovers under one parent call so
// the loop can publish one ToolCallUpdated per distinct growth of the
// expected-children total. The total never decreases; a burst of
// discoveries coalesces through the edge-triggered update flag.

use parking_lot::Mutex;

use tether_contracts::ToolCallId;

struct Inner {
    /// Ordered set of discovered child ids
    children: Vec<ToolCallId>,
    needs_update: bool,
}

/// Per-parent tracker of discovered nested tool calls
pub struct ChildTracker {
    inner: Mutex<Inner>,
}

impl ChildTracker {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                children: Vec::new(),
                needs_update: false,
            }),
        }
    }

    /// Register newly-discovered children. Returns true iff at least one
    /// id was new; duplicates never grow the set.
    pub fn register_discovered(&self, ids: &[ToolCallId]) -> bool {
        let mut inner = self.inner.lock();
        let before = inner.children.len();
        for id in ids {
            if !inner.children.contains(id) {
                inner.children.push(id.clone());
            }
        }
        let grew = inner.children.len() > before;
        if grew {
            inner.needs_update = true;
        }
        grew
    }

    /// Current cardinality of the child set
    pub fn current_total(&self) -> usize {
        self.inner.lock().children.len()
    }

    /// Whether a growth has not yet been announced
    pub fn needs_update(&self) -> bool {
        self.inner.lock().needs_update
    }

    /// Clear the pending-update edge after announcing
    pub fn mark_updated(&self) {
        self.inner.lock().needs_update = false;
    }
}

impl Default for ChildTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(names: &[&str]) -> Vec<ToolCallId> {
        names.iter().map(|n| ToolCallId::new(*n)).collect()
    }

    #[test]
    fn test_register_returns_true_only_on_growth() {
        let tracker = ChildTracker::new();

        assert!(tracker.register_discovered(&ids(&["a", "b"])));
        assert_eq!(tracker.current_total(), 2);

        // Same ids again: no growth.
        assert!(!tracker.register_discovered(&ids(&["a", "b"])));
        assert_eq!(tracker.current_total(), 2);

        // One new among known: growth.
        assert!(tracker.register_discovered(&ids(&["b", "c"])));
        assert_eq!(tracker.current_total(), 3);
    }

    #[test]
    fn test_total_is_monotone() {
        let tracker = ChildTracker::new();
        let mut last = 0;
        for batch in [&["a"][..], &["a"][..], &["b", "c"][..], &[][..]] {
            let batch_ids: Vec<ToolCallId> =
                batch.iter().map(|n| ToolCallId::new(*n)).collect();
            tracker.register_discovered(&batch_ids);
            let total = tracker.current_total();
            assert!(total >= last);
            last = total;
        }
    }

    #[test]
    fn test_update_flag_is_edge_triggered() {
        let tracker = ChildTracker::new();
        assert!(!tracker.needs_update());

        tracker.register_discovered(&ids(&["a"]));
        assert!(tracker.needs_update());

        // Burst before announcing: still a single pending edge.
        tracker.register_discovered(&ids(&["b"]));
        assert!(tracker.needs_update());

        tracker.mark_updated();
        assert!(!tracker.needs_update());

        // No growth, no new edge.
        tracker.register_discovered(&ids(&["a"]));
        assert!(!tracker.needs_update());
    }

    #[test]
    fn test_empty_registration_never_grows() {
        let tracker = ChildTracker::new();
        assert!(!tracker.register_discovered(&[]));
        assert_eq!(tracker.current_total(), 0);
    }
}
