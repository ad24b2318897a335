use std::fmt;

use bit_set::BitSet;

/// Handle to one trackable entity in a [`ValidityGraph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ValidityId(pub usize);

impl fmt::Display for ValidityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// Change-propagation graph over trackable entities.
///
/// An entity may track any number of other entities; when a tracked entity
/// emits an update, every entity that transitively tracks it is notified
/// exactly once per originating event, regardless of how many distinct paths
/// reach it or whether the tracking relation contains cycles. Propagation is
/// synchronous: it completes before [`ValidityGraph::notify_updated`] returns.
///
/// Edges are stored as index lists in both directions so that a single
/// `track`/`untrack` call rewires exactly one edge, and the wave traversal
/// walks the transpose ("who tracks me") without rebuilding anything.
#[derive(Debug, Default)]
pub struct ValidityGraph {
    /// tracks[n] = entities that n observes.
    tracks: Vec<Vec<ValidityId>>,
    /// tracked_by[n] = entities observing n (transpose of `tracks`).
    tracked_by: Vec<Vec<ValidityId>>,
    /// Per-wave visited mark, cleared at the start of each propagation.
    mark: BitSet,
}

impl ValidityGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self) -> ValidityId {
        let id = ValidityId(self.tracks.len());
        self.tracks.push(Vec::new());
        self.tracked_by.push(Vec::new());
        id
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    /// Make `observer` treat updates of `target` as updates of itself.
    /// Duplicate edges are collapsed.
    pub fn track(&mut self, observer: ValidityId, target: ValidityId) {
        if !self.tracks[observer.0].contains(&target) {
            self.tracks[observer.0].push(target);
            self.tracked_by[target.0].push(observer);
        }
    }

    /// Remove the single `observer -> target` tracking edge, if present.
    pub fn untrack(&mut self, observer: ValidityId, target: ValidityId) {
        self.tracks[observer.0].retain(|t| *t != target);
        self.tracked_by[target.0].retain(|o| *o != observer);
    }

    /// Entity `origin` was mutated. Fires `on_node` exactly once for each
    /// distinct entity reachable through tracking edges, the origin included.
    pub fn notify_updated(&mut self, origin: ValidityId, mut on_node: impl FnMut(ValidityId)) {
        self.mark.make_empty();
        let mut stack = vec![origin];
        while let Some(node) = stack.pop() {
            if !self.mark.insert(node.0) {
                continue;
            }
            on_node(node);
            for observer in &self.tracked_by[node.0] {
                if !self.mark.contains(observer.0) {
                    stack.push(*observer);
                }
            }
        }
    }

    /// Convenience form of [`ValidityGraph::notify_updated`] collecting the
    /// affected wave.
    pub fn invalidate(&mut self, origin: ValidityId) -> Vec<ValidityId> {
        let mut wave = Vec::new();
        self.notify_updated(origin, |n| wave.push(n));
        log::trace!("invalidation wave from {origin} reached {} nodes", wave.len());
        wave
    }
}
