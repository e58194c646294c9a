// Two-level progress computation
//
// A batch is a list of whole units; the unit currently in flight may
// report its own sub-progress, which counts as a fraction of one unit.

use parking_lot::Mutex;

use std::sync::Arc;

use super::models::ProgressSnapshot;
use super::traits::StatusSink;

/// `100 × (completed + fraction) / total`, 0 for an empty batch
pub fn two_level_percent(completed: usize, fraction: f64, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let value = 100.0 * (completed as f64 + fraction.max(0.0)) / total as f64;
    value.clamp(0.0, 100.0)
}

/// Keeps published progress from moving backwards within one batch.
///
/// Units can discover more sub-work while running (a channel yielding
/// playlists), which would otherwise shrink their fraction.
#[derive(Debug, Default)]
pub struct ProgressTracker {
    last: Mutex<Option<ProgressSnapshot>>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the snapshot to publish, adjusted so that `completed`
    /// and the percentage never decrease.
    pub fn observe(&self, snapshot: ProgressSnapshot) -> ProgressSnapshot {
        let mut last = self.last.lock();
        let adjusted = match *last {
            Some(prev) => {
                let mut next = snapshot;
                next.completed = next.completed.max(prev.completed);
                next.total = next.total.max(next.completed);
                let floor = prev.percent();
                if next.percent() < floor {
                    next.fraction = fraction_for(floor, next.completed, next.total);
                    if next.percent() < floor {
                        // float rounding
                        next.fraction += 1e-9;
                    }
                }
                next
            }
            None => snapshot,
        };
        *last = Some(adjusted);
        adjusted
    }

    pub fn last(&self) -> Option<ProgressSnapshot> {
        *self.last.lock()
    }

    pub fn reset(&self) {
        *self.last.lock() = None;
    }
}

/// Completion of a batch whose top-level units grow sub-work while
/// running. A unit counts as whole once all of its work is finished;
/// until then it contributes `finished / discovered`.
#[derive(Debug, Default)]
pub struct UnitProgress {
    units: Mutex<Vec<(usize, usize)>>,
}

impl UnitProgress {
    /// Each unit starts with one piece of work: its own task
    pub fn new(units: usize) -> Self {
        Self {
            units: Mutex::new(vec![(0, 1); units]),
        }
    }

    pub fn units(&self) -> usize {
        self.units.lock().len()
    }

    /// Register newly discovered work under `unit`
    pub fn discover(&self, unit: usize, count: usize) {
        if let Some(entry) = self.units.lock().get_mut(unit) {
            entry.1 += count;
        }
    }

    pub fn finish(&self, unit: usize) {
        if let Some(entry) = self.units.lock().get_mut(unit) {
            entry.0 = (entry.0 + 1).min(entry.1);
        }
    }

    pub fn snapshot(&self, active_workers: usize, errored: usize) -> ProgressSnapshot {
        let units = self.units.lock();
        let completed = units.iter().filter(|(done, total)| done >= total).count();
        let fraction: f64 = units
            .iter()
            .filter(|(done, total)| done < total)
            .map(|(done, total)| *done as f64 / *total as f64)
            .sum();
        ProgressSnapshot::new(completed, units.len(), active_workers, errored).with_fraction(fraction)
    }
}

/// Sink wrapper that routes progress through a `ProgressTracker`
pub struct MonotonicSink {
    inner: Arc<dyn StatusSink>,
    tracker: ProgressTracker,
    /// Held across observe + forward so the inner sink sees the same order
    publishing: Mutex<()>,
}

impl MonotonicSink {
    pub fn new(inner: Arc<dyn StatusSink>) -> Self {
        Self {
            inner,
            tracker: ProgressTracker::new(),
            publishing: Mutex::new(()),
        }
    }

    pub fn last(&self) -> Option<ProgressSnapshot> {
        self.tracker.last()
    }
}

impl StatusSink for MonotonicSink {
    fn on_status(&self, message: &str) {
        self.inner.on_status(message);
    }

    fn on_progress(&self, snapshot: &ProgressSnapshot) {
        let _publishing = self.publishing.lock();
        let adjusted = self.tracker.observe(*snapshot);
        self.inner.on_progress(&adjusted);
    }

    fn on_item_progress(&self, item_id: &str, percent: f32, status: &str) {
        self.inner.on_item_progress(item_id, percent, status);
    }
}

fn fraction_for(percent: f64, completed: usize, total: usize) -> f64 {
    (percent * total as f64 / 100.0 - completed as f64).max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_batch_is_zero_percent() {
        assert_eq!(two_level_percent(0, 0.0, 0), 0.0);
        assert_eq!(two_level_percent(3, 0.5, 0), 0.0);
    }

    #[test]
    fn fraction_of_in_flight_unit_counts() {
        assert_eq!(two_level_percent(1, 0.5, 4), 37.5);
        assert_eq!(two_level_percent(4, 0.0, 4), 100.0);
        assert_eq!(two_level_percent(4, 0.9, 4), 100.0);
    }

    #[test]
    fn tracker_never_moves_backwards() {
        let tracker = ProgressTracker::new();
        let first = tracker.observe(ProgressSnapshot::new(1, 4, 1, 0).with_fraction(0.5));
        assert_eq!(first.percent(), 37.5);

        // Sub-work discovered more children: raw fraction dropped
        let second = tracker.observe(ProgressSnapshot::new(1, 4, 2, 0).with_fraction(0.25));
        assert_eq!(second.percent(), first.percent());
        assert_eq!(second.completed, 1);

        let third = tracker.observe(ProgressSnapshot::new(2, 4, 0, 0));
        assert_eq!(third.percent(), 50.0);
    }

    #[test]
    fn units_complete_only_when_all_work_is_done() {
        let progress = UnitProgress::new(2);
        assert_eq!(progress.snapshot(2, 0).percent(), 0.0);

        // unit 0 was a playlist: its task finished after finding 3 entries
        progress.discover(0, 3);
        progress.finish(0);
        let snap = progress.snapshot(3, 0);
        assert_eq!(snap.completed, 0);
        assert_eq!(snap.fraction, 0.25);

        progress.finish(1);
        for _ in 0..3 {
            progress.finish(0);
        }
        let done = progress.snapshot(0, 0);
        assert_eq!((done.completed, done.total), (2, 2));
        assert_eq!(done.percent(), 100.0);
    }

    #[test]
    fn empty_unit_progress_is_zero() {
        let progress = UnitProgress::new(0);
        assert_eq!(progress.snapshot(0, 0).percent(), 0.0);
    }
}
