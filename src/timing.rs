use crate::NodeId;

/// A handle into an instance's event-driven timing wheel: a min-heap of
/// scheduled callbacks keyed by emulated cycle count.
///
/// Out of scope for this crate (spec.md §1): the timing wheel itself is
/// the surrounding emulator core's. This trait states only what the
/// coordinator needs from it — (re)scheduling and descheduling the one
/// event each node owns.
pub trait TimingWheel: Send + Sync {
    /// Schedule node `id`'s event to fire `cycles` emulated cycles from
    /// now, replacing any existing schedule for it.
    fn schedule(&self, id: NodeId, cycles: i32);

    /// Deschedule node `id`'s event if one is pending. Returns the number
    /// of cycles that were remaining until it would have fired, or `None`
    /// if it wasn't scheduled.
    ///
    /// Returning the remaining delta directly (rather than a raw "when")
    /// is what lets `unload` treat descheduling as a single atomic
    /// snapshot instead of reproducing the source's deschedule/reschedule
    /// dance — see `SPEC_FULL.md` §9.
    fn deschedule(&self, id: NodeId) -> Option<i32>;
}
