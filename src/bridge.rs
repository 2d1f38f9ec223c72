use crate::{mask::NodeMask, NodeId};

/// The threading/cycle-accounting primitives the embedder supplies.
///
/// `Lockstep` never spawns or parks a thread itself — every suspension
/// point in the phase machine goes through one of these six calls, so the
/// surrounding application's threading model (one OS thread per emulator
/// instance, in the reference design) stays entirely outside this crate.
///
/// # Lock discipline
///
/// `Lockstep` releases its internal state lock before calling `wait` or
/// `signal` — an implementation is free to block the calling thread for
/// as long as it needs to without risking a deadlock against another
/// node's thread trying to acquire that same lock to wake it. `wait` is
/// only ever called from the master's update path; `signal` can target
/// either the master or a slave depending on which phase just ran.
pub trait HostBridge: Send + Sync {
    /// Wake every node named in `mask`. Returns whether at least one node
    /// was actually asleep and got woken.
    fn signal(&self, mask: NodeMask) -> bool;

    /// Mark the calling (master) thread as waiting on every node in
    /// `mask`, then park it. Returns whether it actually slept. The
    /// master update path treats a `false` return as fatal: the host
    /// threading contract is broken and the session cannot proceed.
    fn wait(&self, mask: NodeMask) -> bool;

    /// Credit `cycles` to node `id`'s cycle bank. `id == 0` means credit
    /// every slave at once. `cycles` is never negative when called by
    /// this crate (see [`crate::Error::NegativeCycles`]).
    fn add_cycles(&self, id: NodeId, cycles: i32);

    /// Debit `cycles` from node `id`'s cycle bank and return the
    /// resulting balance. Implementations should park the node's thread
    /// once the balance reaches zero or below.
    fn use_cycles(&self, id: NodeId, cycles: i32) -> i32;

    /// Read node `id`'s current cycle bank balance without debiting it.
    fn unused_cycles(&self, id: NodeId) -> i32;

    /// Notify the embedder that node `id` is unloading — typically: wake
    /// its emulator thread so it observes the shutdown, and zero its
    /// posted cycles.
    fn unload(&self, id: NodeId);
}
