use thiserror::Error;

use crate::MAX_PARTICIPANTS;

/// Errors the coordinator can report.
///
/// Per the propagation policy: [`RosterFull`](Error::RosterFull) is an
/// ordinary condition a caller is expected to handle (the UI layer reports
/// it and moves on). The other two variants indicate a broken contract
/// between the coordinator and its host bridge and are not recoverable —
/// callers should not attempt to continue the session after seeing one.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// `attach` was called with [`MAX_PARTICIPANTS`] nodes already attached.
    #[error("roster is full ({MAX_PARTICIPANTS} nodes already attached)")]
    RosterFull,

    /// [`HostBridge::wait`](crate::HostBridge::wait) returned `false` while
    /// the master required blocking. The reference implementation this
    /// crate is modeled on treats this as an unconditional abort; this
    /// crate instead returns the error from [`Lockstep::advance`] so the
    /// caller decides, but [`NodeHandle::process_event`] aborts on it to
    /// preserve the original contract for code that doesn't check.
    ///
    /// [`Lockstep::advance`]: crate::Lockstep::advance
    /// [`NodeHandle::process_event`]: crate::NodeHandle::process_event
    #[error("host bridge wait() returned false while the master required blocking")]
    WaitFailed,

    /// An internal cycle credit would have gone negative before being
    /// forwarded to [`HostBridge::add_cycles`](crate::HostBridge::add_cycles).
    /// This indicates a coordinator bug, not embedder misbehavior.
    #[error("internal cycle credit went negative")]
    NegativeCycles,
}

pub type Result<T> = std::result::Result<T, Error>;
