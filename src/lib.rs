//! A lockstep serial I/O coordinator for multi-instance handheld-console
//! emulation.
//!
//! One [`Lockstep`] is shared by every emulator instance taking part in a
//! multiplayer session. Each instance attaches a [`NodeHandle`], loads it
//! once its guest has configured a serial mode, and drives it from its own
//! emulation thread by forwarding register writes and scheduled timing
//! events into this crate. The CPU core, the guest's memory-mapped serial
//! registers, the interrupt controller, and the host's threading model are
//! all out of scope — this crate only states the interfaces it needs
//! against them, as [`HostBridge`], [`GuestRegisters`], and [`TimingWheel`].
//!
//! See `SPEC_FULL.md` for the full design.

mod bridge;
mod config;
mod error;
mod guest;
mod mask;
mod node;
mod phase;
mod protocol;
mod registers;
mod shared;
mod timing;

pub mod host;

/// A node's position in its session's roster, `0..MAX_PARTICIPANTS`. Node
/// `0` is always the master; every other id is a slave. Ids are dense and
/// reassigned on detach — see [`NodeHandle`]'s documentation for why that's
/// safe to hold across a detach.
pub type NodeId = u8;

/// The maximum number of instances one [`Lockstep`] can coordinate.
pub const MAX_PARTICIPANTS: usize = 4;

pub use bridge::HostBridge;
pub use config::LockstepConfig;
pub use error::{Error, Result};
pub use guest::{GuestRegisters, Mode};
pub use mask::NodeMask;
pub use node::{NodeHandle, RegisterAddress};
pub use phase::Phase;
pub use protocol::{PrimaryProtocol, TransferProtocol};
pub use shared::Lockstep;
pub use timing::TimingWheel;

pub(crate) use shared::guest_noop;
