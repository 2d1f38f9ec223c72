use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use log::error;

use crate::config::LockstepConfig;
use crate::guest::{GuestRegisters, Mode};
use crate::phase::{self, Phase};
use crate::protocol::{PrimaryProtocol, TransferProtocol};
use crate::registers::{
    CNT_MULTI_READ_ONLY_MASK, CNT_MULTI_WRITABLE_MASK, CNT_NORMAL_FREQUENCY_HIGH,
    CNT_NORMAL_WRITABLE_MASK, CNT_START, MULTI_RECV_EMPTY,
};
use crate::shared::{Lockstep, LockstepState};
use crate::timing::TimingWheel;
use crate::{NodeId, MAX_PARTICIPANTS};

/// Which guest-visible serial register a write targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterAddress {
    Control,
    MultiSend,
    Data8,
    Data32Lo,
    Data32Hi,
}

/// An embedder's handle onto one attached node.
///
/// Carries no back-pointer into the session's per-node state beyond a
/// shared index cell: `detach` rewrites that cell in place when the
/// roster shifts, so a `NodeHandle` never dangles or silently starts
/// referring to a different node after a sibling detaches (spec.md §9).
pub struct NodeHandle {
    pub(crate) id: Arc<AtomicU8>,
    pub(crate) lockstep: Arc<Lockstep>,
}

impl NodeHandle {
    /// This node's current position in the roster. Can change across a
    /// call to [`detach`](Self::detach) on a lower-indexed sibling.
    pub fn id(&self) -> NodeId {
        self.id.load(Ordering::Acquire)
    }

    /// Marks this node as actively driving a transfer in `mode`,
    /// installing the embedder's register and timing views for it.
    ///
    /// Call this once the guest has configured its SIO mode; before
    /// `load`, the node occupies a roster slot but never participates in
    /// a transfer.
    pub fn load(&self, mode: Mode, guest: Arc<dyn GuestRegisters>, timing: Arc<dyn TimingWheel>) {
        let id = self.id();
        let mut state = self.lockstep.state.lock();
        let was_multi = state.slot(id).mode == Mode::Multi;
        {
            let slot = state.slot_mut(id);
            slot.mode = mode;
            slot.loaded = true;
            slot.guest = guest;
            slot.timing = timing;
            slot.transfer_finished = true;
        }
        match (was_multi, mode == Mode::Multi) {
            (false, true) => state.attached_multi += 1,
            (true, false) => state.attached_multi -= 1,
            _ => {}
        }
    }

    /// Marks this node as no longer driving a transfer, descheduling its
    /// pending event and notifying the host bridge so its thread observes
    /// the shutdown (spec.md §4.1).
    ///
    /// Flushes the transfer this node was party to regardless of phase:
    /// every `multiRecv` slot resets to the empty sentinel, and this
    /// node's own transfer-finish step runs so a sibling never later
    /// reads a slot this node never got to fill in. If this node is the
    /// master, the phase machine has nobody left to drive it forward, so
    /// it is forced back to `Idle` and whatever cycles the master had
    /// already banked for the next tick are flushed to the other nodes
    /// now rather than never.
    pub fn unload(&self) {
        let id = self.id();
        let mut state = self.lockstep.state.lock();
        if state.slot(id).mode == Mode::Multi {
            state.attached_multi -= 1;
        }
        let timing = Arc::clone(&state.slot(id).timing);

        state.multi_recv = [MULTI_RECV_EMPTY; MAX_PARTICIPANTS];
        phase::finish_transfer(&mut state, id);

        {
            let slot = state.slot_mut(id);
            slot.loaded = false;
            slot.mode = Mode::Other;
        }

        let mut master_event_diff = 0;
        if id == 0 {
            state.phase = Phase::Idle;
            master_event_diff = state.slot(0).event_diff;
            state.slot_mut(0).event_diff = 0;
        }

        drop(state);
        timing.deschedule(id);
        if master_event_diff > 0 {
            self.lockstep.bridge.add_cycles(0, master_event_diff);
        }
        self.lockstep.bridge.unload(id);
    }

    /// Removes this node from the roster. The caller must have already
    /// called [`unload`](Self::unload) to drain any in-flight transfer.
    pub fn detach(&self) {
        self.lockstep.detach(self);
    }

    /// Applies a guest register write, returning the value that should be
    /// reflected back through the memory-mapped register after masking
    /// (spec.md §4.2).
    pub fn write_register(&self, address: RegisterAddress, value: u16) -> u16 {
        let id = self.id();
        let mut state = self.lockstep.state.lock();
        let mode = state.slot(id).mode;
        match (mode, address) {
            (Mode::Multi, RegisterAddress::Control) => {
                multi_write_register(&mut state, &self.lockstep.config, &self.lockstep.protocol, id, value)
            }
            (Mode::Normal32, RegisterAddress::Control) => {
                normal_write_register(&mut state, &self.lockstep.config, &self.lockstep.protocol, id, value)
            }
            _ => value,
        }
    }

    /// Called by the embedder's timing wheel when this node's scheduled
    /// event fires. Aborts the process on an unrecoverable coordinator
    /// error, matching the reference implementation's contract — callers
    /// that need to recover instead should drive the phase machine
    /// through [`Lockstep::advance`](crate::Lockstep::advance) directly.
    pub fn process_event(&self, cycles_late: i32) {
        let id = self.id();
        if let Err(err) = self.lockstep.advance(id, cycles_late) {
            error!("node {} hit an unrecoverable lockstep error: {}", id, err);
            std::process::abort();
        }
    }
}

/// Handles a write to the multiplayer control register, including the
/// start-bit transition that kicks off a transfer (master only).
fn multi_write_register(
    state: &mut LockstepState,
    config: &LockstepConfig,
    protocol: &PrimaryProtocol,
    id: NodeId,
    value: u16,
) -> u16 {
    let old = state.slot(id).guest.multi_control();
    let mut masked = (value & CNT_MULTI_WRITABLE_MASK) | (old & CNT_MULTI_READ_ONLY_MASK);

    if masked & CNT_START != 0 && state.phase == Phase::Idle {
        let starting = id == 0 && state.ready;
        if starting {
            let baud = (masked & 0x3) as usize;
            let participants = state.attached();
            state.transfer_cycles = protocol.multi_transfer_cycles(config, baud, participants);
            state.phase = Phase::Starting;

            // Reschedule node 0's event to fire immediately rather than
            // waiting out whatever IDLE-phase delay it was previously
            // parked on.
            let timing = Arc::clone(&state.slot(0).timing);
            let remaining = timing.deschedule(0).unwrap_or(0);
            state.slot_mut(0).next_event -= remaining;
            timing.schedule(0, 0);
        } else {
            // Slave writes, or a not-ready master: the guest's write is
            // silently rejected.
            masked &= !CNT_START;
        }
    }

    masked
}

/// Handles a write to the 32-bit normal-mode control register. 8-bit
/// normal mode has no register-write hook of its own: the guest starts a
/// transfer purely by having `transfer_finished` go false on the next
/// tick, matching the reference implementation.
///
/// The same phase machine drives normal and multiplayer transfers alike,
/// so starting one here follows the exact shape of
/// [`multi_write_register`]'s start-bit handling.
fn normal_write_register(
    state: &mut LockstepState,
    config: &LockstepConfig,
    protocol: &PrimaryProtocol,
    id: NodeId,
    value: u16,
) -> u16 {
    let mut masked = value & CNT_NORMAL_WRITABLE_MASK;

    if id == 0 {
        // The master has no upstream node, so its SI line reads high on
        // every control-register write, not just a start.
        state.slot(0).guest.set_si(true);
    }

    if masked & CNT_START != 0 && state.phase == Phase::Idle {
        let starting = id == 0;
        if starting {
            let frequency_high = masked & CNT_NORMAL_FREQUENCY_HIGH != 0;
            state.transfer_cycles = protocol.normal_transfer_cycles(config, frequency_high);
            state.phase = Phase::Starting;

            let timing = Arc::clone(&state.slot(0).timing);
            let remaining = timing.deschedule(0).unwrap_or(0);
            state.slot_mut(0).next_event -= remaining;
            timing.schedule(0, 0);
        } else {
            masked &= !CNT_START;
        }
    }

    masked
}
