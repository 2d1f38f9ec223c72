use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use arrayvec::ArrayVec;
use derivative::Derivative;
use log::{debug, warn};
use parking_lot::Mutex;

use crate::config::LockstepConfig;
use crate::error::{Error, Result};
use crate::guest::{GuestRegisters, Mode};
use crate::mask::NodeMask;
use crate::phase::{self, Action, Phase};
use crate::protocol::PrimaryProtocol;
use crate::registers::{LOCKSTEP_INCREMENT, MULTI_RECV_EMPTY};
use crate::timing::TimingWheel;
use crate::{NodeHandle, NodeId, MAX_PARTICIPANTS};

/// The per-node state `Lockstep` owns on the roster's behalf.
///
/// This is the arena entry spec.md §9's design note asks for: nodes refer
/// to it only through their [`NodeId`] slot index (itself reachable only
/// via the id cell a [`NodeHandle`] holds), never through a pointer back
/// into this struct. There is no ownership cycle.
pub(crate) struct NodeSlot {
    pub(crate) id_cell: Arc<AtomicU8>,
    pub(crate) mode: Mode,
    pub(crate) loaded: bool,
    pub(crate) next_event: i32,
    pub(crate) event_diff: i32,
    pub(crate) transfer_finished: bool,
    pub(crate) guest: Arc<dyn GuestRegisters>,
    pub(crate) timing: Arc<dyn TimingWheel>,
}

/// The rendezvous state guarded by `Lockstep`'s mutex.
pub(crate) struct LockstepState {
    pub(crate) slots: ArrayVec<[Option<NodeSlot>; MAX_PARTICIPANTS]>,
    pub(crate) phase: Phase,
    pub(crate) transfer_cycles: i32,
    pub(crate) multi_recv: [u16; MAX_PARTICIPANTS],
    pub(crate) normal_recv: [u32; MAX_PARTICIPANTS],
    pub(crate) idle_so: [bool; MAX_PARTICIPANTS],
    pub(crate) attached_multi: usize,
    /// Cached `attachedMulti == attached` quorum check, recomputed every
    /// IDLE tick (master) or every tick (slave) and mirrored into each
    /// node's own guest-visible control register.
    pub(crate) ready: bool,
}

impl LockstepState {
    fn new() -> Self {
        let mut slots = ArrayVec::new();
        for _ in 0..MAX_PARTICIPANTS {
            slots.push(None);
        }
        Self {
            slots,
            phase: Phase::Idle,
            transfer_cycles: 0,
            multi_recv: [MULTI_RECV_EMPTY; MAX_PARTICIPANTS],
            normal_recv: [0; MAX_PARTICIPANTS],
            idle_so: [false; MAX_PARTICIPANTS],
            attached_multi: 0,
            ready: false,
        }
    }

    pub(crate) fn attached(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub(crate) fn slot(&self, id: NodeId) -> &NodeSlot {
        self.slots[id as usize].as_ref().expect("node id not attached")
    }

    pub(crate) fn slot_mut(&mut self, id: NodeId) -> &mut NodeSlot {
        self.slots[id as usize].as_mut().expect("node id not attached")
    }

    /// The bitmask of loaded nodes (excluding `id == 0`) whose mode
    /// matches node `id`'s — the set the master waits on or signals.
    pub(crate) fn matching_mode_mask(&self, id: NodeId) -> NodeMask {
        let mode = self.slot(id).mode;
        let mut mask = NodeMask::EMPTY;
        for i in 1..self.attached() as NodeId {
            if let Some(slot) = &self.slots[i as usize] {
                if slot.loaded && slot.mode == mode {
                    mask.insert(i);
                }
            }
        }
        mask
    }
}

/// The rendezvous object shared by every node attached to one
/// multiplayer session.
///
/// One `Lockstep` exists per session; it is created when the first node
/// attaches and dropped once the last one detaches. See `SPEC_FULL.md`
/// for the full data model this wraps.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct Lockstep {
    #[derivative(Debug = "ignore")]
    pub(crate) state: Mutex<LockstepState>,
    #[derivative(Debug = "ignore")]
    pub(crate) bridge: Arc<dyn crate::HostBridge>,
    #[derivative(Debug = "ignore")]
    pub(crate) protocol: PrimaryProtocol,
    pub(crate) config: LockstepConfig,
}

impl Lockstep {
    /// Creates a new session rendezvous object around the embedder's
    /// [`HostBridge`](crate::HostBridge) implementation.
    pub fn new(bridge: Arc<dyn crate::HostBridge>, config: LockstepConfig) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(LockstepState::new()),
            bridge,
            protocol: PrimaryProtocol,
            config,
        })
    }

    /// Registers a new node with the roster. Fails with
    /// [`Error::RosterFull`] if four nodes are already attached.
    ///
    /// The returned handle is not yet driving a transfer: call
    /// [`NodeHandle::load`] once the guest's serial mode is known.
    pub fn attach(self: &Arc<Self>) -> Result<NodeHandle> {
        let mut state = self.state.lock();
        let attached = state.attached();
        if attached == MAX_PARTICIPANTS {
            return Err(Error::RosterFull);
        }
        let id_cell = Arc::new(AtomicU8::new(attached as u8));
        debug!("attach: assigned id {}", attached);
        state.slots[attached] = Some(NodeSlot {
            id_cell: Arc::clone(&id_cell),
            mode: Mode::Other,
            loaded: false,
            next_event: 0,
            event_diff: 0,
            transfer_finished: true,
            guest: Arc::new(crate::guest_noop::NoopGuestRegisters),
            timing: Arc::new(crate::guest_noop::NoopTimingWheel),
        });
        Ok(NodeHandle {
            id: id_cell,
            lockstep: Arc::clone(self),
        })
    }

    /// The session's current transfer phase, primarily useful for tests
    /// and diagnostics observing the phase machine from outside.
    pub fn phase(&self) -> Phase {
        self.state.lock().phase
    }

    /// Removes `node` from the roster, shifting every higher-indexed node
    /// down one slot and rewriting its id to match.
    ///
    /// The caller must have already called [`NodeHandle::unload`] to
    /// drain any in-flight transfer; `detach` does not synchronize with
    /// one itself.
    pub(crate) fn detach(&self, node: &NodeHandle) {
        let mut state = self.state.lock();
        let removed = node.id.load(Ordering::Acquire) as usize;
        if state.slots[removed].is_none() {
            warn!("detach: node {} already detached", removed);
            return;
        }
        state.slots[removed] = None;
        let attached_before = state.slots.len();
        for i in removed + 1..attached_before {
            if let Some(slot) = state.slots[i].take() {
                slot.id_cell.store((i - 1) as u8, Ordering::Release);
                state.slots[i - 1] = Some(slot);
            }
        }
        debug!("detach: node {} removed, roster shifted", removed);
    }

    /// Drives the phase machine for node `id`'s scheduled event, `cycles_late`
    /// cycles after it was due to fire.
    ///
    /// This is the low-level, `Result`-returning entry point tests call
    /// directly; [`NodeHandle::process_event`](crate::NodeHandle::process_event)
    /// wraps it with the embedder-facing abort-on-fatal-error contract.
    ///
    /// Mutates `LockstepState` under the lock, then drops it before
    /// touching [`HostBridge`](crate::HostBridge) — a master parked in
    /// [`HostBridge::wait`](crate::HostBridge::wait) must never be
    /// holding the lock a slave's thread needs in order to wake it.
    pub fn advance(&self, id: NodeId, cycles_late: i32) -> Result<()> {
        if cycles_late < 0 {
            debug_assert!(false, "internal cycle credit went negative");
            return Err(Error::NegativeCycles);
        }

        let mut state = self.state.lock();

        // Deviates from the reference implementation, which leaves a
        // roster of fewer than two nodes to go dormant until another
        // node's event happens to wake it. Rescheduling unconditionally
        // is simpler and has no observable effect once a second node
        // attaches (see SPEC_FULL.md §9).
        //
        // Gated on `Phase::Idle` as well: a transfer already in flight
        // when the roster drops below two (the master's last partner
        // detaches mid-transfer) must still be driven through
        // `master_update` so the master's own phase settles back to
        // `Idle` and its `finish_transfer` runs, rather than freezing
        // forever in `Finishing`/`Finished`.
        if state.attached() < 2 && state.phase == Phase::Idle {
            let attached = state.attached();
            let attached_multi = state.attached_multi;
            state.ready = attached_multi == attached;
            state.slot(id).guest.set_multi_ready(state.ready);
            state.slot_mut(id).next_event += LOCKSTEP_INCREMENT;
            let timing = Arc::clone(&state.slot(id).timing);
            let delay = (LOCKSTEP_INCREMENT - cycles_late).max(1);
            drop(state);
            timing.schedule(id, delay);
            return Ok(());
        }

        // Steps 3-4 of the event-dispatch envelope: only run a phase
        // transition once the accumulated budget has actually drained.
        // Until then, the event is just rescheduled for however many
        // cycles it still has left.
        state.slot_mut(id).next_event -= cycles_late;
        state.slot_mut(id).event_diff += cycles_late;

        let mut action = Action::None;
        let mut cycles = state.slot(id).next_event;
        let mut extra_credit = 0;
        let mut drained_event_diff = None;

        if state.slot(id).next_event <= 0 {
            let event_diff = state.slot(id).event_diff;
            if id == 0 {
                let (a, next) = phase::master_update(&mut state);
                action = a;
                cycles = next;
            } else {
                let unused = self.bridge.unused_cycles(id);
                let (a, credit) = phase::slave_update(&mut state, id, unused);
                action = a;
                cycles = 0;
                extra_credit = credit;
            }
            state.slot_mut(id).event_diff = 0;
            drained_event_diff = Some(event_diff);
        }

        let timing = Arc::clone(&state.slot(id).timing);
        drop(state);

        match action {
            Action::None => {}
            Action::Signal(mask) => {
                self.bridge.signal(mask);
            }
            Action::Wait(mask) => {
                if !self.bridge.wait(mask) {
                    return Err(Error::WaitFailed);
                }
            }
        }

        if let Some(event_diff) = drained_event_diff {
            if id == 0 {
                self.bridge.add_cycles(0, event_diff);
            } else {
                cycles += self.bridge.use_cycles(id, event_diff);
            }
        }
        if extra_credit > 0 {
            self.bridge.add_cycles(id, extra_credit);
        }

        // Step 5: a non-positive result means there is no real budget to
        // schedule against yet. Poll again in one cycle rather than
        // stalling the timing wheel forever — `next_event` is left
        // untouched so the next real tick keeps counting down whatever
        // the phase update already advanced it to.
        let mut state = self.state.lock();
        if cycles > 0 {
            state.slot_mut(id).next_event = 0;
            state.slot_mut(id).event_diff += cycles;
        } else {
            state.slot_mut(id).event_diff += 1;
            cycles = 1;
        }
        drop(state);

        timing.schedule(id, cycles);
        Ok(())
    }
}

// Kept out of `guest.rs`/`timing.rs` proper since these are purely
// internal placeholders used to keep a freshly attached (not yet loaded)
// slot's trait objects non-optional; `load()` always replaces them before
// the slot can take part in a transfer.
pub(crate) mod guest_noop {
    use crate::guest::GuestRegisters;
    use crate::timing::TimingWheel;
    use crate::NodeId;

    pub(crate) struct NoopGuestRegisters;
    impl GuestRegisters for NoopGuestRegisters {
        fn multi_control(&self) -> u16 {
            0
        }
        fn set_multi_ready(&self, _ready: bool) {}
        fn multi_send(&self) -> u16 {
            0
        }
        fn write_multi_slot(&self, _slot: usize, _value: u16) {}
        fn set_multi_busy(&self, _busy: bool) {}
        fn set_multi_id(&self, _id: u8) {}
        fn set_rcnt_terminal(&self, _set: bool) {}
        fn set_rcnt_slave(&self, _set: bool) {}
        fn irq_enabled(&self) -> bool {
            false
        }
        fn raise_serial_interrupt(&self) {}
        fn data8(&self) -> u16 {
            0
        }
        fn write_data8(&self, _value: u16) {}
        fn data32_lo(&self) -> u16 {
            0
        }
        fn data32_hi(&self) -> u16 {
            0
        }
        fn write_data32_lo(&self, _value: u16) {}
        fn write_data32_hi(&self, _value: u16) {}
        fn write_data32_hi_or(&self, _value: u16) {}
        fn idle_so(&self) -> bool {
            false
        }
        fn set_si(&self, _si: bool) {}
        fn clear_start_bit(&self) {}
    }

    pub(crate) struct NoopTimingWheel;
    impl TimingWheel for NoopTimingWheel {
        fn schedule(&self, _id: NodeId, _cycles: i32) {}
        fn deschedule(&self, _id: NodeId) -> Option<i32> {
            None
        }
    }
}
