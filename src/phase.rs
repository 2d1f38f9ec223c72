use log::debug;

use crate::guest::Mode;
use crate::mask::NodeMask;
use crate::registers::{LOCKSTEP_INCREMENT, MULTI_RECV_EMPTY};
use crate::shared::LockstepState;
use crate::{NodeId, MAX_PARTICIPANTS};

/// The five-state global transfer phase, driven entirely by the master
/// node's scheduled event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Starting,
    Started,
    Finishing,
    Finished,
}

/// What a phase transition needs the host bridge to do once the caller
/// has released `Lockstep`'s state lock.
///
/// Keeping this out of `LockstepState` mutation is what lets
/// [`crate::Lockstep::advance`] drop the lock before calling into
/// [`crate::HostBridge::wait`] — an indefinite block must never happen
/// while holding a lock another node's thread needs in order to wake it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Action {
    None,
    Signal(NodeMask),
    Wait(NodeMask),
}

/// Drives the master's half of the phase machine (spec.md §4.3). Returns
/// the action the caller must perform against the host bridge, plus the
/// number of cycles until the master's event should next fire (`0` if
/// the action is a wait — the next schedule is decided after it
/// returns).
pub(crate) fn master_update(state: &mut LockstepState) -> (Action, i32) {
    let attached = state.attached();
    let attached_multi = state.attached_multi;
    let mut needs_to_wait = false;

    match state.phase {
        Phase::Idle => {
            state.slot_mut(0).next_event += LOCKSTEP_INCREMENT;
            state.ready = attached_multi == attached;
            state.slot(0).guest.set_multi_ready(state.ready);
        }
        Phase::Starting => {
            state.slot_mut(0).transfer_finished = false;
            state.multi_recv = [MULTI_RECV_EMPTY; MAX_PARTICIPANTS];
            match state.slot(0).mode {
                Mode::Multi => {
                    let send = state.slot(0).guest.multi_send();
                    state.multi_recv[0] = send;
                    for slot_idx in 0..MAX_PARTICIPANTS {
                        state.slot(0).guest.write_multi_slot(slot_idx, MULTI_RECV_EMPTY);
                    }
                    debug!("master: STARTING -> STARTED, sent {:#06x}", send);
                }
                Mode::Normal8 => {
                    state.normal_recv[0] = (state.slot(0).guest.data8() & 0xFF) as u32;
                }
                Mode::Normal32 => {
                    let lo = state.slot(0).guest.data32_lo() as u32;
                    let hi = state.slot(0).guest.data32_hi() as u32;
                    state.normal_recv[0] = lo | (hi << 16);
                }
                Mode::Other => {}
            }
            needs_to_wait = true;
            state.phase = Phase::Started;
            state.slot_mut(0).next_event += 512;
        }
        Phase::Started => {
            state.slot_mut(0).next_event += 512;
            state.phase = Phase::Finishing;
        }
        Phase::Finishing => {
            let remaining = state.transfer_cycles - 1024;
            state.slot_mut(0).next_event += remaining;
            needs_to_wait = true;
            state.phase = Phase::Finished;
        }
        Phase::Finished => {
            finish_transfer(state, 0);
            state.slot_mut(0).next_event += LOCKSTEP_INCREMENT;
            state.phase = Phase::Idle;
            debug!("master: FINISHED -> IDLE");
        }
    }

    let mask = state.matching_mode_mask(0);
    let action = if mask.is_empty() {
        Action::None
    } else if needs_to_wait {
        Action::Wait(mask)
    } else {
        Action::Signal(mask)
    };

    let next = if needs_to_wait { 0 } else { state.slot(0).next_event };
    (action, next)
}

/// Drives one slave's half of the phase machine (spec.md §4.4). Returns
/// the action the caller must perform against the host bridge, plus any
/// extra cycle credit ([`LOCKSTEP_INCREMENT`]) the slave should post to
/// its own bank this tick, beyond the `cycles_late` the caller always
/// posts.
pub(crate) fn slave_update(state: &mut LockstepState, id: NodeId, unused_cycles: i32) -> (Action, i32) {
    let attached = state.attached();
    let attached_multi = state.attached_multi;
    state.ready = attached_multi == attached;
    state.slot(id).guest.set_multi_ready(state.ready);

    let mut signal = false;
    let mut extra_credit = 0;
    match state.phase {
        Phase::Idle => {
            if !state.ready {
                extra_credit = LOCKSTEP_INCREMENT;
            }
        }
        Phase::Starting | Phase::Finishing => {}
        Phase::Started => {
            let event_diff = state.slot(id).event_diff;
            if unused_cycles > event_diff {
                return (Action::None, 0);
            }
            state.slot_mut(id).transfer_finished = false;
            match state.slot(id).mode {
                Mode::Multi => {
                    state.slot(id).guest.set_rcnt_terminal(false);
                    let send = state.slot(id).guest.multi_send();
                    state.multi_recv[id as usize] = send;
                    for slot_idx in 0..MAX_PARTICIPANTS {
                        state.slot(id).guest.write_multi_slot(slot_idx, MULTI_RECV_EMPTY);
                    }
                    state.slot(id).guest.set_multi_busy(true);
                }
                Mode::Normal8 => {
                    state.multi_recv[id as usize] = MULTI_RECV_EMPTY;
                    state.normal_recv[id as usize] = (state.slot(id).guest.data8() & 0xFF) as u32;
                }
                Mode::Normal32 => {
                    state.multi_recv[id as usize] = MULTI_RECV_EMPTY;
                    let lo = state.slot(id).guest.data32_lo() as u32;
                    let hi = state.slot(id).guest.data32_hi() as u32;
                    state.normal_recv[id as usize] = lo | (hi << 16);
                }
                Mode::Other => {
                    state.multi_recv[id as usize] = MULTI_RECV_EMPTY;
                }
            }
            signal = true;
        }
        Phase::Finished => {
            let event_diff = state.slot(id).event_diff;
            if unused_cycles > event_diff {
                return (Action::None, 0);
            }
            finish_transfer(state, id);
            signal = true;
        }
    }

    // A slave never blocks the host bridge; it only ever wakes the
    // master or tops up its own cycle bank.
    let action = if signal { Action::Signal(NodeMask::single(id)) } else { Action::None };
    (action, extra_credit)
}

/// Materializes the transfer outcome into node `id`'s guest-visible
/// memory. Idempotent per transfer, guarded by `transfer_finished`
/// (spec.md §4.5 / §8 "Idempotent finish").
pub(crate) fn finish_transfer(state: &mut LockstepState, id: NodeId) {
    if state.slot(id).transfer_finished {
        return;
    }

    let guest = &state.slot(id).guest;
    state.idle_so[id as usize] = guest.idle_so();

    match state.slot(id).mode {
        Mode::Multi => {
            let guest = &state.slot(id).guest;
            for (slot_idx, value) in state.multi_recv.iter().enumerate() {
                guest.write_multi_slot(slot_idx, *value);
            }
            guest.set_rcnt_terminal(true);
            guest.set_multi_busy(false);
            guest.set_multi_id(id);
            if guest.irq_enabled() {
                guest.raise_serial_interrupt();
            }
        }
        Mode::Normal8 => {
            let guest = &state.slot(id).guest;
            guest.clear_start_bit();
            if id > 0 {
                let idle_so = state.idle_so[(id - 1) as usize];
                let byte = (state.normal_recv[(id - 1) as usize] & 0xFF) as u16;
                let guest = &state.slot(id).guest;
                guest.set_si(idle_so);
                guest.write_data8(byte);
            } else {
                guest.write_data8(MULTI_RECV_EMPTY);
            }
            if guest.irq_enabled() {
                guest.raise_serial_interrupt();
            }
        }
        Mode::Normal32 => {
            let guest = &state.slot(id).guest;
            guest.clear_start_bit();
            if id > 0 {
                let idle_so = state.idle_so[(id - 1) as usize];
                let value = state.normal_recv[(id - 1) as usize];
                let guest = &state.slot(id).guest;
                guest.set_si(idle_so);
                guest.write_data32_lo((value & 0xFFFF) as u16);
                guest.write_data32_hi_or((value >> 16) as u16);
            } else {
                guest.write_data32_lo(MULTI_RECV_EMPTY);
                guest.write_data32_hi(MULTI_RECV_EMPTY);
            }
            if guest.irq_enabled() {
                guest.raise_serial_interrupt();
            }
        }
        Mode::Other => {}
    }

    state.slot_mut(id).transfer_finished = true;
}
