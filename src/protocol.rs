use crate::config::LockstepConfig;

/// The parts of the transfer protocol that differ between handheld
/// generations: the cycles-per-transfer formula and (for a future
/// implementation) the register bit layout.
///
/// Only [`PrimaryProtocol`] — the four-player multiplayer + 32-bit normal
/// variant this crate implements — exists today. The predecessor
/// console's two-participant protocol is out of scope (spec.md §1), but
/// this trait is the seam a second crate would implement against to
/// reuse the phase machine and cycle-bank machinery in `crate::shared`
/// and `crate::node` without modification, per spec.md §9's design note.
pub trait TransferProtocol {
    fn multi_transfer_cycles(&self, config: &LockstepConfig, baud: usize, participants: usize) -> i32;
    fn normal_transfer_cycles(&self, config: &LockstepConfig, frequency_high: bool) -> i32;
}

/// The four-player multiplayer + 32-bit normal protocol variant.
#[derive(Debug, Default, Clone, Copy)]
pub struct PrimaryProtocol;

impl TransferProtocol for PrimaryProtocol {
    fn multi_transfer_cycles(&self, config: &LockstepConfig, baud: usize, participants: usize) -> i32 {
        config.multi_transfer_cycles(baud, participants)
    }

    fn normal_transfer_cycles(&self, config: &LockstepConfig, frequency_high: bool) -> i32 {
        config.normal_transfer_cycles(frequency_high)
    }
}
