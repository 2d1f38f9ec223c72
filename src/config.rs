use crate::registers::{CPU_FREQUENCY, CYCLES_PER_TRANSFER};

/// Tunable timing constants, factored out of the phase machine so tests
/// can shrink transfer latency instead of waiting out hardware-accurate
/// cycle counts.
///
/// `LockstepConfig::default()` gives the hardware-accurate values.
#[derive(Debug, Clone, Copy)]
pub struct LockstepConfig {
    /// `cyclesPerTransfer[baud][participants - 1]` for multiplayer mode.
    pub cycles_per_transfer: [[i32; 4]; 4],
    /// The internal clock frequency 32-bit normal mode divides to derive
    /// its transfer cycle count.
    pub cpu_frequency: i32,
}

impl Default for LockstepConfig {
    fn default() -> Self {
        Self {
            cycles_per_transfer: CYCLES_PER_TRANSFER,
            cpu_frequency: CPU_FREQUENCY,
        }
    }
}

impl LockstepConfig {
    /// Cycles a multiplayer transfer at `baud` with `participants` loaded
    /// nodes will take end-to-end.
    pub fn multi_transfer_cycles(&self, baud: usize, participants: usize) -> i32 {
        self.cycles_per_transfer[baud][participants - 1]
    }

    /// Cycles a 32-bit normal-mode transfer takes, given whether the
    /// guest selected the high-frequency internal clock divider.
    pub fn normal_transfer_cycles(&self, frequency_high: bool) -> i32 {
        if frequency_high {
            self.cpu_frequency / 1024
        } else {
            self.cpu_frequency / 8192
        }
    }
}
