/// The serial mode a node is currently configured for, as set by the
/// guest writing the SIO control register.
///
/// `Other` covers the handheld's remaining SIO modes (UART, JOYBUS,
/// general-purpose) which the coordinator does not drive — a node loaded
/// in one of those modes is tracked (it still occupies a roster slot) but
/// never becomes part of a multiplayer transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Multi,
    Normal8,
    Normal32,
    Other,
}

/// A node's window into its instance's guest-visible memory and interrupt
/// controller.
///
/// Out of scope for this crate (spec.md §1): the guest MMIO region and
/// interrupt delivery live in the surrounding emulator core. This trait
/// states only the interface the coordinator needs against them —
/// reading the registers a transfer consumes, and materializing the
/// registers and interrupt a transfer produces.
pub trait GuestRegisters: Send + Sync {
    /// The current multiplayer control register, read so a register
    /// write can preserve its read-only bits.
    fn multi_control(&self) -> u16;

    /// Set or clear the multiplayer control register's `ready` bit.
    fn set_multi_ready(&self, ready: bool);

    /// The multiplayer send register (`SIOMLT_SEND`), read when this node
    /// contributes its value to a transfer.
    fn multi_send(&self) -> u16;

    /// Write one of the four parallel multiplayer receive registers
    /// (`SIOMULTI0..3`).
    fn write_multi_slot(&self, slot: usize, value: u16);

    /// Set or clear the `busy` bit in the multiplayer control register.
    fn set_multi_busy(&self, busy: bool);

    /// Set the `id` field the multiplayer control register reports back
    /// to the guest.
    fn set_multi_id(&self, id: u8);

    /// Set or clear `rcnt`'s terminal bit (bit 0).
    fn set_rcnt_terminal(&self, set: bool);

    /// Set or clear `rcnt`'s slave bit (bit 2).
    fn set_rcnt_slave(&self, set: bool);

    /// Whether the multiplayer/normal control register has its IRQ-enable
    /// bit set.
    fn irq_enabled(&self) -> bool;

    /// Raise the handheld's serial interrupt for this instance.
    fn raise_serial_interrupt(&self);

    /// The 8-bit normal-mode data register (`SIODATA8`), read when this
    /// node contributes its value.
    fn data8(&self) -> u16;

    /// Materialize the 8-bit normal-mode data register.
    fn write_data8(&self, value: u16);

    /// The low/high halves of the 32-bit normal-mode data register
    /// (`SIODATA32_LO`/`_HI`), read when this node contributes its value.
    fn data32_lo(&self) -> u16;
    fn data32_hi(&self) -> u16;

    /// Materialize the low half of the 32-bit normal-mode data register.
    fn write_data32_lo(&self, value: u16);

    /// Overwrite the high half of the 32-bit normal-mode data register
    /// (used by the master, which has no upstream contribution).
    fn write_data32_hi(&self, value: u16);

    /// OR `value` into the high half of the 32-bit normal-mode data
    /// register (used by a slave, accumulating onto whatever the low-half
    /// write already placed there).
    fn write_data32_hi_or(&self, value: u16);

    /// Whether this node's SIO line is reporting idle (`idleSo`),
    /// consulted by the node directly downstream of it in NORMAL mode.
    fn idle_so(&self) -> bool;

    /// Set the `si` line bit normal-mode finish-transfer reflects back to
    /// the guest.
    fn set_si(&self, si: bool);

    /// Clear the start bit in the control register the guest last wrote,
    /// without disturbing any other bit.
    fn clear_start_bit(&self);
}
