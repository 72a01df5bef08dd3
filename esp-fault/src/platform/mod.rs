//! Platform capabilities
//!
//! Everything the fault path needs from the hardware goes through these two
//! traits. The chip implementation is the only code in the crate touching raw
//! pointers or inline assembly; everything else is written against the traits
//! and can run on the host against a mock.

use crate::cpu::CoreId;

#[cfg(all(target_arch = "xtensa", feature = "esp32"))]
pub mod esp32;

#[cfg(test)]
pub(crate) mod mock;

/// Control registers touched by the fault path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SpecialRegister {
    /// Cause of the most recent debug exception.
    DebugCause,
    /// Address of instruction breakpoint 0.
    IBreakA0,
    /// Enable bits of the instruction breakpoints.
    IBreakEnable,
    /// Address of data breakpoint 0.
    DBreakA0,
    /// Address of data breakpoint 1.
    DBreakA1,
    /// Mask and trigger bits of data breakpoint 0.
    DBreakC0,
    /// Mask and trigger bits of data breakpoint 1.
    DBreakC1,
}

/// Raw memory reads.
pub trait MemoryAccess {
    /// Reads the word at `address`.
    ///
    /// Callers check the address against a known valid range first; a read
    /// of an unmapped address is a secondary fault.
    fn read_word(&self, address: u32) -> u32;
}

/// The capability set of a chip.
pub trait Platform: MemoryAccess {
    /// The core executing the caller.
    fn current_core(&self) -> CoreId;

    /// Reads a control register.
    fn read_special(&self, register: SpecialRegister) -> u32;

    /// Writes a control register.
    fn write_special(&mut self, register: SpecialRegister, value: u32);

    /// Writes the word at `address`.
    fn write_word(&mut self, address: u32, value: u32);

    /// Stops instruction execution on `core`.
    fn stall_core(&mut self, core: CoreId);

    /// Returns `true` if an external debug probe is attached.
    fn debugger_attached(&self) -> bool;

    /// Stops in the attached debugger.
    fn debug_break(&mut self);

    /// Busy-waits for `us` microseconds.
    fn delay_us(&mut self, us: u32);

    /// Restarts the whole system. Does not return on hardware.
    fn software_reset(&mut self);

    /// Parks the calling core. Does not return on hardware.
    fn halt(&mut self);

    /// Raises an exception unconditionally.
    fn trap(&mut self);
}
