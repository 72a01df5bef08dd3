//! Hardware breakpoints and watchpoints
//!
//! The core has one instruction breakpoint used by the fault path and two
//! data breakpoints ("watchpoints") which are left to the application, e.g.
//! to guard the end of a stack. Slots are always chosen by the caller.

use enumset::{EnumSet, EnumSetType};

use crate::{
    Error,
    platform::{Platform, SpecialRegister},
};

/// Number of data breakpoint slots.
pub const WATCHPOINT_SLOTS: u8 = 2;

/// Largest region a single watchpoint can cover, in bytes.
pub const MAX_WATCHPOINT_SIZE: u32 = 64;

const DBREAKC_MASK: u32 = 0x3f;

/// Accesses a watchpoint triggers on.
///
/// The discriminants are the trigger bits of the `DBREAKC` registers, so
/// `set.as_repr()` is the raw `flags` value taken by [`set_watchpoint`].
#[derive(Debug, EnumSetType)]
#[enumset(repr = "u32")]
pub enum WatchTrigger {
    /// Trigger on loads.
    Load  = 30,
    /// Trigger on stores.
    Store = 31,
}

fn watchpoint_registers(slot: u8) -> Result<(SpecialRegister, SpecialRegister), Error> {
    match slot {
        0 => Ok((SpecialRegister::DBreakA0, SpecialRegister::DBreakC0)),
        1 => Ok((SpecialRegister::DBreakA1, SpecialRegister::DBreakC1)),
        _ => Err(Error::InvalidArgument),
    }
}

/// Derives the `DBREAKC` address mask for a region of `size` bytes.
///
/// Every doubling of the size adds one "don't care" low address bit.
/// Returns `None` unless `size` is a power of two between 1 and 64.
pub fn watchpoint_mask(size: u32) -> Option<u32> {
    let mut mask = DBREAKC_MASK;
    for x in 0..7 {
        if size == 1 << x {
            return Some(mask & DBREAKC_MASK);
        }
        mask <<= 1;
    }
    None
}

/// Programs watchpoint `slot` to trap on accesses to `size` bytes at
/// `address`.
///
/// `flags` is a combination of [`WatchTrigger`] bits. Any previous watchpoint
/// in the slot is replaced. Fails with [`Error::InvalidArgument`], touching
/// nothing, if `slot`, `size` or `flags` is out of range.
pub fn set_watchpoint<P: Platform + ?Sized>(
    platform: &mut P,
    slot: u8,
    address: u32,
    size: u32,
    flags: u32,
) -> Result<(), Error> {
    let (address_register, control_register) = watchpoint_registers(slot)?;

    let Some(triggers) = EnumSet::<WatchTrigger>::try_from_repr(flags) else {
        warn!("Invalid watchpoint flags {:#x}", flags);
        return Err(Error::InvalidArgument);
    };

    let Some(mask) = watchpoint_mask(size) else {
        warn!("Invalid watchpoint size {}", size);
        return Err(Error::InvalidArgument);
    };

    platform.write_special(address_register, address);
    platform.write_special(control_register, mask | triggers.as_repr());

    debug!(
        "Watchpoint {} set at {:#x}, {} bytes, flags {:#x}",
        slot,
        address,
        size,
        flags
    );

    Ok(())
}

/// Disables watchpoint `slot`.
///
/// A cleared `DBREAKC` triggers on neither loads nor stores.
pub fn clear_watchpoint<P: Platform + ?Sized>(platform: &mut P, slot: u8) -> Result<(), Error> {
    let (_, control_register) = watchpoint_registers(slot)?;
    platform.write_special(control_register, 0);

    debug!("Watchpoint {} cleared", slot);

    Ok(())
}

/// Places instruction breakpoint 0 at `address` and enables it, keeping the
/// other breakpoint enable bits.
pub fn set_first_breakpoint<P: Platform + ?Sized>(platform: &mut P, address: u32) {
    platform.write_special(SpecialRegister::IBreakA0, address);
    let enabled = platform.read_special(SpecialRegister::IBreakEnable);
    platform.write_special(SpecialRegister::IBreakEnable, enabled | 1);

    trace!("Breakpoint set at {:#x}", address);
}

/// Calls [`set_first_breakpoint`] if a debug probe is attached. Returns
/// `true` if the breakpoint was set.
pub fn set_breakpoint_if_debug_probe_attached<P: Platform + ?Sized>(
    platform: &mut P,
    address: u32,
) -> bool {
    if !platform.debugger_attached() {
        return false;
    }

    set_first_breakpoint(platform, address);
    true
}
