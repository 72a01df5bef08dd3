//! Diagnostic report
//!
//! Everything here writes through a [`RawSink`] only. Nothing allocates,
//! formats through `core::fmt` or takes a lock.

use enumset::{EnumSet, EnumSetType};

use crate::{
    abort::AbortState,
    cause::{PanicReason, exception_description},
    cpu::CoreId,
    frame::{ExceptionFrame, REGISTER_COUNT, REGISTER_NAMES},
    sink::RawSink,
};

const REGISTERS_PER_ROW: usize = 4;

// Set in DEBUGCAUSE together with the data breakpoint bit when data
// breakpoint 1 (rather than 0) fired.
const DBREAK_NUMBER_BIT: u32 = 1 << 8;

/// Conditions reported in the `DEBUGCAUSE` register.
#[derive(Debug, EnumSetType)]
#[enumset(repr = "u32")]
pub enum DebugCause {
    /// The instruction counter expired.
    SingleStep       = 0,
    /// An instruction breakpoint matched.
    HwBreakpoint     = 1,
    /// A data breakpoint matched.
    Watchpoint       = 2,
    /// A `BREAK` instruction was executed.
    Break            = 3,
    /// A `BREAK.N` instruction was executed.
    BreakN           = 4,
    /// The debugger raised a debug interrupt.
    DebugInterrupt   = 5,
}

/// Prints the header of a software detected fault.
///
/// After an abort the reason is not meaningful and is printed as `abort`.
pub fn print_panic_header(out: &mut dyn RawSink, core: CoreId, reason: PanicReason, aborted: bool) {
    out.put_str("Guru Meditation Error: Core ");
    out.put_dec(core.index());
    out.put_str(" panic'ed (");
    if aborted {
        out.put_str("abort");
    } else {
        out.put_str(reason.as_str());
    }
    out.put_str(")\r\n");
}

/// Prints the header of an unhandled hardware exception.
///
/// `probe_pc` is the address a breakpoint is about to be placed at, when a
/// debug probe is attached.
pub fn print_exception_header(
    out: &mut dyn RawSink,
    core: CoreId,
    cause: u32,
    probe_pc: Option<u32>,
) {
    out.put_str("Guru Meditation Error of type ");
    out.put_str(exception_description(cause));
    out.put_str(" occurred on core ");
    out.put_dec(core.index());
    match probe_pc {
        Some(pc) => {
            out.put_str(" at pc=");
            out.put_hex32(pc);
            out.put_str(". Setting bp and returning..\r\n");
        }
        None => out.put_str(". Exception was unhandled.\r\n"),
    }
}

/// Prints the conditions set in a raw `DEBUGCAUSE` value.
///
/// `canary_watchpoint` names data breakpoint 1 as the stack canary.
pub fn print_debug_cause(out: &mut dyn RawSink, debug_cause: u32, canary_watchpoint: bool) {
    out.put_str("Debug exception reason: ");
    for cause in EnumSet::<DebugCause>::from_repr_truncated(debug_cause) {
        let tag = match cause {
            DebugCause::SingleStep => "SingleStep ",
            DebugCause::HwBreakpoint => "HwBreakpoint ",
            DebugCause::Watchpoint if debug_cause & DBREAK_NUMBER_BIT == 0 => {
                "Watchpoint 0 triggered "
            }
            DebugCause::Watchpoint if canary_watchpoint => "Stack canary watchpoint triggered ",
            DebugCause::Watchpoint => "Watchpoint 1 triggered ",
            DebugCause::Break => "BREAK instr ",
            DebugCause::BreakN => "BREAKN instr ",
            DebugCause::DebugInterrupt => "DebugIntr ",
        };
        out.put_str(tag);
    }
    out.put_str("\r\n");
}

/// Prints all registers of `frame`, four per row.
pub fn print_registers(out: &mut dyn RawSink, frame: &ExceptionFrame) {
    let values = frame.registers();

    out.put_str("Register dump:\r\n");
    for row in (0..REGISTER_COUNT).step_by(REGISTERS_PER_ROW) {
        for slot in row..row + REGISTERS_PER_ROW {
            match (REGISTER_NAMES.get(slot), values.get(slot)) {
                (Some(name), Some(value)) => {
                    out.put_str(name);
                    out.put_str(": 0x");
                    out.put_hex32(*value);
                    out.put_str("  ");
                }
                // name (8) + ": 0x" (4) + value (8) + "  " (2)
                _ => out.put_str("                      "),
            }
        }
        out.put_str("\r\n");
    }
}

/// Prints the register dump unless the fault path was entered through
/// `abort()`. Returns `true` if the dump was printed.
pub fn report_registers(out: &mut dyn RawSink, frame: &ExceptionFrame, abort: &AbortState) -> bool {
    if abort.is_set() {
        return false;
    }

    print_registers(out, frame);
    true
}
