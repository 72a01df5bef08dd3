//! Call chain reconstruction
//!
//! With the windowed ABI every frame spills its caller's return address and
//! stack pointer into the 16 byte save area right below its own stack
//! pointer, so no frame pointer chain or unwind tables are needed:
//!
//! ```text
//!   sp - 0x10: return address into the caller (a0)
//!   sp - 0x0c: caller's stack pointer (a1)
//! ```
//!
//! The first entry is the faulting `pc`/`sp` pair itself and is never
//! validated: a corrupted pointer is often the very reason for the fault.
//! Every stack pointer dereferenced afterwards must pass
//! [`StackLayout::is_sane_sp`].

use crate::{frame::ExceptionFrame, platform::MemoryAccess, sink::RawSink};

/// Upper bound on the number of unwinding steps after the first entry.
pub const MAX_BACKTRACE_STEPS: usize = 100;

// Offsets of the base save area, relative to a frame's stack pointer.
const RETURN_ADDRESS_OFFSET: u32 = 0x10;
const CALLER_SP_OFFSET: u32 = 0x10 - 4;

/// Strips the window increment from the top bits of a return address,
/// mapping it into the cached instruction bus alias.
pub fn remove_window_increment(address: u32) -> u32 {
    if address & 0x8000_0000 != 0 {
        (address & 0x3fff_ffff) | 0x4000_0000
    } else {
        address
    }
}

/// The address map used to decide whether a stack walk can continue.
#[derive(Debug, Clone, Copy)]
pub struct StackLayout {
    /// Lowest address a stack pointer may take.
    pub stack_low: u32,
    /// Highest address a stack pointer may take.
    pub stack_high: u32,
    /// Return addresses below this end the walk.
    pub min_code_address: u32,
    /// Maps a printed return address onto its canonical alias.
    pub normalize: fn(u32) -> u32,
}

impl StackLayout {
    /// Internal SRAM of the ESP32, as seen on the data bus.
    pub const ESP32: Self = Self {
        stack_low: 0x3ffa_e010,
        stack_high: 0x3fff_fff0,
        min_code_address: 0x4000_0000,
        normalize: remove_window_increment,
    };

    /// Returns `true` if `sp` lies in the stack range, is 16 byte aligned and
    /// leaves room for a save area below it.
    pub fn is_sane_sp(&self, sp: u32) -> bool {
        (self.stack_low..=self.stack_high).contains(&sp)
            && sp & 0xf == 0
            && sp >= RETURN_ADDRESS_OFFSET
    }

    /// Returns `true` if `address` is plausibly a return address.
    pub fn is_code_address(&self, address: u32) -> bool {
        address >= self.min_code_address
    }

    /// One past the last byte a stack may occupy.
    pub fn stack_end(&self) -> u32 {
        self.stack_high.saturating_add(0x10)
    }
}

impl Default for StackLayout {
    fn default() -> Self {
        Self::ESP32
    }
}

/// A single entry of a backtrace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BacktraceFrame {
    /// Return address, as found on the stack.
    pub pc: u32,
    /// Stack pointer of the frame the return address points into.
    pub sp: u32,
}

/// Walks the spilled save areas, innermost frame first.
pub struct Unwinder<'a, M: MemoryAccess + ?Sized> {
    memory: &'a M,
    layout: &'a StackLayout,
    pc: u32,
    sp: u32,
    first: Option<BacktraceFrame>,
    steps: usize,
    done: bool,
}

impl<'a, M: MemoryAccess + ?Sized> Unwinder<'a, M> {
    /// Starts a walk at `frame`.
    pub fn new(frame: &ExceptionFrame, memory: &'a M, layout: &'a StackLayout) -> Self {
        Self {
            memory,
            layout,
            pc: frame.A0,
            sp: frame.sp(),
            first: Some(BacktraceFrame {
                pc: frame.pc(),
                sp: frame.sp(),
            }),
            steps: 0,
            done: false,
        }
    }
}

impl<M: MemoryAccess + ?Sized> Iterator for Unwinder<'_, M> {
    type Item = BacktraceFrame;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(first) = self.first.take() {
            return Some(first);
        }

        if self.done || self.steps >= MAX_BACKTRACE_STEPS || !self.layout.is_sane_sp(self.sp) {
            self.done = true;
            return None;
        }
        self.steps += 1;

        let caller_sp = self.memory.read_word(self.sp - CALLER_SP_OFFSET);
        if !self.layout.is_sane_sp(caller_sp) {
            self.done = true;
            return None;
        }

        let entry = BacktraceFrame {
            pc: self.pc,
            sp: caller_sp,
        };

        let next_pc = self.memory.read_word(self.sp - RETURN_ADDRESS_OFFSET);
        if !self.layout.is_code_address(next_pc) {
            self.done = true;
        }

        self.pc = next_pc;
        self.sp = caller_sp;

        Some(entry)
    }
}

/// Prints the backtrace of `frame` and returns the number of entries printed.
pub fn print_backtrace<M: MemoryAccess + ?Sized>(
    out: &mut dyn RawSink,
    frame: &ExceptionFrame,
    memory: &M,
    layout: &StackLayout,
) -> usize {
    out.put_str("\r\nBacktrace:");

    let mut printed = 0;
    for entry in Unwinder::new(frame, memory, layout) {
        out.put_str(" 0x");
        out.put_hex32((layout.normalize)(entry.pc));
        out.put_str(":0x");
        out.put_hex32(entry.sp);
        printed += 1;
    }

    out.put_str("\r\n\r\n");
    printed
}
