//! ESP32 (dual-core Xtensa LX6) platform

use core::arch::asm;

use super::{MemoryAccess, Platform, SpecialRegister};
use crate::{cpu::CoreId, frame::ExceptionFrame};

mod registers {
    pub(crate) const OPTIONS0: u32 = 0x3ff4_8000;
    pub(crate) const SW_CPU_STALL: u32 = 0x3ff4_80ac;
}

macro_rules! rsr {
    ($reg:literal) => {{
        let value: u32;
        unsafe { asm!(concat!("rsr.", $reg, " {0}"), out(reg) value, options(nostack)) };
        value
    }};
}

macro_rules! wsr {
    ($reg:literal, $value:expr) => {{
        unsafe {
            asm!(
                concat!("wsr.", $reg, " {0}"),
                "isync",
                in(reg) $value,
                options(nostack)
            )
        };
    }};
}

/// The ESP32 capability set.
#[derive(Debug, Default, Clone, Copy)]
pub struct Esp32;

impl MemoryAccess for Esp32 {
    #[inline(always)]
    fn read_word(&self, address: u32) -> u32 {
        unsafe { (address as *const u32).read_volatile() }
    }
}

impl Platform for Esp32 {
    #[inline(always)]
    fn current_core(&self) -> CoreId {
        // PRID is 0xcdcd on the PRO CPU and 0xabab on the APP CPU.
        let prid: u32 = rsr!("prid");
        if prid & 0x2000 == 0 {
            CoreId::ProCpu
        } else {
            CoreId::AppCpu
        }
    }

    fn read_special(&self, register: SpecialRegister) -> u32 {
        match register {
            SpecialRegister::DebugCause => rsr!("debugcause"),
            SpecialRegister::IBreakA0 => rsr!("ibreaka0"),
            SpecialRegister::IBreakEnable => rsr!("ibreakenable"),
            SpecialRegister::DBreakA0 => rsr!("dbreaka0"),
            SpecialRegister::DBreakA1 => rsr!("dbreaka1"),
            SpecialRegister::DBreakC0 => rsr!("dbreakc0"),
            SpecialRegister::DBreakC1 => rsr!("dbreakc1"),
        }
    }

    fn write_special(&mut self, register: SpecialRegister, value: u32) {
        match register {
            // Read-only
            SpecialRegister::DebugCause => {}
            SpecialRegister::IBreakA0 => wsr!("ibreaka0", value),
            SpecialRegister::IBreakEnable => wsr!("ibreakenable", value),
            SpecialRegister::DBreakA0 => wsr!("dbreaka0", value),
            SpecialRegister::DBreakA1 => wsr!("dbreaka1", value),
            SpecialRegister::DBreakC0 => wsr!("dbreakc0", value),
            SpecialRegister::DBreakC1 => wsr!("dbreakc1", value),
        }
    }

    #[inline(always)]
    fn write_word(&mut self, address: u32, value: u32) {
        unsafe { (address as *mut u32).write_volatile(value) }
    }

    fn stall_core(&mut self, core: CoreId) {
        // A core stalls while {c1, c0} == 0x86. The c0 fields live in OPTIONS0,
        // the c1 fields in SW_CPU_STALL.
        let options0 = registers::OPTIONS0 as *mut u32;
        let sw_cpu_stall = registers::SW_CPU_STALL as *mut u32;

        let (c0_shift, c1_shift) = match core {
            CoreId::ProCpu => (0, 26),
            CoreId::AppCpu => (2, 20),
        };

        unsafe {
            options0
                .write_volatile(options0.read_volatile() & !(0b11 << c0_shift) | (0b10 << c0_shift));
            sw_cpu_stall.write_volatile(
                sw_cpu_stall.read_volatile() & !(0b111111 << c1_shift) | (0x21 << c1_shift),
            );
        }
    }

    fn debugger_attached(&self) -> bool {
        xtensa_lx::is_debugger_attached()
    }

    #[inline(always)]
    fn debug_break(&mut self) {
        unsafe { asm!("break.n 1", options(nostack)) };
    }

    fn delay_us(&mut self, us: u32) {
        unsafe extern "C" {
            fn ets_delay_us(us: u32);
        }

        unsafe { ets_delay_us(us) };
    }

    fn software_reset(&mut self) {
        unsafe extern "C" {
            fn software_reset() -> !;
        }

        unsafe { software_reset() }
    }

    fn halt(&mut self) {
        loop {
            core::hint::spin_loop();
        }
    }

    #[inline(always)]
    fn trap(&mut self) {
        // `break` reaches the debug exception vector. If that comes back, a
        // store to address 0 is a guaranteed StoreProhibited.
        unsafe {
            asm!(
                "break 0, 0",
                "movi {0}, 0",
                "s32i {0}, {0}, 0",
                out(reg) _,
                options(nostack)
            )
        };
    }
}

/// Describes the caller of the function calling this one.
///
/// All live register windows are spilled first, so the base save areas below
/// every stack pointer hold the caller's `a0`/`a1`. The returned frame has the
/// return address into the caller as `PC`, the caller's stack pointer as `A1`
/// and the caller's own return address as `A0`.
#[inline(never)]
#[cold]
pub(crate) fn caller_frame() -> ExceptionFrame {
    let sp: u32;
    unsafe {
        asm!(
            "mov {0}, a1",
            // Spill registers, otherwise the save areas may be stale
            "add a12,a12,a12",
            "rotw 3",
            "add a12,a12,a12",
            "rotw 3",
            "add a12,a12,a12",
            "rotw 3",
            "add a12,a12,a12",
            "rotw 3",
            "add a12,a12,a12",
            "rotw 4",
            out(reg) sp
        );
    }

    let memory = Esp32;
    // a0 and a1 of the function calling us
    let parent_ra = memory.read_word(sp - 16);
    let parent_sp = memory.read_word(sp - 12);

    ExceptionFrame {
        PC: parent_ra,
        A0: memory.read_word(parent_sp - 16),
        A1: memory.read_word(parent_sp - 12),
        ..ExceptionFrame::new()
    }
}

/// Enters the debugger stub provided by the application.
#[cfg(feature = "gdbstub")]
pub(crate) struct GdbStubHook;

#[cfg(feature = "gdbstub")]
impl crate::dispatch::DebuggerStub for GdbStubHook {
    fn enter(&mut self, frame: &ExceptionFrame) {
        unsafe extern "Rust" {
            fn _esp_fault_gdbstub(frame: &ExceptionFrame) -> !;
        }

        unsafe { _esp_fault_gdbstub(frame) }
    }
}

/// Persists snapshots through the storage hook provided by the application.
#[cfg(feature = "coredump-storage")]
pub(crate) struct StorageHook;

#[cfg(feature = "coredump-storage")]
impl crate::snapshot::SnapshotTarget for StorageHook {
    fn persist(&mut self, snapshot: &crate::snapshot::Snapshot<'_>, out: &mut dyn crate::sink::RawSink) {
        unsafe extern "Rust" {
            fn _esp_fault_snapshot_storage(
                snapshot: &crate::snapshot::Snapshot<'_>,
                out: &mut dyn crate::sink::RawSink,
            );
        }

        unsafe { _esp_fault_snapshot_storage(snapshot, out) }
    }
}
