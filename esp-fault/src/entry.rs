//! Entry points used by the runtime on the ESP32

use crate::{
    Error,
    abort::ABORT_STATE,
    debug,
    dispatch::{Config, FaultHandler, Outcome},
    frame::ExceptionFrame,
    platform::esp32::{Esp32, caller_frame},
};

cfg_if::cfg_if! {
    if #[cfg(any(feature = "silent", not(feature = "println")))] {
        pub(crate) type Output = crate::sink::SilentSink;
    } else {
        pub(crate) type Output = crate::sink::PrintlnSink;
    }
}

fn with_handler<R>(f: impl FnOnce(&mut FaultHandler<'_, Esp32>) -> R) -> R {
    let mut platform = Esp32;
    let mut out = Output::default();

    let handler = FaultHandler::new(&mut platform, &mut out, &ABORT_STATE, Config::default());

    #[cfg(feature = "gdbstub")]
    let mut stub = crate::platform::esp32::GdbStubHook;
    #[cfg(feature = "gdbstub")]
    let handler = handler.with_debugger(&mut stub);

    #[cfg(feature = "coredump-storage")]
    let mut storage = crate::platform::esp32::StorageHook;
    #[cfg(feature = "coredump-storage")]
    let handler = handler.with_storage(&mut storage);

    let mut handler = handler;
    f(&mut handler)
}

fn park() -> ! {
    loop {
        core::hint::spin_loop();
    }
}

/// Handles a fatal condition detected in software.
///
/// `reason` is a [`PanicReason`](crate::PanicReason) code; `frame` is the
/// context saved when the condition was detected.
pub fn panic_entry(reason: u32, frame: &ExceptionFrame) -> ! {
    with_handler(|handler| handler.handle_panic(reason, frame));
    park()
}

/// Handles an exception without a handler of its own.
///
/// Returns only when a debug probe is attached; a breakpoint then sits at the
/// faulting instruction and the exception should be returned from.
pub fn exception_entry(frame: &ExceptionFrame) {
    match with_handler(|handler| handler.handle_exception(frame)) {
        Outcome::ReturnToDebugger => {}
        Outcome::Terminated(_) => park(),
    }
}

/// Reports a fault at the caller and stops. Registers are not dumped.
#[inline(never)]
pub fn abort() -> ! {
    let frame = caller_frame();
    with_handler(|handler| handler.handle_abort(&frame));
    park()
}

/// Programs watchpoint `slot` (0 or 1). See [`debug::set_watchpoint`].
pub fn set_watchpoint(slot: u8, address: u32, size: u32, flags: u32) -> Result<(), Error> {
    debug::set_watchpoint(&mut Esp32, slot, address, size, flags)
}

/// Disables watchpoint `slot`. See [`debug::clear_watchpoint`].
pub fn clear_watchpoint(slot: u8) -> Result<(), Error> {
    debug::clear_watchpoint(&mut Esp32, slot)
}

/// Places instruction breakpoint 0 at `address`.
pub fn set_first_breakpoint(address: u32) {
    debug::set_first_breakpoint(&mut Esp32, address)
}

/// Places a breakpoint at `address` if a debug probe is attached.
pub fn set_breakpoint_if_debug_probe_attached(address: u32) -> bool {
    debug::set_breakpoint_if_debug_probe_attached(&mut Esp32, address)
}

#[cfg(feature = "panic-handler")]
#[panic_handler]
fn panic_handler(info: &core::panic::PanicInfo) -> ! {
    use core::fmt::Write;

    let mut out = Output::default();
    let _ = write!(crate::sink::SinkWriter(&mut out), "\r\n{}\r\n", info);

    abort()
}
