#![doc = include_str!("../README.md")]
//! ## Feature Flags
#![doc = document_features::document_features!()]
#![doc(html_logo_url = "https://avatars.githubusercontent.com/u/46717278")]
#![cfg_attr(target_arch = "xtensa", feature(asm_experimental_arch))]
#![cfg_attr(not(test), no_std)]
#![deny(missing_docs, rust_2018_idioms)]

// MUST be the first module
mod fmt;

mod abort;
pub mod backtrace;
pub mod cause;
pub mod cpu;
pub mod debug;
pub mod dispatch;
mod error;
pub mod frame;
pub mod platform;
pub mod report;
pub mod sink;
pub mod snapshot;
pub mod wdt;

#[cfg(all(target_arch = "xtensa", feature = "esp32"))]
mod entry;

pub use abort::{ABORT_STATE, AbortState};
pub use cause::PanicReason;
pub use dispatch::{Config, DebuggerStub, Disposition, FaultHandler, Outcome, State, Switches};
#[cfg(all(target_arch = "xtensa", feature = "esp32"))]
pub use entry::{
    abort,
    clear_watchpoint,
    exception_entry,
    panic_entry,
    set_breakpoint_if_debug_probe_attached,
    set_first_breakpoint,
    set_watchpoint,
};
pub use error::Error;
pub use frame::ExceptionFrame;
