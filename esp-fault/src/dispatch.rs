//! Terminal dispatcher
//!
//! Drives a fault from entry to one of the terminal dispositions:
//!
//! ```text
//! Entered -> Reporting -> Unwinding -> Disposing -+-> HandedToDebugger
//!                                                 +-> SnapshotWritten -> Rebooting
//!                                                 +-> Rebooting
//!                                                 +-> Halted
//! ```
//!
//! The failsafe watchdog is armed on entering `Disposing`, before anything
//! that might hang, so a reset always follows within the failsafe window.

use crate::{
    abort::AbortState,
    backtrace::{StackLayout, print_backtrace},
    cause::PanicReason,
    cpu::{CoreId, halt_sibling},
    debug::set_first_breakpoint,
    frame::ExceptionFrame,
    platform::{Platform, SpecialRegister},
    report,
    sink::RawSink,
    snapshot::{Snapshot, SnapshotTarget, TransportSnapshot},
    wdt,
};

/// The build-time switches selecting the fault behavior.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Switches {
    /// Print nothing.
    pub silent: bool,
    /// Hand the fault to a debugger stub.
    pub gdbstub: bool,
    /// Write a snapshot to storage.
    pub coredump_storage: bool,
    /// Print a snapshot through the output sink.
    pub coredump_transport: bool,
    /// Reboot after reporting.
    pub reboot: bool,
    /// Reboot after reporting, printing nothing.
    pub silent_reboot: bool,
}

impl Switches {
    /// The switches selected through Cargo features.
    pub const fn from_features() -> Self {
        Self {
            silent: cfg!(feature = "silent"),
            gdbstub: cfg!(feature = "gdbstub"),
            coredump_storage: cfg!(feature = "coredump-storage"),
            coredump_transport: cfg!(feature = "coredump-transport"),
            reboot: cfg!(feature = "reboot"),
            silent_reboot: cfg!(feature = "silent-reboot"),
        }
    }

    /// Returns `true` if all output is discarded.
    pub const fn is_silent(&self) -> bool {
        self.silent || self.silent_reboot
    }

    /// Returns `true` if snapshots are printed. Always `false` while the
    /// output is silent.
    pub const fn transport_snapshot(&self) -> bool {
        self.coredump_transport && !self.is_silent()
    }
}

/// The terminal action taken after reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Disposition {
    /// Disable the watchdogs and enter the debugger stub.
    Debugger,
    /// Persist a snapshot, then reboot.
    Snapshot,
    /// Wait for the output to drain, then reset the system.
    Reboot,
    /// Disable the watchdogs and stop.
    Halt,
}

impl Disposition {
    /// Picks the disposition for `switches`, in the order debugger, snapshot,
    /// reboot, halt.
    pub const fn select(switches: &Switches) -> Self {
        if switches.gdbstub {
            Disposition::Debugger
        } else if switches.coredump_storage || switches.transport_snapshot() {
            Disposition::Snapshot
        } else if switches.reboot || switches.silent_reboot {
            Disposition::Reboot
        } else {
            Disposition::Halt
        }
    }
}

const DEFAULT_FAILSAFE_TIMEOUT_MS: u32 =
    esp_config::esp_config_int!(u32, "ESP_FAULT_CONFIG_FAILSAFE_TIMEOUT_MS");
const DEFAULT_REBOOT_DELAY_MS: u32 =
    esp_config::esp_config_int!(u32, "ESP_FAULT_CONFIG_REBOOT_DELAY_MS");
const DEFAULT_SNAPSHOT_STACK_SIZE: u32 =
    esp_config::esp_config_int!(u32, "ESP_FAULT_CONFIG_SNAPSHOT_STACK_SIZE");

/// Fault handler configuration.
#[derive(Debug, Clone, Copy)]
pub struct Config {
    disposition: Disposition,
    storage_snapshot: bool,
    transport_snapshot: bool,
    failsafe_timeout_ms: u32,
    reboot_delay_ms: u32,
    snapshot_stack_size: u32,
    stack_layout: StackLayout,
    stack_canary_watchpoint: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_switches(&Switches::from_features())
    }
}

impl Config {
    /// The configuration for `switches`, with the `esp-config` values.
    pub fn from_switches(switches: &Switches) -> Self {
        Self {
            disposition: Disposition::select(switches),
            storage_snapshot: switches.coredump_storage,
            transport_snapshot: switches.transport_snapshot(),
            failsafe_timeout_ms: DEFAULT_FAILSAFE_TIMEOUT_MS,
            reboot_delay_ms: DEFAULT_REBOOT_DELAY_MS,
            snapshot_stack_size: DEFAULT_SNAPSHOT_STACK_SIZE,
            stack_layout: StackLayout::ESP32,
            stack_canary_watchpoint: false,
        }
    }

    /// The disposition after reporting.
    pub fn disposition(&self) -> Disposition {
        self.disposition
    }

    /// Whether a snapshot is written to storage.
    pub fn storage_snapshot(&self) -> bool {
        self.storage_snapshot
    }

    /// Whether a snapshot is printed.
    pub fn transport_snapshot(&self) -> bool {
        self.transport_snapshot
    }

    /// How long the fault path may take before the failsafe watchdog resets
    /// the system.
    pub fn failsafe_timeout_ms(&self) -> u32 {
        self.failsafe_timeout_ms
    }

    /// How long to wait for the output to drain before rebooting.
    pub fn reboot_delay_ms(&self) -> u32 {
        self.reboot_delay_ms
    }

    /// How many bytes of stack a snapshot captures.
    pub fn snapshot_stack_size(&self) -> u32 {
        self.snapshot_stack_size
    }

    /// The address map used for unwinding.
    pub fn stack_layout(&self) -> StackLayout {
        self.stack_layout
    }

    /// Whether watchpoint 1 guards the end of a stack.
    pub fn stack_canary_watchpoint(&self) -> bool {
        self.stack_canary_watchpoint
    }

    /// Sets the disposition after reporting.
    pub fn with_disposition(mut self, disposition: Disposition) -> Self {
        self.disposition = disposition;
        self
    }

    /// Sets whether a snapshot is written to storage.
    pub fn with_storage_snapshot(mut self, enabled: bool) -> Self {
        self.storage_snapshot = enabled;
        self
    }

    /// Sets whether a snapshot is printed.
    pub fn with_transport_snapshot(mut self, enabled: bool) -> Self {
        self.transport_snapshot = enabled;
        self
    }

    /// Sets the failsafe window.
    pub fn with_failsafe_timeout_ms(mut self, timeout_ms: u32) -> Self {
        self.failsafe_timeout_ms = timeout_ms;
        self
    }

    /// Sets the drain delay before rebooting.
    pub fn with_reboot_delay_ms(mut self, delay_ms: u32) -> Self {
        self.reboot_delay_ms = delay_ms;
        self
    }

    /// Sets how many bytes of stack a snapshot captures.
    pub fn with_snapshot_stack_size(mut self, size: u32) -> Self {
        self.snapshot_stack_size = size;
        self
    }

    /// Sets the address map used for unwinding.
    pub fn with_stack_layout(mut self, layout: StackLayout) -> Self {
        self.stack_layout = layout;
        self
    }

    /// Sets whether watchpoint 1 guards the end of a stack.
    pub fn with_stack_canary_watchpoint(mut self, enabled: bool) -> Self {
        self.stack_canary_watchpoint = enabled;
        self
    }
}

/// Where a fault currently is on its way to a disposition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum State {
    /// The fault path was entered.
    Entered,
    /// The header and registers are being printed.
    Reporting,
    /// The backtrace is being printed.
    Unwinding,
    /// The failsafe is armed and a disposition is being executed.
    Disposing,
    /// Control went to the debugger stub.
    HandedToDebugger,
    /// A snapshot was persisted.
    SnapshotWritten,
    /// A system reset was requested.
    Rebooting,
    /// The core was parked.
    Halted,
}

impl State {
    /// Returns `true` for states only a reset leaves.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            State::HandedToDebugger | State::SnapshotWritten | State::Rebooting | State::Halted
        )
    }
}

/// How a hardware exception was dealt with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Outcome {
    /// A breakpoint was placed at the faulting instruction. Returning from
    /// the exception lets the attached debugger stop right there.
    ReturnToDebugger,
    /// The fault ran to a disposition.
    Terminated(State),
}

/// A debugger stub taking over after a fault.
pub trait DebuggerStub {
    /// Serves the debugger. Does not return on hardware.
    fn enter(&mut self, frame: &ExceptionFrame);
}

/// Runs the fault path against a platform and an output sink.
pub struct FaultHandler<'a, P: Platform> {
    platform: &'a mut P,
    out: &'a mut dyn RawSink,
    abort: &'a AbortState,
    config: Config,
    debugger: Option<&'a mut dyn DebuggerStub>,
    storage: Option<&'a mut dyn SnapshotTarget>,
    state: State,
}

impl<'a, P: Platform> FaultHandler<'a, P> {
    /// Creates a handler. Debugger and storage collaborators are optional.
    pub fn new(
        platform: &'a mut P,
        out: &'a mut dyn RawSink,
        abort: &'a AbortState,
        config: Config,
    ) -> Self {
        Self {
            platform,
            out,
            abort,
            config,
            debugger: None,
            storage: None,
            state: State::Entered,
        }
    }

    /// Sets the stub entered by the [`Disposition::Debugger`] disposition.
    pub fn with_debugger(mut self, debugger: &'a mut dyn DebuggerStub) -> Self {
        self.debugger = Some(debugger);
        self
    }

    /// Sets the target of storage snapshots.
    pub fn with_storage(mut self, storage: &'a mut dyn SnapshotTarget) -> Self {
        self.storage = Some(storage);
        self
    }

    /// The current state.
    pub fn state(&self) -> State {
        self.state
    }

    /// Handles a software detected fault. `reason` is a raw
    /// [`PanicReason`] code.
    pub fn handle_panic(&mut self, reason: u32, frame: &ExceptionFrame) -> State {
        self.state = State::Entered;
        let core = self.platform.current_core();
        halt_sibling(self.platform, core);

        self.state = State::Reporting;
        let reason = PanicReason::from_code(reason);
        let aborted = self.abort.is_set();
        report::print_panic_header(self.out, core, reason, aborted);

        if !aborted {
            if reason == PanicReason::UnhandledDebugException {
                let debug_cause = self.platform.read_special(SpecialRegister::DebugCause);
                report::print_debug_cause(
                    self.out,
                    debug_cause,
                    self.config.stack_canary_watchpoint,
                );
            }

            if self.platform.debugger_attached() {
                self.platform.debug_break();
            }
        }

        self.finish(core, frame)
    }

    /// Handles an unhandled hardware exception.
    ///
    /// The other core is halted first in every case. With a debug probe
    /// attached nothing else is reported: a breakpoint is placed at the
    /// faulting instruction and the caller is expected to return from the
    /// exception.
    pub fn handle_exception(&mut self, frame: &ExceptionFrame) -> Outcome {
        self.state = State::Entered;
        let core = self.platform.current_core();
        halt_sibling(self.platform, core);

        if self.platform.debugger_attached() {
            report::print_exception_header(self.out, core, frame.cause(), Some(frame.pc()));
            set_first_breakpoint(self.platform, frame.pc());
            return Outcome::ReturnToDebugger;
        }

        self.state = State::Reporting;
        report::print_exception_header(self.out, core, frame.cause(), None);

        Outcome::Terminated(self.finish(core, frame))
    }

    /// Handles an explicit abort.
    ///
    /// `frame` describes the function that called `abort()`: `PC` is the
    /// return address into it and `A1` its stack pointer. Marks the abort,
    /// reports and finally raises a trap in case the disposition returned.
    pub fn handle_abort(&mut self, frame: &ExceptionFrame) -> State {
        self.abort.set();

        // The call instruction sits 3 bytes before the return address.
        let call_site = (self.config.stack_layout.normalize)(frame.pc()).wrapping_sub(3);
        self.out.put_str("abort() was called at PC 0x");
        self.out.put_hex32(call_site);
        self.out.put_str("\r\n");

        let state = self.handle_panic(PanicReason::Unknown as u32, frame);
        self.platform.trap();
        state
    }

    fn finish(&mut self, core: CoreId, frame: &ExceptionFrame) -> State {
        report::report_registers(self.out, frame, self.abort);

        self.state = State::Unwinding;
        print_backtrace(self.out, frame, &*self.platform, &self.config.stack_layout);

        self.state = State::Disposing;
        wdt::arm_failsafe(self.platform, self.config.failsafe_timeout_ms);

        match self.config.disposition {
            Disposition::Debugger => self.enter_debugger(frame),
            Disposition::Snapshot => {
                self.write_snapshot(core, frame);
                self.reboot();
            }
            Disposition::Reboot => self.reboot(),
            Disposition::Halt => self.halt(),
        }

        self.state
    }

    fn enter_debugger(&mut self, frame: &ExceptionFrame) {
        let Some(debugger) = self.debugger.take() else {
            self.halt();
            return;
        };

        wdt::disarm_all(self.platform);
        self.out.put_str("Entering gdb stub now.\r\n");
        self.state = State::HandedToDebugger;
        debugger.enter(frame);
    }

    fn write_snapshot(&mut self, core: CoreId, frame: &ExceptionFrame) {
        let snapshot = Snapshot::new(
            frame,
            core,
            &*self.platform,
            &self.config.stack_layout,
            self.config.snapshot_stack_size,
        );

        if self.config.storage_snapshot {
            if let Some(storage) = self.storage.as_deref_mut() {
                storage.persist(&snapshot, self.out);
            }
        }

        if self.config.transport_snapshot {
            TransportSnapshot.persist(&snapshot, self.out);
        }

        self.state = State::SnapshotWritten;
    }

    fn reboot(&mut self) {
        self.out.put_str("Rebooting...\r\n");
        self.state = State::Rebooting;
        for _ in 0..self.config.reboot_delay_ms {
            self.platform.delay_us(1000);
        }
        self.platform.software_reset();
    }

    fn halt(&mut self) {
        wdt::disarm_all(self.platform);
        self.out.put_str("CPU halted.\r\n");
        self.state = State::Halted;
        self.platform.halt();
    }
}
