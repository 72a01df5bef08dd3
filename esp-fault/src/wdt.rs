//! Failsafe watchdog
//!
//! While the report is printed, any watchdog left running by the application
//! could reset the chip halfway through. Disabling all of them instead risks
//! hanging forever if the fault path itself gets stuck. The compromise is to
//! keep exactly one watchdog (TIMG0) running with a known, short timeout that
//! resets the whole system, and to turn the other one off.
//!
//! Every configuration write happens between unlocking the write protection
//! and locking it again. A watchdog left unlocked stays writable by any stray
//! store for the rest of the run.

use crate::platform::{MemoryAccess, Platform};

const WDT_WRITE_KEY: u32 = 0x50D8_3AA1;

const APB_CLK_MHZ: u32 = 80;
const TICK_US: u32 = 500;

mod registers {
    pub(super) const WDTCONFIG0: u32 = 0x48;
    pub(super) const WDTCONFIG1: u32 = 0x4c;
    pub(super) const WDTCONFIG2: u32 = 0x50;
    pub(super) const WDTFEED: u32 = 0x60;
    pub(super) const WDTWPROTECT: u32 = 0x64;
}

mod bits {
    pub(super) const EN: u32 = 1 << 31;
    pub(super) const STG0_SHIFT: u32 = 29;
    pub(super) const STG_MASK: u32 = 0b11;
    pub(super) const CPU_RESET_LENGTH_SHIFT: u32 = 18;
    pub(super) const SYS_RESET_LENGTH_SHIFT: u32 = 15;
    pub(super) const RESET_LENGTH_MASK: u32 = 0b111;
}

const PRESCALE_SHIFT: u32 = 16;
const PRESCALE_MASK: u32 = 0xffff;

/// A timer group owning one main system watchdog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TimerGroup {
    /// Timer group 0, used as the failsafe.
    Timg0,
    /// Timer group 1.
    Timg1,
}

impl TimerGroup {
    fn base(self) -> u32 {
        match self {
            TimerGroup::Timg0 => 0x3ff5_f000,
            TimerGroup::Timg1 => 0x3ff6_0000,
        }
    }

    fn register(self, offset: u32) -> u32 {
        self.base() + offset
    }
}

/// Behavior of a watchdog stage if it times out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::FromRepr)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u32)]
pub enum MwdtStageAction {
    /// No effect on the system.
    Off         = 0,
    /// Trigger an interrupt.
    Interrupt   = 1,
    /// Reset the CPU core.
    ResetCpu    = 2,
    /// Reset the main system, power management unit and RTC peripherals.
    ResetSystem = 3,
}

/// The parts of a watchdog's configuration the fault path controls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct WatchdogConfig {
    /// Whether the watchdog is counting.
    pub enabled: bool,
    /// What happens when stage 0 expires.
    pub stage0_action: MwdtStageAction,
    /// CPU reset pulse length selector.
    pub cpu_reset_length: u8,
    /// System reset pulse length selector.
    pub sys_reset_length: u8,
    /// APB clock divider.
    pub prescaler: u16,
    /// Stage 0 timeout, in prescaled ticks.
    pub stage0_hold: u32,
}

impl WatchdogConfig {
    /// The configuration installed on TIMG0 by [`arm_failsafe`].
    pub fn failsafe(timeout_ms: u32) -> Self {
        Self {
            enabled: true,
            stage0_action: MwdtStageAction::ResetSystem,
            // 3.2 us
            cpu_reset_length: 7,
            sys_reset_length: 7,
            prescaler: (APB_CLK_MHZ * TICK_US) as u16,
            stage0_hold: timeout_ms.saturating_mul(1000) / TICK_US,
        }
    }

    /// Reads back the configuration of `group`.
    pub fn read<M: MemoryAccess + ?Sized>(memory: &M, group: TimerGroup) -> Self {
        let config0 = memory.read_word(group.register(registers::WDTCONFIG0));
        let config1 = memory.read_word(group.register(registers::WDTCONFIG1));
        let config2 = memory.read_word(group.register(registers::WDTCONFIG2));

        let stage0 = (config0 >> bits::STG0_SHIFT) & bits::STG_MASK;

        Self {
            enabled: config0 & bits::EN != 0,
            stage0_action: MwdtStageAction::from_repr(stage0).unwrap_or(MwdtStageAction::Off),
            cpu_reset_length: ((config0 >> bits::CPU_RESET_LENGTH_SHIFT)
                & bits::RESET_LENGTH_MASK) as u8,
            sys_reset_length: ((config0 >> bits::SYS_RESET_LENGTH_SHIFT)
                & bits::RESET_LENGTH_MASK) as u8,
            prescaler: ((config1 >> PRESCALE_SHIFT) & PRESCALE_MASK) as u16,
            stage0_hold: config2,
        }
    }

    /// Length of the stage 0 window in milliseconds.
    pub fn timeout_ms(&self) -> u32 {
        let tick_ns = u64::from(self.prescaler) * 1000 / u64::from(APB_CLK_MHZ);
        (u64::from(self.stage0_hold) * tick_ns / 1_000_000) as u32
    }
}

/// A main system watchdog, accessed through the platform.
struct Wdt<'a, P: Platform + ?Sized> {
    platform: &'a mut P,
    group: TimerGroup,
}

impl<'a, P: Platform + ?Sized> Wdt<'a, P> {
    fn new(platform: &'a mut P, group: TimerGroup) -> Self {
        Self { platform, group }
    }

    fn set_write_protection(&mut self, enable: bool) {
        let wkey = if enable { 0u32 } else { WDT_WRITE_KEY };
        self.write(registers::WDTWPROTECT, wkey);
    }

    fn read(&self, offset: u32) -> u32 {
        self.platform.read_word(self.group.register(offset))
    }

    fn write(&mut self, offset: u32, value: u32) {
        self.platform.write_word(self.group.register(offset), value);
    }

    fn modify(&mut self, offset: u32, f: impl FnOnce(u32) -> u32) {
        let value = f(self.read(offset));
        self.write(offset, value);
    }

    fn feed(&mut self) {
        self.write(registers::WDTFEED, 1);
    }

    fn set_enabled(&mut self, enabled: bool) {
        self.modify(registers::WDTCONFIG0, |w| {
            if enabled { w | bits::EN } else { w & !bits::EN }
        });
    }

    fn apply(&mut self, config: &WatchdogConfig) {
        self.modify(registers::WDTCONFIG0, |w| {
            let cleared = w
                & !(bits::STG_MASK << bits::STG0_SHIFT)
                & !(bits::RESET_LENGTH_MASK << bits::CPU_RESET_LENGTH_SHIFT)
                & !(bits::RESET_LENGTH_MASK << bits::SYS_RESET_LENGTH_SHIFT);
            cleared
                | (config.stage0_action as u32) << bits::STG0_SHIFT
                | u32::from(config.cpu_reset_length & 0b111) << bits::CPU_RESET_LENGTH_SHIFT
                | u32::from(config.sys_reset_length & 0b111) << bits::SYS_RESET_LENGTH_SHIFT
        });
        self.modify(registers::WDTCONFIG1, |w| {
            w & !(PRESCALE_MASK << PRESCALE_SHIFT) | u32::from(config.prescaler) << PRESCALE_SHIFT
        });
        self.write(registers::WDTCONFIG2, config.stage0_hold);
        self.set_enabled(config.enabled);
    }
}

/// Restarts TIMG0 with a window of `timeout_ms` that resets the system, and
/// disables TIMG1.
pub fn arm_failsafe<P: Platform + ?Sized>(platform: &mut P, timeout_ms: u32) {
    let mut wdt = Wdt::new(platform, TimerGroup::Timg0);
    wdt.set_write_protection(false);
    wdt.feed();
    wdt.apply(&WatchdogConfig::failsafe(timeout_ms));
    wdt.set_write_protection(true);

    disable(platform, TimerGroup::Timg1);
}

/// Disables both watchdogs.
pub fn disarm_all<P: Platform + ?Sized>(platform: &mut P) {
    disable(platform, TimerGroup::Timg0);
    disable(platform, TimerGroup::Timg1);
}

fn disable<P: Platform + ?Sized>(platform: &mut P, group: TimerGroup) {
    let mut wdt = Wdt::new(platform, group);
    wdt.set_write_protection(false);
    wdt.set_enabled(false);
    wdt.set_write_protection(true);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::mock::MockPlatform;

    fn wprotect(group: TimerGroup) -> u32 {
        group.register(registers::WDTWPROTECT)
    }

    // Every write to a group's registers must happen while that group is
    // unlocked, and the group must end locked.
    fn assert_locked_around_writes(platform: &MockPlatform, group: TimerGroup) {
        let mut unlocked = false;
        let mut touched = false;
        for (address, value) in platform.writes() {
            if address == wprotect(group) {
                unlocked = value == WDT_WRITE_KEY;
            } else if (group.base()..group.base() + 0x100).contains(&address) {
                assert!(unlocked, "write to {address:#x} while locked");
                touched = true;
            }
        }
        assert!(touched);
        assert!(!unlocked);
        assert_eq!(platform.read_word(wprotect(group)), 0);
    }

    #[test]
    fn failsafe_window() {
        let config = WatchdogConfig::failsafe(1000);
        assert_eq!(config.prescaler, 40_000);
        assert_eq!(config.stage0_hold, 2000);
        assert_eq!(config.timeout_ms(), 1000);
        assert_eq!(WatchdogConfig::failsafe(250).timeout_ms(), 250);
    }

    #[test]
    fn arm_failsafe_configures_timg0_and_disables_timg1() {
        let mut platform = MockPlatform::new();
        // enabled, stages 1 to 3 configured, flashboot mode on
        platform.poke(TimerGroup::Timg0.register(registers::WDTCONFIG0), 0x8000_0000 | 0x1f80_4000);
        platform.poke(TimerGroup::Timg1.register(registers::WDTCONFIG0), 0x8000_0000);

        arm_failsafe(&mut platform, 1000);

        let timg0 = WatchdogConfig::read(&platform, TimerGroup::Timg0);
        assert_eq!(timg0, WatchdogConfig::failsafe(1000));
        assert!(timg0.enabled);
        assert_eq!(timg0.stage0_action, MwdtStageAction::ResetSystem);
        assert_eq!(timg0.timeout_ms(), 1000);

        // bits outside the controlled fields survive
        let raw = platform.read_word(TimerGroup::Timg0.register(registers::WDTCONFIG0));
        assert_eq!(raw & 0x1f80_4000, 0x1f80_4000);

        assert!(!WatchdogConfig::read(&platform, TimerGroup::Timg1).enabled);

        let feed = TimerGroup::Timg0.register(registers::WDTFEED);
        assert!(platform.writes().any(|w| w == (feed, 1)));
    }

    #[test]
    fn arm_failsafe_relocks_both_groups() {
        let mut platform = MockPlatform::new();

        arm_failsafe(&mut platform, 1000);

        assert_locked_around_writes(&platform, TimerGroup::Timg0);
        assert_locked_around_writes(&platform, TimerGroup::Timg1);
    }

    #[test]
    fn disarm_all_disables_and_relocks_both_groups() {
        let mut platform = MockPlatform::new();
        arm_failsafe(&mut platform, 1000);

        disarm_all(&mut platform);

        assert!(!WatchdogConfig::read(&platform, TimerGroup::Timg0).enabled);
        assert!(!WatchdogConfig::read(&platform, TimerGroup::Timg1).enabled);
        assert_locked_around_writes(&platform, TimerGroup::Timg0);
        assert_locked_around_writes(&platform, TimerGroup::Timg1);
    }
}
