//! Fault classification
//!
//! Maps the raw codes handed to the entry points onto the tags printed in the
//! report. Both lookups are total: codes outside the known range resolve to an
//! "unknown" tag instead of failing.

/// Why the panic entry point was invoked.
///
/// The runtime passes the reason as a small integer (in the `EXCCAUSE` slot
/// of the frame). Values above [`PanicReason::MAX`] resolve to
/// [`PanicReason::Unknown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::FromRepr, strum::IntoStaticStr)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u32)]
pub enum PanicReason {
    /// No better reason is known.
    Unknown                   = 0,
    /// A debug exception was raised with no debugger attached.
    UnhandledDebugException   = 1,
    /// An exception was raised while `PS.EXCM` was set.
    DoubleException           = 2,
    /// An exception was raised in kernel mode.
    UnhandledKernelException  = 3,
    /// A coprocessor exception could not be serviced.
    CoprocessorException      = 4,
    /// The interrupt watchdog expired on the PRO CPU.
    WatchdogTimeoutCore0      = 5,
    /// The interrupt watchdog expired on the APP CPU.
    WatchdogTimeoutCore1      = 6,
}

impl PanicReason {
    /// The largest defined reason code.
    pub const MAX: u32 = PanicReason::WatchdogTimeoutCore1 as u32;

    /// Resolves a raw reason code. Never fails.
    pub fn from_code(code: u32) -> Self {
        Self::from_repr(code).unwrap_or(PanicReason::Unknown)
    }

    /// The tag printed in the report header.
    pub fn as_str(self) -> &'static str {
        self.into()
    }
}

impl core::fmt::Display for PanicReason {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Number of architecture defined `EXCCAUSE` values.
pub const EXCEPTION_CAUSE_COUNT: usize = 40;

// Reserved codes print as "res".
static EXCEPTION_DESCRIPTIONS: [&str; EXCEPTION_CAUSE_COUNT] = [
    "IllegalInstruction",
    "Syscall",
    "InstructionFetchError",
    "LoadStoreError",
    "Level1Interrupt",
    "Alloca",
    "IntegerDivideByZero",
    "PCValue",
    "Privileged",
    "LoadStoreAlignment",
    "res",
    "res",
    "InstrPDAddrError",
    "LoadStorePIFDataError",
    "InstrPIFAddrError",
    "LoadStorePIFAddrError",
    "InstTLBMiss",
    "InstTLBMultiHit",
    "InstFetchPrivilege",
    "res",
    "InstrFetchProhibited",
    "res",
    "res",
    "res",
    "LoadStoreTLBMiss",
    "LoadStoreTLBMultihit",
    "LoadStorePrivilege",
    "res",
    "LoadProhibited",
    "StoreProhibited",
    "res",
    "res",
    "Cp0Dis",
    "Cp1Dis",
    "Cp2Dis",
    "Cp3Dis",
    "Cp4Dis",
    "Cp5Dis",
    "Cp6Dis",
    "Cp7Dis",
];

/// Describes a raw `EXCCAUSE` value.
///
/// Codes at or above [`EXCEPTION_CAUSE_COUNT`] return `"Unknown"`.
pub fn exception_description(code: u32) -> &'static str {
    EXCEPTION_DESCRIPTIONS
        .get(code as usize)
        .copied()
        .unwrap_or("Unknown")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_exception_causes() {
        assert_eq!(exception_description(0), "IllegalInstruction");
        assert_eq!(exception_description(6), "IntegerDivideByZero");
        assert_eq!(exception_description(28), "LoadProhibited");
        assert_eq!(exception_description(29), "StoreProhibited");
        assert_eq!(exception_description(39), "Cp7Dis");
    }

    #[test]
    fn reserved_exception_causes() {
        for code in [10, 11, 19, 21, 22, 23, 27, 30, 31] {
            assert_eq!(exception_description(code), "res");
        }
    }

    #[test]
    fn every_cause_in_range_has_a_description() {
        for code in 0..EXCEPTION_CAUSE_COUNT as u32 {
            assert_ne!(exception_description(code), "Unknown");
        }
    }

    #[test]
    fn out_of_range_causes_are_unknown() {
        for code in [40, 41, 255, 0x8000_0000, u32::MAX] {
            assert_eq!(exception_description(code), "Unknown");
        }
    }

    #[test]
    fn panic_reasons_resolve() {
        assert_eq!(PanicReason::from_code(0), PanicReason::Unknown);
        assert_eq!(PanicReason::from_code(1), PanicReason::UnhandledDebugException);
        assert_eq!(PanicReason::from_code(2), PanicReason::DoubleException);
        assert_eq!(PanicReason::from_code(3), PanicReason::UnhandledKernelException);
        assert_eq!(PanicReason::from_code(4), PanicReason::CoprocessorException);
        assert_eq!(PanicReason::from_code(5), PanicReason::WatchdogTimeoutCore0);
        assert_eq!(PanicReason::from_code(6), PanicReason::WatchdogTimeoutCore1);
    }

    #[test]
    fn large_panic_reasons_are_unknown() {
        for code in [PanicReason::MAX + 1, 100, u32::MAX] {
            assert_eq!(PanicReason::from_code(code), PanicReason::Unknown);
        }
    }

    #[test]
    fn panic_reason_tags() {
        assert_eq!(
            PanicReason::UnhandledKernelException.as_str(),
            "UnhandledKernelException"
        );
        assert_eq!(PanicReason::WatchdogTimeoutCore1.to_string(), "WatchdogTimeoutCore1");
    }
}
