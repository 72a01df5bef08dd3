//! Sibling core coordination

use crate::platform::Platform;

/// One of the two cores of the chip.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, strum::FromRepr)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(C)]
pub enum CoreId {
    /// The first core
    ProCpu = 0,
    /// The second core
    AppCpu = 1,
}

impl CoreId {
    /// The core that is not `self`.
    pub fn sibling(self) -> Self {
        match self {
            CoreId::ProCpu => CoreId::AppCpu,
            CoreId::AppCpu => CoreId::ProCpu,
        }
    }

    /// Index of the core, as printed in reports.
    pub fn index(self) -> u32 {
        self as u32
    }
}

/// Stops the core that is not `current`.
///
/// Shared diagnostic resources (the output, the watchdogs, the debug
/// registers) carry no locks; once the sibling is stalled the rest of the
/// fault path runs alone. Stalling an already stalled core is harmless.
pub fn halt_sibling<P: Platform + ?Sized>(platform: &mut P, current: CoreId) {
    platform.stall_core(current.sibling());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::mock::{Event, MockPlatform};

    #[test]
    fn sibling_is_the_other_core() {
        assert_eq!(CoreId::ProCpu.sibling(), CoreId::AppCpu);
        assert_eq!(CoreId::AppCpu.sibling(), CoreId::ProCpu);
        assert_eq!(CoreId::from_repr(1), Some(CoreId::AppCpu));
    }

    #[test]
    fn halts_only_the_sibling() {
        let mut platform = MockPlatform::new();
        platform.core = CoreId::AppCpu;

        halt_sibling(&mut platform, CoreId::AppCpu);
        halt_sibling(&mut platform, CoreId::AppCpu);

        assert_eq!(
            platform.events,
            [Event::Stall(CoreId::ProCpu), Event::Stall(CoreId::ProCpu)]
        );
    }
}
