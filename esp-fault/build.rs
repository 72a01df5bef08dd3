use esp_build::assert_unique_features;
use esp_config::{ConfigOption, DisplayHint, Stability, Validator, Value, generate_config};

fn main() {
    // At most one logging backend may be selected:
    assert_unique_features!("defmt", "log-04");

    if cfg!(feature = "silent") && cfg!(feature = "coredump-transport") {
        println!(
            "cargo::warning=`coredump-transport` has no effect while the output is `silent`"
        );
    }

    // emit config
    generate_config(
        "esp-fault",
        &[
            ConfigOption {
                name: "failsafe-timeout-ms".to_string(),
                description: "Time, in milliseconds, the fault handler may run before the \
                failsafe watchdog resets the chip.".to_string(),
                default_value: Value::Integer(1000),
                constraint: Some(Validator::IntegerInRange(1..60_001)),
                stability: Stability::Stable("0.1.0".to_string()),
                active: true,
                display_hint: DisplayHint::None,
            },
            ConfigOption {
                name: "reboot-delay-ms".to_string(),
                description: "Time, in milliseconds, to wait for buffered output to drain \
                before rebooting.".to_string(),
                default_value: Value::Integer(100),
                constraint: Some(Validator::NonNegativeInteger),
                stability: Stability::Stable("0.1.0".to_string()),
                active: true,
                display_hint: DisplayHint::None,
            },
            ConfigOption {
                name: "snapshot-stack-size".to_string(),
                description: "Number of bytes of the faulting stack, starting at the stack \
                pointer, included in a crash snapshot.".to_string(),
                default_value: Value::Integer(1024),
                constraint: Some(Validator::IntegerInRange(0..65_537)),
                stability: Stability::Stable("0.1.0".to_string()),
                active: true,
                display_hint: DisplayHint::None,
            },
        ],
        true,
        true,
    );
}
