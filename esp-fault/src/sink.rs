//! Diagnostic output
//!
//! The fault path cannot rely on `core::fmt` machinery being cheap, on a
//! logger being installed, or on any lock being free. Everything it prints
//! goes through a [`RawSink`], which only needs to be able to push a single
//! byte out in a polling fashion.

/// A synchronous, polling byte sink.
pub trait RawSink {
    /// Writes a single byte.
    fn put_char(&mut self, c: u8);

    /// Writes a string.
    fn put_str(&mut self, s: &str) {
        for &b in s.as_bytes() {
            self.put_char(b);
        }
    }

    /// Writes `value` as exactly 8 lowercase hex digits, without a prefix.
    fn put_hex32(&mut self, value: u32) {
        for shift in (0..8).rev() {
            self.put_char(hex_digit(value >> (shift * 4)));
        }
    }

    /// Writes `value` as exactly 2 lowercase hex digits.
    fn put_hex8(&mut self, value: u8) {
        self.put_char(hex_digit(value as u32 >> 4));
        self.put_char(hex_digit(value as u32));
    }

    /// Writes the last two decimal digits of `value`, padding a leading zero
    /// with a space.
    fn put_dec(&mut self, value: u32) {
        let tens = (value / 10) % 10;
        let ones = value % 10;
        if tens == 0 {
            self.put_char(b' ');
        } else {
            self.put_char(b'0' + tens as u8);
        }
        self.put_char(b'0' + ones as u8);
    }
}

fn hex_digit(nibble: u32) -> u8 {
    match (nibble & 0xf) as u8 {
        n @ 0..=9 => b'0' + n,
        n => b'a' + n - 10,
    }
}

/// Discards everything written to it.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentSink;

impl RawSink for SilentSink {
    #[inline(always)]
    fn put_char(&mut self, _c: u8) {}

    #[inline(always)]
    fn put_str(&mut self, _s: &str) {}

    #[inline(always)]
    fn put_hex32(&mut self, _value: u32) {}

    #[inline(always)]
    fn put_hex8(&mut self, _value: u8) {}

    #[inline(always)]
    fn put_dec(&mut self, _value: u32) {}
}

/// Writes through the `esp-println` printer.
#[cfg(feature = "println")]
#[derive(Debug, Default, Clone, Copy)]
pub struct PrintlnSink;

#[cfg(feature = "println")]
impl RawSink for PrintlnSink {
    fn put_char(&mut self, c: u8) {
        esp_println::Printer::write_bytes(&[c]);
    }

    fn put_str(&mut self, s: &str) {
        esp_println::Printer::write_bytes(s.as_bytes());
    }
}

/// Adapts a [`RawSink`] to [`core::fmt::Write`].
///
/// Formatting into it does not allocate, which makes it usable for printing
/// a [`core::panic::PanicInfo`] before entering the fault path.
pub struct SinkWriter<'a>(pub &'a mut dyn RawSink);

impl core::fmt::Write for SinkWriter<'_> {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        self.0.put_str(s);
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use core::fmt::Write;

    use super::{capture::CaptureSink, *};

    #[test]
    fn hex32_is_zero_padded() {
        let mut sink = CaptureSink::new();
        sink.put_hex32(0x1234);
        sink.put_char(b' ');
        sink.put_hex32(0xdead_beef);
        sink.put_char(b' ');
        sink.put_hex32(0);
        assert_eq!(sink.out, "00001234 deadbeef 00000000");
    }

    #[test]
    fn hex8_prints_two_digits() {
        let mut sink = CaptureSink::new();
        sink.put_hex8(0x0a);
        sink.put_hex8(0xf0);
        assert_eq!(sink.out, "0af0");
    }

    #[test]
    fn dec_is_space_padded() {
        let mut sink = CaptureSink::new();
        sink.put_dec(0);
        sink.put_dec(1);
        sink.put_dec(42);
        assert_eq!(sink.out, " 0 142");
    }

    #[test]
    fn silent_sink_discards() {
        let mut silent = SilentSink;
        silent.put_str("nothing");
        silent.put_hex32(1);
        silent.put_dec(1);

        let mut sink = CaptureSink::new();
        let mut writer = SinkWriter(&mut sink);
        write!(writer, "{} {}", "a", 5).unwrap();
        assert_eq!(sink.out, "a 5");
    }
}
