// src/println.rs

use core::fmt::{self, Write};

pub struct Stdout;

// The real backend drives the memory-mapped UART (see src/uart.rs); under
// `cargo test` there's no MMIO region backing that address on the host, so
// host unit tests that exercise logging (e.g. fault.rs's eviction trace)
// write through the host's own stdout instead.
#[cfg(not(test))]
impl Write for Stdout {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for c in s.chars() {
            crate::uart::putchar(c as u8);
        }
        Ok(())
    }
}

#[cfg(test)]
impl Write for Stdout {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        print!("{}", s);
        Ok(())
    }
}

#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => ({
        use core::fmt::Write;
        let mut stdout = $crate::console::Stdout;
        stdout.write_fmt(format_args!($($arg)*)).unwrap();
    });
}

#[macro_export]
macro_rules! println {
    () => ($crate::print!("\n"));
    ($($arg:tt)*) => ($crate::print!("{}\n", format_args!($($arg)*)));
}

pub fn _print(args: fmt::Arguments) {
    use core::fmt::Write;
    Stdout.write_fmt(args).unwrap();
}