//! Kernel console output.
//!
//! The console is the screen-out device behind fd 1 and the kernel's own
//! `print!`/`println!` macros. Output is appended to a capture buffer so
//! tests can assert on ordering, and mirrored to the host's stderr through
//! the `log` facade. Writes are chunked so no single burst exceeds
//! `CONSOLE_CHUNK` bytes.

use lazy_static::lazy_static;
use spin::Mutex;

/// Maximum bytes pushed to the sink per burst.
pub const CONSOLE_CHUNK: usize = 128;

pub struct Console {
    captured: String,
}

impl Console {
    fn write_str(&mut self, s: &str) {
        self.captured.push_str(s);
    }
}

lazy_static! {
    pub static ref CONSOLE: Mutex<Console> = Mutex::new(Console {
        captured: String::new(),
    });
}

#[doc(hidden)]
pub fn _print(args: core::fmt::Arguments) {
    use core::fmt::Write;
    struct Sink;
    impl core::fmt::Write for Sink {
        fn write_str(&mut self, s: &str) -> core::fmt::Result {
            // Chunked like real console DMA: at most CONSOLE_CHUNK bytes
            // are handed to the device per burst.
            let mut rest = s;
            while !rest.is_empty() {
                let mut cut = rest.len().min(CONSOLE_CHUNK);
                while !rest.is_char_boundary(cut) {
                    cut -= 1;
                }
                let (head, tail) = rest.split_at(cut);
                CONSOLE.lock().write_str(head);
                rest = tail;
            }
            Ok(())
        }
    }
    Sink.write_fmt(args).expect("console write failed");
}

/// Write raw bytes from the kernel side of the `write` syscall. Invalid
/// UTF-8 is replaced, which matches what a dumb character device would
/// render anyway.
pub fn write_bytes(bytes: &[u8]) {
    for chunk in bytes.chunks(CONSOLE_CHUNK) {
        _print(format_args!("{}", String::from_utf8_lossy(chunk)));
    }
}

/// Snapshot of everything printed since boot.
pub fn contents() -> String {
    CONSOLE.lock().captured.clone()
}

/// Drain the capture buffer, returning what was printed so far.
pub fn take() -> String {
    core::mem::take(&mut CONSOLE.lock().captured)
}

#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => {
        $crate::console::_print(format_args!($($arg)*));
    };
}

#[macro_export]
macro_rules! println {
    () => { $crate::print!("\n") };
    ($($arg:tt)*) => {{
        $crate::console::_print(format_args!($($arg)*));
        $crate::console::_print(format_args!("\n"));
    }};
}

struct KernelLogger;

impl log::Log for KernelLogger {
    fn enabled(&self, _metadata: &log::Metadata) -> bool {
        true
    }

    fn log(&self, record: &log::Record) {
        if self.enabled(record.metadata()) {
            eprintln!("[{}] {}", record.level(), record.args());
        }
    }

    fn flush(&self) {}
}

static LOGGER: KernelLogger = KernelLogger;

pub fn init() {
    // A second `set_logger` just means something else already claimed the
    // facade; the console still works either way.
    let _ = log::set_logger(&LOGGER);
    log::set_max_level(log::LevelFilter::Info);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunked_write_preserves_order() {
        let long = "x".repeat(CONSOLE_CHUNK * 2 + 17);
        write_bytes(long.as_bytes());
        assert!(contents().contains(&long));
    }
}
