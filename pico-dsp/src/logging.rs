//! `log` records on a defmt transport.
//!
//! The library logs through the `log` facade so host tests and the device
//! share one set of call sites. On the device nothing formats text, so with
//! the `defmt` feature [`install`] registers a [`log::Log`] that renders each
//! record into a fixed stack buffer and forwards it as a defmt string.

use core::fmt;

/// Bytes kept per forwarded record; longer lines are cut.
pub const LINE_CAPACITY: usize = 128;

/// Fixed-size text sink that silently truncates at a char boundary.
pub struct LineBuffer<const N: usize> {
    bytes: [u8; N],
    len: usize,
    truncated: bool,
}

impl<const N: usize> LineBuffer<N> {
    pub const fn new() -> Self {
        Self {
            bytes: [0; N],
            len: 0,
            truncated: false,
        }
    }

    pub fn as_str(&self) -> &str {
        // Only whole chars are ever copied in.
        core::str::from_utf8(&self.bytes[..self.len]).unwrap_or_default()
    }

    /// True if anything written was dropped.
    pub fn is_truncated(&self) -> bool {
        self.truncated
    }
}

impl<const N: usize> Default for LineBuffer<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> fmt::Write for LineBuffer<N> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        if self.truncated {
            return Ok(());
        }
        let room = N - self.len;
        let mut take = s.len().min(room);
        while !s.is_char_boundary(take) {
            take -= 1;
        }
        self.bytes[self.len..self.len + take].copy_from_slice(&s.as_bytes()[..take]);
        self.len += take;
        self.truncated = take < s.len();
        Ok(())
    }
}

#[cfg(feature = "defmt")]
pub use device::{install, DefmtLogger};

#[cfg(feature = "defmt")]
mod device {
    use core::fmt::Write;

    use log::{Level, LevelFilter, Log, Metadata, Record, SetLoggerError};

    use super::{LineBuffer, LINE_CAPACITY};

    pub struct DefmtLogger;

    static LOGGER: DefmtLogger = DefmtLogger;

    impl Log for DefmtLogger {
        fn enabled(&self, metadata: &Metadata) -> bool {
            metadata.level() <= log::max_level()
        }

        fn log(&self, record: &Record) {
            if !self.enabled(record.metadata()) {
                return;
            }
            let mut line = LineBuffer::<LINE_CAPACITY>::new();
            let _ = write!(line, "{}", record.args());
            let (target, text) = (record.target(), line.as_str());
            match record.level() {
                Level::Error => defmt::error!("{=str}: {=str}", target, text),
                Level::Warn => defmt::warn!("{=str}: {=str}", target, text),
                Level::Info => defmt::info!("{=str}: {=str}", target, text),
                Level::Debug => defmt::debug!("{=str}: {=str}", target, text),
                Level::Trace => defmt::trace!("{=str}: {=str}", target, text),
            }
        }

        fn flush(&self) {}
    }

    /// Route `log` records to defmt, keeping those at or above `level`.
    ///
    /// # Safety
    ///
    /// Must run once, before any other code can log. thumbv6m has no
    /// compare-and-swap, so the logger is set without synchronization.
    pub unsafe fn install(level: LevelFilter) -> Result<(), SetLoggerError> {
        // SAFETY: the caller guarantees no concurrent logging or install.
        unsafe {
            log::set_logger_racy(&LOGGER)?;
            log::set_max_level_racy(level);
        }
        Ok(())
    }
}
