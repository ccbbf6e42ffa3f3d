//! Logging and the single-line progress display.
//!
//! There is no global logger; an [`Logger`] handle is created in `main` and
//! shared by reference (`Arc`) with everything that reports progress.

use std::io::Write;
use std::sync::atomic::{AtomicI8, Ordering};
use std::sync::Mutex;

use owo_colors::{OwoColorize, Stream};

#[derive(PartialEq, Eq, PartialOrd, Ord, Copy, Clone, Debug)]
pub enum Level {
    Warn = 0,
    Info = 1,
    Debug1 = 2,
    Debug2 = 3,
    Debug3 = 4,
}

/// Colorization preference from `--color`.
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
pub enum ColorChoice {
    Auto,
    Always,
    Never,
}

impl ColorChoice {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "auto" => Some(Self::Auto),
            "always" => Some(Self::Always),
            "never" => Some(Self::Never),
            _ => None,
        }
    }

    /// Applies the preference process-wide (owo-colors override).
    pub fn apply(self) {
        match self {
            Self::Auto => owo_colors::unset_override(),
            Self::Always => owo_colors::set_override(true),
            Self::Never => owo_colors::set_override(false),
        }
    }
}

struct StatusState {
    line: Option<String>,
    drawn: bool,
}

pub struct Logger {
    level: AtomicI8,
    progress: bool,
    status: Mutex<StatusState>,
}

impl Logger {
    pub fn new(verbosity: i8, progress: bool) -> Self {
        Self {
            level: AtomicI8::new(verbosity),
            progress: progress && atty::is(atty::Stream::Stderr),
            status: Mutex::new(StatusState {
                line: None,
                drawn: false,
            }),
        }
    }

    pub fn level(&self) -> i8 {
        self.level.load(Ordering::Relaxed)
    }

    pub fn raise_level(&self) {
        self.level.fetch_add(1, Ordering::Relaxed);
    }

    fn enabled(&self, level: Level) -> bool {
        self.level() >= level as i8
    }

    fn write_line(&self, line: &str) {
        let mut status = self.status.lock().expect("logger mutex poisoned");
        let stderr = std::io::stderr();
        let mut out = stderr.lock();
        if status.drawn {
            let _ = write!(out, "\r\x1b[2K");
            status.drawn = false;
        }
        let _ = writeln!(out, "{}", line);
        if self.progress {
            if let Some(ref status_line) = status.line {
                let _ = write!(out, "{}", status_line);
                let _ = out.flush();
                status.drawn = true;
            }
        }
    }

    pub fn fatal(&self, msg: impl AsRef<str>) {
        let msg = format!("n3map: fatal: {}", msg.as_ref());
        self.write_line(
            &msg.if_supports_color(Stream::Stderr, |s| s.red())
                .to_string(),
        );
    }

    pub fn error(&self, msg: impl AsRef<str>) {
        let msg = format!("error: {}", msg.as_ref());
        self.write_line(
            &msg.if_supports_color(Stream::Stderr, |s| s.red())
                .to_string(),
        );
    }

    pub fn warn(&self, msg: impl AsRef<str>) {
        if !self.enabled(Level::Warn) {
            return;
        }
        let msg = format!("warning: {}", msg.as_ref());
        self.write_line(
            &msg.if_supports_color(Stream::Stderr, |s| s.yellow())
                .to_string(),
        );
    }

    pub fn info(&self, msg: impl AsRef<str>) {
        if self.enabled(Level::Info) {
            self.write_line(msg.as_ref());
        }
    }

    pub fn debug1(&self, msg: impl AsRef<str>) {
        if self.enabled(Level::Debug1) {
            self.write_line(msg.as_ref());
        }
    }

    pub fn debug2(&self, msg: impl AsRef<str>) {
        if self.enabled(Level::Debug2) {
            self.write_line(msg.as_ref());
        }
    }

    pub fn debug3(&self, msg: impl AsRef<str>) {
        if self.enabled(Level::Debug3) {
            self.write_line(msg.as_ref());
        }
    }

    /// Replaces the progress line with a fresh snapshot and redraws it.
    pub fn update_status(&self, line: String) {
        if !self.progress {
            return;
        }
        let mut status = self.status.lock().expect("logger mutex poisoned");
        status.line = Some(line);
        let stderr = std::io::stderr();
        let mut out = stderr.lock();
        let _ = write!(
            out,
            "\r\x1b[2K{}",
            status.line.as_deref().unwrap_or_default()
        );
        let _ = out.flush();
        status.drawn = true;
    }

    /// Removes the progress line, e.g. when a walk finishes or aborts.
    pub fn clear_status(&self) {
        let mut status = self.status.lock().expect("logger mutex poisoned");
        status.line = None;
        if status.drawn {
            let stderr = std::io::stderr();
            let mut out = stderr.lock();
            let _ = write!(out, "\r\x1b[2K");
            let _ = out.flush();
            status.drawn = false;
        }
    }
}
