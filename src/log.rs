//! Process-wide leveled log facade.
//!
//! The schedulers report through this module rather than calling a logging
//! backend directly, so hosts can capture runtime diagnostics with
//! [`set_hook`]. The default hook forwards to `tracing` and converts a
//! [`Level::Fatal`] message into a panic; a custom hook may choose otherwise.
//!
//! Installing a hook is intended for process startup; the slot itself is
//! synchronised, but swapping hooks while schedulers are live interleaves
//! messages between old and new hooks arbitrarily.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, RwLock};

/// Log severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Level {
    /// Diagnostic detail.
    Debug = 0,
    /// Normal operation.
    Info = 1,
    /// Suspicious but recoverable.
    Warn = 2,
    /// Operation failed.
    Error = 3,
    /// Unrecoverable; the default hook panics.
    Fatal = 4,
}

impl Level {
    /// Display name of the level.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Debug => "Debug",
            Self::Info => "Info",
            Self::Warn => "Warn",
            Self::Error => "Error",
            Self::Fatal => "Fatal",
        }
    }
}

/// Replaceable log sink.
pub type LogHook = Arc<dyn Fn(Level, &str) + Send + Sync>;

static HOOK: RwLock<Option<LogHook>> = RwLock::new(None);
static ACTIVE_LEVEL: AtomicU8 = AtomicU8::new(Level::Debug as u8);

/// Installs a hook receiving every message at or above the active level.
pub fn set_hook(hook: LogHook) {
    *HOOK.write().expect("log hook lock poisoned") = Some(hook);
}

/// Restores the default hook.
pub fn clear_hook() {
    *HOOK.write().expect("log hook lock poisoned") = None;
}

/// Sets the minimum level that reaches the hook.
pub fn set_level(level: Level) {
    ACTIVE_LEVEL.store(level as u8, Ordering::Relaxed);
}

/// Returns the minimum level that reaches the hook.
#[must_use]
pub fn level() -> Level {
    match ACTIVE_LEVEL.load(Ordering::Relaxed) {
        0 => Level::Debug,
        1 => Level::Info,
        2 => Level::Warn,
        3 => Level::Error,
        _ => Level::Fatal,
    }
}

fn default_hook(level: Level, msg: &str) {
    match level {
        Level::Debug => tracing::debug!("{msg}"),
        Level::Info => tracing::info!("{msg}"),
        Level::Warn => tracing::warn!("{msg}"),
        Level::Error => tracing::error!("{msg}"),
        Level::Fatal => {
            tracing::error!("{msg}");
            panic!("fatal: {msg}");
        }
    }
}

/// Emits a message at `level`, subject to the active-level filter.
pub fn log(level: Level, msg: &str) {
    if level < self::level() {
        return;
    }
    let hook = HOOK.read().expect("log hook lock poisoned").clone();
    match hook {
        Some(hook) => hook(level, msg),
        None => default_hook(level, msg),
    }
}

/// Emits at [`Level::Debug`].
pub fn debug(msg: &str) {
    log(Level::Debug, msg);
}

/// Emits at [`Level::Info`].
pub fn info(msg: &str) {
    log(Level::Info, msg);
}

/// Emits at [`Level::Warn`].
pub fn warn(msg: &str) {
    log(Level::Warn, msg);
}

/// Emits at [`Level::Error`].
pub fn error(msg: &str) {
    log(Level::Error, msg);
}

/// Emits at [`Level::Fatal`]. Panics when the default hook is installed.
pub fn fatal(msg: &str) {
    log(Level::Fatal, msg);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn hook_receives_messages_and_respects_level() {
        let seen: Arc<Mutex<Vec<(Level, String)>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        set_hook(Arc::new(move |level, msg| {
            sink.lock().unwrap().push((level, msg.to_string()));
        }));

        set_level(Level::Warn);
        debug("log-test: drop me");
        warn("log-test: keep me");
        error("log-test: keep me too");

        set_level(Level::Debug);
        clear_hook();

        let seen = seen.lock().unwrap();
        let ours: Vec<_> = seen
            .iter()
            .filter(|(_, m)| m.starts_with("log-test:"))
            .collect();
        assert_eq!(ours.len(), 2);
        assert_eq!(ours[0].0, Level::Warn);
        assert_eq!(ours[1].0, Level::Error);
    }

    #[test]
    fn level_names() {
        assert_eq!(Level::Debug.name(), "Debug");
        assert_eq!(Level::Fatal.name(), "Fatal");
        assert!(Level::Debug < Level::Fatal);
    }
}
