//! Process-wide logger shared by every chaindex crate.
//!
//! Records are tagged with the subsystem that emitted them (the crate name
//! without the `chaindex_` prefix), so `loglevel=info,storage=debug` can turn
//! up store chatter without flooding the rest of the output.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Mutex, OnceLock, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::json;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum Level {
    Error = 1,
    Warn = 2,
    Info = 3,
    Debug = 4,
    Trace = 5,
}

impl Level {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Error => "ERR",
            Self::Warn => "WRN",
            Self::Info => "INF",
            Self::Debug => "DBG",
            Self::Trace => "TRC",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "error" | "err" => Some(Self::Error),
            "warn" | "warning" | "wrn" => Some(Self::Warn),
            "info" | "inf" => Some(Self::Info),
            "debug" | "dbg" => Some(Self::Debug),
            "trace" | "trc" => Some(Self::Trace),
            _ => None,
        }
    }

    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::Error,
            2 => Self::Warn,
            4 => Self::Debug,
            5 => Self::Trace,
            _ => Self::Info,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Format {
    Text = 0,
    Json = 1,
}

impl Format {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "text" | "plain" => Some(Self::Text),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

/// Default level plus per-subsystem overrides, parsed from strings like
/// `info,storage=debug,chainstate=trace`.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct LevelSpec {
    pub default: Option<Level>,
    pub overrides: Vec<(String, Level)>,
}

impl LevelSpec {
    pub fn parse(raw: &str) -> Result<Self, String> {
        let mut spec = LevelSpec::default();
        for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            match part.split_once('=') {
                Some((subsystem, level)) => {
                    let level = Level::parse(level)
                        .ok_or_else(|| format!("invalid log level '{level}' for {subsystem}"))?;
                    spec.overrides
                        .push((subsystem.trim().to_ascii_lowercase(), level));
                }
                None => {
                    let level =
                        Level::parse(part).ok_or_else(|| format!("invalid log level '{part}'"))?;
                    spec.default = Some(level);
                }
            }
        }
        Ok(spec)
    }
}

#[derive(Clone, Debug)]
pub struct LogConfig {
    pub level: LevelSpec,
    pub format: Format,
    pub timestamps: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LevelSpec {
                default: Some(Level::Info),
                overrides: Vec::new(),
            },
            format: Format::Text,
            timestamps: true,
        }
    }
}

static MAX_LEVEL: AtomicU8 = AtomicU8::new(Level::Info as u8);
static DEFAULT_LEVEL: AtomicU8 = AtomicU8::new(Level::Info as u8);
static FORMAT: AtomicU8 = AtomicU8::new(Format::Text as u8);
static TIMESTAMPS: AtomicBool = AtomicBool::new(true);
static STDERR_ENABLED: AtomicBool = AtomicBool::new(true);
static HAS_OVERRIDES: AtomicBool = AtomicBool::new(false);
static OVERRIDES: OnceLock<RwLock<HashMap<String, Level>>> = OnceLock::new();

#[derive(Clone, Debug)]
pub struct Record {
    pub ts_ms: u64,
    pub level: Level,
    pub subsystem: &'static str,
    pub line: u32,
    pub msg: String,
}

static CAPTURE_ENABLED: AtomicBool = AtomicBool::new(false);
static CAPTURE_CAPACITY: AtomicUsize = AtomicUsize::new(0);
static CAPTURE: OnceLock<Mutex<VecDeque<Record>>> = OnceLock::new();

fn overrides() -> &'static RwLock<HashMap<String, Level>> {
    OVERRIDES.get_or_init(|| RwLock::new(HashMap::new()))
}

pub fn init(config: &LogConfig) {
    let default = config.level.default.unwrap_or(Level::Info);
    DEFAULT_LEVEL.store(default as u8, Ordering::Relaxed);
    FORMAT.store(config.format as u8, Ordering::Relaxed);
    TIMESTAMPS.store(config.timestamps, Ordering::Relaxed);

    let mut max = default;
    if let Ok(mut map) = overrides().write() {
        map.clear();
        for (subsystem, level) in &config.level.overrides {
            max = max.max(*level);
            map.insert(subsystem.clone(), *level);
        }
        HAS_OVERRIDES.store(!map.is_empty(), Ordering::Relaxed);
    }
    MAX_LEVEL.store(max as u8, Ordering::Relaxed);
}

pub fn set_stderr_enabled(enabled: bool) {
    STDERR_ENABLED.store(enabled, Ordering::Relaxed);
}

/// Keeps the most recent `capacity` records in memory. Tests use this to
/// assert on what a code path logged.
pub fn enable_capture(capacity: usize) {
    if capacity == 0 {
        CAPTURE_ENABLED.store(false, Ordering::Relaxed);
        return;
    }
    CAPTURE_CAPACITY.store(capacity, Ordering::Relaxed);
    CAPTURE.get_or_init(|| Mutex::new(VecDeque::with_capacity(capacity.min(1024))));
    CAPTURE_ENABLED.store(true, Ordering::Relaxed);
}

pub fn captured(subsystem: Option<&str>) -> Vec<Record> {
    let Some(buf) = CAPTURE.get() else {
        return Vec::new();
    };
    let Ok(guard) = buf.lock() else {
        return Vec::new();
    };
    guard
        .iter()
        .filter(|record| subsystem.map_or(true, |s| record.subsystem == s))
        .cloned()
        .collect()
}

pub fn clear_captured() {
    if let Some(buf) = CAPTURE.get() {
        if let Ok(mut guard) = buf.lock() {
            guard.clear();
        }
    }
}

/// Maps a module path such as `chaindex_storage::sqlite` to `storage`.
pub fn subsystem_of(module_path: &'static str) -> &'static str {
    let head = module_path.split("::").next().unwrap_or(module_path);
    head.strip_prefix("chaindex_").unwrap_or(head)
}

/// Cheap pre-check used by the macros before formatting arguments.
pub fn maybe_enabled(level: Level) -> bool {
    level as u8 <= MAX_LEVEL.load(Ordering::Relaxed)
}

pub fn enabled(level: Level, subsystem: &str) -> bool {
    if HAS_OVERRIDES.load(Ordering::Relaxed) {
        if let Ok(map) = overrides().read() {
            if let Some(limit) = map.get(subsystem) {
                return level <= *limit;
            }
        }
    }
    level as u8 <= DEFAULT_LEVEL.load(Ordering::Relaxed)
}

pub fn log(level: Level, module_path: &'static str, line: u32, args: fmt::Arguments<'_>) {
    let subsystem = subsystem_of(module_path);
    if !enabled(level, subsystem) {
        return;
    }

    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    let ts_ms: u64 = now.as_millis().try_into().unwrap_or(u64::MAX);
    let msg = args.to_string();

    if STDERR_ENABLED.load(Ordering::Relaxed) {
        let mut out = io::stderr().lock();
        if FORMAT.load(Ordering::Relaxed) == Format::Json as u8 {
            let value = json!({
                "ts_ms": ts_ms,
                "level": level.as_str(),
                "subsystem": subsystem,
                "line": line,
                "msg": msg,
            });
            let _ = writeln!(out, "{value}");
        } else {
            if TIMESTAMPS.load(Ordering::Relaxed) {
                let _ = write!(out, "{}.{:03} ", now.as_secs(), now.subsec_millis());
            }
            let _ = writeln!(
                out,
                "[{}] {}: {msg}",
                level.as_str(),
                subsystem.to_ascii_uppercase()
            );
        }
    }

    if CAPTURE_ENABLED.load(Ordering::Relaxed) {
        let Some(buf) = CAPTURE.get() else {
            return;
        };
        let Ok(mut guard) = buf.lock() else {
            return;
        };
        let cap = CAPTURE_CAPACITY.load(Ordering::Relaxed);
        guard.push_back(Record {
            ts_ms,
            level,
            subsystem,
            line,
            msg,
        });
        while guard.len() > cap {
            guard.pop_front();
        }
    }
}

pub fn current_level() -> Level {
    Level::from_u8(DEFAULT_LEVEL.load(Ordering::Relaxed))
}

#[macro_export]
macro_rules! log_at {
    ($level:expr, $($arg:tt)*) => {{
        if $crate::maybe_enabled($level) {
            $crate::log($level, module_path!(), line!(), format_args!($($arg)*));
        }
    }};
}

#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {{
        $crate::log_at!($crate::Level::Error, $($arg)*);
    }};
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {{
        $crate::log_at!($crate::Level::Warn, $($arg)*);
    }};
}

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {{
        $crate::log_at!($crate::Level::Info, $($arg)*);
    }};
}

#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {{
        $crate::log_at!($crate::Level::Debug, $($arg)*);
    }};
}

#[macro_export]
macro_rules! log_trace {
    ($($arg:tt)*) => {{
        $crate::log_at!($crate::Level::Trace, $($arg)*);
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_spec_with_overrides() {
        let spec = LevelSpec::parse("info, storage=debug,chainstate=TRACE").expect("spec");
        assert_eq!(spec.default, Some(Level::Info));
        assert_eq!(
            spec.overrides,
            vec![
                ("storage".to_string(), Level::Debug),
                ("chainstate".to_string(), Level::Trace),
            ]
        );
    }

    #[test]
    fn level_spec_rejects_garbage() {
        assert!(LevelSpec::parse("loud").is_err());
        assert!(LevelSpec::parse("storage=loud").is_err());
    }

    #[test]
    fn subsystem_strips_crate_prefix() {
        assert_eq!(subsystem_of("chaindex_storage::sqlite"), "storage");
        assert_eq!(subsystem_of("chaindex"), "chaindex");
        assert_eq!(subsystem_of("other::module"), "other");
    }

    #[test]
    fn parse_format() {
        assert_eq!(Format::parse("JSON"), Some(Format::Json));
        assert_eq!(Format::parse("plain"), Some(Format::Text));
        assert_eq!(Format::parse("yaml"), None);
    }
}
