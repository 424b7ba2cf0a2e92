//! Process-wide stderr logger with text or JSON lines and an optional capture ring.

use std::collections::VecDeque;
use std::fmt;
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Mutex, OnceLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde_json::{json, Value};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd)]
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
            Self::Error => "ERROR",
            Self::Warn => "WARN",
            Self::Info => "INFO",
            Self::Debug => "DEBUG",
            Self::Trace => "TRACE",
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Format {
    Text = 0,
    Json = 1,
}

#[derive(Clone, Copy, Debug)]
pub struct LogConfig {
    pub level: Level,
    pub format: Format,
    pub timestamps: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::Info,
            format: Format::Text,
            timestamps: true,
        }
    }
}

static LOG_LEVEL: AtomicU8 = AtomicU8::new(Level::Info as u8);
static LOG_FORMAT: AtomicU8 = AtomicU8::new(Format::Text as u8);
static LOG_TIMESTAMPS: AtomicBool = AtomicBool::new(true);
static LOG_STDERR_ENABLED: AtomicBool = AtomicBool::new(true);

#[derive(Clone, Debug)]
pub struct CapturedLog {
    pub ts_ms: u64,
    pub level: Level,
    pub target: &'static str,
    pub file: &'static str,
    pub line: u32,
    pub msg: String,
    pub fields: Option<Value>,
}

static LOG_CAPTURE_ENABLED: AtomicBool = AtomicBool::new(false);
static LOG_CAPTURE: OnceLock<Mutex<CaptureRing>> = OnceLock::new();

/// Most recent records, oldest evicted first.
struct CaptureRing {
    records: VecDeque<CapturedLog>,
    capacity: usize,
}

impl CaptureRing {
    fn push(&mut self, record: CapturedLog) {
        if self.capacity == 0 {
            return;
        }
        while self.records.len() >= self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }
}

pub fn init(config: LogConfig) {
    LOG_LEVEL.store(config.level as u8, Ordering::Relaxed);
    LOG_FORMAT.store(config.format as u8, Ordering::Relaxed);
    LOG_TIMESTAMPS.store(config.timestamps, Ordering::Relaxed);
}

/// Keeps the last `capacity` records in memory; zero turns capture off.
pub fn enable_capture(capacity: usize) {
    LOG_CAPTURE_ENABLED.store(capacity > 0, Ordering::Relaxed);
    let ring = LOG_CAPTURE.get_or_init(|| {
        Mutex::new(CaptureRing {
            records: VecDeque::new(),
            capacity,
        })
    });
    if let Ok(mut guard) = ring.lock() {
        guard.capacity = capacity;
        guard.records.clear();
    }
}

pub fn set_stderr_enabled(enabled: bool) {
    LOG_STDERR_ENABLED.store(enabled, Ordering::Relaxed);
}

/// Up to `limit` of the newest captured records, oldest first.
pub fn capture_snapshot(limit: usize) -> Vec<CapturedLog> {
    let Some(Ok(guard)) = LOG_CAPTURE.get().map(Mutex::lock) else {
        return Vec::new();
    };
    let skip = guard.records.len().saturating_sub(limit);
    guard.records.iter().skip(skip).cloned().collect()
}

pub fn enabled(level: Level) -> bool {
    level as u8 <= LOG_LEVEL.load(Ordering::Relaxed)
}

struct Record<'a> {
    now: Duration,
    level: Level,
    target: &'static str,
    file: &'static str,
    line: u32,
    msg: &'a str,
    fields: Option<&'a Value>,
}

impl Record<'_> {
    fn ts_ms(&self) -> u64 {
        self.now.as_millis().try_into().unwrap_or(u64::MAX)
    }

    fn render(&self, format: Format, timestamps: bool) -> String {
        match format {
            Format::Text => {
                let mut out = String::new();
                if timestamps {
                    let ts = Timestamp {
                        unix_seconds: self.now.as_secs(),
                        millis: self.now.subsec_millis(),
                    };
                    out.push_str(&format!("{ts} "));
                }
                out.push_str(&format!("{} {}: {}", self.level.as_str(), self.target, self.msg));
                if let Some(fields) = self.fields {
                    out.push_str(&format!(" {fields}"));
                }
                out
            }
            Format::Json => {
                let mut line = json!({
                    "ts_ms": self.ts_ms(),
                    "level": self.level.as_str(),
                    "target": self.target,
                    "file": self.file,
                    "line": self.line,
                    "msg": self.msg,
                });
                if let (Some(fields), Value::Object(map)) = (self.fields, &mut line) {
                    map.insert("fields".to_string(), fields.clone());
                }
                line.to_string()
            }
        }
    }
}

pub fn log(
    level: Level,
    target: &'static str,
    file: &'static str,
    line: u32,
    args: fmt::Arguments<'_>,
) {
    log_with_fields(level, target, file, line, args, None);
}

/// Emits one record carrying a structured payload next to its message.
pub fn log_with_fields(
    level: Level,
    target: &'static str,
    file: &'static str,
    line: u32,
    args: fmt::Arguments<'_>,
    fields: Option<&Value>,
) {
    if !enabled(level) {
        return;
    }

    let format = match LOG_FORMAT.load(Ordering::Relaxed) {
        1 => Format::Json,
        _ => Format::Text,
    };
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    let msg = args.to_string();
    let record = Record {
        now,
        level,
        target,
        file,
        line,
        msg: &msg,
        fields,
    };

    if LOG_STDERR_ENABLED.load(Ordering::Relaxed) {
        let rendered = record.render(format, LOG_TIMESTAMPS.load(Ordering::Relaxed));
        let mut out = io::stderr().lock();
        let _ = writeln!(out, "{rendered}");
    }

    if LOG_CAPTURE_ENABLED.load(Ordering::Relaxed) {
        capture(&record);
    }
}

fn capture(record: &Record<'_>) {
    let Some(Ok(mut guard)) = LOG_CAPTURE.get().map(Mutex::lock) else {
        return;
    };
    guard.push(CapturedLog {
        ts_ms: record.ts_ms(),
        level: record.level,
        target: record.target,
        file: record.file,
        line: record.line,
        msg: record.msg.to_string(),
        fields: record.fields.cloned(),
    });
}

#[macro_export]
macro_rules! log_at {
    ($level:expr, $($arg:tt)*) => {{
        if $crate::enabled($level) {
            $crate::log($level, module_path!(), file!(), line!(), format_args!($($arg)*));
        }
    }};
}

/// `log_fields!(Level::Debug, &value, "message {}", arg)`
#[macro_export]
macro_rules! log_fields {
    ($level:expr, $fields:expr, $($arg:tt)*) => {{
        if $crate::enabled($level) {
            $crate::log_with_fields(
                $level,
                module_path!(),
                file!(),
                line!(),
                format_args!($($arg)*),
                Some($fields),
            );
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

struct Timestamp {
    unix_seconds: u64,
    millis: u32,
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const SECS_PER_DAY: u64 = 86_400;
        let days = (self.unix_seconds / SECS_PER_DAY) as i64;
        let secs_of_day = self.unix_seconds % SECS_PER_DAY;
        let hour = secs_of_day / 3600;
        let minute = (secs_of_day % 3600) / 60;
        let second = secs_of_day % 60;
        let (year, month, day) = civil_from_days(days);
        write!(
            f,
            "{year:04}-{month:02}-{day:02}T{hour:02}:{minute:02}:{second:02}.{millis:03}Z",
            millis = self.millis
        )
    }
}

fn civil_from_days(days_since_unix_epoch: i64) -> (i32, u32, u32) {
    // Howard Hinnant's civil_from_days (public domain).
    let z = days_since_unix_epoch + 719_468;
    let era = if z >= 0 { z } else { z - 146_096 } / 146_097;
    let doe = (z - era * 146_097) as u32;
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let y = (yoe as i32) + (era as i32) * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = doy - (153 * mp + 2) / 5 + 1;
    let m = if mp < 10 { mp + 3 } else { mp - 9 };
    let year = y + if m <= 2 { 1 } else { 0 };
    (year, m, d)
}
