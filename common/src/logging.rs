// Leveled logging with a size-rotating file sink and an optional live
// broadcast hook.

use crate::config::Settings;
use chrono::{DateTime, Utc};
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use tracing::Level;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::Layer;

const LOG_FILE_NAME: &str = "gomft.log";
const BACKUP_PREFIX: &str = "gomft-";

/// Log verbosity, ordered `error < info < debug`. A level emits every record
/// at or below its own ordinal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Error,
    Info,
    Debug,
}

impl LogLevel {
    /// Case-insensitive parse; anything unrecognized falls back to `Info`.
    pub fn parse(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "error" => LogLevel::Error,
            "debug" => LogLevel::Debug,
            _ => LogLevel::Info,
        }
    }

    pub fn allows(&self, record: LogLevel) -> bool {
        record <= *self
    }

    fn as_filter(&self) -> LevelFilter {
        match self {
            LogLevel::Error => LevelFilter::ERROR,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Debug => LevelFilter::DEBUG,
        }
    }
}

/// Rotation and sink configuration.
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub directory: PathBuf,
    pub max_size_mb: u64,
    pub max_backups: usize,
    pub max_age_days: u64,
    pub compress: bool,
    pub level: LogLevel,
    pub broadcast: bool,
}

impl LogConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            directory: settings.logs_dir(),
            max_size_mb: settings.log_max_size,
            max_backups: settings.log_max_backups,
            max_age_days: settings.log_max_age,
            compress: settings.log_compress,
            level: LogLevel::parse(&settings.log_level),
            broadcast: settings.log_broadcast,
        }
    }
}

// ============================================================================
// Rotating file sink
// ============================================================================

/// Append-only log file that rotates itself once it exceeds the configured
/// size. Rotated files are renamed with a UTC timestamp, optionally
/// gzip-compressed, and pruned by count and age.
struct RollingFile {
    path: PathBuf,
    file: Option<File>,
    written: u64,
    max_size: u64,
    max_backups: usize,
    max_age_days: u64,
    compress: bool,
    closed: bool,
}

impl RollingFile {
    fn open(config: &LogConfig) -> io::Result<Self> {
        fs::create_dir_all(&config.directory)?;
        let path = config.directory.join(LOG_FILE_NAME);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let written = file.metadata().map(|m| m.len()).unwrap_or(0);
        Ok(Self {
            path,
            file: Some(file),
            written,
            max_size: config.max_size_mb.max(1) * 1024 * 1024,
            max_backups: config.max_backups,
            max_age_days: config.max_age_days,
            compress: config.compress,
            closed: false,
        })
    }

    fn write_record(&mut self, buf: &[u8]) -> io::Result<()> {
        if self.closed {
            return Ok(());
        }
        if self.written + buf.len() as u64 > self.max_size {
            self.rotate()?;
        }
        if self.file.is_none() {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)?;
            self.file = Some(file);
        }
        if let Some(file) = self.file.as_mut() {
            file.write_all(buf)?;
            self.written += buf.len() as u64;
        }
        Ok(())
    }

    fn rotate(&mut self) -> io::Result<()> {
        if let Some(mut file) = self.file.take() {
            file.flush()?;
        }
        if self.path.exists() {
            let stamp = Utc::now().format("%Y%m%dT%H%M%S%.3f");
            let rotated = self
                .path
                .with_file_name(format!("{BACKUP_PREFIX}{stamp}.log"));
            fs::rename(&self.path, &rotated)?;
            if self.compress {
                if let Err(e) = compress_file(&rotated) {
                    tracing::warn!(path = %rotated.display(), error = %e, "failed to compress rotated log");
                }
            }
        }
        self.prune_backups();
        self.written = 0;
        Ok(())
    }

    fn prune_backups(&self) {
        let Some(dir) = self.path.parent() else {
            return;
        };
        let Ok(entries) = fs::read_dir(dir) else {
            return;
        };
        let mut backups: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n.starts_with(BACKUP_PREFIX))
                    .unwrap_or(false)
            })
            .collect();
        // Timestamped names sort chronologically.
        backups.sort();

        let cutoff = Utc::now() - chrono::Duration::days(self.max_age_days as i64);
        let excess = backups.len().saturating_sub(self.max_backups);
        for (i, path) in backups.iter().enumerate() {
            let too_many = i < excess;
            let too_old = self.max_age_days > 0 && modified_before(path, cutoff);
            if too_many || too_old {
                let _ = fs::remove_file(path);
            }
        }
    }

    fn close(&mut self) {
        if let Some(mut file) = self.file.take() {
            let _ = file.flush();
        }
        self.closed = true;
    }
}

fn modified_before(path: &Path, cutoff: DateTime<Utc>) -> bool {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .map(|t| DateTime::<Utc>::from(t) < cutoff)
        .unwrap_or(false)
}

fn compress_file(path: &Path) -> io::Result<()> {
    let mut input = File::open(path)?;
    let gz_path = path.with_extension("log.gz");
    let output = File::create(&gz_path)?;
    let mut encoder = GzEncoder::new(output, Compression::default());
    io::copy(&mut input, &mut encoder)?;
    encoder.finish()?;
    fs::remove_file(path)
}

/// Cloneable handle to the rolling file, usable as a `tracing` writer.
#[derive(Clone)]
pub struct SharedWriter(Arc<Mutex<RollingFile>>);

impl io::Write for SharedWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut inner = self.0.lock().unwrap_or_else(|e| e.into_inner());
        inner.write_record(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut inner = self.0.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(file) = inner.file.as_mut() {
            file.flush()?;
        }
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for SharedWriter {
    type Writer = SharedWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

// ============================================================================
// Broadcast hook
// ============================================================================

/// Callback receiving `(level, message, source)` for every emitted record.
pub type BroadcastFn = Arc<dyn Fn(&str, &str, &str) + Send + Sync>;

#[derive(Clone, Default)]
pub struct BroadcastHandle(Arc<RwLock<Option<BroadcastFn>>>);

impl BroadcastHandle {
    pub fn set(&self, hook: BroadcastFn) {
        *self.0.write().unwrap_or_else(|e| e.into_inner()) = Some(hook);
    }

    pub fn clear(&self) {
        *self.0.write().unwrap_or_else(|e| e.into_inner()) = None;
    }

    fn emit(&self, level: &str, message: &str, source: &str) {
        let guard = self.0.read().unwrap_or_else(|e| e.into_inner());
        if let Some(hook) = guard.as_ref() {
            hook(level, message, source);
        }
    }
}

/// Tracing layer forwarding each event to the broadcast hook, when one is
/// installed.
struct BroadcastLayer {
    handle: BroadcastHandle,
}

impl<S: tracing::Subscriber> Layer<S> for BroadcastLayer {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = MessageVisitor(String::new());
        event.record(&mut visitor);
        let level = *event.metadata().level();
        let tag = if level == Level::ERROR {
            "error"
        } else if level == Level::WARN {
            "warn"
        } else if level == Level::INFO {
            "info"
        } else {
            "debug"
        };
        self.handle.emit(tag, &visitor.0, event.metadata().target());
    }
}

struct MessageVisitor(String);

impl tracing::field::Visit for MessageVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.0 = format!("{value:?}");
        }
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        if field.name() == "message" {
            self.0 = value.to_string();
        }
    }
}

// ============================================================================
// Logger handle
// ============================================================================

/// Handle over the initialized log pipeline. Components log through `tracing`
/// macros; this handle owns the file sink and the broadcast hook.
#[derive(Clone)]
pub struct Logger {
    level: LogLevel,
    writer: SharedWriter,
    broadcast: BroadcastHandle,
}

impl Logger {
    /// Open the rotating file sink and install the global tracing subscriber
    /// (console + file + optional broadcast). Safe to call more than once;
    /// subsequent subscribers are not re-installed.
    pub fn init(config: &LogConfig) -> io::Result<Logger> {
        let writer = SharedWriter(Arc::new(Mutex::new(RollingFile::open(config)?)));
        let broadcast = BroadcastHandle::default();

        let console_layer = tracing_subscriber::fmt::layer().with_target(true);
        let file_layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(writer.clone());

        let registry = tracing_subscriber::registry()
            .with(config.level.as_filter())
            .with(console_layer)
            .with(file_layer);

        if config.broadcast {
            let _ = registry
                .with(BroadcastLayer {
                    handle: broadcast.clone(),
                })
                .try_init();
        } else {
            let _ = registry.try_init();
        }

        Ok(Logger {
            level: config.level,
            writer,
            broadcast,
        })
    }

    pub fn info(&self, message: &str) {
        if self.level.allows(LogLevel::Info) {
            tracing::info!(target: "gomft", "{message}");
        }
    }

    pub fn error(&self, message: &str) {
        if self.level.allows(LogLevel::Error) {
            tracing::error!(target: "gomft", "{message}");
        }
    }

    pub fn debug(&self, message: &str) {
        if self.level.allows(LogLevel::Debug) {
            tracing::debug!(target: "gomft", "{message}");
        }
    }

    /// Force a rotation of the file sink.
    pub fn rotate(&self) -> io::Result<()> {
        let mut inner = self.writer.0.lock().unwrap_or_else(|e| e.into_inner());
        inner.rotate()
    }

    /// Release the file sink. Idempotent; writes after close are silently
    /// dropped.
    pub fn close(&self) {
        let mut inner = self.writer.0.lock().unwrap_or_else(|e| e.into_inner());
        inner.close();
    }

    pub fn set_broadcast_hook(&self, hook: BroadcastFn) {
        self.broadcast.set(hook);
    }

    pub fn clear_broadcast_hook(&self) {
        self.broadcast.clear();
    }
}
