//! Shared logging utilities for SAGE binaries.

use anyhow::{Context, Result};
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Crate targets that receive the configured level.
const SAGE_TARGETS: &[&str] = &[
    "sage_daemon",
    "sage_schema",
    "sage_validator",
    "sage_monitor",
    "sage_store",
    "sage_check",
];
const MAX_LOG_FILES: usize = 5;
const MAX_LOG_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// Verbosity accepted by `--log-level`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warning,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warning => "WARNING",
            LogLevel::Error => "ERROR",
        }
    }

    /// Directive understood by `EnvFilter`.
    fn directive(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warn",
            LogLevel::Error => "error",
        }
    }

    /// Filter string applying this level to every SAGE crate and `warn` elsewhere.
    pub fn filter_string(&self) -> String {
        let mut parts = vec!["warn".to_string()];
        for target in SAGE_TARGETS {
            parts.push(format!("{}={}", target, self.directive()));
        }
        parts.join(",")
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "DEBUG" => Ok(LogLevel::Debug),
            "INFO" => Ok(LogLevel::Info),
            "WARNING" | "WARN" => Ok(LogLevel::Warning),
            "ERROR" => Ok(LogLevel::Error),
            _ => Err(format!(
                "Invalid log level: '{}'. Expected: DEBUG, INFO, WARNING, or ERROR",
                s
            )),
        }
    }
}

/// Logging configuration shared by SAGE binaries.
pub struct LogConfig<'a> {
    pub app_name: &'a str,
    pub level: LogLevel,
    /// Optional log file; rotated by size next to the given path.
    pub log_file: Option<PathBuf>,
}

/// Initialize tracing with stderr output and an optional rolling file writer.
pub fn init_logging(config: LogConfig<'_>) -> Result<()> {
    let filter_spec = config.level.filter_string();

    let file_layer = match config.log_file.as_deref() {
        Some(path) => {
            let writer = SharedRollingWriter::for_path(path, config.app_name)
                .context("Failed to initialize rolling log writer")?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_writer(writer)
                    .with_ansi(false)
                    .with_filter(EnvFilter::new(&filter_spec)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(file_layer)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(EnvFilter::new(&filter_spec)),
        )
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(())
}

/// `<stem>.log` plus at most `keep - 1` older generations `<stem>.log.N`.
struct RollingFileAppender {
    dir: PathBuf,
    stem: String,
    keep: usize,
    limit: u64,
    file: Option<File>,
    written: u64,
}

impl RollingFileAppender {
    fn new(dir: PathBuf, stem: &str, keep: usize, limit: u64) -> io::Result<Self> {
        fs::create_dir_all(&dir)?;
        let mut appender = Self {
            dir,
            stem: sanitize_name(stem),
            keep: keep.max(1),
            limit,
            file: None,
            written: 0,
        };
        appender.reopen()?;
        if appender.written > appender.limit {
            appender.roll()?;
        }
        Ok(appender)
    }

    /// Generation 0 is the live file.
    fn generation(&self, n: usize) -> PathBuf {
        if n == 0 {
            self.dir.join(format!("{}.log", self.stem))
        } else {
            self.dir.join(format!("{}.log.{}", self.stem, n))
        }
    }

    fn reopen(&mut self) -> io::Result<()> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.generation(0))?;
        self.written = file.metadata()?.len();
        self.file = Some(file);
        Ok(())
    }

    fn roll(&mut self) -> io::Result<()> {
        if let Some(mut file) = self.file.take() {
            let _ = file.flush();
        }
        if self.keep > 1 {
            let oldest = self.generation(self.keep - 1);
            if oldest.exists() {
                fs::remove_file(oldest)?;
            }
            for n in (0..self.keep - 1).rev() {
                let from = self.generation(n);
                if from.exists() {
                    fs::rename(&from, self.generation(n + 1))?;
                }
            }
        } else {
            fs::remove_file(self.generation(0)).or_else(|e| match e.kind() {
                io::ErrorKind::NotFound => Ok(()),
                _ => Err(e),
            })?;
        }
        self.reopen()
    }
}

impl Write for RollingFileAppender {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.written + buf.len() as u64 > self.limit {
            self.roll()?;
        }
        let Some(file) = self.file.as_mut() else {
            return Err(io::Error::new(io::ErrorKind::Other, "log file unavailable"));
        };
        let n = file.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.file.as_mut() {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }
}

/// `MakeWriter` handing every event the same appender.
#[derive(Clone)]
struct SharedRollingWriter(Arc<Mutex<RollingFileAppender>>);

impl SharedRollingWriter {
    /// The directory of `path` holds the rotation set; its stem names it.
    fn for_path(path: &Path, fallback_name: &str) -> Result<Self> {
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(fallback_name);
        let appender = RollingFileAppender::new(dir, stem, MAX_LOG_FILES, MAX_LOG_FILE_SIZE)
            .with_context(|| format!("Failed to open log file {}", path.display()))?;
        Ok(Self(Arc::new(Mutex::new(appender))))
    }

    fn with_appender<T>(
        &self,
        f: impl FnOnce(&mut RollingFileAppender) -> io::Result<T>,
    ) -> io::Result<T> {
        let mut guard = self
            .0
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "log writer lock poisoned"))?;
        f(&mut guard)
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for SharedRollingWriter {
    type Writer = SharedRollingWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

impl Write for SharedRollingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.with_appender(|a| a.write(buf))
    }

    fn flush(&mut self) -> io::Result<()> {
        self.with_appender(|a| a.flush())
    }
}

fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|ch| match ch {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' => ch,
            _ => '_',
        })
        .collect()
}
