//! Structured logging setup and per-command log scopes.

use std::collections::HashMap;
use std::path::Path;
use std::time::Instant;

use anyhow::Context;
use serde_json::{json, Map, Value};
use tracing::{debug, error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::EnvFilter;

use crate::AppError;

/// Overrides the default filter, e.g. `PIPADMIN_LOG=pipadmin=debug,sqlx=warn`.
pub const LOG_FILTER_ENV: &str = "PIPADMIN_LOG";
pub const DEFAULT_FILTER: &str = "pipadmin=info";
pub const LOG_FILE_PREFIX: &str = "pipadmin.log";

pub fn env_filter() -> EnvFilter {
    match std::env::var(LOG_FILTER_ENV) {
        Ok(directives) if !directives.trim().is_empty() => {
            EnvFilter::try_new(directives.trim()).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
        }
        _ => EnvFilter::new(DEFAULT_FILTER),
    }
}

/// Keeps the background file writer alive; drop it last.
#[must_use]
pub struct LoggingGuard {
    _file: Option<WorkerGuard>,
}

/// Install the global JSON subscriber. Events go to stderr, or to a daily
/// rolling file under `log_dir` when one is given. `log` records from
/// dependencies are bridged into `tracing`.
pub fn init_logging(log_dir: Option<&Path>) -> anyhow::Result<LoggingGuard> {
    let (writer, guard) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("create log directory {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            (BoxMakeWriter::new(non_blocking), Some(guard))
        }
        None => (BoxMakeWriter::new(std::io::stderr), None),
    };

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_timer(UtcTime::rfc_3339())
        .with_writer(writer)
        .json()
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("install global tracing subscriber")?;
    tracing_log::LogTracer::init().context("bridge log records into tracing")?;

    Ok(LoggingGuard { _file: guard })
}

fn context_to_json(context: &HashMap<String, String>) -> Option<Value> {
    if context.is_empty() {
        None
    } else {
        let mut map = Map::with_capacity(context.len());
        for (key, value) in context {
            map.insert(key.clone(), Value::String(value.clone()));
        }
        Some(Value::Object(map))
    }
}

fn wrap_details(value: Value) -> Value {
    if value.is_object() {
        value
    } else {
        json!({ "value": value })
    }
}

/// Enter/exit logging for one user-facing command with its duration.
pub struct LogScope {
    cmd: &'static str,
    collection: Option<String>,
    start: Instant,
}

impl LogScope {
    pub fn new(cmd: &'static str, collection: Option<&str>) -> Self {
        let scope = Self {
            cmd,
            collection: collection.map(str::to_string),
            start: Instant::now(),
        };
        debug!(
            target: "pipadmin",
            event = "command_enter",
            cmd = scope.cmd,
            collection = scope.collection.as_deref()
        );
        scope
    }

    fn elapsed_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    pub fn success(&self, details: Value) {
        info!(
            target: "pipadmin",
            event = "command_ok",
            cmd = self.cmd,
            collection = self.collection.as_deref(),
            duration_ms = self.elapsed_ms(),
            details = %wrap_details(details)
        );
    }

    /// User-correctable failures log at warn, everything else at error.
    pub fn fail(&self, err: &AppError) {
        let mut map = Map::new();
        map.insert("code".into(), Value::String(err.code().to_string()));
        map.insert("message".into(), Value::String(err.message().to_string()));
        if let Some(context) = context_to_json(err.context()) {
            map.insert("context".into(), context);
        }
        let details = Value::Object(map);

        if err.is_validation() || err.is_duplicate() || err.code() == crate::error::CONFIRM_REQUIRED
        {
            warn!(
                target: "pipadmin",
                event = "command_rejected",
                cmd = self.cmd,
                collection = self.collection.as_deref(),
                duration_ms = self.elapsed_ms(),
                details = %details
            );
        } else {
            error!(
                target: "pipadmin",
                event = "command_failed",
                cmd = self.cmd,
                collection = self.collection.as_deref(),
                duration_ms = self.elapsed_ms(),
                details = %details
            );
        }
    }
}
