//! Activity logger thread.
//!
//! A dedicated thread owns the [`JsonlWriter`]. Everyone else holds an
//! [`ActivityLoggerHandle`] and sends [`ActivityEvent`]s over a bounded
//! crossbeam channel with `try_send`, so a slow disk never stalls a pass.

#![allow(missing_docs)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};

use crate::core::config::Config;
use crate::core::errors::{LscError, Result};
use crate::fetch::stores::ErrorSink;
use crate::logger::jsonl::{EventType, JsonlConfig, JsonlWriter, LogEntry, Severity};

#[derive(Debug, Clone, PartialEq)]
pub enum ActivityEvent {
    ControllerStarted {
        version: String,
        config_hash: String,
    },
    ControllerStopped {
        reason: String,
        passes: u64,
    },
    ConfigReloaded {
        config_hash: String,
    },
    PassCompleted {
        pass: u64,
        contexts: Vec<String>,
        retry: Vec<String>,
        failures: usize,
        duration_ms: u64,
    },
    FetchFailed {
        source: String,
        code: String,
        message: String,
    },
    StatusChanged {
        from: String,
        to: String,
    },
    ActionSettled {
        action: String,
        ok: bool,
        code: Option<String>,
        message: Option<String>,
    },
    Error {
        code: String,
        message: String,
    },
    /// Ask the logger thread to flush and exit.
    Shutdown,
}

impl ActivityEvent {
    #[must_use]
    pub fn error(error: &LscError) -> Self {
        Self::Error {
            code: error.code().to_string(),
            message: error.to_string(),
        }
    }
}

/// Cloneable sender side of the logger.
#[derive(Debug, Clone)]
pub struct ActivityLoggerHandle {
    tx: Sender<ActivityEvent>,
    dropped_events: Arc<AtomicU64>,
}

impl ActivityLoggerHandle {
    /// Non-blocking. A full channel drops the event and bumps the counter.
    pub fn send(&self, event: ActivityEvent) {
        if let Err(TrySendError::Full(_)) = self.tx.try_send(event) {
            self.dropped_events.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn dropped_events(&self) -> u64 {
        self.dropped_events.load(Ordering::Relaxed)
    }

    /// Blocks until the shutdown sentinel is queued.
    pub fn shutdown(&self) {
        let _ = self.tx.send(ActivityEvent::Shutdown);
    }

    /// Handle whose events go nowhere. For callers that run without a log.
    #[must_use]
    pub fn disconnected() -> Self {
        let (tx, _rx) = bounded(1);
        Self {
            tx,
            dropped_events: Arc::new(AtomicU64::new(0)),
        }
    }
}

impl ErrorSink for ActivityLoggerHandle {
    fn add_error(&self, source: &'static str, error: &LscError) {
        self.send(ActivityEvent::FetchFailed {
            source: source.to_string(),
            code: error.code().to_string(),
            message: error.to_string(),
        });
    }
}

#[derive(Debug, Clone)]
pub struct ActivityLoggerConfig {
    pub jsonl: JsonlConfig,
    pub channel_capacity: usize,
}

impl ActivityLoggerConfig {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            jsonl: JsonlConfig::from_config(config),
            channel_capacity: config.logging.channel_capacity,
        }
    }
}

/// Start the logger thread.
///
/// It runs until [`ActivityLoggerHandle::shutdown`] or until every handle
/// has been dropped.
pub fn spawn_logger(
    config: ActivityLoggerConfig,
) -> Result<(ActivityLoggerHandle, thread::JoinHandle<()>)> {
    let (tx, rx) = bounded::<ActivityEvent>(config.channel_capacity.max(1));
    let dropped = Arc::new(AtomicU64::new(0));
    let handle = ActivityLoggerHandle {
        tx,
        dropped_events: Arc::clone(&dropped),
    };

    let join = thread::Builder::new()
        .name("lsc-logger".to_string())
        .spawn(move || logger_thread_main(&rx, config.jsonl, &dropped))
        .map_err(|e| LscError::Runtime {
            details: format!("failed to spawn logger thread: {e}"),
        })?;

    Ok((handle, join))
}

fn logger_thread_main(rx: &Receiver<ActivityEvent>, jsonl: JsonlConfig, dropped: &AtomicU64) {
    let mut writer = JsonlWriter::open(jsonl);

    while let Ok(event) = rx.recv() {
        let lost = dropped.swap(0, Ordering::Relaxed);
        if lost > 0 {
            let mut warn = LogEntry::new(EventType::Error, Severity::Warning);
            warn.details = Some(format!("{lost} log events dropped due to back-pressure"));
            writer.write_entry(&warn);
        }

        if event == ActivityEvent::Shutdown {
            break;
        }
        writer.write_entry(&to_log_entry(&event));
        writer.flush();
    }

    writer.flush();
    writer.fsync();
}

fn to_log_entry(event: &ActivityEvent) -> LogEntry {
    match event {
        ActivityEvent::ControllerStarted {
            version,
            config_hash,
        } => {
            let mut e = LogEntry::new(EventType::ControllerStart, Severity::Info);
            e.details = Some(format!("version={version} config_hash={config_hash}"));
            e.ok = Some(true);
            e
        }
        ActivityEvent::ControllerStopped { reason, passes } => {
            let mut e = LogEntry::new(EventType::ControllerStop, Severity::Info);
            e.pass = Some(*passes);
            e.details = Some(format!("reason={reason}"));
            e.ok = Some(true);
            e
        }
        ActivityEvent::ConfigReloaded { config_hash } => {
            let mut e = LogEntry::new(EventType::ConfigReload, Severity::Info);
            e.details = Some(format!("config_hash={config_hash}"));
            e.ok = Some(true);
            e
        }
        ActivityEvent::PassCompleted {
            pass,
            contexts,
            retry,
            failures,
            duration_ms,
        } => {
            let severity = if *failures > 0 {
                Severity::Warning
            } else {
                Severity::Info
            };
            let mut e = LogEntry::new(EventType::PassComplete, severity);
            e.pass = Some(*pass);
            e.contexts = Some(contexts.clone());
            e.retry = Some(retry.clone());
            e.failures = Some(*failures);
            e.duration_ms = Some(*duration_ms);
            e.ok = Some(*failures == 0);
            e
        }
        ActivityEvent::FetchFailed {
            source,
            code,
            message,
        } => {
            let mut e = LogEntry::new(EventType::FetchFailure, Severity::Warning);
            e.source = Some(source.clone());
            e.error_code = Some(code.clone());
            e.error_message = Some(message.clone());
            e.ok = Some(false);
            e
        }
        ActivityEvent::StatusChanged { from, to } => {
            let mut e = LogEntry::new(EventType::StatusChange, Severity::Info);
            e.mode = Some(to.clone());
            e.details = Some(format!("from={from}"));
            e
        }
        ActivityEvent::ActionSettled {
            action,
            ok,
            code,
            message,
        } => {
            let severity = if *ok { Severity::Info } else { Severity::Warning };
            let mut e = LogEntry::new(EventType::ActionSettled, severity);
            e.source = Some(action.clone());
            e.ok = Some(*ok);
            e.error_code.clone_from(code);
            e.error_message.clone_from(message);
            e
        }
        ActivityEvent::Error { code, message } => {
            let mut e = LogEntry::new(EventType::Error, Severity::Critical);
            e.error_code = Some(code.clone());
            e.error_message = Some(message.clone());
            e.ok = Some(false);
            e
        }
        ActivityEvent::Shutdown => LogEntry::new(EventType::ControllerStop, Severity::Info),
    }
}
