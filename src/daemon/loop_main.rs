//! Runtime loop: feeds controller events, ticks pending retries, and watches
//! for signals until shutdown.

#![allow(missing_docs)]

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::controller::events::{ControllerEvent, ControllerHandle};
use crate::controller::render::Renderer;
use crate::controller::status_controller::{Flow, StatusController};
use crate::core::clock::Clock;
use crate::core::config::Config;
use crate::core::errors::Result;
use crate::daemon::signals::SignalHandler;
use crate::fetch::stores::StoreSet;
use crate::logger::activity::{ActivityEvent, ActivityLoggerConfig, ActivityLoggerHandle, spawn_logger};
use crate::status::actions::DeviceActions;

/// Upper bound on how long the loop blocks before checking signals.
const SIGNAL_POLL: Duration = Duration::from_millis(100);

/// How the loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Signal,
    Event,
    Elapsed,
}

impl StopReason {
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Signal => "signal",
            Self::Event => "shutdown event",
            Self::Elapsed => "run duration elapsed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeSummary {
    pub reason: StopReason,
    pub passes: u64,
    pub ticks: u64,
    pub uptime: Duration,
}

pub struct StatusRuntime {
    controller: StatusController,
    signals: SignalHandler,
    logger: ActivityLoggerHandle,
    logger_join: Option<thread::JoinHandle<()>>,
    tick: Duration,
    config_path: Option<PathBuf>,
}

impl StatusRuntime {
    /// Start the activity logger and build the controller around it.
    pub fn init(
        config: Config,
        stores: StoreSet,
        device: Arc<dyn DeviceActions>,
        renderer: Box<dyn Renderer>,
        clock: Arc<dyn Clock>,
        signals: SignalHandler,
    ) -> Result<Self> {
        let (logger, logger_join) = spawn_logger(ActivityLoggerConfig::from_config(&config))?;
        let config_path = Some(config.paths.config_file.clone());
        let tick = config.refresh.tick_interval();
        let controller =
            StatusController::new(config, stores, device, renderer, clock).with_logger(logger.clone());

        Ok(Self {
            controller,
            signals,
            logger,
            logger_join: Some(logger_join),
            tick,
            config_path,
        })
    }

    /// Wrap an already built controller. No log thread is owned and SIGHUP
    /// reloads are ignored.
    #[must_use]
    pub fn with_controller(controller: StatusController, signals: SignalHandler) -> Self {
        let tick = controller.config().refresh.tick_interval();
        Self {
            controller,
            signals,
            logger: ActivityLoggerHandle::disconnected(),
            logger_join: None,
            tick,
            config_path: None,
        }
    }

    #[must_use]
    pub fn handle(&self) -> ControllerHandle {
        self.controller.handle()
    }

    #[must_use]
    pub const fn controller(&self) -> &StatusController {
        &self.controller
    }

    /// Run until a signal, a shutdown event, or `max_duration` elapses.
    pub fn run(&mut self, max_duration: Option<Duration>) -> Result<RuntimeSummary> {
        let start = Instant::now();
        self.controller.start()?;

        let mut ticks = 0_u64;
        let mut next_tick = start + self.tick;
        let reason = loop {
            if self.signals.should_shutdown() {
                break StopReason::Signal;
            }
            if max_duration.is_some_and(|limit| start.elapsed() >= limit) {
                break StopReason::Elapsed;
            }
            if self.signals.should_reload() {
                self.handle_config_reload();
            }
            if self.signals.should_refresh()
                && self.controller.handle_event(ControllerEvent::Refresh) == Flow::Stop
            {
                break StopReason::Event;
            }

            let now = Instant::now();
            if now >= next_tick {
                ticks += 1;
                next_tick = now + self.tick;
                if self.controller.handle_event(ControllerEvent::Refresh) == Flow::Stop {
                    break StopReason::Event;
                }
            }

            let mut wait = next_tick.saturating_duration_since(Instant::now()).min(SIGNAL_POLL);
            if let Some(limit) = max_duration {
                wait = wait.min(limit.saturating_sub(start.elapsed()));
            }
            if let Some(event) = self.controller.next_event(wait)?
                && self.controller.handle_event(event) == Flow::Stop
            {
                break StopReason::Event;
            }
        };

        let summary = RuntimeSummary {
            reason,
            passes: self.controller.stats().passes,
            ticks,
            uptime: start.elapsed(),
        };
        self.shutdown(reason);
        Ok(summary)
    }

    fn handle_config_reload(&mut self) {
        let Some(path) = self.config_path.clone() else {
            return;
        };
        eprintln!("[LSC-RUNTIME] config reload requested (SIGHUP)");

        match Config::load(Some(&path)) {
            Ok(new_config) => {
                let old_hash = self.controller.config().stable_hash().unwrap_or_default();
                let new_hash = new_config.stable_hash().unwrap_or_default();
                if old_hash == new_hash {
                    eprintln!("[LSC-RUNTIME] config unchanged, skipping reload");
                    return;
                }
                self.tick = new_config.refresh.tick_interval();
                self.controller.set_config(new_config);
                self.logger.send(ActivityEvent::ConfigReloaded {
                    config_hash: new_hash,
                });
            }
            Err(e) => {
                eprintln!("[LSC-RUNTIME] config reload failed: {e}");
                self.logger.send(ActivityEvent::error(&e));
            }
        }
    }

    fn shutdown(&mut self, reason: StopReason) {
        self.controller.stop(reason.label());
        self.logger.shutdown();
        if let Some(join) = self.logger_join.take() {
            let _ = join.join();
        }
    }
}

impl std::fmt::Debug for StatusRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusRuntime")
            .field("tick", &self.tick)
            .field("controller", &self.controller)
            .finish_non_exhaustive()
    }
}
