//! The timer loop that schedules commit cycles.
//!
//! One `tokio::time::interval` ticks every second and drives a
//! [`Countdown`]. When the countdown reaches zero the tick is paused, the cycle
//! runs on the blocking pool, and a fresh countdown starts once it returns.
//! Shutdown is a future raced against both the tick and the running cycle; an
//! in-flight cycle is abandoned rather than awaited.

use std::future::Future;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, error, info, warn};

use crate::core::countdown::{Countdown, Tick};
use crate::cycle::CycleHandler;
use crate::io::config::{AutocommitConfig, load_config};

const TICK: Duration = Duration::from_secs(1);

/// How the loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Cycles that ran to completion.
    pub cycles_run: u64,
    /// Shutdown arrived while a cycle was still running.
    pub interrupted_cycle: bool,
}

/// Owns the cycle state: countdown, config snapshot and handler.
pub struct Orchestrator<H> {
    handler: Arc<H>,
    config: AutocommitConfig,
    reload_from: Option<PathBuf>,
    /// Where the live countdown is drawn; `None` draws nothing.
    countdown_out: Option<Box<dyn Write + Send>>,
}

impl<H: CycleHandler> Orchestrator<H> {
    pub fn new(handler: Arc<H>, config: AutocommitConfig) -> Self {
        Self {
            handler,
            config,
            reload_from: None,
            countdown_out: None,
        }
    }

    /// Re-read config from `path` after every cycle. Bad files keep the old snapshot.
    pub fn reload_config_from(mut self, path: impl Into<PathBuf>) -> Self {
        self.reload_from = Some(path.into());
        self
    }

    /// Redraw a one-line countdown on stdout every second.
    pub fn show_countdown(self, show: bool) -> Self {
        if show {
            self.countdown_to(std::io::stdout())
        } else {
            Self {
                countdown_out: None,
                ..self
            }
        }
    }

    /// Redraw the countdown on `out` instead of stdout.
    pub fn countdown_to(mut self, out: impl Write + Send + 'static) -> Self {
        self.countdown_out = Some(Box::new(out));
        self
    }

    /// Run until `shutdown` resolves.
    pub async fn run<F>(mut self, shutdown: F) -> Result<ShutdownReport>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        let mut countdown = Countdown::new(self.config.commit_interval_seconds);
        let mut ticker = interval_at(Instant::now() + TICK, TICK);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut cycles_run = 0u64;

        info!(
            interval_secs = self.config.commit_interval_seconds,
            "commit timer started"
        );
        self.draw_countdown(countdown.remaining_secs());

        loop {
            tokio::select! {
                () = &mut shutdown => {
                    self.end_countdown_line();
                    info!(cycles_run, "shutdown requested");
                    return Ok(ShutdownReport { cycles_run, interrupted_cycle: false });
                }
                _ = ticker.tick() => {}
            }

            match countdown.tick() {
                Tick::Paused => continue,
                Tick::Remaining(secs) => self.draw_countdown(secs),
                Tick::Trigger => {
                    countdown.begin_cycle();
                    self.end_countdown_line();

                    let handler = Arc::clone(&self.handler);
                    let config = self.config.clone();
                    let task = tokio::task::spawn_blocking(move || handler.run_cycle(&config));

                    tokio::select! {
                        () = &mut shutdown => {
                            warn!(cycles_run, "shutdown requested while a cycle was running");
                            return Ok(ShutdownReport { cycles_run, interrupted_cycle: true });
                        }
                        joined = task => {
                            match joined {
                                Ok(outcome) => info!(outcome = outcome.label(), "{outcome}"),
                                Err(err) => error!(error = %err, "commit cycle task panicked"),
                            }
                        }
                    }
                    cycles_run += 1;

                    self.reload_config();
                    countdown.finish_cycle(self.config.commit_interval_seconds);
                    ticker.reset();
                    self.draw_countdown(countdown.remaining_secs());
                }
            }
        }
    }

    fn reload_config(&mut self) {
        let Some(path) = &self.reload_from else {
            return;
        };
        match load_config(path) {
            Ok(config) => {
                if config.commit_interval_seconds != self.config.commit_interval_seconds {
                    info!(
                        interval_secs = config.commit_interval_seconds,
                        "commit interval changed"
                    );
                }
                self.config = config;
            }
            Err(err) => {
                warn!(error = %format!("{err:#}"), "config reload failed, keeping previous settings");
            }
        }
    }

    fn draw_countdown(&mut self, secs: u64) {
        self.write_countdown(&format!("\rNext auto commit in: {secs}s "));
    }

    fn end_countdown_line(&mut self) {
        self.write_countdown("\n");
    }

    fn write_countdown(&mut self, text: &str) {
        let Some(out) = self.countdown_out.as_mut() else {
            return;
        };
        if let Err(err) = out.write_all(text.as_bytes()).and_then(|()| out.flush()) {
            debug!(error = %err, "countdown redraw failed");
        }
    }
}

/// Install SIGINT/SIGTERM handlers and return a future that resolves on either.
#[cfg(unix)]
pub fn shutdown_signal() -> Result<impl Future<Output = ()>> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut interrupt = signal(SignalKind::interrupt()).context("install SIGINT handler")?;
    let mut terminate = signal(SignalKind::terminate()).context("install SIGTERM handler")?;
    Ok(async move {
        tokio::select! {
            _ = interrupt.recv() => debug!("received SIGINT"),
            _ = terminate.recv() => debug!("received SIGTERM"),
        }
    })
}

#[cfg(not(unix))]
pub fn shutdown_signal() -> Result<impl Future<Output = ()>> {
    Ok(async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "ctrl-c listener failed");
            std::future::pending::<()>().await;
        }
    })
}
