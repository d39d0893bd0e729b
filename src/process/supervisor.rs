//! Process supervisor: keeps the listener alive and owns shutdown
//!
//! Every tick it checks that the interaction task is still running and
//! polls the listener without blocking. An exited listener is counted and
//! relaunched with the same command line until the count passes the
//! ceiling. On interrupt or failure the interaction task is cancelled and
//! joined (bounded) before the listener is asked to terminate.

use std::fmt;
use std::future::Future;
use std::time::{Duration, Instant};

use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use super::listener::{Launcher, ListenerCommand, ListenerError, ListenerProcess, Liveness};
use crate::config::SupervisorConfig;
use crate::events::DeviceEvent;
use crate::state::InteractionTask;

/// Errors that end supervision
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("listener could not be started: {0}")]
    Launch(#[from] ListenerError),

    #[error("listener exited {count} times, more than the ceiling of {ceiling}")]
    RestartLimitExceeded { count: u32, ceiling: u32 },

    #[error("interaction task exited without being cancelled")]
    InteractionExited,
}

/// Lifecycle of the supervised listener
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Running,
    Restarting,
    /// Restart ceiling exceeded
    Failed,
    /// Shut down on request
    Stopped,
}

impl fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SupervisorState::Running => write!(f, "RUNNING"),
            SupervisorState::Restarting => write!(f, "RESTARTING"),
            SupervisorState::Failed => write!(f, "FAILED"),
            SupervisorState::Stopped => write!(f, "STOPPED"),
        }
    }
}

/// Listener exits seen since start
#[derive(Debug, Clone, Copy)]
pub struct RestartCounter {
    count: u32,
    ceiling: u32,
}

impl RestartCounter {
    pub fn new(ceiling: u32) -> Self {
        Self { count: 0, ceiling }
    }

    /// Count one exit and return the new total
    pub fn record_exit(&mut self) -> u32 {
        self.count = self.count.saturating_add(1);
        self.count
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn ceiling(&self) -> u32 {
        self.ceiling
    }

    pub fn is_exceeded(&self) -> bool {
        self.count > self.ceiling
    }
}

/// Supervises the listener process alongside the interaction task
pub struct ProcessSupervisor<L> {
    launcher: L,
    command: ListenerCommand,
    tick: Duration,
    join_timeout: Duration,
    counter: RestartCounter,
    state: SupervisorState,
    state_entered_at: Instant,
    events: broadcast::Sender<DeviceEvent>,
}

impl<L: Launcher> ProcessSupervisor<L> {
    pub fn new(
        launcher: L,
        command: ListenerCommand,
        config: &SupervisorConfig,
        events: broadcast::Sender<DeviceEvent>,
    ) -> Self {
        Self {
            launcher,
            command,
            tick: config.watch(),
            join_timeout: config.join_timeout(),
            counter: RestartCounter::new(config.restart_ceiling),
            state: SupervisorState::Running,
            state_entered_at: Instant::now(),
            events,
        }
    }

    pub fn state(&self) -> SupervisorState {
        self.state
    }

    pub fn restarts(&self) -> u32 {
        self.counter.count()
    }

    /// Supervise until `shutdown` completes or the listener keeps dying
    ///
    /// The interaction task is always cancelled and joined before this
    /// returns, whatever the outcome.
    pub async fn run<F>(
        &mut self,
        interaction: InteractionTask,
        shutdown: F,
    ) -> Result<(), SupervisorError>
    where
        F: Future<Output = ()>,
    {
        info!(command = %self.command, ceiling = self.counter.ceiling(), "starting listener");
        let mut process = match self.launch() {
            Ok(process) => process,
            Err(e) => {
                error!(error = %e, "initial listener launch failed");
                self.teardown(interaction, None).await;
                self.transition_to(SupervisorState::Failed);
                return Err(e.into());
            }
        };

        tokio::pin!(shutdown);
        let mut ticker = tokio::time::interval(self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let result = loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("interrupt received");
                    break Ok(());
                }
                _ = ticker.tick() => {}
            }

            if !interaction.is_alive() {
                error!("interaction task is gone");
                break Err(SupervisorError::InteractionExited);
            }
            if let Err(e) = self.check(&mut process) {
                break Err(e);
            }
        };

        self.teardown(interaction, Some(process)).await;

        match &result {
            Ok(()) => self.transition_to(SupervisorState::Stopped),
            Err(SupervisorError::RestartLimitExceeded { count, ceiling }) => {
                self.transition_to(SupervisorState::Failed);
                let _ = self.events.send(DeviceEvent::ListenerFailed {
                    restarts: *count,
                    ceiling: *ceiling,
                });
            }
            Err(_) => self.transition_to(SupervisorState::Failed),
        }
        result
    }

    /// One liveness check, relaunching an exited listener
    fn check(&mut self, process: &mut Box<dyn ListenerProcess>) -> Result<(), SupervisorError> {
        let code = match process.poll() {
            Ok(Liveness::Running) => return Ok(()),
            Ok(Liveness::Exited(code)) => code,
            Err(e) => {
                warn!(error = %e, "could not poll listener");
                return Ok(());
            }
        };

        let restarts = self.counter.record_exit();
        warn!(?code, restarts, ceiling = self.counter.ceiling(), "listener exited");
        let _ = self.events.send(DeviceEvent::ListenerExited { code, restarts });

        if self.counter.is_exceeded() {
            return Err(SupervisorError::RestartLimitExceeded {
                count: restarts,
                ceiling: self.counter.ceiling(),
            });
        }

        self.transition_to(SupervisorState::Restarting);
        match self.launch() {
            Ok(fresh) => {
                *process = fresh;
                self.transition_to(SupervisorState::Running);
            }
            // The dead process stays in place, so the next tick counts
            // this as another exit.
            Err(e) => error!(error = %e, "listener relaunch failed"),
        }
        Ok(())
    }

    fn launch(&mut self) -> Result<Box<dyn ListenerProcess>, ListenerError> {
        let process = self.launcher.launch(&self.command)?;
        let pid = process.id();
        info!(?pid, "listener started");
        let _ = self.events.send(DeviceEvent::ListenerStarted { pid });
        Ok(process)
    }

    /// Cancel and join the interaction task, then stop the listener
    async fn teardown(
        &mut self,
        interaction: InteractionTask,
        process: Option<Box<dyn ListenerProcess>>,
    ) {
        interaction.cancel();
        if interaction.join(self.join_timeout).await {
            info!("interaction task stopped");
        }

        if let Some(mut process) = process {
            match process.terminate() {
                Ok(()) => info!(pid = ?process.id(), "listener termination requested"),
                Err(e) => warn!(error = %e, "failed to terminate listener"),
            }
        }
    }

    fn transition_to(&mut self, new_state: SupervisorState) {
        if new_state == self.state {
            return;
        }
        info!(
            from = %self.state,
            to = %new_state,
            duration_ms = self.state_entered_at.elapsed().as_millis() as u64,
            "supervisor transition"
        );
        self.state = new_state;
        self.state_entered_at = Instant::now();
    }
}
