//! coyote-daemon: supervision core for a talking desk appliance
//!
//! The daemon runs on the appliance and provides:
//! - Debounced monitoring of the wake switch and the two buttons
//! - Indicator light animations on a binary and a dimmable line
//! - An interaction loop that dispatches one conversation handler per tick
//! - A supervised speech-to-text listener, restarted on crash up to a ceiling
//!
//! Shutdown is cooperative: SIGINT/SIGTERM or a restart-ceiling breach
//! cancels the interaction loop, waits a bounded time for it, then stops
//! the listener.

mod cli;
mod config;
mod conversation;
mod events;
mod indicator;
mod input;
mod interaction;
mod lifecycle;
mod process;
mod state;

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::conversation::ConversationLog;
use crate::events::DeviceEvent;
use crate::indicator::{IndicatorLine, Indicators, PatternTimings, SysfsGpioOutput, SysfsPwmOutput};
use crate::input::{InputMonitor, InputSettings, SysfsInputLine};
use crate::interaction::CommandInteractions;
use crate::lifecycle::{CancelToken, ShutdownSignal};
use crate::process::{ListenerCommand, ProcessSupervisor, TokioLauncher};
use crate::state::{Inputs, InteractionSupervisor};

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::parse();

    // Initialize logging
    let filter = match args.log_level {
        Some(level) => EnvFilter::new(level.as_filter()),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = Config::load(args.config.as_deref())?;

    if args.check {
        println!("{}", toml::to_string_pretty(&config)?);
        return Ok(());
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        data_dir = ?config.data_dir,
        "coyote-daemon starting"
    );

    config.ensure_dirs()?;
    config.data_dir = std::fs::canonicalize(&config.data_dir)
        .with_context(|| format!("resolving data directory {:?}", config.data_dir))?;
    // External tools are given paths relative to the data directory
    std::env::set_current_dir(&config.data_dir)
        .with_context(|| format!("entering data directory {:?}", config.data_dir))?;

    let (event_tx, event_rx) = broadcast::channel::<DeviceEvent>(64);
    tokio::spawn(log_events(event_rx));

    let conversation = ConversationLog::new(
        config.resolve(&config.conversation.directory),
        &config.conversation,
    );
    let log_path = conversation.setup()?;
    info!(path = ?log_path, "conversation log ready");

    let inputs = open_inputs(&config)?;
    let indicators = open_indicators(&config)?;

    let handlers = CommandInteractions::new(
        config.interactions.clone(),
        conversation,
        indicators,
        Arc::clone(&inputs.person),
        config.resolve(&config.listener.transcript_file),
        config.resolve(&config.interactions.capture_file),
    );
    let interaction = InteractionSupervisor::new(
        inputs,
        handlers,
        config.supervisor.poll(),
        event_tx.clone(),
    )
    .spawn(CancelToken::new())
    .context("failed to start interaction thread")?;

    let mut shutdown = ShutdownSignal::new().context("failed to register signal handlers")?;
    let mut supervisor = ProcessSupervisor::new(
        TokioLauncher,
        ListenerCommand::from_config(&config.listener),
        &config.supervisor,
        event_tx,
    );

    info!("daemon initialized, entering main loop");
    let result = supervisor.run(interaction, shutdown.wait()).await;

    match result {
        Ok(()) => {
            info!(restarts = supervisor.restarts(), "coyote-daemon stopped");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, state = %supervisor.state(), "coyote-daemon failed");
            Err(e.into())
        }
    }
}

fn open_inputs(config: &Config) -> Result<Inputs> {
    let settings = InputSettings::from(&config.inputs);
    let open = |name: &str, number: u32| -> Result<Arc<InputMonitor>> {
        let line = SysfsInputLine::open(&config.inputs.gpio_root, number)
            .with_context(|| format!("opening {} input on line {}", name, number))?;
        let monitor = InputMonitor::start(name, line, settings)?;
        info!(input = name, line = number, "input monitor started");
        Ok(Arc::new(monitor))
    };

    Ok(Inputs {
        wake: open("wake", config.inputs.wake_line)?,
        television: open("television", config.inputs.television_line)?,
        person: open("person", config.inputs.person_line)?,
    })
}

fn open_indicators(config: &Config) -> Result<Indicators> {
    let cfg = &config.indicators;
    let dynamite = SysfsGpioOutput::open(&cfg.gpio_root, cfg.dynamite_line)
        .with_context(|| format!("opening dynamite indicator on line {}", cfg.dynamite_line))?;
    let intercom = SysfsPwmOutput::open(
        &cfg.pwm_root,
        cfg.intercom_pwm_chip,
        cfg.intercom_pwm_channel,
        cfg.pwm_period_ns,
    )
    .context("opening intercom indicator")?;

    Ok(Indicators {
        dynamite: IndicatorLine::new("dynamite", dynamite, PatternTimings::default()),
        intercom: IndicatorLine::new("intercom", intercom, PatternTimings::default()),
    })
}

async fn log_events(mut rx: broadcast::Receiver<DeviceEvent>) {
    loop {
        match rx.recv().await {
            Ok(event) => info!(%event, "device event"),
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!(skipped = n, "device event receiver lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
