#![doc = include_str!("../README.md")]

use std::{
    path::PathBuf,
    process::ExitCode,
    sync::Arc,
    time::{Duration, Instant},
};

use clap::Parser;
use pwmlink::usockets::{LineServer, PwmClient};
use shared::sleep_till;
use thermo::{
    actuation::{remote_pwm, ActuationDriver, SenderThread},
    clock::SystemClock,
    config::StandConfig,
    operator,
    scheduler::Scheduler,
    stand::{class_flags, Stand},
    telemetry::{TcReaderSource, TelemetryCollector},
};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// How long shutdown waits for each worker
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Stand description (JSON)
    config: PathBuf,

    /// Socket to accept operator commands on, overriding the config
    #[arg(short, long)]
    socket: Option<String>,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    // # 1: Program Initialization

    // ## 1.1: Load the stand description
    let config = match StandConfig::from_path(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!("*ERR* {}: {}", cli.config.display(), e);
            return ExitCode::FAILURE;
        }
    };

    // ## 1.2: Connect to the relay daemon
    let flags = class_flags();

    let (driver, sender) = remote_pwm(
        PwmClient::new(&config.pwm.socket, Duration::from_millis(config.pwm.timeout_ms)),
        config.pwm.restart(),
        flags.clone(),
    );

    let sender = SenderThread::spawn(sender, Duration::from_millis(config.pwm_period_ms));

    let driver: Arc<dyn ActuationDriver> = Arc::new(driver);

    // ## 1.3: Build the zones
    let stand = match Stand::build(&config, flags, driver.clone(), Arc::new(SystemClock)) {
        Ok(stand) => Arc::new(stand),
        Err(e) => {
            error!("*ERR* {}", e);
            sender.stop(driver.as_ref(), SHUTDOWN_TIMEOUT);
            return ExitCode::FAILURE;
        }
    };

    // ## 1.4: Schedule telemetry and one worker per zone
    let mut scheduler = Scheduler::new(Duration::from_millis(config.control_period_ms));

    let mut collector = TelemetryCollector::new(
        TcReaderSource::new(
            &config.telemetry.socket,
            Duration::from_millis(config.telemetry.timeout_ms),
            config.telemetry.restart(),
        ),
        stand.sensors.clone(),
        stand.times.clone(),
    );

    scheduler.add_job("telemetry", move || {
        collector.collect();
    });

    for zone in stand.registry.zones() {
        let registry = stand.registry.clone();
        let id = zone.id();

        scheduler.add_job(zone.name(), move || {
            if let Some(zone) = registry.zone(id) {
                zone.run_cycle(&registry);
            }
        });
    }

    // ## 1.5: Serve operator commands
    let socket = cli.socket.unwrap_or(config.operator_socket.clone());
    let handler_stand = stand.clone();

    let mut server = match LineServer::spawn(
        &socket,
        Arc::new(move |line: &str| operator::handle(line, &handler_stand)),
    ) {
        Ok(server) => server,
        Err(e) => {
            error!("*ERR* unable to serve {}: {}", socket, e);
            sender.stop(driver.as_ref(), SHUTDOWN_TIMEOUT);
            return ExitCode::FAILURE;
        }
    };

    info!(
        zones = stand.registry.zones().len(),
        socket = %socket,
        "temperature controller ready"
    );

    // # 2: Execution loop
    while !stand.is_shutting_down() {
        let wakeup = Instant::now() + scheduler.period();

        // ## 2.1: Dispatch this period's cycles
        scheduler.tick();

        // ## 2.2: Report operator connection errors
        while let Some(e) = server.pop_error() {
            warn!("operator connection failed: {}", e);
        }

        sleep_till(wakeup);
    }

    // # 3: Shutdown
    info!("shutting down");

    stand.registry.stop_all();

    let stuck = scheduler.shutdown(SHUTDOWN_TIMEOUT);
    if !stuck.is_empty() {
        warn!(?stuck, "workers left running");
    }

    sender.stop(driver.as_ref(), SHUTDOWN_TIMEOUT);

    ExitCode::SUCCESS
}

