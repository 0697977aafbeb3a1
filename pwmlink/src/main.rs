//! Relay board daemon: accepts duty commands and time-slices the relays.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

use clap::Parser;
use pwmlink::{
    gpio::{GpioRelayBank, DEFAULT_SSR_PINS},
    relay::{AliveGuard, DutyTable, RelayLoop},
    usockets::LineServer,
    Command, Reply,
};
use shared::{sleep_till, PWM_ITERATIONS, PWM_PERIOD_MS, PWM_SOCKET_PATH};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// How often the main thread checks on the server
const POLL_MS: u64 = 1000;

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Socket to accept commands on
    #[arg(short, long, default_value = PWM_SOCKET_PATH)]
    socket: String,

    /// GPIO pins of each channel, channel 1 first
    #[arg(short, long, value_delimiter = ',', default_values_t = DEFAULT_SSR_PINS)]
    pins: Vec<u8>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    // # 1: Program Initialization

    // ## 1.1: Aquire relays
    let bank = GpioRelayBank::new(&cli.pins).unwrap();
    let duties = DutyTable::new();

    // ## 1.2: Start the relay loop
    let alive = Arc::new(AtomicBool::new(false));
    let running = Arc::new(AtomicBool::new(true));

    let relay_handle = {
        let alive = alive.clone();
        let running = running.clone();
        let mut relay = RelayLoop::new(
            bank,
            duties.clone(),
            Duration::from_millis(PWM_PERIOD_MS),
            PWM_ITERATIONS,
        );

        thread::spawn(move || {
            let _guard = AliveGuard::new(alive);

            if let Err(e) = relay.run(&running) {
                error!("*FAULT* relay loop stopped: {}", e);
            }
        })
    };

    // ## 1.3: Serve commands
    let handler_alive = alive.clone();
    let channels = cli.pins.len() as u16;
    let mut server = LineServer::spawn(
        &cli.socket,
        Arc::new(move |line: &str| {
            match line.parse::<Command>() {
                Ok(Command::Pwm(pairs)) => {
                    let rejected = duties.apply_known(&pairs, channels);

                    if !rejected.is_empty() {
                        warn!(?rejected, "no relay on channels, duties ignored");
                    }
                }
                Ok(Command::Ping) => {}
                Err(e) => warn!("{}", e),
            }

            Reply::from_alive(handler_alive.load(Ordering::SeqCst)).to_string()
        }),
    )
    .unwrap();

    info!(socket = %cli.socket, pins = ?cli.pins, "pwm daemon ready");

    let mut reported_dead = false;

    // # 2: Execution loop
    loop {
        let wakeup = Instant::now() + Duration::from_millis(POLL_MS);

        // ## 2.1: Report connection errors
        while let Some(e) = server.pop_error() {
            warn!("command connection failed: {}", e);
        }

        // ## 2.2: The relay loop never restarts itself, the controller
        // restarts the daemon after repeated not_alive replies
        if relay_handle.is_finished() && !reported_dead {
            error!("*FAULT* relay loop is dead, answering not_alive");
            reported_dead = true;
        }

        sleep_till(wakeup);
    }
}
