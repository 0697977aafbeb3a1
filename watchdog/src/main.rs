#![doc = include_str!("../README.md")]

use std::{sync::atomic::AtomicBool, time::Duration};

use clap::Parser;
use pwmlink::{
    gpio::{GpioRelayBank, DEFAULT_SSR_PINS},
    usockets::PwmClient,
};
use shared::PWM_SOCKET_PATH;
use tracing::info;
use tracing_subscriber::EnvFilter;
use watchdog::*;

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Socket of the relay daemon
    #[arg(short, long, default_value = PWM_SOCKET_PATH)]
    socket: String,

    /// GPIO pins of each channel, channel 1 first
    #[arg(short, long, value_delimiter = ',', default_values_t = DEFAULT_SSR_PINS)]
    pins: Vec<u8>,

    /// Switch every relay off once and exit
    #[arg(long)]
    shutoff: bool,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    // # 1: Program Initialization

    // ## 1.1: Aquire relays
    let bank = GpioRelayBank::new(&cli.pins).unwrap();

    // ## 1.2: Connect to the relay daemon
    let pinger = PwmClient::new(&cli.socket, Duration::from_millis(PING_TIMEOUT_MS));

    let mut watchdog = Watchdog::new(pinger, bank);

    if cli.shutoff {
        watchdog.shutoff();
        info!("all relays off");
        return;
    }

    info!(socket = %cli.socket, "watching relay daemon");

    // # 2: Execution Loop
    let running = AtomicBool::new(true);
    watchdog.run(&running);
}
