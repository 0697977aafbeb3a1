//! Utility for poking the relay daemon and the temperature controller by hand

use std::{process::ExitCode, thread::sleep, time::Duration};

use clap::{Parser, Subcommand};
use pwmlink::{
    gpio::{GpioRelayBank, DEFAULT_SSR_PINS},
    relay::RelayBank,
    usockets::{LineClient, PwmClient},
    Command,
};
use shared::{OPERATOR_SOCKET_PATH, PWM_SOCKET_PATH};

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Reply timeout in ms
    #[arg(short, long, default_value_t = 1000)]
    timeout: u64,

    #[command(subcommand)]
    action: Action,
}

#[derive(Subcommand)]
enum Action {
    /// Set channel duties, e.g. `pwm -c 1,2 -d 40,0`
    Pwm {
        /// Channels to set
        #[arg(short, long, required = true, value_delimiter = ',')]
        channels: Vec<u16>,

        /// Duty of each channel in percent
        #[arg(short, long, required = true, value_delimiter = ',')]
        duties: Vec<u8>,

        /// Socket of the relay daemon
        #[arg(short, long, default_value = PWM_SOCKET_PATH)]
        socket: String,
    },
    /// Ask the relay daemon whether its loop is running
    Ping {
        /// Socket of the relay daemon
        #[arg(short, long, default_value = PWM_SOCKET_PATH)]
        socket: String,

        /// Keep pinging every second
        #[arg(short, long)]
        continuous: bool,
    },
    /// Switch every relay off through GPIO, bypassing the daemon
    Shutoff {
        /// GPIO pins of each channel, channel 1 first
        #[arg(short, long, value_delimiter = ',', default_values_t = DEFAULT_SSR_PINS)]
        pins: Vec<u8>,
    },
    /// Send an operator command to the temperature controller, e.g. `thermo start 1`
    Thermo {
        #[arg(required = true, trailing_var_arg = true)]
        words: Vec<String>,

        /// Operator socket of the temperature controller
        #[arg(short, long, default_value = OPERATOR_SOCKET_PATH)]
        socket: String,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let timeout = Duration::from_millis(cli.timeout);

    let result = match cli.action {
        Action::Pwm {
            channels,
            duties,
            socket,
        } => {
            if channels.len() != duties.len() {
                eprintln!("{} channels but {} duties", channels.len(), duties.len());
                return ExitCode::FAILURE;
            }

            let command = Command::Pwm(channels.into_iter().zip(duties).collect());
            println!("-> {}", command);

            PwmClient::new(socket, timeout)
                .send(&command)
                .map(|reply| println!("<- {}", reply))
        }
        Action::Ping { socket, continuous } => {
            let client = PwmClient::new(socket, timeout);

            loop {
                match client.ping() {
                    Ok(reply) => println!("<- {}", reply),
                    Err(e) => println!("<- {}", e),
                }

                if !continuous {
                    break Ok(());
                }

                sleep(Duration::from_secs(1));
            }
        }
        Action::Shutoff { pins } => GpioRelayBank::new(&pins)
            .and_then(|mut bank| bank.all_off())
            .map(|_| println!("all relays off")),
        Action::Thermo { words, socket } => LineClient::new(socket, timeout)
            .request(&words.join(" "))
            .map(|reply| println!("{}", reply)),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e);
            ExitCode::FAILURE
        }
    }
}
