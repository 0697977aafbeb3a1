#![doc = include_str!("../README.md")]

use std::{
    sync::atomic::{AtomicBool, Ordering},
    time::{Duration, Instant},
};

use pwmlink::{relay::RelayBank, usockets::PwmClient, Reply};
use shared::sleep_till;
use tracing::{error, info};

/// How long the daemon gets to answer a ping
pub const PING_TIMEOUT_MS: u64 = 500;
/// Time between pings
pub const CHECK_INTERVAL_MS: u64 = 1000;

/// Anything that can ask the relay daemon whether it is alive.
pub trait Pinger {
    fn ping(&mut self) -> pwmlink::Result<Reply>;
}

impl Pinger for PwmClient {
    fn ping(&mut self) -> pwmlink::Result<Reply> {
        PwmClient::ping(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Check {
    Alive,
    /// The daemon did not answer `is_alive`, outputs were forced off
    ForcedOff,
}

pub struct Watchdog<P: Pinger, B: RelayBank> {
    pinger: P,
    bank: B,
    tripped: bool,
}

impl<P: Pinger, B: RelayBank> Watchdog<P, B> {
    pub fn new(pinger: P, bank: B) -> Self {
        Self {
            pinger,
            bank,
            tripped: false,
        }
    }

    #[inline]
    pub fn is_tripped(&self) -> bool {
        self.tripped
    }

    pub fn check(&mut self) -> Check {
        let reason = match self.pinger.ping() {
            Ok(Reply::IsAlive) => {
                if self.tripped {
                    info!("relay daemon answering again");
                }
                self.tripped = false;

                return Check::Alive;
            }
            Ok(reply) => reply.to_string(),
            Err(e) => e.to_string(),
        };

        if !self.tripped {
            error!("*FAULT* relay daemon not alive ({}), shutting off all relays", reason);
        }
        self.tripped = true;

        self.shutoff();

        Check::ForcedOff
    }

    /// Switch every relay off, logging rather than failing.
    pub fn shutoff(&mut self) {
        if let Err(e) = self.bank.all_off() {
            error!("*ERR* unable to shut off relays! {}", e);
        }
    }

    pub fn run(&mut self, running: &AtomicBool) {
        while running.load(Ordering::SeqCst) {
            let wakeup = Instant::now() + Duration::from_millis(CHECK_INTERVAL_MS);

            self.check();

            sleep_till(wakeup);
        }
    }
}
