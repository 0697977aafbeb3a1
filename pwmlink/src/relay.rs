//! Time-proportioned relay switching.
//!
//! A relay is either on or off, so a duty percentage is approximated by
//! holding the relay on for that share of every period.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, PoisonError,
    },
    time::{Duration, Instant},
};

use shared::sleep_till;
use tracing::warn;

use crate::Result;

/// A bank of binary outputs addressed by channel number.
pub trait RelayBank: Send {
    fn has_channel(&self, channel: u16) -> bool;

    fn set(&mut self, channel: u16, on: bool) -> Result<()>;

    /// Switch every output off. Must be safe to call at any time, repeatedly.
    fn all_off(&mut self) -> Result<()>;
}

/// Duty percentage per channel, written by the command server and read by
/// the relay loop at the start of every period.
#[derive(Debug, Clone, Default)]
pub struct DutyTable {
    duties: Arc<Mutex<BTreeMap<u16, u8>>>,
}

impl DutyTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last write wins per channel.
    pub fn apply(&self, duties: &[(u16, u8)]) {
        let mut duties_lk = self.duties.lock().unwrap_or_else(PoisonError::into_inner);

        for (channel, duty) in duties {
            duties_lk.insert(*channel, *duty);
        }
    }

    /// Like `apply`, but only for channels `1..=channels`. Returns the
    /// channels that were left out.
    pub fn apply_known(&self, duties: &[(u16, u8)], channels: u16) -> Vec<u16> {
        let (known, unknown): (Vec<_>, Vec<_>) = duties
            .iter()
            .copied()
            .partition(|(channel, _)| (1..=channels).contains(channel));

        self.apply(&known);

        unknown.into_iter().map(|(channel, _)| channel).collect()
    }

    pub fn zero_all(&self) {
        let mut duties_lk = self.duties.lock().unwrap_or_else(PoisonError::into_inner);

        for duty in duties_lk.values_mut() {
            *duty = 0;
        }
    }

    pub fn snapshot(&self) -> BTreeMap<u16, u8> {
        self.duties
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// First sub-iteration at which a channel with `duty` must be off, if any.
///
/// Iteration `i` of `iterations` sits at `i / iterations * 100` percent of the
/// period; a channel goes off once that exceeds its duty. A full duty never
/// goes off.
pub fn off_iteration(duty: u8, iterations: u32) -> Option<u32> {
    (0..=iterations).find(|i| *i as u64 * 100 > duty as u64 * iterations as u64)
}

/// Flags the relay loop as dead when dropped, including on panic.
pub struct AliveGuard(Arc<AtomicBool>);

impl AliveGuard {
    pub fn new(alive: Arc<AtomicBool>) -> Self {
        alive.store(true, Ordering::SeqCst);
        Self(alive)
    }
}

impl Drop for AliveGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct RelayLoop<B: RelayBank> {
    bank: B,
    duties: DutyTable,
    period: Duration,
    iterations: u32,
    on: BTreeSet<u16>,
    /// Channels with a duty but no relay, already warned about
    unknown: BTreeSet<u16>,
}

impl<B: RelayBank> RelayLoop<B> {
    pub fn new(bank: B, duties: DutyTable, period: Duration, iterations: u32) -> Self {
        Self {
            bank,
            duties,
            period,
            iterations: iterations.max(1),
            on: BTreeSet::new(),
            unknown: BTreeSet::new(),
        }
    }

    fn known(&mut self, channel: u16) -> bool {
        if self.bank.has_channel(channel) {
            return true;
        }

        if self.unknown.insert(channel) {
            warn!(channel, "no relay on channel, ignoring its duty");
        }

        false
    }

    /// Run one full on/off period.
    pub fn run_period(&mut self) -> Result<()> {
        let start = Instant::now();
        let duties: BTreeMap<u16, u8> = self
            .duties
            .snapshot()
            .into_iter()
            .filter(|(channel, _)| self.known(*channel))
            .collect();

        // # 1: Turn on everything with a duty, make sure the rest are off
        for (&channel, &duty) in &duties {
            let on = duty > 0;

            self.bank.set(channel, on)?;

            match on {
                true => self.on.insert(channel),
                false => self.on.remove(&channel),
            };
        }

        // # 2: Walk the period, switching channels off as their share runs out
        for i in 0..=self.iterations {
            for (&channel, &duty) in &duties {
                if self.on.contains(&channel)
                    && off_iteration(duty, self.iterations).is_some_and(|off| i >= off)
                {
                    self.bank.set(channel, false)?;
                    self.on.remove(&channel);
                }
            }

            let wakeup = start + self.period.mul_f64((i + 1) as f64 / (self.iterations + 1) as f64);
            sleep_till(wakeup);
        }

        Ok(())
    }

    /// Cycle until `running` is cleared or the bank fails; outputs are always
    /// left off.
    pub fn run(&mut self, running: &AtomicBool) -> Result<()> {
        let mut result = Ok(());

        while running.load(Ordering::SeqCst) {
            if let Err(e) = self.run_period() {
                warn!("relay loop failed: {}", e);
                result = Err(e);
                break;
            }
        }

        self.bank.all_off()?;
        self.on.clear();

        result
    }

    #[inline]
    pub fn bank_mut(&mut self) -> &mut B {
        &mut self.bank
    }
}
