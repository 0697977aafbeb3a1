//! Delivery of zone duties to the relay daemon.
//!
//! Zones write into a local duty table without blocking. A sender thread
//! forwards the whole table to the daemon once per period, or immediately
//! after a duty drops to zero.

use std::{
    process,
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc::{self, Receiver, RecvTimeoutError, SyncSender},
        Arc,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use pwmlink::{relay::DutyTable, usockets::PwmClient, Command, Reply};
use shared::SafetyFlag;
use tracing::{debug, error, info, warn};

/// Daemon restarts attempted before the link is declared unsafe
pub const MAX_DEVICE_RESTARTS: u32 = 2;
/// How long a restart command may run before it is killed
pub const DEFAULT_RESTART_TIMEOUT: Duration = Duration::from_secs(10);

const RESTART_POLL: Duration = Duration::from_millis(20);
const JOIN_POLL: Duration = Duration::from_millis(10);

/// Where zones put their duty.
pub trait ActuationDriver: Send + Sync {
    /// Must not block on the device.
    fn write(&self, line: u16, duty: u8);

    fn all_off(&self);
}

pub trait PwmTransport: Send {
    fn send(&mut self, command: &Command) -> pwmlink::Result<Reply>;
}

impl PwmTransport for PwmClient {
    #[inline]
    fn send(&mut self, command: &Command) -> pwmlink::Result<Reply> {
        PwmClient::send(self, command)
    }
}

/// Brings a wedged device daemon back.
pub trait DeviceRestart: Send {
    fn restart(&mut self);
}

/// `None` for devices that are supervised elsewhere.
impl<R: DeviceRestart> DeviceRestart for Option<R> {
    fn restart(&mut self) {
        match self {
            Some(restart) => restart.restart(),
            None => info!("device restart requested, none configured"),
        }
    }
}

/// Runs a fixed command line, e.g. `systemctl restart pwmd`. A command
/// still running after `timeout` is killed.
#[derive(Debug, Clone)]
pub struct CommandRestart {
    argv: Vec<String>,
    timeout: Duration,
}

impl CommandRestart {
    /// `None` for an empty command line.
    pub fn new(argv: Vec<String>) -> Option<Self> {
        (!argv.is_empty()).then_some(Self {
            argv,
            timeout: DEFAULT_RESTART_TIMEOUT,
        })
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        Self { timeout, ..self }
    }
}

impl DeviceRestart for CommandRestart {
    fn restart(&mut self) {
        info!(command = ?self.argv, "restarting device daemon");

        let mut child = match process::Command::new(&self.argv[0]).args(&self.argv[1..]).spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!("restart command failed: {}", e);
                return;
            }
        };

        let deadline = Instant::now() + self.timeout;

        loop {
            match child.try_wait() {
                Ok(Some(status)) if status.success() => return,
                Ok(Some(status)) => {
                    warn!("restart command exited with {}", status);
                    return;
                }
                Ok(None) if Instant::now() >= deadline => {
                    warn!("restart command still running after {:?}, killing it", self.timeout);
                    child.kill().unwrap_or_default();
                    child.wait().ok();
                    return;
                }
                Ok(None) => thread::sleep(RESTART_POLL),
                Err(e) => {
                    warn!("restart command failed: {}", e);
                    return;
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    Alive,
    /// Nth consecutive failure, the daemon was restarted
    Restarted(u32),
    DeclaredUnsafe,
    /// Still failing after the link was declared unsafe
    Down,
}

/// Consecutive delivery failures, reset by any `is_alive`.
#[derive(Debug, Default)]
struct FailureCount(u32);

impl FailureCount {
    fn record(&mut self, delivered: bool) -> LinkStatus {
        if delivered {
            self.0 = 0;
            return LinkStatus::Alive;
        }

        self.0 += 1;

        match self.0 {
            n if n <= MAX_DEVICE_RESTARTS => LinkStatus::Restarted(n),
            n if n == MAX_DEVICE_RESTARTS + 1 => LinkStatus::DeclaredUnsafe,
            _ => LinkStatus::Down,
        }
    }
}

/// The zones' side of the link.
pub struct RemotePwmDriver {
    duties: DutyTable,
    wake: SyncSender<()>,
}

impl RemotePwmDriver {
    fn flush(&self) {
        // a pending wake-up already covers this one
        self.wake.try_send(()).unwrap_or_default();
    }
}

impl ActuationDriver for RemotePwmDriver {
    fn write(&self, line: u16, duty: u8) {
        self.duties.apply(&[(line, duty)]);

        if duty == 0 {
            self.flush();
        }
    }

    fn all_off(&self) {
        self.duties.zero_all();
        self.flush();
    }
}

/// The device's side of the link, run on its own thread.
pub struct PwmSender<T: PwmTransport, R: DeviceRestart> {
    duties: DutyTable,
    transport: T,
    restart: R,
    failures: FailureCount,
    flags: Vec<Arc<SafetyFlag>>,
    wake: Receiver<()>,
}

/// A connected driver/sender pair. Repeated failures clear every flag in
/// `flags`.
pub fn remote_pwm<T: PwmTransport, R: DeviceRestart>(
    transport: T,
    restart: R,
    flags: Vec<Arc<SafetyFlag>>,
) -> (RemotePwmDriver, PwmSender<T, R>) {
    let duties = DutyTable::new();
    let (wake_tx, wake_rx) = mpsc::sync_channel(1);

    (
        RemotePwmDriver {
            duties: duties.clone(),
            wake: wake_tx,
        },
        PwmSender {
            duties,
            transport,
            restart,
            failures: FailureCount::default(),
            flags,
            wake: wake_rx,
        },
    )
}

impl<T: PwmTransport, R: DeviceRestart> PwmSender<T, R> {
    /// Forward the current table once. Does nothing before the first write.
    pub fn send_once(&mut self) -> Option<LinkStatus> {
        let duties = self.duties.snapshot();

        if duties.is_empty() {
            return None;
        }

        let command = Command::Pwm(duties.into_iter().collect());

        let delivered = match self.transport.send(&command) {
            Ok(Reply::IsAlive) => true,
            Ok(Reply::NotAlive) => {
                warn!("relay daemon answered not_alive");
                false
            }
            Err(e) => {
                warn!("relay daemon unreachable: {}", e);
                false
            }
        };

        let status = self.failures.record(delivered);

        match status {
            LinkStatus::Alive => debug!(%command, "duties delivered"),
            LinkStatus::Restarted(n) => {
                warn!("relay link failure {}, restarting daemon", n);
                self.restart.restart();
            }
            LinkStatus::DeclaredUnsafe => {
                for flag in &self.flags {
                    flag.declare_unsafe("relay daemon not responding");
                }
            }
            LinkStatus::Down => {}
        }

        Some(status)
    }

    /// Send every `period` until `running` clears or every driver is
    /// dropped, then leave the device with all duties at zero.
    pub fn run(&mut self, running: &AtomicBool, period: Duration) {
        while running.load(Ordering::SeqCst) {
            match self.wake.recv_timeout(period) {
                Ok(()) | Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }

            self.send_once();
        }

        self.duties.zero_all();
        self.send_once();
    }

    #[inline]
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }
}

/// A `PwmSender` running on its own thread.
pub struct SenderThread {
    running: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl SenderThread {
    pub fn spawn<T, R>(mut sender: PwmSender<T, R>, period: Duration) -> Self
    where
        T: PwmTransport + 'static,
        R: DeviceRestart + 'static,
    {
        let running = Arc::new(AtomicBool::new(true));

        let handle = {
            let running = running.clone();
            thread::spawn(move || sender.run(&running, period))
        };

        Self { running, handle }
    }

    /// Zero every duty through `driver` and wait up to `timeout` for the
    /// sender to deliver it. False if the sender did not finish in time.
    pub fn stop(self, driver: &dyn ActuationDriver, timeout: Duration) -> bool {
        self.running.store(false, Ordering::SeqCst);
        driver.all_off();

        let deadline = Instant::now() + timeout;

        while !self.handle.is_finished() && Instant::now() < deadline {
            thread::sleep(JOIN_POLL);
        }

        if !self.handle.is_finished() {
            error!("*ERR* pwm sender did not finish, device may keep its duties");
            return false;
        }

        if self.handle.join().is_err() {
            error!("*ERR* pwm sender panicked");
            return false;
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use pwmlink::Error;

    use super::*;

    /// Replays scripted replies, `None` standing for a timeout.
    #[derive(Default)]
    struct ScriptedTransport {
        replies: VecDeque<Option<Reply>>,
        sent: Vec<Command>,
    }

    impl PwmTransport for ScriptedTransport {
        fn send(&mut self, command: &Command) -> pwmlink::Result<Reply> {
            self.sent.push(command.clone());

            match self.replies.pop_front().flatten() {
                Some(reply) => Ok(reply),
                None => Err(Error::Timeout),
            }
        }
    }

    struct CountingRestart(Arc<std::sync::atomic::AtomicU32>);

    impl DeviceRestart for CountingRestart {
        fn restart(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn scripted(
        replies: &[Option<Reply>],
    ) -> (
        RemotePwmDriver,
        PwmSender<ScriptedTransport, CountingRestart>,
        Arc<SafetyFlag>,
        Arc<std::sync::atomic::AtomicU32>,
    ) {
        let flag = Arc::new(SafetyFlag::new("furnace"));
        let restarts = Arc::new(std::sync::atomic::AtomicU32::new(0));

        let transport = ScriptedTransport {
            replies: replies.iter().cloned().collect(),
            sent: Vec::new(),
        };

        let (driver, sender) = remote_pwm(transport, CountingRestart(restarts.clone()), vec![flag.clone()]);

        (driver, sender, flag, restarts)
    }

    #[test]
    fn recovers_after_two_timeouts() {
        let (driver, mut sender, flag, restarts) =
            scripted(&[Some(Reply::IsAlive), None, None, Some(Reply::IsAlive)]);

        driver.write(1, 40);

        let statuses: Vec<_> = (0..4).map(|_| sender.send_once()).collect();

        assert_eq!(
            statuses,
            vec![
                Some(LinkStatus::Alive),
                Some(LinkStatus::Restarted(1)),
                Some(LinkStatus::Restarted(2)),
                Some(LinkStatus::Alive),
            ]
        );
        assert_eq!(restarts.load(Ordering::SeqCst), 2);
        assert!(flag.is_safe());
    }

    #[test]
    fn third_failure_declares_unsafe() {
        let (driver, mut sender, flag, restarts) =
            scripted(&[None, Some(Reply::NotAlive), None, None]);

        driver.write(2, 10);

        for _ in 0..3 {
            sender.send_once();
        }

        assert!(!flag.is_safe());
        assert_eq!(restarts.load(Ordering::SeqCst), 2);
        assert_eq!(sender.send_once(), Some(LinkStatus::Down));
    }

    #[test]
    fn sends_whole_table() {
        let (driver, mut sender, _, _) = scripted(&[Some(Reply::IsAlive); 3]);

        assert_eq!(sender.send_once(), None);

        driver.write(3, 70);
        driver.write(1, 40);
        driver.write(3, 20);
        sender.send_once();

        driver.all_off();
        sender.send_once();

        assert_eq!(
            sender.transport_mut().sent,
            vec![
                Command::Pwm(vec![(1, 40), (3, 20)]),
                Command::Pwm(vec![(1, 0), (3, 0)]),
            ]
        );
    }

    #[test]
    fn stopped_sender_zeroes_device() {
        let (driver, mut sender, _, _) = scripted(&[Some(Reply::IsAlive); 2]);

        driver.write(1, 40);

        let running = AtomicBool::new(false);
        sender.run(&running, Duration::from_millis(10));

        assert_eq!(sender.transport_mut().sent, vec![Command::Pwm(vec![(1, 0)])]);
    }

    #[test]
    fn hung_restart_command_is_killed() {
        let restart = CommandRestart::new(vec!["sleep".to_owned(), "5".to_owned()])
            .unwrap()
            .with_timeout(Duration::from_millis(100));

        let transport = ScriptedTransport {
            replies: VecDeque::from([Some(Reply::NotAlive)]),
            sent: Vec::new(),
        };
        let flag = Arc::new(SafetyFlag::new("furnace"));
        let (driver, mut sender) = remote_pwm(transport, Some(restart), vec![flag]);

        driver.write(1, 40);

        let start = Instant::now();
        assert_eq!(sender.send_once(), Some(LinkStatus::Restarted(1)));
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn finished_restart_command_returns() {
        let mut restart = CommandRestart::new(vec!["true".to_owned()]).unwrap();

        let start = Instant::now();
        restart.restart();
        assert!(start.elapsed() < DEFAULT_RESTART_TIMEOUT);

        assert!(CommandRestart::new(Vec::new()).is_none());
    }

    /// Always answers `is_alive`, taking `delay` per send.
    struct SlowTransport {
        sent: Arc<std::sync::Mutex<Vec<Command>>>,
        delay: Duration,
    }

    impl PwmTransport for SlowTransport {
        fn send(&mut self, command: &Command) -> pwmlink::Result<Reply> {
            thread::sleep(self.delay);
            self.sent.lock().unwrap().push(command.clone());
            Ok(Reply::IsAlive)
        }
    }

    fn slow_sender(delay: Duration) -> (RemotePwmDriver, SenderThread, Arc<std::sync::Mutex<Vec<Command>>>) {
        let sent = Arc::new(std::sync::Mutex::new(Vec::new()));
        let transport = SlowTransport {
            sent: sent.clone(),
            delay,
        };

        let (driver, sender) = remote_pwm(transport, None::<CommandRestart>, Vec::new());
        let thread = SenderThread::spawn(sender, Duration::from_secs(3600));

        (driver, thread, sent)
    }

    #[test]
    fn stopped_thread_delivers_zero_before_returning() {
        let (driver, thread, sent) = slow_sender(Duration::ZERO);

        driver.write(1, 40);
        driver.write(2, 60);

        assert!(thread.stop(&driver, Duration::from_secs(2)));
        assert_eq!(
            sent.lock().unwrap().last(),
            Some(&Command::Pwm(vec![(1, 0), (2, 0)]))
        );
    }

    #[test]
    fn stuck_sender_is_given_up_on() {
        let (driver, thread, _) = slow_sender(Duration::from_millis(500));

        driver.write(1, 40);

        assert!(!thread.stop(&driver, Duration::from_millis(50)));
    }
}
