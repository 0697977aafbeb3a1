//! Fixed-period dispatch of zone cycles and telemetry collection.
//!
//! Each job runs on its own worker thread so one slow zone never delays the
//! others. A job still running when its next tick comes due is skipped for
//! that tick, never queued.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc::{self, Receiver, RecvTimeoutError, SyncSender},
        Arc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use tracing::{debug, error, warn};

struct Worker {
    name: String,
    busy: Arc<AtomicBool>,
    tick: SyncSender<()>,
    done: Receiver<()>,
    join_handle: JoinHandle<()>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickReport {
    pub dispatched: usize,
    /// Jobs still busy with the previous tick
    pub skipped: Vec<String>,
}

pub struct Scheduler {
    period: Duration,
    workers: Vec<Worker>,
}

impl Scheduler {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            workers: Vec::new(),
        }
    }

    #[inline]
    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn add_job(&mut self, name: &str, mut job: impl FnMut() + Send + 'static) {
        let busy = Arc::new(AtomicBool::new(false));
        let (tick_tx, tick_rx) = mpsc::sync_channel::<()>(1);
        let (done_tx, done_rx) = mpsc::channel::<()>();

        let busy_cpy = busy.clone();
        let thread_name = name.to_owned();

        let join_handle = thread::spawn(move || {
            for () in tick_rx {
                job();
                busy_cpy.store(false, Ordering::SeqCst);
            }

            debug!(job = %thread_name, "worker finished");
            done_tx.send(()).unwrap_or_default();
        });

        self.workers.push(Worker {
            name: name.to_owned(),
            busy,
            tick: tick_tx,
            done: done_rx,
            join_handle,
        });
    }

    /// Hand every idle job one tick.
    pub fn tick(&self) -> TickReport {
        let mut report = TickReport::default();

        for worker in &self.workers {
            if worker
                .busy
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
            {
                warn!(job = %worker.name, "previous cycle still running, skipping");
                report.skipped.push(worker.name.clone());
                continue;
            }

            match worker.tick.try_send(()) {
                Ok(()) => report.dispatched += 1,
                Err(_) => {
                    error!(job = %worker.name, "*ERR* worker is gone");
                    worker.busy.store(false, Ordering::SeqCst);
                }
            }
        }

        report
    }

    /// Let every worker finish its current job, waiting at most `timeout`
    /// for each. Returns the jobs that did not finish in time.
    pub fn shutdown(self, timeout: Duration) -> Vec<String> {
        let mut stuck = Vec::new();

        for worker in self.workers {
            drop(worker.tick);

            match worker.done.recv_timeout(timeout) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                    if worker.join_handle.join().is_err() {
                        error!(job = %worker.name, "*ERR* worker panicked");
                    }
                }
                Err(RecvTimeoutError::Timeout) => {
                    warn!(job = %worker.name, "worker did not finish, leaving it behind");
                    stuck.push(worker.name);
                }
            }
        }

        stuck
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::atomic::AtomicUsize, time::Instant};

    use super::*;

    fn wait_for(mut cond: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);

        while !cond() {
            assert!(Instant::now() < deadline, "timed out");
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn busy_job_is_skipped() {
        let mut scheduler = Scheduler::new(Duration::from_millis(10));

        let (release_tx, release_rx) = mpsc::channel::<()>();
        let slow_runs = Arc::new(AtomicUsize::new(0));
        let fast_runs = Arc::new(AtomicUsize::new(0));

        let slow_cpy = slow_runs.clone();
        scheduler.add_job("slow", move || {
            slow_cpy.fetch_add(1, Ordering::SeqCst);
            release_rx.recv().unwrap_or_default();
        });

        let fast_cpy = fast_runs.clone();
        scheduler.add_job("fast", move || {
            fast_cpy.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(scheduler.tick().dispatched, 2);
        wait_for(|| slow_runs.load(Ordering::SeqCst) == 1 && fast_runs.load(Ordering::SeqCst) == 1);
        wait_for(|| !scheduler.workers[1].busy.load(Ordering::SeqCst));

        let report = scheduler.tick();
        assert_eq!(report.skipped, vec!["slow".to_owned()]);
        assert_eq!(report.dispatched, 1);
        wait_for(|| fast_runs.load(Ordering::SeqCst) == 2);

        release_tx.send(()).unwrap();
        wait_for(|| !scheduler.workers[0].busy.load(Ordering::SeqCst));

        assert_eq!(scheduler.tick().dispatched, 2);
        release_tx.send(()).unwrap();

        assert!(scheduler.shutdown(Duration::from_secs(5)).is_empty());
        assert_eq!(slow_runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn stuck_worker_is_reported() {
        let mut scheduler = Scheduler::new(Duration::from_millis(10));

        let (_hold_tx, hold_rx) = mpsc::channel::<()>();
        scheduler.add_job("stuck", move || {
            hold_rx.recv_timeout(Duration::from_secs(2)).unwrap_or_default();
        });

        scheduler.tick();
        thread::sleep(Duration::from_millis(20));

        assert_eq!(
            scheduler.shutdown(Duration::from_millis(50)),
            vec!["stuck".to_owned()]
        );
    }
}
