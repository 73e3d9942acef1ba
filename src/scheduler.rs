use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc;
use std::thread;

use tracing::{debug, warn};

use crate::config::{RunMode, default_workers};
use crate::pipeline::UnitOutcome;
use crate::unit::WorkUnit;

#[derive(Debug)]
pub struct ScheduleReport {
    /// Outcomes in completion order.
    pub outcomes: Vec<(WorkUnit, UnitOutcome)>,
    /// Units never started because a fatal outcome halted dispatch.
    pub skipped: Vec<WorkUnit>,
    pub halted: bool,
}

impl ScheduleReport {
    pub fn first_fatal(&self, mode: RunMode) -> Option<&(WorkUnit, UnitOutcome)> {
        self.outcomes
            .iter()
            .find(|(_, outcome)| outcome.is_fatal(mode))
    }
}

#[derive(Debug, Clone)]
pub struct TaskScheduler {
    workers: usize,
    mode: RunMode,
}

impl TaskScheduler {
    pub fn new(workers: Option<usize>, mode: RunMode) -> Self {
        let workers = workers.unwrap_or_else(default_workers).max(1);
        Self { workers, mode }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Runs `job` for every unit on a pool of OS threads. `on_complete` is
    /// called on the calling thread as each unit finishes.
    pub fn run_all<F, C>(&self, units: &[WorkUnit], job: F, mut on_complete: C) -> ScheduleReport
    where
        F: Fn(WorkUnit) -> UnitOutcome + Sync,
        C: FnMut(WorkUnit, &UnitOutcome),
    {
        let mode = self.mode;
        let cursor = AtomicUsize::new(0);
        let halted = AtomicBool::new(false);
        let started: Vec<AtomicBool> = units.iter().map(|_| AtomicBool::new(false)).collect();
        let mut outcomes = Vec::with_capacity(units.len());
        let worker_count = self.workers.min(units.len()).max(1);
        debug!(workers = worker_count, units = units.len(), "Dispatching units");

        thread::scope(|scope| {
            let (tx, rx) = mpsc::channel::<(WorkUnit, UnitOutcome)>();
            for worker in 0..worker_count {
                let tx = tx.clone();
                let (cursor, halted, started, job) = (&cursor, &halted, &started, &job);
                scope.spawn(move || {
                    loop {
                        if halted.load(Ordering::SeqCst) {
                            break;
                        }
                        let idx = cursor.fetch_add(1, Ordering::SeqCst);
                        let Some(&unit) = units.get(idx) else {
                            break;
                        };
                        if halted.load(Ordering::SeqCst) {
                            break;
                        }
                        started[idx].store(true, Ordering::SeqCst);
                        debug!(worker, txnum = unit.txnum, "Worker picked unit");
                        let outcome = run_isolated(job, unit);
                        if outcome.is_fatal(mode) {
                            halted.store(true, Ordering::SeqCst);
                        }
                        if tx.send((unit, outcome)).is_err() {
                            break;
                        }
                    }
                });
            }
            drop(tx);

            for (unit, outcome) in rx {
                on_complete(unit, &outcome);
                outcomes.push((unit, outcome));
            }
        });

        let skipped: Vec<WorkUnit> = units
            .iter()
            .zip(&started)
            .filter(|(_, flag)| !flag.load(Ordering::SeqCst))
            .map(|(unit, _)| *unit)
            .collect();
        let halted = halted.into_inner();
        if halted && !skipped.is_empty() {
            warn!(
                skipped = skipped.len(),
                "Run halted after fatal failure; remaining units were not started"
            );
        }

        ScheduleReport {
            outcomes,
            skipped,
            halted,
        }
    }
}

fn run_isolated<F>(job: &F, unit: WorkUnit) -> UnitOutcome
where
    F: Fn(WorkUnit) -> UnitOutcome,
{
    panic::catch_unwind(AssertUnwindSafe(|| job(unit))).unwrap_or_else(|payload| {
        let message = panic_message(payload.as_ref());
        warn!(txnum = unit.txnum, %message, "Unit pipeline panicked");
        UnitOutcome::Panicked(message)
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
