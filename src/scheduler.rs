//! Deferred execution used to settle promises later, from another thread.
//! The promise core does not depend on anything in here.
use crate::{Error, Promise};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, trace};

type Task = Box<dyn FnOnce() + Send>;

/// Runs `work` on a fresh thread once `delay` has passed.
pub fn schedule_after<F>(delay: Duration, work: F) -> JoinHandle<()>
where
    F: FnOnce() + Send + 'static,
{
    thread::spawn(move || {
        thread::sleep(delay);
        work()
    })
}

/// A timer thread. Tasks scheduled through its [`Handle`] run one after
/// another on that thread, earliest deadline first.
///
/// Dropping the scheduler stops the thread; timers that have not fired by
/// then are dropped.
///
/// # Examples
///
/// ```
/// use promise_chain::{Error, Promise, Scheduler};
/// use futures::executor::block_on;
/// use std::time::Duration;
///
/// let scheduler = Scheduler::new()?;
/// let handle = scheduler.handle();
/// let p = Promise::<&str, Error>::new(|resolver| {
///     handle.schedule_after(Duration::from_millis(5), move || {
///         resolver.resolve("🍓");
///     })
/// });
/// assert_eq!(block_on(p), Ok("🍓"));
/// # Ok::<(), Error>(())
/// ```
pub struct Scheduler {
    handle: Handle,
    thread: Option<JoinHandle<()>>,
}

#[derive(Clone)]
pub struct Handle {
    sender: Sender<Command>,
}

enum Command {
    Schedule(Instant, Task),
    Stop,
}

struct Timer {
    deadline: Instant,
    seq: u64,
    task: Task,
}

impl Scheduler {
    pub fn new() -> Result<Self, Error> {
        Self::named("promise-scheduler")
    }

    pub fn named(name: &str) -> Result<Self, Error> {
        let (sender, receiver) = unbounded();
        let thread = thread::Builder::new()
            .name(name.to_owned())
            .spawn(move || run(receiver))
            .map_err(|e| Error::Spawn {
                name: name.to_owned(),
                reason: e.to_string(),
            })?;
        debug!(name, "scheduler started");

        Ok(Self {
            handle: Handle { sender },
            thread: Some(thread),
        })
    }

    pub fn handle(&self) -> Handle {
        self.handle.clone()
    }
}

impl Handle {
    /// Runs `work` on the scheduler thread once `delay` has passed. A delay
    /// too large to represent as a deadline never fires.
    pub fn schedule_after<F>(&self, delay: Duration, work: F) -> Result<(), Error>
    where
        F: FnOnce() + Send + 'static,
    {
        match Instant::now().checked_add(delay) {
            Some(deadline) => self.send(Command::Schedule(deadline, Box::new(work))),
            None => {
                debug!(?delay, "delay out of range, timer will never fire");
                Ok(())
            }
        }
    }

    /// A promise rejected with [`Error::Timeout`] once `delay` has passed.
    /// If the scheduler is gone the promise is rejected right away with
    /// [`Error::SchedulerStopped`].
    pub fn timeout<T, E>(&self, delay: Duration) -> Promise<T, E>
    where
        T: Clone + Send + 'static,
        E: Clone + Send + From<Error> + 'static,
    {
        Promise::new(|resolver| {
            self.schedule_after(delay, move || {
                resolver.reject(Error::Timeout.into());
            })
            .map_err(E::from)
        })
    }

    fn send(&self, cmd: Command) -> Result<(), Error> {
        match self.sender.send(cmd) {
            Ok(()) => Ok(()),
            Err(_) => Err(Error::SchedulerStopped),
        }
    }
}

impl<T, E> Promise<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + From<Error> + 'static,
{
    /// Races this promise against a timer. The work behind this promise is
    /// not cancelled when the timer wins.
    pub fn timeout(&self, scheduler: &Handle, delay: Duration) -> Self {
        Self::race([self.clone(), scheduler.timeout(delay)])
    }
}

fn run(receiver: Receiver<Command>) {
    let mut timers: BinaryHeap<Timer> = BinaryHeap::new();
    let mut seq = 0;

    loop {
        while timers.peek().map_or(false, |timer| timer.deadline <= Instant::now()) {
            if let Some(timer) = timers.pop() {
                trace!(seq = timer.seq, "timer fired");
                if catch_unwind(AssertUnwindSafe(timer.task)).is_err() {
                    error!(seq = timer.seq, "scheduled task panicked");
                }
            }
        }

        let cmd = match timers.peek() {
            Some(timer) => {
                receiver.recv_timeout(timer.deadline.saturating_duration_since(Instant::now()))
            }
            None => receiver.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };

        match cmd {
            Ok(Command::Schedule(deadline, task)) => {
                timers.push(Timer { deadline, seq, task });
                seq += 1;
            }
            Err(RecvTimeoutError::Timeout) => (),
            Ok(Command::Stop) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    if !timers.is_empty() {
        debug!(dropped = timers.len(), "scheduler stopped with pending timers");
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = self.handle.send(Command::Stop);
            match thread.join() {
                Ok(()) => debug!("scheduler stopped"),
                Err(e) => error!("join error: {e:?}"),
            }
        }
    }
}

// BinaryHeap is a max-heap: the earliest deadline, then the lowest
// sequence number, compares greatest.
impl Ord for Timer {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for Timer {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Timer {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Timer {}
