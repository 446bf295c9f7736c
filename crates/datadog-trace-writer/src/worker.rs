// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! A single background thread that runs a task on a fixed interval.
//!
//! The thread owns a current-thread tokio runtime so the task can drive async I/O without
//! touching the application's own runtime. Producers only ever poke the thread through
//! [`PeriodicWorker::trigger`]; they never wait for the task itself.

use async_trait::async_trait;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

use crate::errors::WriterError;

#[async_trait]
pub trait PeriodicTask: Send + Sync + 'static {
    /// Runs on every interval tick and on every trigger.
    async fn run_periodic(&self);

    /// Runs once on the worker thread after a stop was requested.
    async fn on_shutdown(&self);
}

#[derive(Debug, Default)]
struct SignalState {
    triggered: bool,
    stopping: bool,
}

#[derive(Debug, Default)]
struct Signal {
    state: Mutex<SignalState>,
    condvar: Condvar,
}

impl Signal {
    /// Blocks until `interval` elapses or a trigger arrives. Returns `false` once stopping.
    fn wait(&self, interval: Duration) -> bool {
        let deadline = Instant::now() + interval;
        #[allow(clippy::expect_used)]
        let mut state = self.state.lock().expect("lock poisoned");
        loop {
            if state.stopping {
                return false;
            }
            if state.triggered {
                state.triggered = false;
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            #[allow(clippy::expect_used)]
            let (guard, _) = self
                .condvar
                .wait_timeout(state, deadline - now)
                .expect("lock poisoned");
            state = guard;
        }
    }

    fn trigger(&self) {
        #[allow(clippy::expect_used)]
        let mut state = self.state.lock().expect("lock poisoned");
        if !state.triggered {
            state.triggered = true;
            self.condvar.notify_one();
        }
    }

    fn stop(&self) {
        #[allow(clippy::expect_used)]
        let mut state = self.state.lock().expect("lock poisoned");
        state.stopping = true;
        self.condvar.notify_all();
    }
}

struct WorkerHandle {
    thread: JoinHandle<()>,
    done: mpsc::Receiver<()>,
}

pub struct PeriodicWorker {
    name: String,
    interval: Duration,
    exit_timeout: Duration,
    signal: Arc<Signal>,
    handle: Mutex<Option<WorkerHandle>>,
}

impl PeriodicWorker {
    pub fn new(name: &str, interval: Duration, exit_timeout: Duration) -> Self {
        PeriodicWorker {
            name: name.to_string(),
            interval,
            exit_timeout,
            signal: Arc::new(Signal::default()),
            handle: Mutex::new(None),
        }
    }

    /// Spawns the worker thread. Returns `Ok(false)` when it was already started.
    pub fn start(&self, task: Arc<dyn PeriodicTask>) -> Result<bool, WriterError> {
        #[allow(clippy::expect_used)]
        let mut handle = self.handle.lock().expect("lock poisoned");
        if handle.is_some() {
            return Ok(false);
        }

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(WriterError::Runtime)?;
        let signal = Arc::clone(&self.signal);
        let interval = self.interval;
        let (done_tx, done_rx) = mpsc::channel();

        let thread = thread::Builder::new()
            .name(self.name.clone())
            .spawn(move || {
                while signal.wait(interval) {
                    runtime.block_on(task.run_periodic());
                }
                runtime.block_on(task.on_shutdown());
                let _ = done_tx.send(());
            })
            .map_err(WriterError::WorkerSpawn)?;

        debug!("Started {} thread", self.name);
        *handle = Some(WorkerHandle {
            thread,
            done: done_rx,
        });
        Ok(true)
    }

    pub fn is_running(&self) -> bool {
        #[allow(clippy::expect_used)]
        let handle = self.handle.lock().expect("lock poisoned");
        handle.is_some()
    }

    /// Wakes the worker for an extra cycle. Triggers that arrive before the worker wakes up
    /// collapse into a single cycle.
    pub fn trigger(&self) {
        self.signal.trigger();
    }

    /// Stops the periodic cycle and waits up to the exit timeout for the shutdown task to finish.
    ///
    /// On timeout the thread is left to finish on its own and `ShutdownTimeout` is returned.
    pub fn stop(&self) -> Result<(), WriterError> {
        #[allow(clippy::expect_used)]
        let handle = self.handle.lock().expect("lock poisoned").take();
        let Some(handle) = handle else {
            return Ok(());
        };

        self.signal.stop();
        match handle.done.recv_timeout(self.exit_timeout) {
            Ok(()) => {
                if handle.thread.join().is_err() {
                    error!("{} thread panicked during shutdown", self.name);
                }
                debug!("Stopped {} thread", self.name);
                Ok(())
            }
            Err(RecvTimeoutError::Disconnected) => {
                error!("{} thread exited without completing shutdown", self.name);
                let _ = handle.thread.join();
                Ok(())
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    "{} thread did not shut down within {:?}, abandoning pending data",
                    self.name, self.exit_timeout
                );
                Err(WriterError::ShutdownTimeout(self.exit_timeout))
            }
        }
    }
}
