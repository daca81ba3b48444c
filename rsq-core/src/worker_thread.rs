use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};

static ACTIVE_THREADS: AtomicUsize = AtomicUsize::new(0);

/// Cooperative stop flag handed to a worker routine. The routine must
/// poll it at every quiescent point.
#[derive(Clone)]
pub struct StopToken {
    stopping: Arc<AtomicBool>,
}

impl StopToken {
    pub fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::Acquire)
    }
}

/// Wraps one OS thread running a single routine, with explicit start,
/// cooperative stop and join. A process-global counter tracks how many
/// worker threads are currently running.
pub struct WorkerThread {
    routine: Option<Box<dyn FnOnce(StopToken) + Send>>,
    handle: Option<JoinHandle<()>>,
    stopping: Arc<AtomicBool>,
    finished: Arc<AtomicBool>,
}

impl WorkerThread {
    pub fn new(routine: impl FnOnce(StopToken) + Send + 'static) -> WorkerThread {
        WorkerThread {
            routine: Some(Box::new(routine)),
            handle: None,
            stopping: Arc::new(AtomicBool::new(false)),
            finished: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Launches the routine. Starting a thread that already ran (or is
    /// still running) is a no-op.
    pub fn start(&mut self) {
        if self.handle.is_some() {
            log::debug!("Attempt to start a worker thread that is already running");
            return;
        }
        let Some(routine) = self.routine.take() else {
            return;
        };
        let token = StopToken {
            stopping: self.stopping.clone(),
        };
        let finished = self.finished.clone();
        self.handle = Some(thread::spawn(move || {
            ACTIVE_THREADS.fetch_add(1, Ordering::SeqCst);
            routine(token);
            // Decrement before publishing `finished` so a joiner that
            // observed the flag also observes the corrected count
            ACTIVE_THREADS.fetch_sub(1, Ordering::SeqCst);
            finished.store(true, Ordering::Release);
        }));
    }

    /// Raises the stop flag; the routine winds down at its next check.
    /// With `block` the call joins the thread before returning.
    pub fn stop(&mut self, block: bool) {
        self.stopping.store(true, Ordering::Release);
        if block {
            self.join();
        }
    }

    pub fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("A worker thread panicked before finishing");
            }
        }
    }

    pub fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::Acquire)
    }

    /// True when the routine has returned, or when the thread was never
    /// started at all.
    pub fn is_finished(&self) -> bool {
        self.routine.is_some() || self.finished.load(Ordering::Acquire)
    }

    pub fn active_count() -> usize {
        ACTIVE_THREADS.load(Ordering::SeqCst)
    }
}

impl Drop for WorkerThread {
    fn drop(&mut self) {
        self.stop(true);
    }
}
