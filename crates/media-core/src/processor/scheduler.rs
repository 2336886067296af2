//! Media scheduler: worker pool and callgroup placement

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc::{self, UnboundedSender};
use tracing::{debug, info, warn};

use super::callgroups::CallgroupMap;
use super::worker::{Completion, SchedulerRequest, Worker, WorkerShared};
use super::{DetachKind, MediaSession};
use crate::config::MediaProcessorConfig;
use crate::error::{Error, Result};
use crate::types::MediaSessionId;

/// Poll interval while waiting for a worker to acknowledge a detach
const DETACH_POLL: Duration = Duration::from_millis(50);

struct WorkerHandle {
    sender: UnboundedSender<SchedulerRequest>,
    shared: Arc<WorkerShared>,
    thread_id: ThreadId,
    join: Mutex<Option<JoinHandle<()>>>,
}

/// Pool of media processing threads
///
/// ```no_run
/// use b2bmedia_media_core::config::MediaProcessorConfig;
/// use b2bmedia_media_core::processor::MediaScheduler;
///
/// let scheduler = MediaScheduler::new(&MediaProcessorConfig::default()).unwrap();
/// // attach sessions with `add_session` ...
/// scheduler.shutdown();
/// ```
pub struct MediaScheduler {
    config: MediaProcessorConfig,
    workers: Vec<WorkerHandle>,
    callgroups: Arc<Mutex<CallgroupMap>>,
    running: AtomicBool,
}

impl MediaScheduler {
    /// Start `config.threads` workers
    pub fn new(config: &MediaProcessorConfig) -> Result<Arc<Self>> {
        let threads = config.threads.max(1);
        let tick = Duration::from_millis(config.tick_interval_ms.max(1));
        let ts_increment = config.ts_increment().max(1);
        let callgroups = Arc::new(Mutex::new(CallgroupMap::new(threads)));

        let mut workers = Vec::with_capacity(threads);
        for index in 0..threads {
            let (sender, requests) = mpsc::unbounded_channel();
            let shared = Arc::new(WorkerShared::new());
            let worker = Worker::new(index, tick, ts_increment, requests, shared.clone(), callgroups.clone());

            let join = match thread::Builder::new()
                .name(format!("media-proc-{}", index))
                .spawn(move || worker.run())
            {
                Ok(join) => join,
                Err(e) => {
                    for started in &workers {
                        stop_worker(started);
                    }
                    return Err(Error::ThreadSpawn(e.to_string()));
                }
            };

            workers.push(WorkerHandle {
                sender,
                shared,
                thread_id: join.thread().id(),
                join: Mutex::new(Some(join)),
            });
        }

        info!(
            "Media scheduler started: {} workers, {} ms tick, {} Hz clock",
            threads, config.tick_interval_ms, config.system_clock_rate
        );
        Ok(Arc::new(Self {
            config: config.clone(),
            workers,
            callgroups,
            running: AtomicBool::new(true),
        }))
    }

    pub fn config(&self) -> &MediaProcessorConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn thread_count(&self) -> usize {
        self.workers.len()
    }

    /// Worker currently owning `callgroup`
    pub fn thread_of(&self, callgroup: &str) -> Option<usize> {
        self.callgroups.lock().thread_of(callgroup)
    }

    /// Callgroups assigned to each worker
    pub fn thread_loads(&self) -> Vec<usize> {
        self.callgroups.lock().loads()
    }

    /// Sessions known to the scheduler, including ones not yet picked up
    pub fn session_count(&self) -> usize {
        self.callgroups.lock().session_count()
    }

    /// Sessions currently ticked by the workers
    pub fn attached_count(&self) -> usize {
        self.workers
            .iter()
            .map(|w| w.shared.session_count.load(Ordering::Acquire))
            .sum()
    }

    pub fn contains(&self, id: &MediaSessionId) -> bool {
        self.callgroups.lock().contains(id)
    }

    /// Attach `session` to the worker owning `callgroup`
    ///
    /// The session is picked up at the worker's next tick boundary, where
    /// `on_media_processing_started` is called.
    pub fn add_session(&self, session: Arc<dyn MediaSession>, callgroup: &str) -> Result<()> {
        if !self.is_running() {
            return Err(Error::SchedulerStopped);
        }

        let id = session.session_id().clone();
        let mut callgroups = self.callgroups.lock();
        let thread = callgroups.assign(&id, callgroup);
        if self.workers[thread].sender.send(SchedulerRequest::Insert(session)).is_err() {
            callgroups.release(&id);
            return Err(Error::SchedulerStopped);
        }

        debug!("Session {} (callgroup {}) queued for worker {}", id, callgroup, thread);
        Ok(())
    }

    /// Detach and terminate the session
    pub fn remove_session(&self, id: &MediaSessionId) -> Result<()> {
        self.detach(id, DetachKind::Remove)
    }

    /// Detach the session without terminating it
    pub fn soft_remove_session(&self, id: &MediaSessionId) -> Result<()> {
        self.detach(id, DetachKind::SoftRemove)
    }

    /// Release the session's media, then detach and terminate it
    pub fn clear_session(&self, id: &MediaSessionId) -> Result<()> {
        self.detach(id, DetachKind::Clear)
    }

    /// Returns once the worker has acknowledged, immediately when called
    /// on the worker itself or after shutdown
    fn detach(&self, id: &MediaSessionId, kind: DetachKind) -> Result<()> {
        let thread = self
            .callgroups
            .lock()
            .release(id)
            .ok_or_else(|| Error::UnknownSession(id.to_string()))?;
        let worker = &self.workers[thread];

        let done = Completion::new();
        let request = SchedulerRequest::Detach {
            id: id.clone(),
            kind,
            done: done.clone(),
        };
        if worker.sender.send(request).is_err() {
            debug!("Worker {} gone, session {} already detached", thread, id);
            return Ok(());
        }
        if thread::current().id() == worker.thread_id {
            return Ok(());
        }

        while !done.wait_for(DETACH_POLL) {
            if !self.is_running() {
                break;
            }
        }
        Ok(())
    }

    /// Stop all workers; sessions still attached are terminated.
    /// Idempotent.
    pub fn shutdown(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        info!("Stopping media scheduler");
        let current = thread::current().id();
        for worker in &self.workers {
            worker.shared.stop.store(true, Ordering::Release);
        }
        for worker in &self.workers {
            if worker.thread_id == current {
                continue;
            }
            if let Some(join) = worker.join.lock().take() {
                if join.join().is_err() {
                    warn!("Media processor worker panicked during shutdown");
                }
            }
        }
    }
}

fn stop_worker(worker: &WorkerHandle) {
    worker.shared.stop.store(true, Ordering::Release);
    if let Some(join) = worker.join.lock().take() {
        let _ = join.join();
    }
}

impl Drop for MediaScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for MediaScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaScheduler")
            .field("threads", &self.workers.len())
            .field("running", &self.is_running())
            .finish()
    }
}
