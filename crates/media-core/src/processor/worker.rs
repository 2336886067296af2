//! Media processor worker thread

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tokio::sync::mpsc::{error::TryRecvError, UnboundedReceiver};
use tracing::{debug, error, info, trace, warn};

use super::callgroups::CallgroupMap;
use super::{DetachKind, MediaSession, AUDIO_BUFFER_SIZE};
use crate::types::MediaSessionId;

/// One-shot acknowledgement a caller can block on
#[derive(Clone, Default)]
pub(crate) struct Completion(Arc<(Mutex<bool>, Condvar)>);

impl Completion {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn complete(&self) {
        let (done, cond) = &*self.0;
        *done.lock() = true;
        cond.notify_all();
    }

    /// Wait up to `timeout`; returns whether the completion fired
    pub(crate) fn wait_for(&self, timeout: Duration) -> bool {
        let (done, cond) = &*self.0;
        let mut guard = done.lock();
        if !*guard {
            cond.wait_for(&mut guard, timeout);
        }
        *guard
    }
}

/// Work queued to a worker, applied at its next tick boundary
pub(crate) enum SchedulerRequest {
    Insert(Arc<dyn MediaSession>),
    Detach {
        id: MediaSessionId,
        kind: DetachKind,
        done: Completion,
    },
}

/// State a worker shares with the scheduler
pub(crate) struct WorkerShared {
    pub(crate) stop: AtomicBool,
    pub(crate) session_count: AtomicUsize,
}

impl WorkerShared {
    pub(crate) fn new() -> Self {
        Self {
            stop: AtomicBool::new(false),
            session_count: AtomicUsize::new(0),
        }
    }
}

pub(crate) struct Worker {
    index: usize,
    tick: Duration,
    ts_increment: u64,
    requests: UnboundedReceiver<SchedulerRequest>,
    shared: Arc<WorkerShared>,
    callgroups: Arc<Mutex<CallgroupMap>>,
    sessions: Vec<Arc<dyn MediaSession>>,
}

/// Run `f`, turning a panic into an error message
fn guarded<T>(f: impl FnOnce() -> T) -> std::result::Result<T, String> {
    catch_unwind(AssertUnwindSafe(f)).map_err(|panic| {
        panic
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string())
    })
}

impl Worker {
    pub(crate) fn new(
        index: usize,
        tick: Duration,
        ts_increment: u64,
        requests: UnboundedReceiver<SchedulerRequest>,
        shared: Arc<WorkerShared>,
        callgroups: Arc<Mutex<CallgroupMap>>,
    ) -> Self {
        Self {
            index,
            tick,
            ts_increment,
            requests,
            shared,
            callgroups,
            sessions: Vec::new(),
        }
    }

    pub(crate) fn run(mut self) {
        info!("🎵 Media processor worker {} started", self.index);

        let mut buffer = vec![0u8; AUDIO_BUFFER_SIZE];
        let mut ts: u64 = 0;
        let mut next_tick = Instant::now() + self.tick;

        while !self.shared.stop.load(Ordering::Acquire) {
            if !self.apply_requests() {
                break;
            }

            self.process_audio(ts, &mut buffer);
            self.process_dtmf();
            ts = ts.wrapping_add(self.ts_increment);

            let now = Instant::now();
            if next_tick > now {
                thread::sleep(next_tick - now);
            } else if now - next_tick > self.tick * 4 {
                trace!("Worker {} lagging, resetting tick clock", self.index);
                next_tick = now;
            }
            next_tick += self.tick;
        }

        self.shutdown();
        info!("Media processor worker {} stopped", self.index);
    }

    /// Drain pending requests; returns false once the scheduler is gone
    fn apply_requests(&mut self) -> bool {
        loop {
            match self.requests.try_recv() {
                Ok(request) => self.apply(request),
                Err(TryRecvError::Empty) => return true,
                Err(TryRecvError::Disconnected) => return false,
            }
        }
    }

    fn apply(&mut self, request: SchedulerRequest) {
        match request {
            SchedulerRequest::Insert(session) => {
                if self.position(session.session_id()).is_some() {
                    debug!("Session {} already on worker {}", session.session_id(), self.index);
                    return;
                }
                debug!("Session {} attached to worker {}", session.session_id(), self.index);
                if let Err(panic) = guarded(|| session.on_media_processing_started()) {
                    warn!("Session {} panicked on start: {}", session.session_id(), panic);
                }
                self.sessions.push(session);
            }
            SchedulerRequest::Detach { id, kind, done } => {
                match self.position(&id) {
                    Some(index) => {
                        let session = self.sessions.remove(index);
                        debug!("Session {} detached from worker {} ({:?})", id, self.index, kind);
                        let result = guarded(|| match kind {
                            DetachKind::Remove => session.on_media_processing_terminated(),
                            DetachKind::SoftRemove => session.on_media_processing_suspended(),
                            DetachKind::Clear => {
                                session.clear_audio();
                                session.on_media_processing_terminated();
                            }
                        });
                        if let Err(panic) = result {
                            warn!("Session {} panicked while detaching: {}", id, panic);
                        }
                    }
                    None => debug!("Session {} not on worker {}", id, self.index),
                }
                done.complete();
            }
        }
        self.shared
            .session_count
            .store(self.sessions.len(), Ordering::Release);
    }

    fn position(&self, id: &MediaSessionId) -> Option<usize> {
        self.sessions.iter().position(|s| s.session_id() == id)
    }

    fn process_audio(&mut self, ts: u64, buffer: &mut [u8]) {
        let mut failed = Vec::new();
        for session in &self.sessions {
            let result = guarded(|| {
                session.read_streams(ts, buffer)?;
                session.write_streams(ts, buffer)
            });
            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => failed.push((session.session_id().clone(), e.to_string())),
                Err(panic) => failed.push((session.session_id().clone(), format!("panic: {}", panic))),
            }
        }
        for (id, reason) in failed {
            self.detach_failed(&id, &reason);
        }
    }

    fn process_dtmf(&mut self) {
        let mut failed = Vec::new();
        for session in &self.sessions {
            if let Err(panic) = guarded(|| session.process_dtmf_events()) {
                failed.push((session.session_id().clone(), format!("panic: {}", panic)));
            }
        }
        for (id, reason) in failed {
            self.detach_failed(&id, &reason);
        }
    }

    /// Force a misbehaving session off the worker
    fn detach_failed(&mut self, id: &MediaSessionId, reason: &str) {
        let Some(index) = self.position(id) else {
            return;
        };
        let session = self.sessions.remove(index);
        self.callgroups.lock().release(id);
        self.shared
            .session_count
            .store(self.sessions.len(), Ordering::Release);

        error!("Media processing of session {} failed, detaching: {}", id, reason);
        let result = guarded(|| {
            session.clear_audio();
            session.on_media_processing_failed(reason);
            session.on_media_processing_terminated();
        });
        if let Err(panic) = result {
            warn!("Session {} panicked while being detached: {}", id, panic);
        }
    }

    /// Terminate remaining sessions and release pending callers
    fn shutdown(&mut self) {
        self.requests.close();
        while let Ok(request) = self.requests.try_recv() {
            if let SchedulerRequest::Detach { done, .. } = request {
                done.complete();
            }
        }

        for session in self.sessions.drain(..) {
            self.callgroups.lock().release(session.session_id());
            if let Err(panic) = guarded(|| session.on_media_processing_terminated()) {
                warn!("Session {} panicked on shutdown: {}", session.session_id(), panic);
            }
        }
        self.shared.session_count.store(0, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completion_wakes_waiter() {
        let completion = Completion::new();
        let waiter = completion.clone();
        let handle = thread::spawn(move || waiter.wait_for(Duration::from_secs(5)));
        completion.complete();
        assert!(handle.join().unwrap());
    }

    #[test]
    fn test_completion_times_out() {
        assert!(!Completion::new().wait_for(Duration::from_millis(10)));
    }

    #[test]
    fn test_guarded_reports_panic_message() {
        let result: std::result::Result<(), String> = guarded(|| panic!("boom"));
        assert_eq!(result.unwrap_err(), "boom");
    }
}
