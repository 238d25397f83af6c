//! Polling synchronizer.
//!
//! Keeps a de-duplicated local mirror of one Gateway collection. Each fetch is
//! tagged with a monotonic sequence number; a response older than the last
//! applied one is dropped, so overlapping polls cannot roll the mirror back.
//! A snapshot is republished only when it differs by value from the last one.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{DineError, DineResult};
use crate::feedback::Feedback;

pub type FetchFuture<T> = Pin<Box<dyn Future<Output = DineResult<T>> + Send>>;
type FetchFn<T> = Arc<dyn Fn() -> FetchFuture<T> + Send + Sync>;
type UpdateFn<T> = Arc<dyn Fn(&Arc<T>) + Send + Sync>;

/// Last applied snapshot and the sequence number of the fetch that produced it.
#[derive(Debug)]
pub struct Published<T> {
    pub seq: u64,
    pub data: Option<Arc<T>>,
}

impl<T> Clone for Published<T> {
    fn clone(&self) -> Self {
        Self {
            seq: self.seq,
            data: self.data.clone(),
        }
    }
}

struct Shared<T> {
    name: &'static str,
    fetch: FetchFn<T>,
    feedback: Arc<dyn Feedback>,
    next_seq: AtomicU64,
    snapshot: watch::Sender<Published<T>>,
    listeners: Mutex<Vec<(CancellationToken, UpdateFn<T>)>>,
    refresh: Notify,
}

impl<T> Shared<T>
where
    T: PartialEq + Send + Sync + 'static,
{
    /// Run one tagged fetch. `None` means the result was discarded.
    async fn fetch_tagged(&self, stop: Option<&CancellationToken>) -> DineResult<Option<bool>> {
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let result = (self.fetch)().await;

        if stop.map(CancellationToken::is_cancelled).unwrap_or(false) {
            debug!(collection = self.name, seq, "response arrived after stop; discarded");
            return Ok(None);
        }
        Ok(self.apply(seq, result?))
    }

    fn apply(&self, seq: u64, data: T) -> Option<bool> {
        let data = Arc::new(data);
        let mut stale = false;
        let changed = self.snapshot.send_if_modified(|current| {
            if seq < current.seq {
                stale = true;
                return false;
            }
            current.seq = seq;
            if current.data.as_deref() == Some(&*data) {
                return false;
            }
            current.data = Some(Arc::clone(&data));
            true
        });

        if stale {
            debug!(collection = self.name, seq, "stale response dropped");
            return None;
        }
        if changed {
            debug!(collection = self.name, seq, "snapshot changed");
            self.notify(&data);
        }
        Some(changed)
    }

    fn notify(&self, data: &Arc<T>) {
        let listeners: Vec<UpdateFn<T>> = match self.listeners.lock() {
            Ok(mut guard) => {
                guard.retain(|(token, _)| !token.is_cancelled());
                guard.iter().map(|(_, f)| Arc::clone(f)).collect()
            }
            Err(_) => return,
        };
        for listener in listeners {
            listener(data);
        }
    }

    async fn poll_once(&self, stop: &CancellationToken) {
        match self.fetch_tagged(Some(stop)).await {
            Ok(_) => {}
            Err(DineError::Unauthorized) => {
                warn!(collection = self.name, "session rejected; polling stopped");
                self.feedback.error(&DineError::Unauthorized.to_string());
                stop.cancel();
            }
            Err(e) => {
                // Previous snapshot stays authoritative until the next success.
                warn!(collection = self.name, error = %e, "fetch failed");
                if !stop.is_cancelled() {
                    self.feedback.error(&e.to_string());
                }
            }
        }
    }
}

/// Read-through mirror of one remote collection.
pub struct Synchronizer<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Synchronizer<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> std::fmt::Debug for Synchronizer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Synchronizer")
            .field("name", &self.shared.name)
            .field("seq", &self.shared.snapshot.borrow().seq)
            .finish()
    }
}

impl<T> Synchronizer<T>
where
    T: PartialEq + Send + Sync + 'static,
{
    pub fn new<F, Fut>(name: &'static str, feedback: Arc<dyn Feedback>, fetch: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = DineResult<T>> + Send + 'static,
    {
        let fetch: FetchFn<T> = Arc::new(move || Box::pin(fetch()) as FetchFuture<T>);
        let (snapshot, _) = watch::channel(Published { seq: 0, data: None });
        Self {
            shared: Arc::new(Shared {
                name,
                fetch,
                feedback,
                next_seq: AtomicU64::new(0),
                snapshot,
                listeners: Mutex::new(Vec::new()),
                refresh: Notify::new(),
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        self.shared.name
    }

    /// Last published snapshot, `None` until the first successful fetch.
    pub fn latest(&self) -> Option<Arc<T>> {
        self.shared.snapshot.borrow().data.clone()
    }

    /// Change notifications as a watch channel.
    pub fn subscribe(&self) -> watch::Receiver<Published<T>> {
        self.shared.snapshot.subscribe()
    }

    /// Register a listener that lives as long as the synchronizer.
    pub fn on_update<F>(&self, on_update: F)
    where
        F: Fn(&Arc<T>) + Send + Sync + 'static,
    {
        self.add_listener(CancellationToken::new(), Arc::new(on_update));
    }

    fn add_listener(&self, token: CancellationToken, listener: UpdateFn<T>) {
        if let Ok(mut guard) = self.shared.listeners.lock() {
            guard.push((token, listener));
        }
    }

    /// Fetch once now and apply the result. Returns whether a new snapshot
    /// was published.
    pub async fn refresh(&self) -> DineResult<bool> {
        Ok(self.shared.fetch_tagged(None).await?.unwrap_or(false))
    }

    /// Ask every running poll loop for an immediate extra tick.
    pub fn request_refresh(&self) {
        self.shared.refresh.notify_waiters();
    }

    /// Fetch immediately, then every `interval` until the handle is stopped
    /// or dropped. `on_update` fires for each changed snapshot while the loop
    /// is alive. A slow fetch may overlap the next tick.
    pub fn start_polling<F>(&self, interval: Duration, on_update: F) -> PollHandle
    where
        F: Fn(&Arc<T>) + Send + Sync + 'static,
    {
        let stop = CancellationToken::new();
        self.add_listener(stop.clone(), Arc::new(on_update));

        let shared = Arc::clone(&self.shared);
        let token = stop.clone();
        let task = tokio::spawn(async move {
            info!(
                collection = shared.name,
                interval_ms = interval.as_millis() as u64,
                "polling started"
            );
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                    _ = shared.refresh.notified() => {}
                }

                let shared = Arc::clone(&shared);
                let token = token.clone();
                tokio::spawn(async move {
                    shared.poll_once(&token).await;
                });
            }
            info!(collection = shared.name, "polling stopped");
        });

        PollHandle {
            stop,
            task: Some(task),
        }
    }
}

/// Owner of a running poll loop. Dropping it stops the loop.
#[derive(Debug)]
pub struct PollHandle {
    stop: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl PollHandle {
    /// Stop the loop. In-flight fetches finish but their results are ignored.
    pub fn stop(&self) {
        self.stop.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_cancelled()
    }

    /// Stop and wait for the loop task to exit.
    pub async fn shutdown(mut self) {
        self.stop.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "poll loop task ended abnormally");
            }
        }
    }
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feedback::testing::RecordingFeedback;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;

    fn recorder() -> (Arc<Mutex<Vec<u32>>>, impl Fn(&Arc<u32>) + Send + Sync + 'static) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        (seen, move |v: &Arc<u32>| sink.lock().unwrap().push(**v))
    }

    #[tokio::test(start_paused = true)]
    async fn publishes_only_when_value_changes() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let sync = Synchronizer::new("numbers", Arc::new(RecordingFeedback::default()), move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move { Ok((n / 2) as u32) }
        });
        let (seen, on_update) = recorder();

        let handle = sync.start_polling(Duration::from_secs(1), on_update);
        tokio::time::sleep(Duration::from_millis(3_500)).await;
        handle.shutdown().await;

        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(*seen.lock().unwrap(), vec![0, 1]);
        assert_eq!(sync.latest().as_deref(), Some(&1));
    }

    #[tokio::test(start_paused = true)]
    async fn older_response_never_overwrites_newer() {
        // First request is slow, second is fast: arrival order is reversed.
        let script = Arc::new(Mutex::new(VecDeque::from(vec![(100u64, 1u32), (10, 2)])));
        let sync = Synchronizer::new("numbers", Arc::new(RecordingFeedback::default()), move || {
            let (delay, value) = script.lock().unwrap().pop_front().unwrap_or((0, 0));
            async move {
                tokio::time::sleep(Duration::from_millis(delay)).await;
                Ok(value)
            }
        });

        let (slow, fast) = tokio::join!(sync.refresh(), sync.refresh());

        assert!(fast.expect("fast fetch"));
        assert!(!slow.expect("slow fetch"));
        assert_eq!(sync.latest().as_deref(), Some(&2));
        assert_eq!(sync.subscribe().borrow().seq, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_fetch_keeps_snapshot_and_keeps_polling() {
        let feedback = Arc::new(RecordingFeedback::default());
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let sync = Synchronizer::new("numbers", feedback.clone(), move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                match n {
                    1 => Err(DineError::Network("Cannot reach server".into())),
                    _ => Ok(7u32),
                }
            }
        });

        let handle = sync.start_polling(Duration::from_secs(1), |_| {});
        tokio::time::sleep(Duration::from_millis(2_500)).await;
        handle.shutdown().await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(sync.latest().as_deref(), Some(&7));
        assert_eq!(feedback.errors(), vec!["Cannot reach server".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn results_after_stop_are_ignored() {
        let sync = Synchronizer::new("numbers", Arc::new(RecordingFeedback::default()), || async {
            tokio::time::sleep(Duration::from_millis(500)).await;
            Ok(9u32)
        });
        let (seen, on_update) = recorder();

        let handle = sync.start_polling(Duration::from_secs(10), on_update);
        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.stop();
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert!(handle.is_stopped());
        assert!(sync.latest().is_none());
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn unauthorized_stops_the_loop() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let sync = Synchronizer::new("numbers", Arc::new(RecordingFeedback::default()), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err::<u32, _>(DineError::Unauthorized) }
        });

        let handle = sync.start_polling(Duration::from_secs(1), |_| {});
        tokio::time::sleep(Duration::from_millis(5_500)).await;

        assert!(handle.is_stopped());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn request_refresh_triggers_an_extra_fetch() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let sync = Synchronizer::new("numbers", Arc::new(RecordingFeedback::default()), move || {
            let n = counter.fetch_add(1, Ordering::SeqCst) as u32;
            async move { Ok(n) }
        });

        let handle = sync.start_polling(Duration::from_secs(60), |_| {});
        tokio::time::sleep(Duration::from_millis(10)).await;
        sync.request_refresh();
        tokio::time::sleep(Duration::from_millis(10)).await;
        handle.shutdown().await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(sync.latest().as_deref(), Some(&1));
    }
}
