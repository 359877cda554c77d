use std::{
    sync::{
        Arc, Mutex, MutexGuard,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use log::{debug, warn};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::{
    error::PositionError,
    platform::{LocationPlatform, PositionOptions, WatchOptions},
    record::LocationRecord,
    settings::{ReporterConfig, WatchSettings},
};

type ClearFn = Box<dyn FnOnce() + Send>;

/// Decides which watch fixes get emitted. A fix passes only if it is BOTH at least
/// `min_distance_meters` away from AND at least `min_interval_ms` newer than the last emitted
/// fix. The first fix always passes. Time is taken from platform timestamps.
#[derive(Debug, Clone)]
pub struct WatchFilter {
    min_distance_meters: f64,
    min_interval_ms: i64,
    last: Option<LocationRecord>,
}

impl WatchFilter {
    pub fn new(settings: &WatchSettings) -> Self {
        Self {
            min_distance_meters: settings.min_distance_meters,
            min_interval_ms: i64::try_from(settings.min_interval_ms).unwrap_or(i64::MAX),
            last: None,
        }
    }

    pub fn accept(&mut self, record: &LocationRecord) -> bool {
        let pass = match &self.last {
            None => true,
            Some(last) => {
                let moved = last.distance_to(record) >= self.min_distance_meters;
                let elapsed = record.timestamp.saturating_sub(last.timestamp);
                let waited = elapsed >= self.min_interval_ms;
                moved && waited
            }
        };

        if pass {
            self.last = Some(*record);
        }

        pass
    }
}

struct WatchInner {
    cancel: CancellationToken,
    /// The platform closed the watch on its own
    ended: AtomicBool,
    clear: Mutex<Option<ClearFn>>,
}

impl WatchInner {
    fn take_clear(&self) -> Option<ClearFn> {
        self.clear
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }
}

/// Handle to a running watch, cloning it gives another handle to the same watch
#[derive(Clone)]
pub struct WatchHandle(Arc<WatchInner>);

impl WatchHandle {
    /// Stop the watch. Safe to call any number of times, and after the platform ended the
    /// watch on its own; the platform watch is cleared at most once.
    pub fn stop(&self) {
        self.0.cancel.cancel();
        if let Some(clear) = self.0.take_clear() {
            clear();
        }
    }

    /// Whether [WatchHandle::stop] was called
    pub fn is_stopped(&self) -> bool {
        self.0.cancel.is_cancelled()
    }

    /// Neither stopped nor ended by the platform
    pub fn is_active(&self) -> bool {
        !self.is_stopped() && !self.0.ended.load(Ordering::SeqCst)
    }

    /// Resolves once [WatchHandle::stop] is called
    pub async fn stopped(&self) {
        self.0.cancel.cancelled().await
    }
}

/// The only thing that calls into the platform location API. Turns platform positions into
/// [LocationRecord]s, either one at a time or through a filtered watch.
pub struct PositionSource<P: LocationPlatform> {
    platform: Arc<P>,
    fetch_timeout: Duration,
    position_options: PositionOptions,
    watch_options: WatchOptions,
    watch_settings: WatchSettings,
    active: Mutex<Option<WatchHandle>>,
}

impl<P: LocationPlatform> PositionSource<P> {
    pub fn new(platform: Arc<P>, config: &ReporterConfig) -> Self {
        Self {
            platform,
            fetch_timeout: config.fetch_timeout(),
            position_options: PositionOptions {
                enable_high_accuracy: true,
                ..config.position
            },
            watch_options: config.watch_options(),
            watch_settings: config.watch.clone(),
            active: Mutex::new(None),
        }
    }

    fn lock_active(&self) -> MutexGuard<'_, Option<WatchHandle>> {
        self.active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Get one high accuracy fix, failing with [PositionError::Timeout] if the platform doesn't
    /// answer in time
    pub async fn fetch_once(&self) -> Result<LocationRecord, PositionError> {
        let fetch = self.platform.get_current_position(self.position_options);
        let position = tokio::time::timeout(self.fetch_timeout, fetch)
            .await
            .map_err(|_| PositionError::Timeout(self.fetch_timeout))??;
        LocationRecord::from_position(&position)
    }

    /// Start a watch. `on_update` gets every fix that passes the [WatchFilter], `on_error` gets
    /// platform errors. Neither is called after the returned handle is stopped.
    ///
    /// Fails with [PositionError::WatchActive] if a previous watch hasn't been stopped.
    pub fn start_watch<U, E>(
        &self,
        mut on_update: U,
        mut on_error: E,
    ) -> Result<WatchHandle, PositionError>
    where
        U: FnMut(LocationRecord) + Send + 'static,
        E: FnMut(PositionError) + Send + 'static,
    {
        let mut active = self.lock_active();

        if active.as_ref().is_some_and(WatchHandle::is_active) {
            return Err(PositionError::WatchActive);
        }

        let (sink, mut updates) = mpsc::unbounded_channel();
        let id = self.platform.watch_position(self.watch_options, sink)?;
        debug!("Started platform watch {id:?}");

        let platform = self.platform.clone();
        let clear: ClearFn = Box::new(move || {
            debug!("Clearing platform watch {id:?}");
            platform.clear_watch(id);
        });

        let handle = WatchHandle(Arc::new(WatchInner {
            cancel: CancellationToken::new(),
            ended: AtomicBool::new(false),
            clear: Mutex::new(Some(clear)),
        }));

        let mut filter = WatchFilter::new(&self.watch_settings);
        let task_handle = handle.clone();

        tokio::spawn(async move {
            let cancel = task_handle.0.cancel.clone();
            loop {
                let update = tokio::select! {
                    biased;

                    _ = cancel.cancelled() => break,

                    update = updates.recv() => update,
                };

                let Some(update) = update else {
                    debug!("Platform ended watch {id:?}");
                    // Nothing left to clear
                    task_handle.0.ended.store(true, Ordering::SeqCst);
                    drop(task_handle.0.take_clear());
                    break;
                };

                if cancel.is_cancelled() {
                    break;
                }

                match update.and_then(|pos| LocationRecord::from_position(&pos)) {
                    Ok(record) => {
                        if filter.accept(&record) {
                            on_update(record);
                        } else {
                            debug!("Filtered out fix at {}", record.timestamp);
                        }
                    }
                    Err(why) => {
                        warn!("Watch error: {why}");
                        on_error(why);
                    }
                }
            }
        });

        *active = Some(handle.clone());

        Ok(handle)
    }

    /// Stop the active watch, if any
    pub fn stop_watch(&self) {
        if let Some(handle) = self.lock_active().take() {
            handle.stop();
        }
    }

    pub fn is_watching(&self) -> bool {
        self.lock_active()
            .as_ref()
            .is_some_and(WatchHandle::is_active)
    }
}
