use std::sync::Arc;

use log::{debug, error, info, warn};
use tokio::sync::{RwLock, mpsc};
use tokio_util::sync::CancellationToken;

use crate::{
    delivery::LocationDelivery,
    error::PositionError,
    permission::PermissionGate,
    platform::{LocationPlatform, PermissionStatus},
    position::{PositionSource, WatchHandle},
    record::LocationRecord,
    session::{DeliveryOutcome, SessionEvent, SessionState},
    settings::{PositionMode, ReporterConfig},
};

/// Tells the presentation layer that [SessionState] changed and should be re-read
pub trait StateUpdateSender: Send + Sync + 'static {
    fn send_update(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOutcome {
    /// The fetch and delivery ran, the result is in the session state
    Finished,
    /// A delivery request was already outstanding, nothing was done
    AlreadySending,
    /// Permission isn't granted, nothing was fetched or sent
    PermissionDenied,
    /// The reporter runs in [PositionMode::Continuous], positions come from the watch
    WrongMode,
    /// The reporter was unmounted, possibly while the fetch was still outstanding
    Unmounted,
}

enum WatchEvent {
    Update(LocationRecord),
    Error(PositionError),
}

/// Wires the [PermissionGate], [PositionSource] and a [LocationDelivery] together and keeps the
/// [SessionState] a presentation layer renders.
pub struct Reporter<P: LocationPlatform, D: LocationDelivery, S: StateUpdateSender> {
    config: ReporterConfig,
    gate: PermissionGate<P>,
    source: PositionSource<P>,
    delivery: D,
    state: RwLock<SessionState>,
    state_update_sender: S,
    cancel: CancellationToken,
}

impl<P: LocationPlatform, D: LocationDelivery, S: StateUpdateSender> Reporter<P, D, S> {
    pub fn new(
        config: ReporterConfig,
        platform: Arc<P>,
        delivery: D,
        state_update_sender: S,
    ) -> Self {
        Self {
            gate: PermissionGate::new(platform.clone()),
            source: PositionSource::new(platform, &config),
            config,
            delivery,
            state: RwLock::new(SessionState::default()),
            state_update_sender,
            cancel: CancellationToken::new(),
        }
    }

    async fn apply(&self, event: SessionEvent) {
        self.state.write().await.apply(event);
        self.state_update_sender.send_update();
    }

    pub async fn clone_state(&self) -> SessionState {
        self.state.read().await.clone()
    }

    pub async fn render(&self) -> String {
        self.state.read().await.render()
    }

    pub fn config(&self) -> &ReporterConfig {
        &self.config
    }

    /// Request permission and, if configured for it, start tracking. Call once when the
    /// presentation layer appears.
    pub async fn mount(self: &Arc<Self>) -> PermissionStatus {
        let status = self.gate.request().await;
        self.apply(SessionEvent::PermissionResolved(status)).await;

        if status.is_granted() && self.config.should_auto_start() {
            if let Err(why) = self.start_tracking().await {
                warn!("Couldn't start tracking on mount: {why}");
            }
        }

        status
    }

    /// Permission for fetching positions, asking the platform only if nobody has yet. A
    /// remembered refusal is applied again so the denial message is back on screen.
    async fn ensure_permission(&self) -> PermissionStatus {
        let status = match self.gate.status() {
            Some(status) if status.is_granted() => return status,
            Some(status) => status,
            None => self.gate.request().await,
        };
        self.apply(SessionEvent::PermissionResolved(status)).await;
        status
    }

    /// Try to mark a delivery request as outstanding, false if one already is
    async fn begin_sending(&self) -> bool {
        let mut state = self.state.write().await;
        if state.sending {
            return false;
        }
        state.apply(SessionEvent::DeliveryStarted);
        drop(state);
        self.state_update_sender.send_update();
        true
    }

    async fn deliver(&self, record: &LocationRecord) {
        let outcome = match self.delivery.deliver(record).await {
            Ok(ack) => {
                info!("Location delivered: {}", ack.display_text());
                DeliveryOutcome::Acknowledged(ack)
            }
            Err(why) => {
                error!("Failed to deliver location: {why}");
                DeliveryOutcome::Failed(why)
            }
        };
        self.apply(SessionEvent::DeliveryResolved(outcome)).await;
    }

    /// Fetch one position and deliver it. Ignored while a previous request is still
    /// outstanding, and in [PositionMode::Continuous].
    pub async fn trigger(&self) -> TriggerOutcome {
        if self.cancel.is_cancelled() {
            return TriggerOutcome::Unmounted;
        }

        if self.config.mode != PositionMode::SingleFetch {
            debug!("Trigger ignored in {:?} mode", self.config.mode);
            return TriggerOutcome::WrongMode;
        }

        if !self.ensure_permission().await.is_granted() {
            return TriggerOutcome::PermissionDenied;
        }

        if !self.begin_sending().await {
            debug!("Trigger ignored, already sending");
            return TriggerOutcome::AlreadySending;
        }

        let fetched = tokio::select! {
            biased;

            _ = self.cancel.cancelled() => None,

            res = self.source.fetch_once() => Some(res),
        };

        let Some(fetched) = fetched.filter(|_| !self.cancel.is_cancelled()) else {
            debug!("Unmounted while fetching, dropping the trigger");
            self.apply(SessionEvent::DeliveryResolved(DeliveryOutcome::Abandoned))
                .await;
            return TriggerOutcome::Unmounted;
        };

        match fetched {
            Ok(record) => {
                self.apply(SessionEvent::PositionResolved(Ok(record))).await;
                if self.cancel.is_cancelled() {
                    self.apply(SessionEvent::DeliveryResolved(DeliveryOutcome::Abandoned))
                        .await;
                    return TriggerOutcome::Unmounted;
                }
                self.deliver(&record).await;
            }
            Err(why) => {
                warn!("Failed to get location: {why}");
                self.apply(SessionEvent::PositionResolved(Err(why))).await;
                self.apply(SessionEvent::DeliveryResolved(DeliveryOutcome::Abandoned))
                    .await;
            }
        }

        TriggerOutcome::Finished
    }

    /// Start the continuous watch, every fix that passes the filter gets delivered unless a
    /// delivery is already in flight, in which case it's dropped. Only available in
    /// [PositionMode::Continuous].
    pub async fn start_tracking(self: &Arc<Self>) -> Result<(), PositionError> {
        if self.cancel.is_cancelled() {
            return Ok(());
        }

        if self.config.mode != PositionMode::Continuous {
            return Err(PositionError::WrongMode(self.config.mode));
        }

        if !self.ensure_permission().await.is_granted() {
            return Err(PositionError::PermissionDenied);
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let err_tx = tx.clone();

        let handle = self.source.start_watch(
            move |record| {
                tx.send(WatchEvent::Update(record)).ok();
            },
            move |why| {
                err_tx.send(WatchEvent::Error(why)).ok();
            },
        )?;

        info!("Started location tracking");

        let this = self.clone();
        tokio::spawn(async move {
            this.watch_loop(handle, rx).await;
        });

        Ok(())
    }

    pub fn stop_tracking(&self) {
        self.source.stop_watch();
    }

    pub fn is_tracking(&self) -> bool {
        self.source.is_watching()
    }

    async fn watch_loop(
        &self,
        handle: WatchHandle,
        mut events: mpsc::UnboundedReceiver<WatchEvent>,
    ) {
        loop {
            let event = tokio::select! {
                biased;

                _ = self.cancel.cancelled() => break,

                _ = handle.stopped() => break,

                event = events.recv() => event,
            };

            let Some(event) = event else {
                break;
            };

            match event {
                WatchEvent::Update(record) => self.deliver_watched(&handle, record).await,
                WatchEvent::Error(why) => {
                    self.apply(SessionEvent::PositionResolved(Err(why))).await;
                }
            }

            // Anything that came in during the delivery is stale, keep the newest position
            // for display but don't send it
            while let Ok(event) = events.try_recv() {
                if handle.is_stopped() {
                    break;
                }
                match event {
                    WatchEvent::Update(record) => {
                        debug!(
                            "Dropping update at {}, delivery was in flight",
                            record.timestamp
                        );
                        self.apply(SessionEvent::PositionResolved(Ok(record))).await;
                    }
                    WatchEvent::Error(why) => {
                        self.apply(SessionEvent::PositionResolved(Err(why))).await;
                    }
                }
            }
        }

        debug!("Watch loop exited");
    }

    async fn deliver_watched(&self, handle: &WatchHandle, record: LocationRecord) {
        if handle.is_stopped() || self.cancel.is_cancelled() {
            return;
        }

        self.apply(SessionEvent::PositionResolved(Ok(record))).await;

        if !self.begin_sending().await {
            debug!("Dropping update at {}, delivery in flight", record.timestamp);
            return;
        }

        // Stopped while the state lock was contended
        if handle.is_stopped() || self.cancel.is_cancelled() {
            self.apply(SessionEvent::DeliveryResolved(DeliveryOutcome::Abandoned))
                .await;
            return;
        }

        self.deliver(&record).await;
    }

    /// Stop everything. No update or delivery is started after this returns.
    pub async fn unmount(&self) {
        self.cancel.cancel();
        self.source.stop_watch();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        AckStatus, DeliveryAcknowledgment, DeliveryError,
        record::Position,
        settings::PositionMode,
        tests::{ChannelSender, DummySender, MockDelivery, MockPlatform, sf_position},
    };
    use tokio::{task::yield_now, test};

    type TestReporter = Reporter<MockPlatform, MockDelivery, DummySender>;

    fn mk_reporter(
        config: ReporterConfig,
        permission: PermissionStatus,
        delivery: MockDelivery,
    ) -> (Arc<MockPlatform>, Arc<TestReporter>) {
        let platform = Arc::new(MockPlatform::new(permission));
        let reporter = Arc::new(Reporter::new(
            config,
            platform.clone(),
            delivery,
            DummySender,
        ));
        (platform, reporter)
    }

    async fn settle() {
        for _ in 0..20 {
            yield_now().await;
        }
    }

    #[test]
    async fn test_end_to_end_single_fetch() {
        let (_platform, reporter) = mk_reporter(
            ReporterConfig::default(),
            PermissionStatus::Granted,
            MockDelivery::ok(),
        );

        assert_eq!(reporter.mount().await, PermissionStatus::Granted);
        assert_eq!(reporter.trigger().await, TriggerOutcome::Finished);

        let state = reporter.clone_state().await;
        assert_eq!(state.last_error, None);
        assert!(!state.sending);
        assert_eq!(
            state.last_acknowledgment,
            Some(DeliveryAcknowledgment::ok("stored", Some("abc123".into())))
        );
        assert_eq!(
            state.last_known_location,
            Some(LocationRecord::from_position(&sf_position()).unwrap())
        );
        assert!(reporter.render().await.contains("stored (id: abc123)"));
    }

    #[test]
    async fn test_denied_never_fetches_or_delivers() {
        for config in [ReporterConfig::default(), ReporterConfig::continuous()] {
            let mode = config.mode;
            let (platform, reporter) =
                mk_reporter(config, PermissionStatus::Denied, MockDelivery::ok());

            assert_eq!(reporter.mount().await, PermissionStatus::Denied);
            match mode {
                PositionMode::SingleFetch => {
                    assert_eq!(reporter.trigger().await, TriggerOutcome::PermissionDenied);
                }
                PositionMode::Continuous => {
                    assert!(matches!(
                        reporter.start_tracking().await,
                        Err(PositionError::PermissionDenied)
                    ));
                }
            }
            settle().await;

            let counts = platform.counts();
            assert_eq!(counts.fetches, 0);
            assert_eq!(counts.watches, 0);
            assert_eq!(counts.permission_requests, 1);
            assert_eq!(reporter.delivery.calls(), 0);
            assert_eq!(
                reporter.clone_state().await.last_error.as_deref(),
                Some("Location permission denied")
            );
        }
    }

    #[test]
    async fn test_trigger_without_mount_asks_permission() {
        let (platform, reporter) = mk_reporter(
            ReporterConfig::default(),
            PermissionStatus::Granted,
            MockDelivery::ok(),
        );

        assert_eq!(reporter.trigger().await, TriggerOutcome::Finished);
        assert_eq!(reporter.trigger().await, TriggerOutcome::Finished);
        assert_eq!(platform.counts().permission_requests, 1);
        assert_eq!(reporter.delivery.calls(), 2);
    }

    #[test]
    async fn test_denied_trigger_updates_once() {
        let platform = Arc::new(MockPlatform::new(PermissionStatus::Denied));
        let (tx, mut updates) = mpsc::unbounded_channel();
        let reporter = Reporter::new(
            ReporterConfig::default(),
            platform.clone(),
            MockDelivery::ok(),
            ChannelSender(tx),
        );

        assert_eq!(reporter.trigger().await, TriggerOutcome::PermissionDenied);
        assert!(updates.try_recv().is_ok());
        assert!(updates.try_recv().is_err(), "Denial applied twice");

        // A remembered denial is shown again, without prompting
        assert_eq!(reporter.trigger().await, TriggerOutcome::PermissionDenied);
        assert!(updates.try_recv().is_ok());
        assert!(updates.try_recv().is_err());
        assert_eq!(platform.counts().permission_requests, 1);
        assert_eq!(
            reporter.clone_state().await.last_error.as_deref(),
            Some("Location permission denied")
        );
    }

    #[test]
    async fn test_single_fetch_mode_refuses_tracking() {
        let (platform, reporter) = mk_reporter(
            ReporterConfig::default(),
            PermissionStatus::Granted,
            MockDelivery::ok(),
        );

        reporter.mount().await;
        assert_eq!(
            reporter.start_tracking().await,
            Err(PositionError::WrongMode(PositionMode::SingleFetch))
        );
        assert!(!reporter.is_tracking());

        platform.push(Ok(sf_position()));
        settle().await;

        assert_eq!(platform.counts().watches, 0);
        assert_eq!(reporter.delivery.calls(), 0);
    }

    #[test]
    async fn test_continuous_mode_refuses_trigger() {
        let (platform, reporter) = mk_reporter(
            ReporterConfig::continuous(),
            PermissionStatus::Granted,
            MockDelivery::ok(),
        );

        reporter.mount().await;
        assert_eq!(reporter.trigger().await, TriggerOutcome::WrongMode);

        assert_eq!(platform.counts().fetches, 0);
        assert_eq!(reporter.delivery.calls(), 0);
        assert!(!reporter.clone_state().await.sending);
    }

    #[test]
    async fn test_unmount_during_fetch_abandons_trigger() {
        let (platform, reporter) = mk_reporter(
            ReporterConfig::default(),
            PermissionStatus::Granted,
            MockDelivery::ok(),
        );
        platform.set_hang(true);

        reporter.mount().await;
        let r2 = reporter.clone();
        let pending = tokio::spawn(async move { r2.trigger().await });
        settle().await;
        assert_eq!(platform.counts().fetches, 1);
        assert!(reporter.clone_state().await.sending);

        reporter.unmount().await;

        assert_eq!(pending.await.unwrap(), TriggerOutcome::Unmounted);
        settle().await;
        assert_eq!(reporter.delivery.calls(), 0);
        let state = reporter.clone_state().await;
        assert!(!state.sending);
        assert_eq!(state.last_known_location, None);
    }

    #[test]
    async fn test_sending_spans_request_and_gates_triggers() {
        let platform = Arc::new(MockPlatform::new(PermissionStatus::Granted));
        let (tx, mut updates) = mpsc::unbounded_channel();
        let reporter = Arc::new(Reporter::new(
            ReporterConfig::default(),
            platform.clone(),
            MockDelivery::ok().gated(),
            ChannelSender(tx),
        ));

        reporter.mount().await;
        assert!(!reporter.clone_state().await.sending);

        let r2 = reporter.clone();
        let first = tokio::spawn(async move { r2.trigger().await });
        settle().await;

        // Fetch done, delivery parked on the gate
        let state = reporter.clone_state().await;
        assert!(state.sending);
        assert!(state.last_known_location.is_some());

        assert_eq!(reporter.trigger().await, TriggerOutcome::AlreadySending);
        assert_eq!(platform.counts().fetches, 1);
        assert_eq!(reporter.delivery.calls(), 1);

        reporter.delivery.release();
        assert_eq!(first.await.unwrap(), TriggerOutcome::Finished);
        assert!(!reporter.clone_state().await.sending);

        // Permission, start, position, resolution
        let mut seen = 0;
        while updates.try_recv().is_ok() {
            seen += 1;
        }
        assert!(seen >= 4, "Only saw {seen} updates");
    }

    #[test]
    async fn test_fetch_failure_clears_sending() {
        let (platform, reporter) = mk_reporter(
            ReporterConfig::default(),
            PermissionStatus::Granted,
            MockDelivery::ok(),
        );
        platform.set_current(Err(PositionError::Unavailable("no signal".into())));

        reporter.mount().await;
        assert_eq!(reporter.trigger().await, TriggerOutcome::Finished);

        let state = reporter.clone_state().await;
        assert!(!state.sending);
        assert_eq!(
            state.last_error.as_deref(),
            Some("Error getting location: location unavailable: no signal")
        );
        assert_eq!(reporter.delivery.calls(), 0);

        // User retries once the signal is back
        platform.set_current(Ok(sf_position()));
        assert_eq!(reporter.trigger().await, TriggerOutcome::Finished);
        let state = reporter.clone_state().await;
        assert_eq!(state.last_error, None);
        assert!(state.last_acknowledgment.is_some());
    }

    #[test]
    async fn test_network_failure() {
        let (_platform, reporter) = mk_reporter(
            ReporterConfig::default(),
            PermissionStatus::Granted,
            MockDelivery::new(Err(DeliveryError::Network("connection refused".into()))),
        );

        reporter.mount().await;
        reporter.trigger().await;

        let state = reporter.clone_state().await;
        assert!(!state.sending);
        assert!(state.last_error.is_some_and(|e| !e.is_empty()));
        assert_eq!(state.last_acknowledgment, None);
    }

    #[test]
    async fn test_continuous_auto_start_delivers() {
        let (platform, reporter) = mk_reporter(
            ReporterConfig::continuous(),
            PermissionStatus::Granted,
            MockDelivery::ok(),
        );

        reporter.mount().await;
        assert!(reporter.is_tracking());
        assert_eq!(platform.counts().watches, 1);

        platform.push(Ok(Position::new(0.0, 0.0, Some(4.0), 0)));
        settle().await;
        platform.push(Ok(Position::new(0.001, 0.0, Some(4.0), 10_000)));
        settle().await;

        assert_eq!(reporter.delivery.calls(), 2);
        let state = reporter.clone_state().await;
        assert_eq!(state.last_known_location.map(|l| l.latitude), Some(0.001));
        assert_eq!(
            state.last_acknowledgment.map(|a| a.status),
            Some(AckStatus::Ok)
        );
        assert_eq!(platform.counts().fetches, 0);
    }

    #[test]
    async fn test_continuous_without_auto_start_waits() {
        let config = ReporterConfig {
            mode: PositionMode::Continuous,
            auto_start_on_grant: false,
            ..Default::default()
        };
        let (platform, reporter) =
            mk_reporter(config, PermissionStatus::Granted, MockDelivery::ok());

        reporter.mount().await;
        assert!(!reporter.is_tracking());
        assert_eq!(platform.counts().watches, 0);

        reporter.start_tracking().await.expect("Failed to start");
        assert!(reporter.is_tracking());
        assert!(matches!(
            reporter.start_tracking().await,
            Err(PositionError::WatchActive)
        ));
        assert_eq!(platform.counts().watches, 1);
    }

    #[test]
    async fn test_continuous_drops_updates_while_sending() {
        let platform = Arc::new(MockPlatform::new(PermissionStatus::Granted));
        let reporter = Arc::new(Reporter::new(
            ReporterConfig::continuous(),
            platform.clone(),
            MockDelivery::ok().gated(),
            DummySender,
        ));

        reporter.mount().await;

        platform.push(Ok(Position::new(0.0, 0.0, None, 0)));
        settle().await;
        assert_eq!(reporter.delivery.calls(), 1);

        // Two filtered-in fixes arrive while the first delivery is parked
        platform.push(Ok(Position::new(0.001, 0.0, None, 10_000)));
        platform.push(Ok(Position::new(0.002, 0.0, None, 20_000)));
        settle().await;
        assert_eq!(reporter.delivery.calls(), 1);

        reporter.delivery.release();
        settle().await;

        assert_eq!(reporter.delivery.calls(), 1, "Stale updates were delivered");
        let state = reporter.clone_state().await;
        assert!(!state.sending);
        assert_eq!(state.last_known_location.map(|l| l.latitude), Some(0.002));

        // Tracking carries on afterwards
        platform.push(Ok(Position::new(0.003, 0.0, None, 30_000)));
        settle().await;
        reporter.delivery.release();
        settle().await;
        assert_eq!(reporter.delivery.calls(), 2);
        assert_eq!(
            reporter.delivery.delivered().last().map(|r| r.latitude),
            Some(0.003)
        );
    }

    #[test]
    async fn test_watch_error_surfaces() {
        let (platform, reporter) = mk_reporter(
            ReporterConfig::continuous(),
            PermissionStatus::Granted,
            MockDelivery::ok(),
        );

        reporter.mount().await;
        platform.push(Err(PositionError::ServiceDisabled));
        settle().await;

        assert_eq!(
            reporter.clone_state().await.last_error.as_deref(),
            Some("Error getting location: location services are disabled")
        );
        assert_eq!(reporter.delivery.calls(), 0);
    }

    #[test]
    async fn test_nothing_after_unmount() {
        let (platform, reporter) = mk_reporter(
            ReporterConfig::continuous(),
            PermissionStatus::Granted,
            MockDelivery::ok(),
        );

        reporter.mount().await;
        platform.push(Ok(Position::new(0.0, 0.0, None, 0)));
        settle().await;
        assert_eq!(reporter.delivery.calls(), 1);

        reporter.unmount().await;
        assert_eq!(platform.counts().clears, 1);

        platform.push(Ok(Position::new(1.0, 0.0, None, 60_000)));
        settle().await;

        assert_eq!(reporter.delivery.calls(), 1);
        assert_eq!(reporter.trigger().await, TriggerOutcome::Unmounted);
        assert_eq!(platform.counts().fetches, 0);

        reporter.unmount().await;
        assert_eq!(platform.counts().clears, 1);
    }

    #[test]
    async fn test_stop_while_applying_update_skips_delivery() {
        let (platform, reporter) = mk_reporter(
            ReporterConfig::continuous(),
            PermissionStatus::Granted,
            MockDelivery::ok(),
        );

        reporter.mount().await;

        // Hold the state so the watch loop parks on its first write
        let guard = reporter.state.write().await;
        platform.push(Ok(Position::new(0.0, 0.0, None, 0)));
        settle().await;

        reporter.stop_tracking();
        drop(guard);
        settle().await;

        assert_eq!(reporter.delivery.calls(), 0);
        let state = reporter.clone_state().await;
        assert!(!state.sending);
        assert!(state.last_known_location.is_some());
    }

    #[test]
    async fn test_stop_and_restart_tracking() {
        let (platform, reporter) = mk_reporter(
            ReporterConfig::continuous(),
            PermissionStatus::Granted,
            MockDelivery::ok(),
        );

        reporter.mount().await;
        reporter.stop_tracking();
        reporter.stop_tracking();
        assert!(!reporter.is_tracking());
        assert_eq!(platform.counts().clears, 1);

        platform.push(Ok(Position::new(0.0, 0.0, None, 0)));
        settle().await;
        assert_eq!(reporter.delivery.calls(), 0);

        reporter.start_tracking().await.expect("Failed to restart");
        platform.push(Ok(Position::new(0.0, 0.0, None, 0)));
        settle().await;
        assert_eq!(reporter.delivery.calls(), 1);
    }
}
