use std::{
    collections::HashMap,
    path::Path,
    sync::{
        Mutex,
        atomic::{AtomicU64, AtomicUsize, Ordering},
    },
    time::Duration,
};

use locreport_logic::{
    LocationPlatform, PermissionStatus, Position, PositionError, PositionOptions, WatchId,
    WatchOptions, WatchSink, prelude::*,
};
use log::debug;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, Deserialize, PartialEq)]
/// One entry of a fix script, timestamps are filled in when left out
pub struct ScriptedFix {
    pub lat: f64,
    pub lon: f64,
    #[serde(default)]
    pub accuracy: Option<f64>,
    #[serde(default)]
    pub timestamp: Option<i64>,
}

impl ScriptedFix {
    pub fn into_position(self, fallback_timestamp: i64) -> Position {
        Position::new(
            self.lat,
            self.lon,
            self.accuracy,
            self.timestamp.unwrap_or(fallback_timestamp),
        )
    }
}

pub async fn read_script(path: &Path) -> Result<Vec<ScriptedFix>> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read fix script {}", path.display()))?;
    serde_json::from_str(&raw).context("Fix script is not a JSON list of fixes")
}

/// Stand-in for a device's location API, replays a fixed list of positions
pub struct ScriptedPlatform {
    permission: PermissionStatus,
    fixes: Vec<Position>,
    step: Duration,
    cursor: AtomicUsize,
    next_watch: AtomicU64,
    watches: Mutex<HashMap<WatchId, CancellationToken>>,
    finished: CancellationToken,
}

impl ScriptedPlatform {
    pub fn new(permission: PermissionStatus, script: Vec<ScriptedFix>, step: Duration) -> Self {
        let start = chrono::Utc::now().timestamp_millis();
        let step_ms = i64::try_from(step.as_millis()).unwrap_or(i64::MAX);
        let fixes = script
            .into_iter()
            .enumerate()
            .map(|(i, fix)| fix.into_position(start + step_ms.saturating_mul(i as i64)))
            .collect();

        Self {
            permission,
            fixes,
            step,
            cursor: AtomicUsize::new(0),
            next_watch: AtomicU64::new(0),
            watches: Mutex::new(HashMap::new()),
            finished: CancellationToken::new(),
        }
    }

    /// Cancelled once a watch has replayed the whole script
    pub fn finished(&self) -> CancellationToken {
        self.finished.clone()
    }
}

impl LocationPlatform for ScriptedPlatform {
    async fn request_foreground_authorization(&self) -> Result<PermissionStatus> {
        Ok(self.permission)
    }

    async fn get_current_position(
        &self,
        _options: PositionOptions,
    ) -> Result<Position, PositionError> {
        if self.fixes.is_empty() {
            return Err(PositionError::Unavailable("no fixes scripted".into()));
        }
        let i = self.cursor.fetch_add(1, Ordering::SeqCst) % self.fixes.len();
        Ok(self.fixes[i])
    }

    fn watch_position(
        &self,
        _options: WatchOptions,
        sink: WatchSink,
    ) -> Result<WatchId, PositionError> {
        let id = WatchId(self.next_watch.fetch_add(1, Ordering::SeqCst));
        let cancel = CancellationToken::new();
        self.watches
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(id, cancel.clone());

        let fixes = self.fixes.clone();
        let step = self.step;
        let finished = self.finished.clone();

        tokio::spawn(async move {
            for (i, fix) in fixes.into_iter().enumerate() {
                if i > 0 {
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        _ = tokio::time::sleep(step) => {}
                    }
                }
                if cancel.is_cancelled() || sink.send(Ok(fix)).is_err() {
                    return;
                }
            }
            debug!("Script for watch {id:?} exhausted");
            finished.cancel();
        });

        Ok(id)
    }

    fn clear_watch(&self, id: WatchId) {
        if let Some(cancel) = self
            .watches
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&id)
        {
            cancel.cancel();
        }
    }
}
