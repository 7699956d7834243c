//! Probe scheduler.
//!
//! One task per active monitor, driven by a ticker and a stop channel. Checks
//! of a single monitor are serialized inside its task; monitors run fully in
//! parallel. Each check reloads the monitor row, probes, writes the observed
//! state columns, enqueues a heartbeat, fires the heartbeat sink, and
//! publishes a check result for the notifier without ever blocking.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc};

use crate::db::models::{Heartbeat, Monitor};
use crate::db::{HeartbeatWriter, Store};
use crate::notifier::{CheckResult, NotifierStates};
use crate::probe::{self, Resolver};

pub const MIN_MONITOR_INTERVAL: i64 = 20;

/// Synchronous hook invoked after each heartbeat is enqueued; the outer
/// transport turns it into UI events.
pub type HeartbeatSink = Arc<dyn Fn(&Heartbeat) + Send + Sync>;

#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub total_monitors: usize,
    pub active_monitors: usize,
    pub status: &'static str,
}

pub struct Scheduler {
    store: Arc<Store>,
    writer: Arc<HeartbeatWriter>,
    resolver: Arc<Resolver>,
    check_result_tx: mpsc::Sender<CheckResult>,
    notifier_states: NotifierStates,
    stop_chans: Mutex<HashMap<i64, broadcast::Sender<()>>>,
    on_heartbeat: Mutex<Option<HeartbeatSink>>,
}

impl Scheduler {
    pub fn new(
        store: Arc<Store>,
        writer: Arc<HeartbeatWriter>,
        resolver: Arc<Resolver>,
        check_result_tx: mpsc::Sender<CheckResult>,
        notifier_states: NotifierStates,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            writer,
            resolver,
            check_result_tx,
            notifier_states,
            stop_chans: Mutex::new(HashMap::new()),
            on_heartbeat: Mutex::new(None),
        })
    }

    pub fn set_on_heartbeat(&self, sink: HeartbeatSink) {
        *self.on_heartbeat.lock().unwrap() = Some(sink);
    }

    /// Load all monitors and start a ticker for each active one.
    pub fn start(self: &Arc<Self>) {
        let monitors = match self.store.list_monitors() {
            Ok(monitors) => monitors,
            Err(e) => {
                tracing::error!("Failed to load monitors: {}", e);
                return;
            }
        };
        tracing::info!("Starting scheduler with {} monitors", monitors.len());
        for m in monitors {
            if m.active == 1 {
                self.start_monitor(&m);
            }
        }
    }

    /// (Re)start one monitor's ticker. Any previous ticker is stopped first;
    /// the map entry is removed before signalling so a racing stop cannot
    /// signal the same channel twice.
    pub fn start_monitor(self: &Arc<Self>, m: &Monitor) {
        {
            let mut chans = self.stop_chans.lock().unwrap();
            if let Some(old) = chans.remove(&m.id) {
                let _ = old.send(());
            }

            if m.active != 1 {
                tracing::info!("Monitor {} is inactive, skipping", m.name);
                return;
            }

            let interval = m.interval.max(MIN_MONITOR_INTERVAL);
            let (stop_tx, stop_rx) = broadcast::channel(1);
            chans.insert(m.id, stop_tx);
            drop(chans);

            let scheduler = Arc::clone(self);
            let id = m.id;
            tokio::spawn(run_monitor_loop(scheduler, id, interval, stop_rx));
        }
        tracing::info!("Started monitoring {} ({})", m.name, m.url);
    }

    /// Idempotent stop; also clears hysteresis state for the monitor.
    pub fn stop_monitor(&self, id: i64) {
        let removed = self.stop_chans.lock().unwrap().remove(&id);
        if let Some(stop_tx) = removed {
            let _ = stop_tx.send(());
            tracing::info!("Stopped monitoring {}", id);
        }
        self.notifier_states.reset_monitor(id);
    }

    /// Stop every monitor task and clear all hysteresis state.
    pub fn stop_all(&self) {
        let drained: Vec<_> = {
            let mut chans = self.stop_chans.lock().unwrap();
            chans.drain().collect()
        };
        for (_, stop_tx) in drained {
            let _ = stop_tx.send(());
        }
        self.notifier_states.reset_all();
    }

    pub fn is_running(&self, id: i64) -> bool {
        self.stop_chans.lock().unwrap().contains_key(&id)
    }

    pub fn health(&self) -> HealthSnapshot {
        let active = self.stop_chans.lock().unwrap().len();
        let total = self.store.list_monitors().map(|m| m.len()).unwrap_or(0);
        HealthSnapshot {
            total_monitors: total,
            active_monitors: active,
            status: "healthy",
        }
    }

    /// One probe cycle for one monitor.
    pub async fn check(&self, id: i64) {
        // Fresh row so concurrent edits are honored.
        let m = match self.store.get_monitor(id) {
            Ok(m) => m,
            Err(_) => return,
        };
        if m.active != 1 {
            self.stop_monitor(id);
            return;
        }

        let outcome = probe::run_check(&m, &self.resolver).await;
        let now = Utc::now();

        // Only the observed-state columns; concurrent config edits survive.
        if let Err(e) = self
            .store
            .update_monitor_status(id, outcome.status, &outcome.message, now)
        {
            tracing::error!("Failed to update monitor {} status: {}", id, e);
        }

        let heartbeat = Heartbeat {
            id: 0,
            monitor_id: id,
            status: outcome.status,
            message: outcome.message.clone(),
            time: now,
            duration: outcome.duration,
        };
        self.writer.add_heartbeat(heartbeat.clone());

        let sink = self.on_heartbeat.lock().unwrap().clone();
        if let Some(sink) = sink {
            sink(&heartbeat);
        }

        let result = CheckResult {
            monitor_id: id,
            name: m.name.clone(),
            url: m.url.clone(),
            status: outcome.status,
            message: outcome.message.clone(),
        };
        if let Err(mpsc::error::TrySendError::Full(_)) = self.check_result_tx.try_send(result) {
            tracing::warn!("Check result channel full, dropping result");
        }

        tracing::info!(
            "Check finished: {} status={} msg={}",
            m.name,
            outcome.status,
            outcome.message
        );
    }
}

async fn run_monitor_loop(
    scheduler: Arc<Scheduler>,
    id: i64,
    interval_secs: i64,
    mut stop_rx: broadcast::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs as u64));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            // Stop wins over a pending tick.
            biased;
            _ = stop_rx.recv() => return,
            _ = ticker.tick() => scheduler.check(id).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::NamedTempFile;

    struct Fixture {
        _tmp: NamedTempFile,
        store: Arc<Store>,
        scheduler: Arc<Scheduler>,
        writer: Arc<HeartbeatWriter>,
        result_rx: mpsc::Receiver<CheckResult>,
        states: NotifierStates,
    }

    fn fixture() -> Fixture {
        let tmp = NamedTempFile::new().unwrap();
        let store = Arc::new(Store::open(tmp.path()).unwrap());
        let writer = Arc::new(HeartbeatWriter::spawn(store.clone()));
        let resolver = Arc::new(Resolver::new(""));
        let (tx, rx) = mpsc::channel(16);
        let states = NotifierStates::default();
        let scheduler = Scheduler::new(
            store.clone(),
            writer.clone(),
            resolver,
            tx,
            states.clone(),
        );
        Fixture {
            _tmp: tmp,
            store,
            scheduler,
            writer,
            result_rx: rx,
            states,
        }
    }

    async fn tcp_monitor(store: &Store, name: &str, port: u16) -> Monitor {
        let mut m = Monitor {
            name: name.to_string(),
            url: format!("127.0.0.1:{}", port),
            kind: MONITOR_TYPE_TCP.to_string(),
            timeout: 2,
            interval: 20,
            ..Default::default()
        };
        store.add_monitor(&mut m).unwrap();
        m
    }

    #[tokio::test]
    async fn test_check_records_heartbeat_and_publishes_result() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let mut fx = fixture();
        let m = tcp_monitor(&fx.store, "check", port).await;

        let seen = Arc::new(AtomicUsize::new(0));
        let seen_clone = seen.clone();
        fx.scheduler.set_on_heartbeat(Arc::new(move |_h| {
            seen_clone.fetch_add(1, Ordering::SeqCst);
        }));

        fx.scheduler.check(m.id).await;

        // Status columns were updated, and only those.
        let row = fx.store.get_monitor(m.id).unwrap();
        assert_eq!(row.status, STATUS_UP);
        assert!(row.last_check.is_some());
        assert_eq!(row.interval, 20);

        // Sink fired once; result published.
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        let result = fx.result_rx.try_recv().unwrap();
        assert_eq!(result.monitor_id, m.id);
        assert_eq!(result.status, STATUS_UP);

        // Heartbeat reaches the store after the writer drains.
        fx.writer.shutdown().await;
        let beats = fx.store.recent_heartbeats(m.id, 5).unwrap();
        assert_eq!(beats.len(), 1);
        assert_eq!(beats[0].status, STATUS_UP);
    }

    #[tokio::test]
    async fn test_check_of_inactive_monitor_self_stops() {
        let fx = fixture();
        let mut m = Monitor {
            name: "inactive".to_string(),
            url: "127.0.0.1:1".to_string(),
            kind: MONITOR_TYPE_TCP.to_string(),
            active: 0,
            ..Default::default()
        };
        fx.store.add_monitor(&mut m).unwrap();

        fx.scheduler.check(m.id).await;
        assert!(!fx.scheduler.is_running(m.id));
        // No heartbeat was produced.
        fx.writer.shutdown().await;
        assert!(fx.store.recent_heartbeats(m.id, 5).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_start_monitor_restart_replaces_ticker() {
        let fx = fixture();
        let m = tcp_monitor(&fx.store, "restart", 1).await;

        fx.scheduler.start_monitor(&m);
        assert!(fx.scheduler.is_running(m.id));

        // Restarting keeps exactly one entry alive.
        fx.scheduler.start_monitor(&m);
        assert!(fx.scheduler.is_running(m.id));
        assert_eq!(fx.scheduler.health().active_monitors, 1);

        fx.scheduler.stop_monitor(m.id);
        assert!(!fx.scheduler.is_running(m.id));
        // Stopping twice is fine.
        fx.scheduler.stop_monitor(m.id);
    }

    #[tokio::test]
    async fn test_stop_monitor_clears_notifier_state() {
        let fx = fixture();
        let m = tcp_monitor(&fx.store, "notif", 1).await;
        fx.scheduler.start_monitor(&m);

        // Simulate armed hysteresis state for this monitor and another one.
        fx.states.insert_for_test(&format!("7_{}", m.id));
        fx.states.insert_for_test("7_99999");

        fx.scheduler.stop_monitor(m.id);
        assert_eq!(fx.states.len(), 1);
    }

    #[tokio::test]
    async fn test_inactive_monitor_not_started() {
        let fx = fixture();
        let mut m = Monitor {
            name: "paused".to_string(),
            url: "127.0.0.1:1".to_string(),
            kind: MONITOR_TYPE_TCP.to_string(),
            active: 0,
            ..Default::default()
        };
        fx.store.add_monitor(&mut m).unwrap();
        fx.scheduler.start_monitor(&m);
        assert!(!fx.scheduler.is_running(m.id));
    }

    #[tokio::test]
    async fn test_stop_all_clears_everything() {
        let fx = fixture();
        let a = tcp_monitor(&fx.store, "a", 1).await;
        let b = tcp_monitor(&fx.store, "b", 1).await;
        fx.scheduler.start_monitor(&a);
        fx.scheduler.start_monitor(&b);
        assert_eq!(fx.scheduler.health().active_monitors, 2);

        fx.scheduler.stop_all();
        assert_eq!(fx.scheduler.health().active_monitors, 0);
    }
}
