//! Monitor: the polling loop that drives probes, state and healing.
//!
//! One task runs cycles back to back:
//! 1. Reload the configuration and merge new devices into the store
//! 2. Probe every device in configuration order and record the result
//! 3. Notify transitions and dispatch healing for devices past threshold
//! 4. Sleep for the poll interval, or back off after a faulted cycle

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use netmend_core::{Device, DeviceId, NetmendConfig, ProbeKind};
use netmend_heal::Healer;
use netmend_probe::{Prober, primary_online};
use netmend_state::*;

use crate::error::MonitorResult;
use crate::source::ConfigSource;

/// Callback invoked on the first observation of a device and on every
/// online/offline flip after that.
pub type TransitionCallback = Arc<dyn Fn(Transition) -> BoxFuture + Send + Sync>;

type BoxFuture = Pin<Box<dyn std::future::Future<Output = ()> + Send>>;

/// Pause after a faulted cycle.
pub const ERROR_BACKOFF: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Transition {
    pub ip: DeviceId,
    pub label: String,
    pub lab_id: String,
    /// `None` on the first observation.
    pub previous_online: Option<bool>,
    pub online: bool,
    pub consecutive_failures: u32,
    pub timestamp: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorPhase {
    Idle,
    RunningCycle,
    Sleeping,
    Stopped,
}

#[derive(Debug, Clone)]
pub struct MonitorSettings {
    pub poll_interval: Duration,
    /// Minimum age of a performance sample before a fresh one is taken.
    pub performance_interval: Duration,
    /// Settle time after a healing attempt reached a device.
    pub wait_between_attempts: Duration,
    pub error_backoff: Duration,
}

impl MonitorSettings {
    pub fn from_config(config: &NetmendConfig) -> Self {
        Self {
            poll_interval: config.monitoring.poll_interval,
            performance_interval: config.monitoring.performance_interval,
            wait_between_attempts: config.healing.wait_between_attempts,
            error_backoff: ERROR_BACKOFF,
        }
    }
}

/// Summary of one completed cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CycleReport {
    pub devices: usize,
    pub online: usize,
    pub offline: usize,
    pub transitions: usize,
    pub healing_attempts: usize,
    pub healed: usize,
    /// The configuration could not be reloaded; the previous device list was used.
    pub stale_config: bool,
}

pub struct Monitor {
    source: Arc<dyn ConfigSource>,
    store: DeviceStateStore,
    prober: Prober,
    healer: Arc<Healer>,
    history: Option<HistoryStore>,
    settings: MonitorSettings,
    on_transition: Option<TransitionCallback>,
    devices: Mutex<Vec<Device>>,
    /// ip → (taken at, result) of the last fresh performance sample.
    performance: Mutex<HashMap<DeviceId, (Instant, ProbeResult)>>,
    phase: watch::Sender<MonitorPhase>,
}

impl Monitor {
    pub fn new(
        source: Arc<dyn ConfigSource>,
        store: DeviceStateStore,
        prober: Prober,
        healer: Arc<Healer>,
        settings: MonitorSettings,
    ) -> Self {
        let (phase, _) = watch::channel(MonitorPhase::Idle);
        Self {
            source,
            store,
            prober,
            healer,
            history: None,
            settings,
            on_transition: None,
            devices: Mutex::new(Vec::new()),
            performance: Mutex::new(HashMap::new()),
            phase,
        }
    }

    /// Record per-cycle samples into `history`.
    pub fn with_history(mut self, history: HistoryStore) -> Self {
        self.history = Some(history);
        self
    }

    pub fn with_callback(mut self, callback: TransitionCallback) -> Self {
        self.on_transition = Some(callback);
        self
    }

    pub fn store(&self) -> &DeviceStateStore {
        &self.store
    }

    pub fn healer(&self) -> &Arc<Healer> {
        &self.healer
    }

    /// Devices probed by the current cycle, in configuration order.
    pub fn devices(&self) -> Vec<Device> {
        self.devices.lock().clone()
    }

    pub fn phase(&self) -> MonitorPhase {
        *self.phase.borrow()
    }

    pub fn subscribe_phase(&self) -> watch::Receiver<MonitorPhase> {
        self.phase.subscribe()
    }

    /// Reload the configuration and merge its devices into the store.
    /// Returns the identities seen for the first time. On failure the
    /// previous device list stays in effect.
    pub fn reconcile(&self) -> MonitorResult<Vec<DeviceId>> {
        let config = self.source.load()?;
        let set = config.devices();
        for rejected in &set.rejected {
            warn!(source = %self.source.describe(), error = %rejected, "skipping device entry");
        }

        let added = self.store.merge(&set.devices);
        self.healer.update_devices(&set.devices);
        if !added.is_empty() {
            info!(count = added.len(), devices = ?added, "new devices added to monitoring");
        }
        *self.devices.lock() = set.devices;
        Ok(added)
    }

    /// Run one full cycle over every configured device.
    pub async fn run_cycle(&self) -> MonitorResult<CycleReport> {
        let mut report = CycleReport::default();
        if let Err(e) = self.reconcile() {
            warn!(source = %self.source.describe(), error = %e, "configuration reload failed, keeping previous device list");
            report.stale_config = true;
        }

        let devices = self.devices();
        report.devices = devices.len();
        for device in &devices {
            let update = self.check_device(device).await?;
            if update.online {
                report.online += 1;
            } else {
                report.offline += 1;
            }

            self.healer.observe(&update);
            if update.is_transition() {
                report.transitions += 1;
                self.notify(device, &update).await;
            }

            if self.healer.should_trigger_healing(&device.ip) {
                let attempted = match self.healer.heal_device(&device.ip).await {
                    Ok(healed) => {
                        report.healed += 1;
                        debug!(ip = %device.ip, attempt = healed.attempt, "healing attempt succeeded");
                        true
                    }
                    Err(e) => {
                        debug!(ip = %device.ip, error = %e, "healing attempt did not succeed");
                        e.attempted()
                    }
                };
                if attempted {
                    report.healing_attempts += 1;
                    tokio::time::sleep(self.settings.wait_between_attempts).await;
                }
            }
        }
        Ok(report)
    }

    /// Probe one device and write the outcome into the store.
    async fn check_device(&self, device: &Device) -> MonitorResult<StatusUpdate> {
        let cached = self.cached_performance(device);
        let fresh = cached.is_none();
        let results = self.prober.run_all(device, cached).await;
        let online = primary_online(device, &results);

        if fresh {
            self.remember_performance(device, &results);
        }

        let update = self.store.update(&device.ip, online, results)?;
        debug!(
            ip = %device.ip,
            online,
            failures = update.consecutive_failures,
            "device checked"
        );
        self.record_sample(&device.ip);
        Ok(update)
    }

    fn cached_performance(&self, device: &Device) -> Option<ProbeResult> {
        if !device.health_checks.performance {
            return None;
        }
        let cache = self.performance.lock();
        let (taken, result) = cache.get(&device.ip)?;
        (taken.elapsed() < self.settings.performance_interval).then(|| result.clone())
    }

    fn remember_performance(&self, device: &Device, results: &[ProbeResult]) {
        let Some(result) = results.iter().find(|r| r.kind() == ProbeKind::Performance) else {
            return;
        };
        self.performance
            .lock()
            .insert(device.ip.clone(), (Instant::now(), result.clone()));

        let (Some(history), ProbeDetail::Performance { sample: Some(sample) }) =
            (&self.history, &result.detail)
        else {
            return;
        };
        let record = PerformanceRecord {
            timestamp: epoch_secs(),
            ip: device.ip.clone(),
            sample: sample.clone(),
        };
        if let Err(e) = history.record_performance(&record) {
            warn!(ip = %device.ip, error = %e, "failed to record performance sample");
        }
    }

    fn record_sample(&self, ip: &str) {
        let Some(history) = &self.history else {
            return;
        };
        let Some(entry) = self.store.get(ip) else {
            return;
        };
        let sample = ProbeSample::from_status(&entry.status, epoch_secs());
        if let Err(e) = history.record_probe(&sample) {
            warn!(%ip, error = %e, "failed to record probe sample");
        }
    }

    async fn notify(&self, device: &Device, update: &StatusUpdate) {
        match update.previous_online {
            None => info!(ip = %device.ip, label = %device.label, online = update.online, "device first observed"),
            Some(_) if update.online => info!(ip = %device.ip, label = %device.label, "device came online"),
            Some(_) => warn!(ip = %device.ip, label = %device.label, failures = update.consecutive_failures, "device went offline"),
        }
        if let Some(ref cb) = self.on_transition {
            cb(Transition {
                ip: device.ip.clone(),
                label: device.label.clone(),
                lab_id: device.lab_id.clone(),
                previous_online: update.previous_online,
                online: update.online,
                consecutive_failures: update.consecutive_failures,
                timestamp: epoch_secs(),
            })
            .await;
        }
    }

    /// Run cycles until `shutdown` fires. A cycle in flight always completes.
    /// Errors and panics inside a cycle are logged and followed by a backoff.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            source = %self.source.describe(),
            interval = ?self.settings.poll_interval,
            "monitor started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            self.phase.send_replace(MonitorPhase::RunningCycle);
            let started = Instant::now();
            let pause = match AssertUnwindSafe(self.run_cycle()).catch_unwind().await {
                Ok(Ok(report)) => {
                    info!(
                        devices = report.devices,
                        online = report.online,
                        offline = report.offline,
                        healing_attempts = report.healing_attempts,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "monitoring cycle complete"
                    );
                    self.settings.poll_interval
                }
                Ok(Err(e)) => {
                    error!(error = %e, "monitoring cycle failed");
                    self.settings.error_backoff
                }
                Err(panic) => {
                    error!(panic = %panic_message(panic.as_ref()), "monitoring cycle panicked");
                    let abandoned = self.store.abandon_open_attempts();
                    if abandoned > 0 {
                        warn!(abandoned, "closed healing attempts left open by the panicked cycle");
                    }
                    self.settings.error_backoff
                }
            };

            self.phase.send_replace(MonitorPhase::Sleeping);
            tokio::select! {
                _ = tokio::time::sleep(pause) => {}
                _ = shutdown.changed() => {
                    debug!("monitor received shutdown");
                    break;
                }
            }
        }

        self.phase.send_replace(MonitorPhase::Stopped);
        info!("monitor stopped");
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use axum::Router;
    use axum::extract::State;
    use axum::http::StatusCode;
    use axum::routing::get;

    use netmend_core::ConfigResult;
    use netmend_heal::{HealingPolicy, RemediationExecutor, RemediationSettings};
    use netmend_probe::ProbeSettings;
    use netmend_remote::MockConnector;

    use crate::source::StaticConfigSource;

    /// A device endpoint whose health can be flipped.
    async fn switchable_server() -> (SocketAddr, Arc<AtomicBool>) {
        let up = Arc::new(AtomicBool::new(true));
        let router = Router::new()
            .route(
                "/",
                get(|State(up): State<Arc<AtomicBool>>| async move {
                    if up.load(Ordering::SeqCst) {
                        StatusCode::OK
                    } else {
                        StatusCode::SERVICE_UNAVAILABLE
                    }
                }),
            )
            .with_state(up.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        (addr, up)
    }

    /// `devices` are `(ip, extra device toml)` pairs probed over http at `addr`.
    fn config(addr: SocketAddr, devices: &[(&str, &str)]) -> NetmendConfig {
        let mut toml = String::from(
            "[monitoring]\npoll_interval = \"50ms\"\nfailure_threshold = 2\nperformance_interval = \"1h\"\n\
             [healing]\nmax_attempts = 2\nwait_between_attempts = \"0s\"\n\
             [[labs]]\nid = \"lab_1\"\nname = \"Lab 1\"\n",
        );
        for (ip, extra) in devices {
            toml.push_str(&format!(
                "[[labs.devices]]\nip = \"{ip}\"\nlabel = \"pc-{ip}\"\n{extra}\n\
                 [labs.devices.health_checks]\nping = false\nhttp = {{ url = \"http://{addr}/\" }}\n"
            ));
        }
        NetmendConfig::parse(&toml).unwrap()
    }

    const SSH: &str = "ssh = { username = \"admin\", password = \"pw\" }";

    struct Fixture {
        monitor: Monitor,
        log: HealingLog,
        mock: MockConnector,
    }

    fn fixture(source: Arc<dyn ConfigSource>, initial: &NetmendConfig) -> Fixture {
        let store = DeviceStateStore::new();
        let log = HealingLog::default();
        let mock = MockConnector::new();
        let connector = Arc::new(mock.clone());
        let executor = RemediationExecutor::new(
            connector.clone(),
            RemediationSettings::from_config(initial),
        );
        let healer = Arc::new(Healer::new(
            HealingPolicy::from_config(initial),
            store.clone(),
            log.clone(),
            executor,
        ));
        let prober = Prober::new(ProbeSettings::from_config(initial), connector).unwrap();
        let monitor = Monitor::new(
            source,
            store,
            prober,
            healer,
            MonitorSettings {
                error_backoff: Duration::from_millis(20),
                ..MonitorSettings::from_config(initial)
            },
        );
        Fixture { monitor, log, mock }
    }

    #[tokio::test]
    async fn transitions_notify_only_on_change() {
        let (addr, up) = switchable_server().await;
        let cfg = config(addr, &[("10.1.0.1", "")]);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let f = fixture(Arc::new(StaticConfigSource::new(cfg.clone())), &cfg);
        let monitor = f.monitor.with_callback(Arc::new(move |t: Transition| {
            let sink = sink.clone();
            Box::pin(async move {
                sink.lock().push((t.previous_online, t.online));
            }) as BoxFuture
        }));

        for healthy in [true, true, false, false, true] {
            up.store(healthy, Ordering::SeqCst);
            monitor.run_cycle().await.unwrap();
        }

        assert_eq!(
            *seen.lock(),
            vec![(None, true), (Some(true), false), (Some(false), true)]
        );
    }

    #[tokio::test]
    async fn failing_device_is_healed_until_capped() {
        let (addr, up) = switchable_server().await;
        up.store(false, Ordering::SeqCst);
        let cfg = config(addr, &[("10.1.0.2", SSH)]);
        let f = fixture(Arc::new(StaticConfigSource::new(cfg.clone())), &cfg);
        f.mock.fail_connect(netmend_remote::SessionError::Timeout("connect".to_string()));

        let mut attempts = 0;
        for _ in 0..6 {
            attempts += f.monitor.run_cycle().await.unwrap().healing_attempts;
        }
        // threshold 2: attempts on the 2nd and 3rd failures, capped at 2
        assert_eq!(attempts, 2);
        assert_eq!(f.mock.connect_count(), 2);
        let entry = f.monitor.store().get("10.1.0.2").unwrap();
        assert_eq!(entry.healing.attempts, 2);
        assert_eq!(entry.status.consecutive_failures, 6);

        up.store(true, Ordering::SeqCst);
        f.monitor.run_cycle().await.unwrap();
        let entry = f.monitor.store().get("10.1.0.2").unwrap();
        assert_eq!(entry.healing.attempts, 0);
        assert_eq!(entry.status.consecutive_failures, 0);
        assert_eq!(f.log.recent(1)[0].outcome, LogOutcome::Recovered);
    }

    #[tokio::test]
    async fn reconcile_is_additive() {
        let (addr, up) = switchable_server().await;
        up.store(false, Ordering::SeqCst);
        let first = config(addr, &[("10.1.0.3", "")]);
        let source = Arc::new(StaticConfigSource::new(first.clone()));
        let f = fixture(source.clone(), &first);

        f.monitor.run_cycle().await.unwrap();
        assert_eq!(f.monitor.store().get("10.1.0.3").unwrap().status.consecutive_failures, 1);

        source.replace(config(addr, &[("10.1.0.3", ""), ("10.1.0.4", "")]));
        assert_eq!(f.monitor.reconcile().unwrap(), vec!["10.1.0.4".to_string()]);
        assert_eq!(f.monitor.store().get("10.1.0.3").unwrap().status.consecutive_failures, 1);

        let report = f.monitor.run_cycle().await.unwrap();
        assert_eq!(report.devices, 2);
        let ips: Vec<String> = f.monitor.store().snapshot().into_iter().map(|e| e.status.ip).collect();
        assert_eq!(ips, vec!["10.1.0.3", "10.1.0.4"]);
        assert_eq!(f.monitor.store().get("10.1.0.3").unwrap().status.consecutive_failures, 2);
    }

    #[tokio::test]
    async fn broken_config_keeps_previous_devices() {
        let (addr, _up) = switchable_server().await;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("netmend.toml");
        let cfg = config(addr, &[("10.1.0.5", "")]);
        std::fs::write(&path, cfg.to_toml_string().unwrap()).unwrap();

        let f = fixture(Arc::new(crate::source::FileConfigSource::new(&path)), &cfg);
        assert!(!f.monitor.run_cycle().await.unwrap().stale_config);

        std::fs::write(&path, "[[labs]\nbroken").unwrap();
        let report = f.monitor.run_cycle().await.unwrap();
        assert!(report.stale_config);
        assert_eq!(report.devices, 1);
        assert_eq!(report.online, 1);
    }

    #[tokio::test]
    async fn performance_sampling_is_rate_limited() {
        let (addr, _up) = switchable_server().await;
        let mut cfg = config(addr, &[("10.1.0.6", SSH)]);
        cfg.labs[0].devices[0].health_checks.performance = true;
        let f = fixture(Arc::new(StaticConfigSource::new(cfg.clone())), &cfg);
        f.mock.respond("top -bn1", "15").respond("free |", "30").respond("df -h", "45");
        let history = HistoryStore::open_in_memory().unwrap();
        let monitor = f.monitor.with_history(history.clone());

        monitor.run_cycle().await.unwrap();
        monitor.run_cycle().await.unwrap();

        assert_eq!(f.mock.connect_count(), 1);
        let entry = monitor.store().get("10.1.0.6").unwrap();
        let perf = entry.status.results.last().unwrap();
        assert_eq!(perf.kind(), ProbeKind::Performance);
        assert!(perf.is_success());
        assert_eq!(history.list_performance("10.1.0.6", 0, 10).unwrap().len(), 1);
        assert!(!history.list_probe_samples("10.1.0.6", 0, 10).unwrap().is_empty());
    }

    struct PanicOnce {
        calls: AtomicUsize,
        config: NetmendConfig,
    }

    impl ConfigSource for PanicOnce {
        fn load(&self) -> ConfigResult<NetmendConfig> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                panic!("config backend exploded");
            }
            Ok(self.config.clone())
        }

        fn describe(&self) -> String {
            "panic-once".to_string()
        }
    }

    #[tokio::test]
    async fn run_survives_panics_and_stops_on_shutdown() {
        let (addr, _up) = switchable_server().await;
        let cfg = config(addr, &[("10.1.0.7", "")]);
        let source = Arc::new(PanicOnce {
            calls: AtomicUsize::new(0),
            config: cfg.clone(),
        });
        let monitor = Arc::new(fixture(source, &cfg).monitor);
        assert_eq!(monitor.phase(), MonitorPhase::Idle);

        let (tx, rx) = watch::channel(false);
        let runner = monitor.clone();
        let handle = tokio::spawn(async move { runner.run(rx).await });

        let deadline = Instant::now() + Duration::from_secs(10);
        while monitor.store().get("10.1.0.7").is_none_or(|e| e.status.last_checked.is_none()) {
            assert!(Instant::now() < deadline, "monitor never completed a cycle");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        tx.send(true).unwrap();
        handle.await.unwrap();
        assert_eq!(monitor.phase(), MonitorPhase::Stopped);
    }
}
