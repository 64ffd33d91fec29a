//! Service manager - lifecycle state machine for managed processes
//!
//! ```text
//!   STOPPED ──start──▶ STARTING ──healthy──▶ RUNNING ──stop──▶ STOPPED
//!      ▲                  │
//!      │                  └──spawn failure / early exit / timeout──▶ ERROR
//!      └──────────────────────────start (retry)──────────────────────┘
//! ```
//!
//! Every state transition is persisted to the registry. A failed save of a
//! settled state (registered, RUNNING, STOPPED) is returned as a `Registry`
//! error after the in-memory transition has happened. Operations on the
//! same service are serialized by a per-service lock; operations on different
//! services run concurrently.
//!
//! Stopping a service does not cascade to its dependents: a dependent that is
//! RUNNING stays RUNNING and its health flag only reflects its own probe.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::process::Child;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::ManagerSettings;
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::health::{HealthChecker, HealthProbe};
use crate::model::{ServiceConfig, ServiceRecord, ServiceStatus, ServiceStatusReport};
use crate::order;
use crate::port::PortManager;
use crate::process;
use crate::registry::ServiceRegistry;

/// Result of one service in a bulk start/stop
#[derive(Debug)]
pub struct BulkOutcome {
    pub service: String,
    pub result: OrchestratorResult<ServiceRecord>,
}

enum StartupOutcome {
    Healthy,
    Exited(String),
    TimedOut,
}

/// Starts, stops and monitors a set of service processes
pub struct ServiceManager {
    settings: ManagerSettings,
    ports: PortManager,
    registry: ServiceRegistry,
    health: Arc<dyn HealthProbe>,
    /// Children spawned by this manager instance
    processes: Mutex<HashMap<String, Child>>,
    /// Per-service operation locks
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl ServiceManager {
    /// Create a manager probing health over HTTP
    pub fn new(settings: ManagerSettings) -> Self {
        Self::with_probe(settings, Arc::new(HealthChecker::new()))
    }

    /// Create a manager with a custom health probe
    ///
    /// Loads the registry snapshot and re-claims ports of services that were
    /// last seen STARTING or RUNNING.
    pub fn with_probe(settings: ManagerSettings, health: Arc<dyn HealthProbe>) -> Self {
        let ports = PortManager::new(settings.ports.clone());
        let registry = ServiceRegistry::new(&settings.registry_path);
        if let Err(e) = registry.load() {
            warn!(error = %e, "Could not load registry, starting empty");
        }

        for record in registry.list_all() {
            let live = matches!(
                record.runtime.status,
                ServiceStatus::Running | ServiceStatus::Starting
            );
            if let (true, Some(port)) = (live, record.runtime.port) {
                match ports.claim(record.name(), port) {
                    Ok(()) => debug!(service = %record.name(), port, "Recovered port allocation"),
                    Err(e) => warn!(service = %record.name(), error = %e, "Could not recover port"),
                }
            }
        }

        Self {
            settings,
            ports,
            registry,
            health,
            processes: Mutex::new(HashMap::new()),
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn settings(&self) -> &ManagerSettings {
        &self.settings
    }

    pub fn ports(&self) -> &PortManager {
        &self.ports
    }

    pub fn registry(&self) -> &ServiceRegistry {
        &self.registry
    }

    /// Register (or re-register) a service definition
    pub async fn register(&self, config: ServiceConfig) -> OrchestratorResult<ServiceRecord> {
        config.validate()?;
        let lock = self.lock_for(&config.name);
        let _guard = lock.lock().await;

        let record = match self.registry.get(&config.name) {
            Some(existing)
                if matches!(
                    existing.runtime.status,
                    ServiceStatus::Running | ServiceStatus::Starting
                ) =>
            {
                return Err(OrchestratorError::AlreadyRunning(config.name));
            }
            Some(existing) => ServiceRecord {
                config,
                runtime: existing.runtime,
            },
            None => ServiceRecord::new(config),
        };

        info!(
            service = %record.name(),
            dependencies = ?record.config.dependencies,
            "Registered service"
        );
        self.registry.put(record.clone());
        self.persist()?;
        Ok(record)
    }

    /// Start a service and wait until it reports healthy
    ///
    /// Starting a RUNNING service is a no-op.
    pub async fn start(&self, name: &str) -> OrchestratorResult<ServiceRecord> {
        let lock = self.lock_for(name);
        let _guard = lock.lock().await;
        self.start_locked(name).await
    }

    /// Stop a service: SIGTERM, grace period, SIGKILL
    pub async fn stop(&self, name: &str) -> OrchestratorResult<ServiceRecord> {
        let lock = self.lock_for(name);
        let _guard = lock.lock().await;
        self.stop_locked(name).await
    }

    /// Stop, settle, start - under one lock
    pub async fn restart(&self, name: &str) -> OrchestratorResult<ServiceRecord> {
        let lock = self.lock_for(name);
        let _guard = lock.lock().await;
        self.stop_locked(name).await?;
        tokio::time::sleep(self.settings.restart_settle()).await;
        self.start_locked(name).await
    }

    /// Probe the recorded health URL of a service
    pub async fn is_healthy(&self, name: &str) -> bool {
        let url = match self.registry.get(name).and_then(|r| r.runtime.health_url) {
            Some(url) => url,
            None => return false,
        };
        self.health.check(&url, self.settings.probe_timeout()).await
    }

    /// Status snapshot; health is only probed while RUNNING
    pub async fn status_of(&self, name: &str) -> OrchestratorResult<ServiceStatusReport> {
        let record = self
            .registry
            .get(name)
            .ok_or_else(|| OrchestratorError::NotFound(name.to_string()))?;
        Ok(self.report(&record).await)
    }

    /// Status snapshots of every registered service, sorted by name
    pub async fn list_all(&self) -> Vec<ServiceStatusReport> {
        let mut reports = Vec::new();
        for record in self.registry.list_all() {
            reports.push(self.report(&record).await);
        }
        reports
    }

    /// Dependency-respecting order of all registered services
    pub fn startup_order(&self) -> OrchestratorResult<Vec<String>> {
        let records = self.registry.list_all();
        order::startup_order(records.iter().map(|r| &r.config))
    }

    /// Start every registered service in dependency order
    ///
    /// Fails up front on cycles or unknown dependencies; individual start
    /// failures are collected and do not stop the sequence.
    pub async fn start_all(&self) -> OrchestratorResult<Vec<BulkOutcome>> {
        let order = self.startup_order()?;
        info!(order = ?order, "Starting all services");

        let mut outcomes = Vec::with_capacity(order.len());
        for service in order {
            let result = self.start(&service).await;
            if let Err(e) = &result {
                error!(service = %service, error = %e, "Failed to start service");
            }
            outcomes.push(BulkOutcome { service, result });
        }
        Ok(outcomes)
    }

    /// Stop every registered service in reverse dependency order
    pub async fn stop_all(&self) -> Vec<BulkOutcome> {
        let mut order = self.startup_order().unwrap_or_else(|e| {
            warn!(error = %e, "No dependency order, stopping by name");
            self.registry
                .list_all()
                .into_iter()
                .map(|r| r.config.name)
                .collect()
        });
        order.reverse();
        info!(order = ?order, "Stopping all services");

        let mut outcomes = Vec::with_capacity(order.len());
        for service in order {
            let result = self.stop(&service).await;
            outcomes.push(BulkOutcome { service, result });
        }
        outcomes
    }

    async fn start_locked(&self, name: &str) -> OrchestratorResult<ServiceRecord> {
        let record = self
            .registry
            .get(name)
            .ok_or_else(|| OrchestratorError::NotFound(name.to_string()))?;

        if record.runtime.status == ServiceStatus::Running {
            info!(service = %name, port = ?record.runtime.port, "Service already running");
            return Ok(record);
        }

        for dependency in &record.config.dependencies {
            if !self.is_healthy(dependency).await {
                warn!(service = %name, dependency = %dependency, "Dependency not available");
                return Err(OrchestratorError::DependencyUnavailable {
                    service: name.to_string(),
                    dependency: dependency.clone(),
                });
            }
        }

        // A process left behind by a timed-out start would still hold the port
        let leftover = self.processes.lock().remove(name);
        if let Some(mut child) = leftover {
            warn!(service = %name, pid = ?child.id(), "Terminating leftover process before start");
            if let Err(e) = process::terminate_child(&mut child, self.settings.stop_grace()).await
            {
                warn!(service = %name, error = %e, "Failed to terminate leftover process");
            }
        }

        let port = match record.config.port {
            Some(port) => {
                self.ports.claim(name, port)?;
                port
            }
            None => self.ports.allocate(name)?,
        };
        let health_url = self.settings.health_url(port, &record.config.health_path);
        let started_at = Utc::now();

        self.registry.update(name, |rt| {
            rt.status = ServiceStatus::Starting;
            rt.port = Some(port);
            rt.pid = None;
            rt.started_at = Some(started_at);
            rt.health_url = Some(health_url.clone());
        })?;
        self.persist_or_warn();

        let child = match process::spawn(&record.config, port, &self.settings.log_dir) {
            Ok(child) => child,
            Err(e) => {
                error!(service = %name, error = %e, "Failed to spawn service");
                self.ports.free(name);
                self.registry
                    .update(name, |rt| rt.status = ServiceStatus::Error)?;
                self.persist_or_warn();
                return Err(OrchestratorError::SpawnFailed {
                    service: name.to_string(),
                    source: e,
                });
            }
        };

        let pid = child.id();
        self.processes.lock().insert(name.to_string(), child);
        self.registry.update(name, |rt| rt.pid = pid)?;
        self.persist_or_warn();
        info!(service = %name, pid = ?pid, port, "Spawned service, waiting for health");

        match self.wait_for_health(name, &health_url).await {
            StartupOutcome::Healthy => {
                let record = self
                    .registry
                    .update(name, |rt| rt.status = ServiceStatus::Running)?;
                self.persist()?;
                info!(service = %name, port, "Service running");
                Ok(record)
            }
            StartupOutcome::Exited(status) => {
                self.processes.lock().remove(name);
                self.ports.free(name);
                self.registry.update(name, |rt| {
                    rt.status = ServiceStatus::Error;
                    rt.pid = None;
                })?;
                self.persist_or_warn();
                error!(service = %name, status = %status, "Service exited during startup");
                Err(OrchestratorError::ExitedDuringStartup {
                    service: name.to_string(),
                    status,
                })
            }
            StartupOutcome::TimedOut => {
                self.registry
                    .update(name, |rt| rt.status = ServiceStatus::Error)?;
                self.persist_or_warn();
                error!(service = %name, "Service did not become healthy");
                Err(OrchestratorError::StartupTimeout {
                    service: name.to_string(),
                    timeout: self.settings.startup_timeout(),
                })
            }
        }
    }

    async fn stop_locked(&self, name: &str) -> OrchestratorResult<ServiceRecord> {
        let record = self
            .registry
            .get(name)
            .ok_or_else(|| OrchestratorError::NotFound(name.to_string()))?;

        let grace = self.settings.stop_grace();
        let tracked = self.processes.lock().remove(name);
        let result = match (tracked, record.runtime.pid) {
            (Some(mut child), _) => process::terminate_child(&mut child, grace).await,
            (None, Some(pid)) => process::terminate_pid(pid, grace).await,
            (None, None) => Ok(()),
        };
        result.map_err(|e| OrchestratorError::Stop {
            service: name.to_string(),
            message: e.to_string(),
        })?;

        self.ports.free(name);
        let record = self.registry.update(name, |rt| rt.reset())?;
        self.persist()?;
        info!(service = %name, "Service stopped");
        Ok(record)
    }

    async fn wait_for_health(&self, name: &str, url: &str) -> StartupOutcome {
        let deadline = Instant::now() + self.settings.startup_timeout();
        let interval = self.settings.health_interval();

        loop {
            if let Some(status) = self.exit_status(name) {
                return StartupOutcome::Exited(status);
            }

            let now = Instant::now();
            let probe_timeout = self
                .settings
                .probe_timeout()
                .min(deadline.saturating_duration_since(now));
            if self.health.check(url, probe_timeout).await {
                return StartupOutcome::Healthy;
            }

            let now = Instant::now();
            if now >= deadline {
                return StartupOutcome::TimedOut;
            }
            tokio::time::sleep(interval.min(deadline - now)).await;
        }
    }

    fn exit_status(&self, name: &str) -> Option<String> {
        let mut processes = self.processes.lock();
        let child = processes.get_mut(name)?;
        match child.try_wait() {
            Ok(Some(status)) => Some(status.to_string()),
            Ok(None) => None,
            Err(e) => Some(e.to_string()),
        }
    }

    async fn report(&self, record: &ServiceRecord) -> ServiceStatusReport {
        let healthy = match (&record.runtime.status, &record.runtime.health_url) {
            (ServiceStatus::Running, Some(url)) => {
                self.health.check(url, self.settings.probe_timeout()).await
            }
            _ => false,
        };
        ServiceStatusReport::from_record(record, healthy)
    }

    /// Save the registry, returning the failure to the caller
    fn persist(&self) -> OrchestratorResult<()> {
        self.registry.save().map_err(|e| {
            warn!(path = %self.registry.path().display(), error = %e, "Failed to persist registry");
            e
        })
    }

    /// Save an intermediate state; a later transition saves again
    fn persist_or_warn(&self) {
        let _ = self.persist();
    }

    fn lock_for(&self, name: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.locks
            .lock()
            .entry(name.to_string())
            .or_default()
            .clone()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::config::PortSettings;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::time::Duration;
    use tokio_test::{assert_err, assert_ok};

    /// Health probe driven by the test: a port is healthy once marked
    #[derive(Default)]
    struct StubProbe {
        always: bool,
        healthy_ports: Mutex<HashSet<u16>>,
    }

    impl StubProbe {
        fn always_healthy() -> Self {
            Self {
                always: true,
                ..Default::default()
            }
        }

        fn mark(&self, port: u16) {
            self.healthy_ports.lock().insert(port);
        }
    }

    #[async_trait]
    impl HealthProbe for StubProbe {
        async fn check(&self, url: &str, _timeout: Duration) -> bool {
            if self.always {
                return true;
            }
            let port = url
                .rsplit(':')
                .next()
                .and_then(|rest| rest.split('/').next())
                .and_then(|p| p.parse::<u16>().ok());
            port.map(|p| self.healthy_ports.lock().contains(&p))
                .unwrap_or(false)
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        manager: ServiceManager,
        probe: Arc<StubProbe>,
    }

    fn fixture_with(probe: StubProbe, port_base: u16) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let settings = ManagerSettings {
            registry_path: dir.path().join("service_registry.json"),
            log_dir: dir.path().join("logs"),
            startup_timeout_ms: 2_000,
            health_interval_ms: 50,
            probe_timeout_ms: 200,
            stop_grace_ms: 1_000,
            restart_settle_ms: 10,
            ports: PortSettings {
                range_start: port_base,
                range_end: port_base + 100,
                ..Default::default()
            },
            ..Default::default()
        };
        let probe = Arc::new(probe);
        let manager = ServiceManager::with_probe(settings, probe.clone());
        Fixture {
            _dir: dir,
            manager,
            probe,
        }
    }

    fn fixture(port_base: u16) -> Fixture {
        fixture_with(StubProbe::default(), port_base)
    }

    fn sleeper(name: &str, port: u16) -> ServiceConfig {
        ServiceConfig::new(name, "sleep").with_args(["30"]).with_port(port)
    }

    #[tokio::test]
    async fn start_unknown_service_is_not_found() {
        let f = fixture(48000);
        assert!(matches!(
            f.manager.start("ghost").await,
            Err(OrchestratorError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn start_is_idempotent() {
        let f = fixture(48100);
        f.manager.register(sleeper("a", 48101)).await.unwrap();
        f.probe.mark(48101);

        let first = assert_ok!(f.manager.start("a").await);
        let second = assert_ok!(f.manager.start("a").await);

        assert_eq!(first.runtime.status, ServiceStatus::Running);
        assert!(first.runtime.pid.is_some());
        assert_eq!(first.runtime.pid, second.runtime.pid);

        f.manager.stop("a").await.unwrap();
    }

    #[tokio::test]
    async fn stopped_dependency_blocks_start() {
        let f = fixture(48200);
        f.manager.register(sleeper("a", 48201)).await.unwrap();
        f.manager
            .register(sleeper("b", 48202).with_dependency("a"))
            .await
            .unwrap();
        f.probe.mark(48202);

        let err = f.manager.start("b").await.unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::DependencyUnavailable { ref dependency, .. } if dependency == "a"
        ));

        let b = f.manager.registry().get("b").unwrap();
        assert_eq!(b.runtime.status, ServiceStatus::Stopped);
        assert!(b.runtime.pid.is_none());
        assert!(f.manager.ports().port_of("b").is_none());
    }

    #[tokio::test]
    async fn dependency_scenario_does_not_cascade_stop() {
        let f = fixture(48300);
        f.manager.register(sleeper("a", 48301)).await.unwrap();
        f.manager
            .register(sleeper("b", 48302).with_dependency("a"))
            .await
            .unwrap();

        assert!(matches!(
            f.manager.start("b").await,
            Err(OrchestratorError::DependencyUnavailable { .. })
        ));

        f.probe.mark(48301);
        let a = f.manager.start("a").await.unwrap();
        assert_eq!(a.runtime.status, ServiceStatus::Running);

        f.probe.mark(48302);
        let b = f.manager.start("b").await.unwrap();
        assert_eq!(b.runtime.status, ServiceStatus::Running);

        f.manager.stop("a").await.unwrap();
        let status = f.manager.status_of("b").await.unwrap();
        assert_eq!(status.status, ServiceStatus::Running);
        assert!(status.healthy);

        let a = f.manager.status_of("a").await.unwrap();
        assert_eq!(a.status, ServiceStatus::Stopped);
        assert!(!a.healthy);
        assert!(a.pid.is_none());

        f.manager.stop("b").await.unwrap();
    }

    #[tokio::test]
    async fn spawn_failure_is_reported() {
        let f = fixture_with(StubProbe::always_healthy(), 48400);
        f.manager
            .register(ServiceConfig::new("broken", "/nonexistent/motospect-service"))
            .await
            .unwrap();

        let err = assert_err!(f.manager.start("broken").await);
        assert!(matches!(err, OrchestratorError::SpawnFailed { .. }));

        let record = f.manager.registry().get("broken").unwrap();
        assert_eq!(record.runtime.status, ServiceStatus::Error);
        assert!(f.manager.ports().port_of("broken").is_none());
    }

    #[tokio::test]
    async fn health_timeout_leaves_process_running() {
        let mut f = fixture(48500);
        f.manager.settings.startup_timeout_ms = 300;
        f.manager.register(sleeper("slow", 48501)).await.unwrap();

        let started = std::time::Instant::now();
        let err = f.manager.start("slow").await.unwrap_err();
        assert!(matches!(err, OrchestratorError::StartupTimeout { .. }));
        assert!(started.elapsed() >= Duration::from_millis(300));

        let record = f.manager.registry().get("slow").unwrap();
        assert_eq!(record.runtime.status, ServiceStatus::Error);
        assert!(record.runtime.pid.is_some());

        let stopped = f.manager.stop("slow").await.unwrap();
        assert_eq!(stopped.runtime.status, ServiceStatus::Stopped);
        assert!(stopped.runtime.pid.is_none());
    }

    #[tokio::test]
    async fn early_exit_fails_fast() {
        let f = fixture(48600);
        f.manager
            .register(ServiceConfig::new("quitter", "true").with_port(48601))
            .await
            .unwrap();

        let started = std::time::Instant::now();
        let err = f.manager.start("quitter").await.unwrap_err();
        assert!(matches!(err, OrchestratorError::ExitedDuringStartup { .. }));
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(f.manager.ports().port_of("quitter").is_none());
    }

    #[tokio::test]
    async fn stop_releases_port_and_persists() {
        let f = fixture_with(StubProbe::always_healthy(), 48700);
        f.manager
            .register(ServiceConfig::new("auto", "sleep").with_args(["30"]))
            .await
            .unwrap();

        let running = f.manager.start("auto").await.unwrap();
        let port = running.runtime.port.unwrap();
        assert!((48700..48800).contains(&port));
        assert_eq!(f.manager.ports().port_of("auto"), Some(port));
        assert_eq!(
            running.runtime.health_url.as_deref(),
            Some(format!("http://127.0.0.1:{}/health", port).as_str())
        );

        f.manager.stop("auto").await.unwrap();
        assert!(f.manager.ports().port_of("auto").is_none());

        let reloaded = ServiceRegistry::open(&f.manager.settings().registry_path).unwrap();
        let record = reloaded.get("auto").unwrap();
        assert_eq!(record.runtime.status, ServiceStatus::Stopped);
        assert!(record.runtime.pid.is_none());
    }

    #[tokio::test]
    async fn restart_spawns_new_process() {
        let f = fixture_with(StubProbe::always_healthy(), 48800);
        f.manager.register(sleeper("a", 48801)).await.unwrap();

        let first = f.manager.start("a").await.unwrap();
        let second = f.manager.restart("a").await.unwrap();

        assert_eq!(second.runtime.status, ServiceStatus::Running);
        assert_ne!(first.runtime.pid, second.runtime.pid);

        f.manager.stop("a").await.unwrap();
    }

    #[tokio::test]
    async fn start_all_follows_dependencies() {
        let f = fixture_with(StubProbe::always_healthy(), 48900);
        f.manager
            .register(sleeper("gateway", 48901).with_dependency("decoder"))
            .await
            .unwrap();
        f.manager.register(sleeper("decoder", 48902)).await.unwrap();

        let outcomes = f.manager.start_all().await.unwrap();
        let order: Vec<&str> = outcomes.iter().map(|o| o.service.as_str()).collect();
        assert_eq!(order, vec!["decoder", "gateway"]);
        assert!(outcomes.iter().all(|o| o.result.is_ok()));

        let stopped = f.manager.stop_all().await;
        let order: Vec<&str> = stopped.iter().map(|o| o.service.as_str()).collect();
        assert_eq!(order, vec!["gateway", "decoder"]);
        for report in f.manager.list_all().await {
            assert_eq!(report.status, ServiceStatus::Stopped);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_lifecycle_of_different_services_persists_every_record() {
        let f = fixture_with(StubProbe::always_healthy(), 49200);
        let names: Vec<String> = (1..=6).map(|n| format!("svc-{n}")).collect();
        for (n, name) in names.iter().enumerate() {
            f.manager
                .register(sleeper(name, 49201 + n as u16))
                .await
                .unwrap();
        }

        let started =
            futures::future::join_all(names.iter().map(|name| f.manager.start(name))).await;
        assert!(started.iter().all(|r| r.is_ok()));

        let on_disk = ServiceRegistry::open(&f.manager.settings().registry_path).unwrap();
        assert_eq!(on_disk.list_all(), f.manager.registry().list_all());
        for record in on_disk.list_all() {
            assert_eq!(record.runtime.status, ServiceStatus::Running);
            assert!(record.runtime.pid.is_some());
        }

        let stopped =
            futures::future::join_all(names.iter().map(|name| f.manager.stop(name))).await;
        assert!(stopped.iter().all(|r| r.is_ok()));

        let on_disk = ServiceRegistry::open(&f.manager.settings().registry_path).unwrap();
        assert_eq!(on_disk.list_all(), f.manager.registry().list_all());
        for record in on_disk.list_all() {
            assert_eq!(record.runtime.status, ServiceStatus::Stopped);
            assert!(record.runtime.pid.is_none());
        }
    }

    #[tokio::test]
    async fn failed_registry_save_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        // the registry's parent directory is a plain file, so every save fails
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, "").unwrap();
        let settings = ManagerSettings {
            registry_path: blocker.join("service_registry.json"),
            log_dir: dir.path().join("logs"),
            startup_timeout_ms: 2_000,
            health_interval_ms: 50,
            stop_grace_ms: 1_000,
            ..Default::default()
        };
        let manager =
            ServiceManager::with_probe(settings, Arc::new(StubProbe::always_healthy()));

        let err = assert_err!(manager.register(sleeper("a", 49301)).await);
        assert!(matches!(err, OrchestratorError::Registry(_)));
        assert!(manager.registry().contains("a"));

        let err = assert_err!(manager.start("a").await);
        assert!(matches!(err, OrchestratorError::Registry(_)));
        let record = manager.registry().get("a").unwrap();
        assert_eq!(record.runtime.status, ServiceStatus::Running);
        assert!(record.runtime.pid.is_some());

        let err = assert_err!(manager.stop("a").await);
        assert!(matches!(err, OrchestratorError::Registry(_)));
        let record = manager.registry().get("a").unwrap();
        assert_eq!(record.runtime.status, ServiceStatus::Stopped);
        assert!(record.runtime.pid.is_none());
        assert!(manager.ports().port_of("a").is_none());
    }

    #[tokio::test]
    async fn reregister_running_service_is_rejected() {
        let f = fixture_with(StubProbe::always_healthy(), 49000);
        f.manager.register(sleeper("a", 49001)).await.unwrap();
        f.manager.start("a").await.unwrap();

        let err = f.manager.register(sleeper("a", 49002)).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::AlreadyRunning(_)));

        f.manager.stop("a").await.unwrap();
        let record = f.manager.register(sleeper("a", 49002)).await.unwrap();
        assert_eq!(record.config.port, Some(49002));
    }

    #[tokio::test]
    async fn restarted_manager_recovers_ports() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("service_registry.json");

        let registry = ServiceRegistry::new(&path);
        let mut record = ServiceRecord::new(ServiceConfig::new("vin", "sleep"));
        record.runtime.status = ServiceStatus::Running;
        record.runtime.port = Some(49101);
        registry.put(record);
        registry.save().unwrap();

        let settings = ManagerSettings {
            registry_path: path,
            log_dir: dir.path().join("logs"),
            ..Default::default()
        };
        let manager = ServiceManager::with_probe(settings, Arc::new(StubProbe::default()));

        assert_eq!(manager.ports().port_of("vin"), Some(49101));
        let report = manager.status_of("vin").await.unwrap();
        assert_eq!(report.status, ServiceStatus::Running);
        assert!(!report.healthy);
    }
}
