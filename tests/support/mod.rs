// tests/support/mod.rs
#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use vanguard_orchestrator::config::Config;
use vanguard_orchestrator::core::api::ControlApi;
use vanguard_orchestrator::core::engine::process::{EngineProcess, EngineSpawner, ProcessExit};
use vanguard_orchestrator::core::errors::ApiError;
use vanguard_orchestrator::core::models::{ScanStatus, TaskId};

/// What the fake engine reports for a task at a given moment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Crawling,
    Auditing,
    Paused,
    Succeeded,
    Failed,
}

impl Phase {
    fn as_status(self) -> &'static str {
        match self {
            Phase::Crawling => "crawling",
            Phase::Auditing => "auditing",
            Phase::Paused => "paused",
            Phase::Succeeded => "succeeded",
            Phase::Failed => "failed",
        }
    }
}

/// A task's phases keyed by offset from task creation.
pub type Timeline = Vec<(Duration, Phase)>;

pub fn secs(s: u64) -> Duration {
    Duration::from_secs(s)
}

fn phase_at(timeline: &Timeline, elapsed: Duration) -> Phase {
    timeline
        .iter()
        .rev()
        .find(|(offset, _)| *offset <= elapsed)
        .map(|(_, phase)| *phase)
        .unwrap_or(Phase::Crawling)
}

struct Task {
    timeline: Timeline,
    created: Instant,
}

/// `ControlApi` whose tasks follow per-target timelines on tokio's clock.
#[derive(Default)]
pub struct ScriptedApi {
    scenarios: Mutex<HashMap<String, Timeline>>,
    tasks: Mutex<HashMap<String, Task>>,
    next_task: AtomicU32,
    pub create_calls: AtomicU32,
    pub resume_calls: AtomicU32,
    pub ping_calls: AtomicU32,
    /// Remaining scan creations to reject.
    pub create_failures: AtomicU32,
    /// Remaining pings to refuse.
    pub ping_failures: AtomicU32,
    pub status_unreachable: AtomicBool,
    pub fetch_unreachable: AtomicBool,
}

impl ScriptedApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Registers the timeline for `target` (as normalized, e.g. `https://a.test`).
    pub fn scenario(&self, target: &str, timeline: Timeline) {
        self.scenarios.lock().unwrap().insert(target.to_string(), timeline);
    }

    pub fn resumes(&self) -> u32 {
        self.resume_calls.load(Ordering::SeqCst)
    }

    pub fn creations(&self) -> u32 {
        self.create_calls.load(Ordering::SeqCst)
    }

    fn phase(&self, task: &TaskId) -> Option<Phase> {
        let tasks = self.tasks.lock().unwrap();
        let task = tasks.get(task.as_str())?;
        Some(phase_at(&task.timeline, task.created.elapsed()))
    }

    fn payload(phase: Phase) -> Value {
        json!({
            "scan_status": phase.as_status(),
            "scan_metrics": { "crawl_and_audit_progress": 50 },
            "issue_events": [{ "id": 1, "issue": { "name": "Example finding" } }]
        })
    }
}

fn take_one(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

fn unavailable() -> ApiError {
    ApiError::Status { status: 503, body: "unavailable".to_string() }
}

#[async_trait]
impl ControlApi for ScriptedApi {
    async fn ping(&self) -> Result<(), ApiError> {
        self.ping_calls.fetch_add(1, Ordering::SeqCst);
        if take_one(&self.ping_failures) {
            return Err(ApiError::Timeout(secs(2)));
        }
        Ok(())
    }

    async fn create_scan(&self, request: &Value) -> Result<TaskId, ApiError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        if take_one(&self.create_failures) {
            return Err(unavailable());
        }
        let target = request["urls"][0]
            .as_str()
            .ok_or_else(|| ApiError::Malformed("request has no url".to_string()))?;
        let timeline = self
            .scenarios
            .lock()
            .unwrap()
            .get(target)
            .cloned()
            .unwrap_or_else(|| vec![(Duration::ZERO, Phase::Succeeded)]);

        let id = (self.next_task.fetch_add(1, Ordering::SeqCst) + 1).to_string();
        self.tasks
            .lock()
            .unwrap()
            .insert(id.clone(), Task { timeline, created: Instant::now() });
        Ok(TaskId::new(id).unwrap())
    }

    async fn scan_status(&self, task: &TaskId) -> Result<ScanStatus, ApiError> {
        if self.status_unreachable.load(Ordering::SeqCst) {
            return Err(ApiError::Timeout(secs(10)));
        }
        let phase = self.phase(task).ok_or_else(unavailable)?;
        ScanStatus::from_payload(&Self::payload(phase)).map_err(ApiError::Malformed)
    }

    async fn resume_scan(&self, _task: &TaskId) -> Result<(), ApiError> {
        self.resume_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn fetch_findings(&self, task: &TaskId) -> Result<Value, ApiError> {
        if self.fetch_unreachable.load(Ordering::SeqCst) {
            return Err(ApiError::Timeout(secs(60)));
        }
        let phase = self.phase(task).ok_or_else(unavailable)?;
        Ok(Self::payload(phase))
    }
}

/// Counters shared by every process a `FakeSpawner` hands out.
#[derive(Debug, Default)]
pub struct ProcessCounters {
    pub spawns: AtomicU32,
    pub signals: AtomicU32,
    pub kills: AtomicU32,
}

/// `EngineSpawner` producing in-memory processes.
pub struct FakeSpawner {
    pub counters: Arc<ProcessCounters>,
    /// The first `crash_first` processes are dead on arrival.
    crash_first: u32,
    /// Processes ignore the graceful shutdown signal.
    stubborn: bool,
}

impl FakeSpawner {
    pub fn healthy() -> Arc<Self> {
        Self::crashing(0)
    }

    pub fn crashing(crash_first: u32) -> Arc<Self> {
        Arc::new(Self { counters: Arc::default(), crash_first, stubborn: false })
    }

    pub fn stubborn() -> Arc<Self> {
        Arc::new(Self { counters: Arc::default(), crash_first: 0, stubborn: true })
    }

    pub fn spawns(&self) -> u32 {
        self.counters.spawns.load(Ordering::SeqCst)
    }

    pub fn signals(&self) -> u32 {
        self.counters.signals.load(Ordering::SeqCst)
    }

    pub fn kills(&self) -> u32 {
        self.counters.kills.load(Ordering::SeqCst)
    }
}

impl EngineSpawner for FakeSpawner {
    fn spawn(&self, _project: &Path, startup_log: &Path) -> io::Result<Box<dyn EngineProcess>> {
        let n = self.counters.spawns.fetch_add(1, Ordering::SeqCst) + 1;
        let crashed = n <= self.crash_first;
        std::fs::write(
            startup_log,
            if crashed { "Error: could not open project file\n" } else { "Engine started\n" },
        )?;
        Ok(Box::new(FakeProcess {
            pid: 4000 + n,
            exit: crashed.then_some(ProcessExit { code: Some(1) }),
            stubborn: self.stubborn,
            counters: Arc::clone(&self.counters),
        }))
    }
}

/// `EngineSpawner` that panics instead of starting anything.
pub struct PanickingSpawner;

impl EngineSpawner for PanickingSpawner {
    fn spawn(&self, _project: &Path, _startup_log: &Path) -> io::Result<Box<dyn EngineProcess>> {
        panic!("spawner exploded");
    }
}

pub struct FakeProcess {
    pid: u32,
    exit: Option<ProcessExit>,
    stubborn: bool,
    counters: Arc<ProcessCounters>,
}

#[async_trait]
impl EngineProcess for FakeProcess {
    fn id(&self) -> Option<u32> {
        Some(self.pid)
    }

    fn exited(&mut self) -> Option<ProcessExit> {
        self.exit
    }

    fn signal_shutdown(&mut self) -> io::Result<()> {
        self.counters.signals.fetch_add(1, Ordering::SeqCst);
        if !self.stubborn {
            self.exit = Some(ProcessExit { code: Some(0) });
        }
        Ok(())
    }

    fn force_kill(&mut self) -> io::Result<()> {
        self.counters.kills.fetch_add(1, Ordering::SeqCst);
        self.exit = Some(ProcessExit { code: None });
        Ok(())
    }

    async fn wait_exit(&mut self, within: Duration) -> bool {
        if self.exit.is_none() {
            tokio::time::sleep(within).await;
        }
        self.exit.is_some()
    }
}

/// Config rooted in `root` with a template project on disk and fast timings.
pub fn test_config(root: &Path) -> Config {
    let mut config = Config::with_root(root);
    std::fs::create_dir_all(root.join("config")).unwrap();
    std::fs::write(&config.paths.template_project, b"template project").unwrap();
    std::fs::create_dir_all(&config.paths.logs_dir).unwrap();

    config.engine.settle_delay = Duration::ZERO;
    config.engine.readiness_timeout = secs(30);
    config.engine.readiness_poll_interval = secs(1);
    config.scan.poll_interval = secs(5);
    config.scan.pause_timeout = secs(60);
    config.scan.max_scan_duration = secs(3600);
    config.target_cooldown = Duration::ZERO;
    config.target_retry_delay = secs(10);
    config
}

/// File names in `dir`, sorted.
pub fn file_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(Result::ok)
                .filter(|e| e.path().is_file())
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .collect()
        })
        .unwrap_or_default();
    names.sort();
    names
}

pub fn read_json(path: &PathBuf) -> Value {
    serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap()
}
