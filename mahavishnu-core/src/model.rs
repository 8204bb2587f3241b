use mahavishnu_common::ids::{MessageId, PoolId, RepoName, TaskId, WorkerId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

/// The category of work a task performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskKind {
    Inference,
    Indexing,
    Shell,
    ContainerExec,
    DebugMonitor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Priority {
    Low,
    Normal,
    High,
    Urgent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PoolKind {
    Local,
    Delegated,
    Container,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkerKind {
    SubprocessAi,
    Container,
    RemoteDelegate,
    DebugMonitor,
}

/// Worker lifecycle state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkerState {
    Starting,
    Idle,
    Running,
    Cancelling,
    Faulted,
    Closing,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResultStatus {
    Completed,
    Failed,
    TimedOut,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageStatus {
    Unread,
    Read,
    Archived,
}

/// `deadline` is expressed relative to a `Clock` rather than wall-clock
/// `SystemTime` so tests can control it deterministically.
#[derive(Debug, Clone)]
pub struct Task {
    pub task_id: TaskId,
    pub kind: TaskKind,
    pub payload: TaskPayload,
    pub deadline: Instant,
    pub priority: Priority,
    pub requested_pool_kind: Option<PoolKind>,
    pub affinity_key: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct TaskPayload {
    pub bytes: Vec<u8>,
    pub params: BTreeMap<String, String>,
}

impl Task {
    pub fn is_expired(&self, now: Instant) -> bool {
        self.deadline <= now
    }

    pub fn time_to_deadline(&self, now: Instant) -> Duration {
        self.deadline.saturating_duration_since(now)
    }
}

/// Owned exclusively by exactly one Pool (enforced by `registry::Registry`,
/// never by shared mutable state on the struct itself).
#[derive(Debug, Clone)]
pub struct WorkerMeta {
    pub worker_id: WorkerId,
    pub kind: WorkerKind,
    pub state: WorkerState,
    pub spawn_time: Instant,
    pub current_task_id: Option<TaskId>,
    pub last_task_end: Option<Instant>,
}

impl WorkerMeta {
    pub fn new(worker_id: WorkerId, kind: WorkerKind, now: Instant) -> Self {
        Self {
            worker_id,
            kind,
            state: WorkerState::Starting,
            spawn_time: now,
            current_task_id: None,
            last_task_end: None,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.state == WorkerState::Idle
    }
}

/// Named `TaskResult` to avoid clashing with `std::result::Result`.
#[derive(Debug, Clone)]
pub struct TaskResult {
    pub task_id: TaskId,
    pub worker_id: WorkerId,
    pub status: ResultStatus,
    pub artifact: Vec<u8>,
    pub stderr_tail: Vec<u8>,
    pub duration: Duration,
    pub stream_frames_consumed: u64,
}

/// A single frame of a worker's streamed output.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamFrame {
    ContentChunk(Vec<u8>),
    ToolCall { name: String, args: serde_json::Value },
    Progress(u8),
    Completion(ResultStatus),
    Log { level: LogLevel, text: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// A signed cross-repo message.
#[derive(Debug, Clone)]
pub struct Message {
    pub message_id: MessageId,
    pub from_repo: RepoName,
    pub to_repo: RepoName,
    pub subject: String,
    pub body: String,
    pub priority: Priority,
    pub in_reply_to: Option<MessageId>,
    pub workflow_id: Option<String>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub signature: Vec<u8>,
    pub context: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PoolHealth {
    pub status: HealthStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Intra-pool worker-selection strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IntraPoolStrategy {
    RoundRobin,
    LeastLoaded,
    Random,
    Affinity,
}

/// Inter-pool selection strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InterPoolStrategy {
    RoundRobin,
    LeastLoaded,
    Random,
    Affinity,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolSnapshot {
    pub pool_id: PoolId,
    pub pool_kind: PoolKind,
    pub min_workers: usize,
    pub max_workers: usize,
    pub current_size: usize,
    pub inflight: usize,
    pub queued: usize,
    pub health: HealthStatus,
}
