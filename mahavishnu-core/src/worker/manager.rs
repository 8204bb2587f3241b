//! Worker Manager.
//!
//! Presents one contract — `spawn` / `execute` / `cancel` / `close` /
//! `stream` — over four worker kinds. Kind-specific execution lives in
//! private helpers; `WorkerManager` itself only owns the registry of
//! `WorkerEntry`s and the state machine transitions common to all kinds.

use crate::error::{BusyError, SpawnError};
use crate::model::{ResultStatus, StreamFrame, TaskResult, WorkerKind, WorkerMeta, WorkerState};
use crate::pool::memory::MemoryHandle;
use crate::ringbuffer::{RingBuffer, DEFAULT_STDERR_TAIL_CAPACITY};
use crate::worker::launcher::{ContainerRuntime, LauncherMetadata, ProcessLauncher, RemoteOrchestratorClient};
use crate::worker::stream::StreamFrameParser;
use dashmap::DashMap;
use mahavishnu_common::clock::Clock;
use mahavishnu_common::ids::WorkerId;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::sync::{mpsc, Notify};
use tracing::{info, warn};

use crate::model::Task;

const STREAM_CHANNEL_CAPACITY: usize = 256;
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

struct WorkerEntry {
    meta: Mutex<WorkerMeta>,
    kind_metadata: LauncherMetadata,
    memory: Arc<dyn MemoryHandle>,
    cancel_requested: AtomicBool,
    cancel_notify: Notify,
    stop_notify: Notify,
    stream_rx: Mutex<Option<mpsc::Receiver<StreamFrame>>>,
}

pub struct WorkerManager {
    clock: Arc<dyn Clock>,
    container_runtime: Arc<dyn ContainerRuntime>,
    remote_client: Arc<dyn RemoteOrchestratorClient>,
    process_launcher: Arc<dyn ProcessLauncher>,
    workers: DashMap<WorkerId, Arc<WorkerEntry>>,
}

impl WorkerManager {
    pub fn new(
        clock: Arc<dyn Clock>,
        container_runtime: Arc<dyn ContainerRuntime>,
        remote_client: Arc<dyn RemoteOrchestratorClient>,
        process_launcher: Arc<dyn ProcessLauncher>,
    ) -> Self {
        Self {
            clock,
            container_runtime,
            remote_client,
            process_launcher,
            workers: DashMap::new(),
        }
    }

    /// Image-availability / binary-presence checks are kind-specific;
    /// failures are classified transient/permanent by the underlying
    /// collaborator. `memory` is the owning pool's memory handle; every
    /// kind but `debug-monitor` ignores it.
    pub async fn spawn(
        &self,
        kind: WorkerKind,
        metadata: LauncherMetadata,
        memory: Arc<dyn MemoryHandle>,
    ) -> Result<WorkerId, SpawnError> {
        if let (WorkerKind::Container, LauncherMetadata::Container(spec)) = (kind, &metadata) {
            if !self.container_runtime.image_available(&spec.image).await {
                return Err(SpawnError::Permanent(format!(
                    "image {} is not available",
                    spec.image
                )));
            }
        }

        let worker_id = WorkerId::new();
        let now = self.clock.now();
        let entry = Arc::new(WorkerEntry {
            meta: Mutex::new(WorkerMeta::new(worker_id.clone(), kind, now)),
            kind_metadata: metadata,
            memory,
            cancel_requested: AtomicBool::new(false),
            cancel_notify: Notify::new(),
            stop_notify: Notify::new(),
            stream_rx: Mutex::new(None),
        });
        {
            let mut meta = entry.meta.lock().unwrap();
            meta.state = WorkerState::Idle;
        }
        self.workers.insert(worker_id.clone(), entry);
        info!(worker_id = %worker_id, ?kind, "worker spawned");
        Ok(worker_id)
    }

    pub fn worker_meta(&self, worker_id: &WorkerId) -> Option<WorkerMeta> {
        self.workers
            .get(worker_id)
            .map(|e| e.meta.lock().unwrap().clone())
    }

    pub fn worker_ids(&self) -> Vec<WorkerId> {
        self.workers.iter().map(|e| e.key().clone()).collect()
    }

    /// The returned receiver is finite and not-restartable: a second call
    /// after the first has taken the receiver returns `None`.
    pub fn stream(&self, worker_id: &WorkerId) -> Option<mpsc::Receiver<StreamFrame>> {
        let entry = self.workers.get(worker_id)?;
        let rx = entry.stream_rx.lock().unwrap().take();
        rx
    }

    /// Preconditions: `worker.state == idle`, `task.deadline > now`. Always
    /// resolves to a `TaskResult` — deadline and cancellation are folded
    /// into `status`, not propagated as errors.
    pub async fn execute(&self, worker_id: &WorkerId, task: Task) -> Result<TaskResult, BusyError> {
        let entry = self
            .workers
            .get(worker_id)
            .map(|e| e.clone())
            .ok_or_else(|| BusyError {
                worker_id: worker_id.clone(),
            })?;

        {
            let mut meta = entry.meta.lock().unwrap();
            if meta.state != WorkerState::Idle {
                return Err(BusyError {
                    worker_id: worker_id.clone(),
                });
            }
            meta.state = WorkerState::Running;
            meta.current_task_id = Some(task.task_id.clone());
        }
        entry.cancel_requested.store(false, Ordering::SeqCst);

        let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);
        *entry.stream_rx.lock().unwrap() = Some(rx);

        let now = self.clock.now();
        if task.is_expired(now) {
            let _ = tx
                .send(StreamFrame::Completion(ResultStatus::TimedOut))
                .await;
            self.finish(&entry, WorkerState::Idle);
            return Ok(TaskResult {
                task_id: task.task_id,
                worker_id: worker_id.clone(),
                status: ResultStatus::TimedOut,
                artifact: Vec::new(),
                stderr_tail: Vec::new(),
                duration: Duration::ZERO,
                stream_frames_consumed: 0,
            });
        }

        let start = self.clock.now();
        let deadline = task.time_to_deadline(now);
        let kind_metadata = entry.kind_metadata.clone();
        let is_debug_monitor = matches!(kind_metadata, LauncherMetadata::DebugMonitor(_));
        let cancel_notify_fired = async {
            entry.cancel_notify.notified().await;
        };
        // Only a debug-monitor worker actually parks on `stop_notify`; for
        // every other kind this branch simply never wins the select.
        let stop_notify_fired = async {
            if is_debug_monitor {
                entry.stop_notify.notified().await;
            } else {
                std::future::pending::<()>().await;
            }
        };

        let result = tokio::select! {
            r = self.run_kind(&kind_metadata, &task, tx.clone(), entry.memory.clone()) => r,
            _ = tokio::time::sleep(deadline) => {
                warn!(worker_id = %worker_id, task_id = %task.task_id, "task exceeded deadline");
                KindOutcome {
                    status: ResultStatus::TimedOut,
                    artifact: Vec::new(),
                    stderr_tail: Vec::new(),
                    frames: 0,
                }
            }
            _ = cancel_notify_fired => {
                KindOutcome {
                    status: ResultStatus::Cancelled,
                    artifact: Vec::new(),
                    stderr_tail: Vec::new(),
                    frames: 0,
                }
            }
            _ = stop_notify_fired => {
                KindOutcome {
                    status: ResultStatus::Completed,
                    artifact: Vec::new(),
                    stderr_tail: Vec::new(),
                    frames: 0,
                }
            }
        };

        let _ = tx.send(StreamFrame::Completion(result.status.clone())).await;
        let duration = self.clock.now().saturating_duration_since(start);
        let final_state = if result.status == ResultStatus::Failed {
            WorkerState::Faulted
        } else {
            WorkerState::Idle
        };
        self.finish(&entry, final_state);

        Ok(TaskResult {
            task_id: task.task_id,
            worker_id: worker_id.clone(),
            status: result.status,
            artifact: result.artifact,
            stderr_tail: result.stderr_tail,
            duration,
            stream_frames_consumed: result.frames,
        })
    }

    /// If `close` marked the worker `closing` while this task was
    /// in-flight, that takes precedence over whatever status the task
    /// itself resolved to — the worker is done for good, not idle again.
    fn finish(&self, entry: &Arc<WorkerEntry>, state: WorkerState) {
        let mut meta = entry.meta.lock().unwrap();
        meta.state = if meta.state == WorkerState::Closing {
            WorkerState::Closed
        } else {
            state
        };
        meta.current_task_id = None;
        meta.last_task_end = Some(self.clock.now());
    }

    async fn run_kind(
        &self,
        metadata: &LauncherMetadata,
        task: &Task,
        tx: mpsc::Sender<StreamFrame>,
        memory: Arc<dyn MemoryHandle>,
    ) -> KindOutcome {
        match metadata {
            LauncherMetadata::SubprocessAi(spec) => run_subprocess(spec, task, tx).await,
            LauncherMetadata::Container(spec) => {
                run_container(self.container_runtime.as_ref(), spec, task, tx).await
            }
            LauncherMetadata::RemoteDelegate(spec) => {
                run_remote_delegate(self.remote_client.as_ref(), spec, task, tx).await
            }
            LauncherMetadata::DebugMonitor(spec) => {
                run_debug_monitor(self.process_launcher.as_ref(), spec, memory).await
            }
        }
    }

    /// Idempotent, targets the current task if any. The worker transitions
    /// to `faulted` if the drain window elapses before the in-flight call
    /// observes the cancellation.
    pub async fn cancel(&self, worker_id: &WorkerId) {
        let Some(entry) = self.workers.get(worker_id).map(|e| e.clone()) else {
            return;
        };
        let was_running = {
            let mut meta = entry.meta.lock().unwrap();
            if meta.state == WorkerState::Running {
                meta.state = WorkerState::Cancelling;
                true
            } else {
                false
            }
        };
        if !was_running {
            return;
        }
        entry.cancel_requested.store(true, Ordering::SeqCst);
        entry.cancel_notify.notify_waiters();
        info!(worker_id = %worker_id, "cancel requested");

        // A worker still `cancelling` after the drain window is stuck and
        // is marked `faulted` rather than left in limbo.
        let drain_entry = entry.clone();
        let worker_id = worker_id.clone();
        tokio::spawn(async move {
            tokio::time::sleep(DRAIN_TIMEOUT).await;
            let mut meta = drain_entry.meta.lock().unwrap();
            if meta.state == WorkerState::Cancelling {
                warn!(worker_id = %worker_id, "cancel drain window elapsed, marking faulted");
                meta.state = WorkerState::Faulted;
            }
        });
    }

    /// Idempotent, `closing -> closed`. A worker with a task in flight
    /// (this is the normal case for `debug-monitor`, which otherwise runs
    /// forever) is left `closing` and woken via `stop_notify`; `execute`'s
    /// select observes it, resolves to `completed`, and `finish` performs
    /// the final `closing -> closed` transition. A worker that is already
    /// idle closes synchronously.
    pub async fn close(&self, worker_id: &WorkerId) {
        let Some(entry) = self.workers.get(worker_id).map(|e| e.clone()) else {
            return;
        };
        let was_running = {
            let mut meta = entry.meta.lock().unwrap();
            if meta.state == WorkerState::Closed {
                return;
            }
            let was_running = meta.state == WorkerState::Running;
            meta.state = WorkerState::Closing;
            was_running
        };
        if was_running {
            entry.stop_notify.notify_waiters();
            info!(worker_id = %worker_id, "close requested, draining in-flight task");
            return;
        }
        let mut meta = entry.meta.lock().unwrap();
        meta.state = WorkerState::Closed;
        info!(worker_id = %worker_id, "worker closed");
    }
}

struct KindOutcome {
    status: ResultStatus,
    artifact: Vec<u8>,
    stderr_tail: Vec<u8>,
    frames: u64,
}

async fn run_subprocess(
    spec: &crate::worker::launcher::SubprocessSpec,
    task: &Task,
    tx: mpsc::Sender<StreamFrame>,
) -> KindOutcome {
    let mut command = Command::new(&spec.command);
    command
        .args(&spec.args)
        .envs(&spec.env)
        .stdin(std::process::Stdio::piped())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped());

    let mut child = match command.spawn() {
        Ok(c) => c,
        Err(e) => {
            warn!(error = %e, "failed to spawn subprocess worker");
            return KindOutcome {
                status: ResultStatus::Failed,
                artifact: Vec::new(),
                stderr_tail: e.to_string().into_bytes(),
                frames: 0,
            };
        }
    };

    if let Some(mut stdin) = child.stdin.take() {
        let _ = stdin.write_all(&task.payload.bytes).await;
        drop(stdin);
    }

    let mut stdout = match child.stdout.take() {
        Some(s) => s,
        None => {
            return KindOutcome {
                status: ResultStatus::Failed,
                artifact: Vec::new(),
                stderr_tail: b"child stdout unavailable".to_vec(),
                frames: 0,
            }
        }
    };
    let stderr_tail = Arc::new(Mutex::new(RingBuffer::new(DEFAULT_STDERR_TAIL_CAPACITY)));
    if let Some(mut stderr) = child.stderr.take() {
        let tail = stderr_tail.clone();
        tokio::spawn(async move {
            let mut buf = [0u8; 1024];
            loop {
                match stderr.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => tail.lock().unwrap().push(&buf[..n]),
                }
            }
        });
    }

    let mut parser = StreamFrameParser::new();
    let mut artifact = Vec::new();
    let mut frames = 0u64;
    let mut status = ResultStatus::Completed;
    let mut read_buf = [0u8; 4096];

    loop {
        match stdout.read(&mut read_buf).await {
            Ok(0) => break,
            Ok(n) => {
                parser.push(&read_buf[..n]);
                let mut terminal = false;
                for result in parser.poll() {
                    match result {
                        Ok(frame) => {
                            frames += 1;
                            match &frame {
                                StreamFrame::ContentChunk(bytes) => artifact.extend_from_slice(bytes),
                                StreamFrame::Completion(s) => status = s.clone(),
                                _ => {}
                            }
                            terminal = terminal || matches!(frame, StreamFrame::Completion(_));
                            let _ = tx.send(frame).await;
                        }
                        Err(e) => {
                            warn!(error = %e, "worker stream parse error");
                            status = ResultStatus::Failed;
                        }
                    }
                }
                if terminal || parser.is_terminated() {
                    let _ = child.kill().await;
                    return KindOutcome {
                        status,
                        artifact,
                        stderr_tail: stderr_tail.lock().unwrap().to_vec(),
                        frames,
                    };
                }
            }
            Err(e) => {
                warn!(error = %e, "error reading worker stdout");
                status = ResultStatus::Failed;
                break;
            }
        }
    }

    let exit = child.wait().await;
    if !matches!(exit, Ok(s) if s.success()) && status == ResultStatus::Completed {
        status = ResultStatus::Failed;
    }

    let tail = stderr_tail.lock().unwrap().to_vec();
    KindOutcome {
        status,
        artifact,
        stderr_tail: tail,
        frames,
    }
}

async fn run_container(
    runtime: &dyn ContainerRuntime,
    spec: &crate::worker::launcher::ContainerSpec,
    task: &Task,
    tx: mpsc::Sender<StreamFrame>,
) -> KindOutcome {
    use mahavishnu_common::retries::{with_retries, RetryConfig};

    let retry_config = RetryConfig {
        max_attempts: spec.max_transient_retries.max(1),
        ..RetryConfig::default()
    };
    let start_result = with_retries(
        "container-runtime",
        "start",
        Some(spec.image.clone()),
        &retry_config,
        runtime,
        |runtime| {
            let spec = spec.clone();
            Box::pin(async move { runtime.start(&spec).await })
        },
        |e| matches!(e, crate::worker::launcher::ContainerRuntimeError::Transient(_)),
    )
    .await;

    let handle = match start_result {
        Ok(h) => h,
        Err(e) => {
            return KindOutcome {
                status: ResultStatus::Failed,
                artifact: Vec::new(),
                stderr_tail: e.to_string().into_bytes(),
                frames: 0,
            }
        }
    };

    let exec_result = runtime.exec(&handle, &task.payload.bytes).await;
    runtime.stop(&handle).await;

    match exec_result {
        Ok(artifact) => {
            let _ = tx
                .send(StreamFrame::Completion(ResultStatus::Completed))
                .await;
            KindOutcome {
                status: ResultStatus::Completed,
                artifact,
                stderr_tail: Vec::new(),
                frames: 1,
            }
        }
        Err(e) => KindOutcome {
            status: ResultStatus::Failed,
            artifact: Vec::new(),
            stderr_tail: e.to_string().into_bytes(),
            frames: 0,
        },
    }
}

async fn run_remote_delegate(
    client: &dyn RemoteOrchestratorClient,
    spec: &crate::worker::launcher::DelegateSpec,
    task: &Task,
    tx: mpsc::Sender<StreamFrame>,
) -> KindOutcome {
    let handle = match client
        .forward_task(&spec.peer_endpoint, &task.payload.bytes)
        .await
    {
        Ok(h) => h,
        Err(e) => {
            return KindOutcome {
                status: ResultStatus::Failed,
                artifact: Vec::new(),
                stderr_tail: e.to_string().into_bytes(),
                frames: 0,
            }
        }
    };

    let mut artifact = Vec::new();
    let mut frames = 0u64;
    loop {
        match client.poll_stream(&handle).await {
            Ok(chunks) if chunks.is_empty() => break,
            Ok(chunks) => {
                for chunk in chunks {
                    frames += 1;
                    artifact.extend_from_slice(&chunk);
                    let _ = tx.send(StreamFrame::ContentChunk(chunk)).await;
                }
            }
            Err(e) => {
                return KindOutcome {
                    status: ResultStatus::Failed,
                    artifact,
                    stderr_tail: e.to_string().into_bytes(),
                    frames,
                }
            }
        }
    }

    KindOutcome {
        status: ResultStatus::Completed,
        artifact,
        stderr_tail: Vec::new(),
        frames,
    }
}

/// Persists each ~1s jittered snapshot to the pool's memory handle rather
/// than streaming it; produces no Result on its own. This loop runs
/// forever — `execute`'s select! terminates it via the cancel, deadline,
/// or `stop_notify` (graceful `close`) branch, never by returning here.
async fn run_debug_monitor(
    launcher: &dyn ProcessLauncher,
    spec: &crate::worker::launcher::DebugMonitorSpec,
    memory: Arc<dyn MemoryHandle>,
) -> KindOutcome {
    let mut frames = 0u64;
    loop {
        let jitter_ms = (fastrand::f64() * 200.0 - 100.0) as i64;
        let wait = spec
            .snapshot_interval
            .as_millis()
            .saturating_add_signed(jitter_ms as i128) as u64;
        tokio::time::sleep(Duration::from_millis(wait)).await;
        match launcher.snapshot(&spec.target).await {
            Ok(bytes) => {
                frames += 1;
                memory.put(format!("{}-snapshot-{frames}", spec.target), bytes).await;
            }
            Err(e) => {
                warn!(error = %e, "debug monitor snapshot failed");
            }
        }
    }
}
