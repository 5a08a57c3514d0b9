use std::collections::HashMap;
use std::io::SeekFrom;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use bytes::Bytes;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::TryStreamExt;
use reqwest::{multipart, Body, Client};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::codec::{BytesCodec, FramedRead};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::config::ClientConfig;
use crate::errors::{MontageError, Result};
use crate::models::{BatchStatus, TaskEvent, TaskId, TaskPhase, TaskStatus, TaskSummary};
use crate::progress::{ProgressCallback, ProgressStream, ProgressTracker, ProgressUpdate};
use crate::response::{normalize_response, UploadOutcome};
use crate::validate::{partition, Candidate, Rejection};

/// Metadata shared by every task in one batch.
#[derive(Debug, Clone)]
pub struct BatchContext {
    pub project_id: String,
    pub user_email: Option<String>,
    pub chapter: Option<String>,
    pub chapter_style: Option<Value>,
}

#[derive(Debug, Clone)]
pub struct TaskSuccess {
    pub task: TaskSummary,
    pub outcome: UploadOutcome,
}

#[derive(Debug, Clone)]
pub struct TaskFailure {
    pub task: TaskSummary,
    pub error: String,
    pub cancelled: bool,
}

/// Final report once the queue drains: the batch completed when at
/// least one task succeeded, errored when none did, and stays idle
/// when it was cancelled as a whole.
#[derive(Debug)]
pub struct BatchOutcome {
    pub successes: Vec<TaskSuccess>,
    pub failures: Vec<TaskFailure>,
    pub status: BatchStatus,
}

impl Default for BatchOutcome {
    fn default() -> Self {
        Self {
            successes: Vec::new(),
            failures: Vec::new(),
            status: BatchStatus::Idle,
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Shared mutable state of one batch. Task completions race, so every
/// map sits behind its own mutex; the orchestrator is the only writer.
struct BatchState {
    status: Mutex<BatchStatus>,
    progress: Mutex<HashMap<TaskId, f64>>,
    speed: Mutex<HashMap<TaskId, f64>>,
    eta: Mutex<HashMap<TaskId, Option<f64>>>,
    statuses: Mutex<HashMap<TaskId, TaskStatus>>,
    cancels: Mutex<HashMap<TaskId, CancellationToken>>,
    cancelled: AtomicBool,
}

impl BatchState {
    fn new(tasks: &[TaskSummary]) -> Self {
        let mut statuses = HashMap::new();
        let mut cancels = HashMap::new();
        let mut progress = HashMap::new();
        for task in tasks {
            statuses.insert(task.id.clone(), TaskStatus::Pending);
            cancels.insert(task.id.clone(), CancellationToken::new());
            progress.insert(task.id.clone(), 0.0);
        }
        Self {
            status: Mutex::new(BatchStatus::Idle),
            progress: Mutex::new(progress),
            speed: Mutex::new(HashMap::new()),
            eta: Mutex::new(HashMap::new()),
            statuses: Mutex::new(statuses),
            cancels: Mutex::new(cancels),
            cancelled: AtomicBool::new(false),
        }
    }

    fn batch_status(&self) -> BatchStatus {
        *lock(&self.status)
    }

    fn set_batch_status(&self, status: BatchStatus) {
        *lock(&self.status) = status;
    }

    fn record_progress(&self, id: &TaskId, update: ProgressUpdate) {
        lock(&self.progress).insert(id.clone(), update.percent);
        lock(&self.speed).insert(id.clone(), update.speed);
        lock(&self.eta).insert(id.clone(), update.eta);
    }

    /// Terminal statuses are written exactly once and never reopened.
    fn set_task_status(&self, id: &TaskId, status: TaskStatus) {
        let mut statuses = lock(&self.statuses);
        match statuses.get(id) {
            Some(current) if current.is_terminal() => {}
            _ => {
                statuses.insert(id.clone(), status);
            }
        }
    }

    fn task_status(&self, id: &TaskId) -> Option<TaskStatus> {
        lock(&self.statuses).get(id).copied()
    }

    fn cancel_token(&self, id: &TaskId) -> CancellationToken {
        lock(&self.cancels)
            .get(id)
            .cloned()
            .unwrap_or_else(CancellationToken::new)
    }

    fn cancel_task(&self, id: &TaskId) {
        if let Some(token) = lock(&self.cancels).get(id) {
            token.cancel();
        }
    }

    fn cancel_all(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        for token in lock(&self.cancels).values() {
            token.cancel();
        }
        self.reset_progress();
        self.set_batch_status(BatchStatus::Idle);
    }

    fn reset_progress(&self) {
        lock(&self.progress).clear();
        lock(&self.speed).clear();
        lock(&self.eta).clear();
    }

    fn was_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Live view over a running batch. Getters are snapshots; the
/// orchestrator keeps exclusive ownership of the underlying state.
pub struct BatchHandle {
    tasks: Vec<TaskSummary>,
    state: Arc<BatchState>,
    driver: Option<JoinHandle<BatchOutcome>>,
}

impl BatchHandle {
    /// Tasks in submission order.
    pub fn tasks(&self) -> &[TaskSummary] {
        &self.tasks
    }

    pub fn status(&self) -> BatchStatus {
        self.state.batch_status()
    }

    pub fn progress(&self) -> HashMap<TaskId, f64> {
        lock(&self.state.progress).clone()
    }

    pub fn speed(&self) -> HashMap<TaskId, f64> {
        lock(&self.state.speed).clone()
    }

    pub fn eta(&self) -> HashMap<TaskId, Option<f64>> {
        lock(&self.state.eta).clone()
    }

    pub fn task_statuses(&self) -> Vec<(TaskId, TaskStatus)> {
        self.tasks
            .iter()
            .map(|task| {
                let status = self
                    .state
                    .task_status(&task.id)
                    .unwrap_or(TaskStatus::Pending);
                (task.id.clone(), status)
            })
            .collect()
    }

    /// Aborts one task's in-flight transfer. Tasks already terminal
    /// are unaffected.
    pub fn cancel_task(&self, id: &TaskId) {
        self.state.cancel_task(id);
    }

    /// Aborts every active transfer, clears progress/speed/ETA and
    /// returns the batch to idle.
    pub fn cancel_all(&self) {
        self.state.cancel_all();
    }

    /// Waits for the queue to drain and returns the aggregate report.
    /// The handle's getters stay usable afterwards.
    pub async fn join(&mut self) -> Result<BatchOutcome> {
        let driver = self
            .driver
            .take()
            .ok_or_else(|| MontageError::Unknown("batch already joined".to_string()))?;
        driver
            .await
            .map_err(|e| MontageError::Unknown(format!("batch driver failed: {}", e)))
    }
}

struct TransferEnv {
    http: Client,
    endpoint: String,
    config: ClientConfig,
    ctx: BatchContext,
    state: Arc<BatchState>,
    events: Option<mpsc::Sender<TaskEvent>>,
}

/// Client side of the upload pipeline: validates files, then drives a
/// bounded-concurrency queue of direct or chunked transfers against
/// the upload endpoint.
pub struct Uploader {
    http: Client,
    config: ClientConfig,
}

impl Uploader {
    pub fn new(config: ClientConfig) -> Result<Self> {
        Url::parse(&config.endpoint)
            .map_err(|e| MontageError::ConfigError(format!("invalid endpoint URL: {}", e)))?;
        let http = Client::builder().timeout(config.request_timeout).build()?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Stats files and partitions them against the configured size
    /// and format constraints. Unreadable paths become rejections.
    pub fn validate_paths<P: AsRef<Path>>(&self, paths: &[P]) -> (Vec<Candidate>, Vec<Rejection>) {
        let mut candidates = Vec::new();
        let mut rejections = Vec::new();
        for path in paths {
            match Candidate::from_path(path) {
                Ok(candidate) => candidates.push(candidate),
                Err(err) => rejections.push(Rejection {
                    file_name: path.as_ref().display().to_string(),
                    reason: err.to_string(),
                }),
            }
        }
        let (accepted, mut rejected) = partition(
            candidates,
            self.config.max_file_size_mb,
            &self.config.accepted_formats,
        );
        rejections.append(&mut rejected);
        (accepted, rejections)
    }

    /// Creates one task per file and starts the queue driver. Events,
    /// when a sender is given, mirror what the handle's getters expose.
    pub fn start_batch(
        &self,
        files: Vec<Candidate>,
        ctx: BatchContext,
        events: Option<mpsc::Sender<TaskEvent>>,
    ) -> BatchHandle {
        let tasks: Vec<TaskSummary> = files
            .iter()
            .map(|c| TaskSummary {
                id: c.task_id(),
                file_name: c.file_name.clone(),
                size: c.size,
            })
            .collect();
        let state = Arc::new(BatchState::new(&tasks));

        if files.is_empty() {
            let driver = tokio::spawn(async { BatchOutcome::default() });
            return BatchHandle {
                tasks,
                state,
                driver: Some(driver),
            };
        }

        state.set_batch_status(BatchStatus::Uploading);
        let env = Arc::new(TransferEnv {
            http: self.http.clone(),
            endpoint: self.config.endpoint.clone(),
            config: self.config.clone(),
            ctx,
            state: state.clone(),
            events,
        });
        let driver = tokio::spawn(run_batch(env, files));

        BatchHandle {
            tasks,
            state,
            driver: Some(driver),
        }
    }
}

async fn send_event(events: &Option<mpsc::Sender<TaskEvent>>, event: TaskEvent) {
    if let Some(tx) = events {
        let _ = tx.send(event).await;
    }
}

fn progress_callback(env: Arc<TransferEnv>, id: TaskId) -> ProgressCallback {
    Arc::new(move |update| {
        env.state.record_progress(&id, update);
        if let Some(tx) = &env.events {
            let _ = tx.try_send(TaskEvent {
                task: id.clone(),
                phase: TaskPhase::Progress(update),
            });
        }
    })
}

async fn run_batch(env: Arc<TransferEnv>, files: Vec<Candidate>) -> BatchOutcome {
    let semaphore = Arc::new(Semaphore::new(env.config.max_concurrent.max(1)));

    // All task futures start queued at once; the semaphore's FIFO
    // permits keep at most `max_concurrent` transfers in flight and
    // launch order equal to submission order. A slot frees whenever a
    // transfer settles, success or not.
    let mut inflight = FuturesUnordered::new();
    for candidate in files {
        inflight.push(run_task(env.clone(), semaphore.clone(), candidate));
    }

    let mut successes = Vec::new();
    let mut failures = Vec::new();

    while let Some((summary, result)) = inflight.next().await {
        match result {
            Ok(outcome) => {
                env.state.set_task_status(&summary.id, TaskStatus::Completed);
                send_event(
                    &env.events,
                    TaskEvent {
                        task: summary.id.clone(),
                        phase: TaskPhase::Completed(outcome.clone()),
                    },
                )
                .await;
                successes.push(TaskSuccess {
                    task: summary,
                    outcome,
                });
            }
            Err(err) => {
                let cancelled = err.is_cancelled();
                let error = err.to_string();
                env.state.set_task_status(&summary.id, TaskStatus::Error);
                send_event(
                    &env.events,
                    TaskEvent {
                        task: summary.id.clone(),
                        phase: TaskPhase::Failed {
                            error: error.clone(),
                            cancelled,
                        },
                    },
                )
                .await;
                failures.push(TaskFailure {
                    task: summary,
                    error,
                    cancelled,
                });
            }
        }
    }

    let status = if env.state.was_cancelled() {
        env.state.reset_progress();
        env.state.set_batch_status(BatchStatus::Idle);
        BatchStatus::Idle
    } else if !successes.is_empty() {
        env.state.set_batch_status(BatchStatus::Completed);
        BatchStatus::Completed
    } else {
        env.state.set_batch_status(BatchStatus::Error);
        BatchStatus::Error
    };

    BatchOutcome {
        successes,
        failures,
        status,
    }
}

async fn run_task(
    env: Arc<TransferEnv>,
    semaphore: Arc<Semaphore>,
    candidate: Candidate,
) -> (TaskSummary, Result<UploadOutcome>) {
    let summary = TaskSummary {
        id: candidate.task_id(),
        file_name: candidate.file_name.clone(),
        size: candidate.size,
    };
    let result = transfer(env, semaphore, &candidate, &summary.id).await;
    (summary, result)
}

async fn transfer(
    env: Arc<TransferEnv>,
    semaphore: Arc<Semaphore>,
    candidate: &Candidate,
    id: &TaskId,
) -> Result<UploadOutcome> {
    let cancel = env.state.cancel_token(id);

    let permit = tokio::select! {
        _ = cancel.cancelled() => return Err(MontageError::Cancelled),
        permit = semaphore.clone().acquire_owned() => {
            permit.map_err(|_| MontageError::Unknown("semaphore closed".to_string()))?
        }
    };
    let _permit = permit;

    env.state.set_task_status(id, TaskStatus::Uploading);
    send_event(
        &env.events,
        TaskEvent {
            task: id.clone(),
            phase: TaskPhase::Started {
                total_bytes: candidate.size,
            },
        },
    )
    .await;

    let tracker = Arc::new(
        ProgressTracker::new(candidate.size)
            .with_callback(progress_callback(env.clone(), id.clone())),
    );

    if candidate.size >= env.config.chunk_threshold {
        chunked_upload(&env, candidate, &tracker, &cancel).await
    } else {
        direct_upload(&env, candidate, &tracker, &cancel).await
    }
}

// =======================================================================
// Direct path
// =======================================================================

async fn direct_upload(
    env: &TransferEnv,
    candidate: &Candidate,
    tracker: &Arc<ProgressTracker>,
    cancel: &CancellationToken,
) -> Result<UploadOutcome> {
    let file = File::open(&candidate.path).await?;
    let framed = FramedRead::new(file, BytesCodec::new()).map_ok(|b| b.freeze());
    let counted = ProgressStream::new(framed, tracker.clone());

    let part = multipart::Part::stream_with_length(Body::wrap_stream(counted), candidate.size)
        .file_name(candidate.file_name.clone())
        .mime_str(&candidate.mime_type)?;

    let mut form = multipart::Form::new()
        .part("media", part)
        .text("projectId", env.ctx.project_id.clone());
    if let Some(email) = &env.ctx.user_email {
        form = form.text("userEmail", email.clone());
    }
    if let Some(chapter) = &env.ctx.chapter {
        form = form.text("chapter", chapter.clone());
    }
    if let Some(style) = &env.ctx.chapter_style {
        form = form.text("chapterStyle", style.to_string());
    }

    let request = env.http.post(&env.endpoint).multipart(form).send();
    let response = tokio::select! {
        _ = cancel.cancelled() => return Err(MontageError::Cancelled),
        response = request => response?,
    };

    let status = response.status();
    let body = response.text().await?;
    parse_upload_response(status, &body, &candidate.file_name)
}

// =======================================================================
// Chunked path
// =======================================================================

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct InitRequest {
    file_name: String,
    file_size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    file_type: Option<String>,
    total_chunks: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    project_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    user_email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    chapter: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    chapter_style: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InitResponse {
    upload_id: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct FinalizeRequest {
    upload_id: String,
    file_name: String,
}

fn chunk_count(size: u64, chunk_size: u64) -> u32 {
    size.div_ceil(chunk_size.max(1)).max(1) as u32
}

async fn chunked_upload(
    env: &TransferEnv,
    candidate: &Candidate,
    tracker: &Arc<ProgressTracker>,
    cancel: &CancellationToken,
) -> Result<UploadOutcome> {
    let chunk_size = env.config.chunk_size.max(1);
    let total_chunks = chunk_count(candidate.size, chunk_size);
    let base = env.endpoint.trim_end_matches('/').to_string();
    let init_url = format!("{}/init", base);
    let chunk_url = format!("{}/chunk", base);
    let finalize_url = format!("{}/finalize", base);

    let init_request = InitRequest {
        file_name: candidate.file_name.clone(),
        file_size: candidate.size,
        file_type: Some(candidate.mime_type.clone()),
        total_chunks,
        project_id: Some(env.ctx.project_id.clone()),
        user_email: env.ctx.user_email.clone(),
        chapter: env.ctx.chapter.clone(),
        chapter_style: env.ctx.chapter_style.clone(),
    };

    let init: InitResponse = with_retry(env.config.max_retries, cancel, || {
        let http = env.http.clone();
        let url = init_url.clone();
        let body = init_request.clone();
        async move {
            let response = http.post(&url).json(&body).send().await?;
            let status = response.status();
            let text = response.text().await?;
            if !status.is_success() {
                return Err(server_error(status, &text));
            }
            serde_json::from_str(&text)
                .map_err(|_| MontageError::InvalidResponse(excerpt(&text, 200)))
        }
    })
    .await?;
    let upload_id = init.upload_id;

    let mut file = File::open(&candidate.path).await?;

    // Chunks go out strictly in index order, each acknowledged before
    // the next begins.
    for index in 0..total_chunks {
        if cancel.is_cancelled() {
            return Err(MontageError::Cancelled);
        }

        let offset = index as u64 * chunk_size;
        let len = chunk_size.min(candidate.size.saturating_sub(offset)) as usize;
        file.seek(SeekFrom::Start(offset)).await?;
        let mut buffer = vec![0u8; len];
        file.read_exact(&mut buffer).await?;
        let data = Bytes::from(buffer);

        with_retry(env.config.max_retries, cancel, || {
            let http = env.http.clone();
            let url = chunk_url.clone();
            let data = data.clone();
            let upload_id = upload_id.clone();
            let file_name = candidate.file_name.clone();
            async move {
                let part = multipart::Part::bytes(data.to_vec()).file_name(file_name.clone());
                let form = multipart::Form::new()
                    .part("chunk", part)
                    .text("uploadId", upload_id)
                    .text("chunkIndex", index.to_string())
                    .text("totalChunks", total_chunks.to_string())
                    .text("fileName", file_name);
                let response = http.post(&url).multipart(form).send().await?;
                let status = response.status();
                if !status.is_success() {
                    let text = response.text().await.unwrap_or_default();
                    return Err(server_error(status, &text));
                }
                Ok(())
            }
        })
        .await?;

        tracker.advance_to(offset + len as u64);
    }

    // Progress already reads 100 here; finalize only confirms assembly.
    let finalize_request = FinalizeRequest {
        upload_id: upload_id.clone(),
        file_name: candidate.file_name.clone(),
    };
    with_retry(env.config.max_retries, cancel, || {
        let http = env.http.clone();
        let url = finalize_url.clone();
        let body = finalize_request.clone();
        let file_name = candidate.file_name.clone();
        async move {
            let response = http.post(&url).json(&body).send().await?;
            let status = response.status();
            let text = response.text().await?;
            parse_upload_response(status, &text, &file_name)
        }
    })
    .await
}

/// Retries one phase call up to `max_attempts` times. Only the failed
/// call is re-issued, never the rest of the sequence, and a cancelled
/// task stops retrying immediately.
async fn with_retry<T, F, Fut>(max_attempts: u32, cancel: &CancellationToken, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let attempts = max_attempts.max(1);
    let mut last_error: Option<MontageError> = None;

    for _ in 0..attempts {
        if cancel.is_cancelled() {
            return Err(MontageError::Cancelled);
        }
        let result = tokio::select! {
            _ = cancel.cancelled() => Err(MontageError::Cancelled),
            result = op() => result,
        };
        match result {
            Ok(value) => return Ok(value),
            Err(MontageError::Cancelled) => return Err(MontageError::Cancelled),
            Err(err) => {
                log::warn!("upload phase call failed: {}", err);
                last_error = Some(err);
            }
        }
    }

    Err(MontageError::RetryExhausted {
        attempts,
        last_error: last_error.map(|e| e.to_string()).unwrap_or_default(),
    })
}

// =======================================================================
// Response handling
// =======================================================================

fn parse_upload_response(
    status: reqwest::StatusCode,
    body: &str,
    file_name: &str,
) -> Result<UploadOutcome> {
    if !status.is_success() {
        return Err(server_error(status, body));
    }
    if body.trim().is_empty() {
        return Err(MontageError::InvalidResponse(
            "empty response body".to_string(),
        ));
    }
    let value: Value = serde_json::from_str(body)
        .map_err(|_| MontageError::InvalidResponse(excerpt(body, 100)))?;
    normalize_response(&value, file_name)
        .ok_or_else(|| MontageError::InvalidResponse("unrecognized response shape".to_string()))
}

/// Prefers the server's structured error message, then a raw-body
/// excerpt, then a status-derived fallback.
fn server_error(status: reqwest::StatusCode, body: &str) -> MontageError {
    if let Ok(value) = serde_json::from_str::<Value>(body) {
        let message = value
            .get("error")
            .and_then(Value::as_str)
            .or_else(|| value.get("message").and_then(Value::as_str));
        if let Some(message) = message {
            return MontageError::ServerError {
                status: status.as_u16(),
                message: message.to_string(),
            };
        }
    }
    let message = if body.trim().is_empty() {
        format!("upload failed with status {}", status)
    } else {
        excerpt(body, 200)
    };
    MontageError::ServerError {
        status: status.as_u16(),
        message,
    }
}

fn excerpt(text: &str, limit: usize) -> String {
    text.chars().take(limit).collect()
}
