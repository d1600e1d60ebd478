//! Asynchronous task engine for tool invocations.
//!
//! A single worker owns a FIFO queue of tasks and a set of pending
//! cancellations. Tool handlers run concurrently with the read loop; their
//! progress and final results funnel through the serialised outbox. A task
//! cancelled before completion emits nothing at all.

use parking_lot::Mutex;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::error::ProtocolError;
use crate::protocol::{ProgressParams, ProgressToken, RequestId, ServerMessage};
use crate::server::registry::ToolHandler;
use crate::transport::{Origin, Outbox};

/// Task lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Queued,
    Running,
    Finished,
    Cancelled,
}

type StatusCell = Arc<Mutex<TaskStatus>>;

/// Per-invocation context handed to a tool handler.
///
/// Carries the progress reporter and the cooperative cancellation flag.
/// Both may be used from any task; writes serialise through the outbox.
#[derive(Clone)]
pub struct ToolContext {
    request_id: RequestId,
    progress_token: Option<ProgressToken>,
    origin: Origin,
    outbox: Outbox,
    cancel: CancellationToken,
}

impl ToolContext {
    pub fn request_id(&self) -> &RequestId {
        &self.request_id
    }

    /// True once the peer cancelled this invocation. Handlers should poll
    /// this (or await [`ToolContext::cancelled`]) and abort early.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves when the invocation is cancelled.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await;
    }

    /// Emits a progress notification. A no-op when the originating request
    /// carried no progress token, and after cancellation.
    pub async fn progress(&self, progress: i64, total: i64) {
        let Some(token) = &self.progress_token else {
            return;
        };
        if self.cancel.is_cancelled() {
            return;
        }
        debug!("Notifying progress: {progress}/{total}");
        let params = ProgressParams {
            progress_token: token.clone(),
            progress,
            total,
        };
        match ServerMessage::progress(&params) {
            Ok(message) => {
                if let Err(e) = self.outbox.send(message, self.origin).await {
                    error!("Failed to send progress notification: {e}");
                }
            }
            Err(e) => error!("Failed to build progress notification: {e}"),
        }
    }

    #[cfg(test)]
    fn for_test(outbox: Outbox) -> Self {
        Self {
            request_id: RequestId::Number(0),
            progress_token: None,
            origin: Origin::Stream,
            outbox,
            cancel: CancellationToken::new(),
        }
    }
}

/// One queued tool invocation: the owning request, its reply route and the
/// handler bound to it.
pub struct ToolTask {
    request_id: RequestId,
    progress_token: Option<ProgressToken>,
    origin: Origin,
    handler: Arc<dyn ToolHandler>,
    arguments: Value,
    status: StatusCell,
}

impl ToolTask {
    pub fn new(
        request_id: RequestId,
        progress_token: Option<ProgressToken>,
        origin: Origin,
        handler: Arc<dyn ToolHandler>,
        arguments: Value,
    ) -> Self {
        Self {
            request_id,
            progress_token,
            origin,
            handler,
            arguments,
            status: Arc::new(Mutex::new(TaskStatus::Queued)),
        }
    }

    pub fn status_handle(&self) -> StatusCell {
        Arc::clone(&self.status)
    }
}

/// An executing task as tracked by the worker.
struct RunningTask {
    request_id: RequestId,
    status: StatusCell,
    cancel: CancellationToken,
}

struct EngineState {
    queue: VecDeque<ToolTask>,
    cancel_requests: Vec<RequestId>,
    running: Vec<RunningTask>,
    stopped: bool,
}

struct EngineInner {
    state: Mutex<EngineState>,
    notify: Notify,
    outbox: Outbox,
}

/// The task engine handle. Cloneable; all operations are thread-safe.
#[derive(Clone)]
pub struct TaskEngine {
    inner: Arc<EngineInner>,
    worker: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl TaskEngine {
    pub fn new(outbox: Outbox) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                state: Mutex::new(EngineState {
                    queue: VecDeque::new(),
                    cancel_requests: Vec::new(),
                    running: Vec::new(),
                    stopped: false,
                }),
                notify: Notify::new(),
                outbox,
            }),
            worker: Arc::new(Mutex::new(None)),
        }
    }

    /// Starts the worker. Idempotent.
    pub fn start(&self) {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return;
        }
        info!("Task engine worker starting");
        let inner = Arc::clone(&self.inner);
        *worker = Some(tokio::spawn(worker_loop(inner)));
    }

    /// Enqueues a task and wakes the worker. Fails once the engine stopped.
    pub fn submit(&self, task: ToolTask) -> Result<(), ProtocolError> {
        {
            let mut state = self.inner.state.lock();
            if state.stopped {
                return Err(ProtocolError::InternalError("task engine stopped".into()));
            }
            state.queue.push_back(task);
        }
        self.inner.notify.notify_one();
        Ok(())
    }

    /// Requests cooperative cancellation for a request id. Idempotent;
    /// unknown ids are ignored when the worker applies the set.
    pub fn cancel(&self, request_id: RequestId) {
        {
            let mut state = self.inner.state.lock();
            if state.stopped {
                return;
            }
            if !state.cancel_requests.contains(&request_id) {
                state.cancel_requests.push(request_id);
            }
        }
        self.inner.notify.notify_one();
    }

    /// Stops the engine: cancels every in-flight and queued task and shuts
    /// the worker down.
    pub fn stop(&self) {
        {
            let mut state = self.inner.state.lock();
            if state.stopped {
                return;
            }
            state.stopped = true;
            for task in state.running.drain(..) {
                task.cancel.cancel();
                *task.status.lock() = TaskStatus::Cancelled;
            }
            while let Some(task) = state.queue.pop_front() {
                *task.status.lock() = TaskStatus::Cancelled;
            }
            state.cancel_requests.clear();
        }
        self.inner.notify.notify_one();
    }
}

async fn worker_loop(inner: Arc<EngineInner>) {
    info!("Task engine worker started");

    loop {
        // Arm the notification before checking state so a wakeup between the
        // check and the await is not lost.
        loop {
            let notified = inner.notify.notified();
            {
                let state = inner.state.lock();
                if state.stopped
                    || !state.queue.is_empty()
                    || !state.cancel_requests.is_empty()
                    || state
                        .running
                        .iter()
                        .any(|t| *t.status.lock() != TaskStatus::Running)
                {
                    break;
                }
            }
            notified.await;
        }

        let runnable = {
            let mut state = inner.state.lock();
            if state.stopped {
                break;
            }

            // Apply cancellations: in-flight tasks get their token
            // triggered; still-queued tasks never execute at all.
            let cancels = std::mem::take(&mut state.cancel_requests);
            for id in &cancels {
                for task in &state.running {
                    if task.request_id == *id {
                        debug!("Cancelling task for request {id}");
                        task.cancel.cancel();
                        *task.status.lock() = TaskStatus::Cancelled;
                    }
                }
            }

            // Evict completed tasks from the cache.
            state.running.retain(|task| {
                let status = *task.status.lock();
                status != TaskStatus::Finished && status != TaskStatus::Cancelled
            });

            // Drain the queue.
            let mut runnable = Vec::new();
            while let Some(task) = state.queue.pop_front() {
                if cancels.contains(&task.request_id) {
                    *task.status.lock() = TaskStatus::Cancelled;
                    continue;
                }
                runnable.push(task);
            }
            runnable
        };

        for task in runnable {
            let running = execute(&inner, task);
            inner.state.lock().running.push(running);
        }
    }

    info!("Task engine worker terminated");
}

/// Spawns the handler future for one task and returns its tracking entry.
fn execute(inner: &Arc<EngineInner>, task: ToolTask) -> RunningTask {
    let cancel = CancellationToken::new();
    *task.status.lock() = TaskStatus::Running;

    let ctx = ToolContext {
        request_id: task.request_id.clone(),
        progress_token: task.progress_token,
        origin: task.origin,
        outbox: inner.outbox.clone(),
        cancel: cancel.clone(),
    };

    let running = RunningTask {
        request_id: task.request_id.clone(),
        status: Arc::clone(&task.status),
        cancel: cancel.clone(),
    };

    let handler = task.handler;
    let arguments = task.arguments;
    let request_id = task.request_id;
    let origin = task.origin;
    let status = task.status;
    let outbox = inner.outbox.clone();
    let notify = Arc::clone(inner);

    tokio::spawn(async move {
        let result = handler.call(ctx, arguments).await;

        // Cancellation is client-initiated silence: no final reply.
        if cancel.is_cancelled() || *status.lock() == TaskStatus::Cancelled {
            debug!("Suppressing result of cancelled request {request_id}");
            return;
        }

        let message = match result {
            Ok(result) => match ServerMessage::response(request_id.clone(), &result) {
                Ok(message) => message,
                Err(e) => {
                    error!("Failed to serialise tool result: {e}");
                    ServerMessage::error(
                        request_id.clone(),
                        &ProtocolError::InternalError(e.to_string().into()),
                    )
                }
            },
            Err(tool_error) => {
                error!("Tool execution failed for request {request_id}: {tool_error}");
                ServerMessage::error(request_id.clone(), &tool_error.into_protocol())
            }
        };

        if let Err(e) = outbox.send(message, origin).await {
            error!("Failed to send tool reply for request {request_id}: {e}");
        }
        *status.lock() = TaskStatus::Finished;
        notify.notify.notify_one();
    });

    running
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ToolError;
    use crate::protocol::{CallToolResult, Tool};
    use crate::testutils::{ChannelTransport, ChannelTransportHandle};
    use async_trait::async_trait;
    use serde_json::json;
    use std::time::Duration;

    fn outbox() -> (Outbox, ChannelTransportHandle) {
        let (transport, handle) = ChannelTransport::pair();
        (Outbox::new(transport), handle)
    }

    struct EchoTool;

    #[async_trait]
    impl ToolHandler for EchoTool {
        fn definition(&self) -> Tool {
            Tool {
                name: "echo".into(),
                description: "echo".into(),
                input_schema: json!({"type": "object"}),
            }
        }

        async fn call(
            &self,
            _ctx: ToolContext,
            arguments: Value,
        ) -> Result<CallToolResult, ToolError> {
            let message = arguments["message"].as_str().unwrap_or_default();
            Ok(CallToolResult::text(message))
        }
    }

    /// Waits for cancellation; reports progress first when a token is set.
    struct SlowTool;

    #[async_trait]
    impl ToolHandler for SlowTool {
        fn definition(&self) -> Tool {
            Tool {
                name: "slow".into(),
                description: "slow".into(),
                input_schema: json!({"type": "object"}),
            }
        }

        async fn call(
            &self,
            ctx: ToolContext,
            _arguments: Value,
        ) -> Result<CallToolResult, ToolError> {
            ctx.progress(1, 2).await;
            tokio::select! {
                _ = ctx.cancelled() => {}
                _ = tokio::time::sleep(Duration::from_secs(5)) => {}
            }
            Ok(CallToolResult::text("done"))
        }
    }

    fn task(id: i64, token: Option<ProgressToken>, handler: Arc<dyn ToolHandler>) -> ToolTask {
        ToolTask::new(
            RequestId::Number(id),
            token,
            Origin::Stream,
            handler,
            json!({"message": "hi"}),
        )
    }

    #[tokio::test]
    async fn test_submit_emits_exactly_one_reply() {
        let (outbox, mut handle) = outbox();
        let engine = TaskEngine::new(outbox);
        engine.start();

        engine.submit(task(3, None, Arc::new(EchoTool))).unwrap();

        let frame = tokio::time::timeout(Duration::from_secs(2), handle.outbound_rx.recv())
            .await
            .unwrap()
            .unwrap();
        let value: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value["id"], 3);
        assert_eq!(value["result"]["content"][0]["text"], "hi");

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(handle.outbound_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_cancelled_task_is_silent() {
        let (outbox, mut handle) = outbox();
        let engine = TaskEngine::new(outbox);
        engine.start();

        let slow = task(7, None, Arc::new(SlowTool));
        let status = slow.status_handle();
        engine.submit(slow).unwrap();

        // Let the worker pick the task up, then cancel it.
        tokio::time::sleep(Duration::from_millis(50)).await;
        engine.cancel(RequestId::Number(7));
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(*status.lock(), TaskStatus::Cancelled);
        assert!(handle.outbound_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_progress_requires_token() {
        let (outbox, mut handle) = outbox();
        let engine = TaskEngine::new(outbox);
        engine.start();

        engine
            .submit(task(
                9,
                Some(ProgressToken::String("tok".into())),
                Arc::new(SlowTool),
            ))
            .unwrap();

        let frame = tokio::time::timeout(Duration::from_secs(2), handle.outbound_rx.recv())
            .await
            .unwrap()
            .unwrap();
        let value: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value["method"], "notifications/progress");
        assert_eq!(value["params"]["progressToken"], "tok");
        assert_eq!(value["params"]["progress"], 1);

        engine.cancel(RequestId::Number(9));
    }

    #[tokio::test]
    async fn test_progress_without_token_is_noop() {
        let (outbox, mut handle) = outbox();
        let ctx = ToolContext::for_test(outbox);
        ctx.progress(1, 10).await;
        assert!(handle.outbound_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_submit_after_stop_fails() {
        let (outbox, _handle) = outbox();
        let engine = TaskEngine::new(outbox);
        engine.start();
        engine.stop();

        let err = engine.submit(task(1, None, Arc::new(EchoTool))).unwrap_err();
        assert_eq!(err.code(), -32603);
    }

    #[tokio::test]
    async fn test_stop_cancels_queued_tasks() {
        let (outbox, mut handle) = outbox();
        // No worker started: tasks stay queued.
        let engine = TaskEngine::new(outbox);

        let queued = task(4, None, Arc::new(EchoTool));
        let status = queued.status_handle();
        engine.submit(queued).unwrap();
        engine.stop();

        assert_eq!(*status.lock(), TaskStatus::Cancelled);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(handle.outbound_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_cancel_is_idempotent_and_tolerates_unknown_ids() {
        let (outbox, _handle) = outbox();
        let engine = TaskEngine::new(outbox);
        engine.start();

        engine.cancel(RequestId::Number(123));
        engine.cancel(RequestId::Number(123));
        // The worker simply drops unknown ids.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(engine.inner.state.lock().cancel_requests.is_empty());
    }
}
