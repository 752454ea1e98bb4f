//! In-memory `GenerationService` for exercising the workflow without a server.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::api::{ApiError, GenerationService};
use crate::types::{GenerationRequest, TaskHandle, TaskStatus};

type QueryHook = Box<dyn Fn(usize) + Send + Sync>;

pub struct ScriptedService {
    submissions: Mutex<VecDeque<Result<TaskHandle, ApiError>>>,
    statuses: Mutex<VecDeque<Result<TaskStatus, ApiError>>>,
    submitted: Mutex<Vec<GenerationRequest>>,
    queried: Mutex<Vec<TaskHandle>>,
    queries: AtomicUsize,
    hook: Option<QueryHook>,
}

impl ScriptedService {
    /// Statuses are replayed in order; once exhausted every query reports pending.
    pub fn with_statuses(statuses: Vec<Result<TaskStatus, ApiError>>) -> Self {
        Self {
            submissions: Mutex::new(VecDeque::new()),
            statuses: Mutex::new(statuses.into()),
            submitted: Mutex::new(Vec::new()),
            queried: Mutex::new(Vec::new()),
            queries: AtomicUsize::new(0),
            hook: None,
        }
    }

    pub fn submit_reply(self, reply: Result<TaskHandle, ApiError>) -> Self {
        self.submissions.lock().unwrap().push_back(reply);
        self
    }

    /// Runs `hook` with the 1-based query number while that query is in flight.
    pub fn on_query(mut self, hook: impl Fn(usize) + Send + Sync + 'static) -> Self {
        self.hook = Some(Box::new(hook));
        self
    }

    pub fn unavailable() -> ApiError {
        ApiError::Status {
            endpoint: "query_result".into(),
            status: 503,
            message: "Service Unavailable".into(),
        }
    }

    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    pub fn submitted(&self) -> Vec<GenerationRequest> {
        self.submitted.lock().unwrap().clone()
    }

    pub fn queried(&self) -> Vec<TaskHandle> {
        self.queried.lock().unwrap().clone()
    }
}

#[async_trait]
impl GenerationService for ScriptedService {
    async fn release_task(&self, request: &GenerationRequest) -> Result<TaskHandle, ApiError> {
        self.submitted.lock().unwrap().push(request.clone());
        let count = self.submitted.lock().unwrap().len();
        self.submissions
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(TaskHandle::new(format!("task-{count}"))))
    }

    async fn query_task(&self, handle: &TaskHandle) -> Result<TaskStatus, ApiError> {
        let n = self.queries.fetch_add(1, Ordering::SeqCst) + 1;
        self.queried.lock().unwrap().push(handle.clone());
        if let Some(hook) = &self.hook {
            hook(n);
        }
        self.statuses.lock().unwrap().pop_front().unwrap_or(Ok(TaskStatus::Pending))
    }
}
