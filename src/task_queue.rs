//! 长任务的提交与进度查询
//!
//! 每个提交的任务在一个阻塞线程里整体顺序执行，
//! 并发度由信号量限制；进度保存在进程内存中，客户端轮询获取。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tracing::{error, info};
use uuid::Uuid;

use crate::error::{CutterError, CutterResult};

pub type TaskId = Uuid;

/// 任务状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Succeeded | TaskState::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Pending => "pending",
            TaskState::Running => "running",
            TaskState::Succeeded => "succeeded",
            TaskState::Failed => "failed",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// 轮询得到的任务进度
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskProgress {
    pub state: TaskState,
    /// 给用户看的状态描述
    pub message: String,
    /// 成功后的结果
    pub result: Option<serde_json::Value>,
    pub updated_at: DateTime<Utc>,
}

impl TaskProgress {
    fn new(state: TaskState, message: impl Into<String>) -> Self {
        Self {
            state,
            message: message.into(),
            result: None,
            updated_at: Utc::now(),
        }
    }
}

type ProgressStore = Arc<RwLock<HashMap<TaskId, TaskProgress>>>;

/// 任务内部用来上报进度
///
/// 进入终态后的上报会被忽略。
#[derive(Clone)]
pub struct ProgressReporter {
    id: TaskId,
    store: ProgressStore,
}

impl ProgressReporter {
    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn report(&self, message: &str) {
        self.update(|p| {
            p.state = TaskState::Running;
            p.message = message.to_string();
        });
    }

    fn update(&self, f: impl FnOnce(&mut TaskProgress)) {
        let mut store = self.store.write().unwrap_or_else(|e| e.into_inner());
        if let Some(progress) = store.get_mut(&self.id) {
            if progress.state.is_terminal() {
                return;
            }
            f(progress);
            progress.updated_at = Utc::now();
        }
    }
}

/// 一个完整的工作单元
pub type TaskFn = Box<dyn FnOnce(&ProgressReporter) -> CutterResult<serde_json::Value> + Send + 'static>;

/// 异步任务提交能力：提交后得到任务 id，按 id 轮询进度
pub trait TaskQueue: Send + Sync {
    fn submit(&self, name: &str, task: TaskFn) -> TaskId;
    fn poll(&self, id: TaskId) -> Option<TaskProgress>;
}

/// 进程内的任务队列，基于 tokio 阻塞线程池
pub struct LocalTaskQueue {
    runtime: Handle,
    workers: Arc<Semaphore>,
    store: ProgressStore,
}

impl LocalTaskQueue {
    /// 需要在 tokio 运行时中创建
    pub fn new(workers: usize) -> CutterResult<Self> {
        let runtime = Handle::try_current().map_err(|e| CutterError::Task(format!("没有可用的 tokio 运行时: {}", e)))?;
        Ok(Self {
            runtime,
            workers: Arc::new(Semaphore::new(workers.max(1))),
            store: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    /// 等待任务进入终态
    pub async fn wait(&self, id: TaskId, interval: Duration) -> Option<TaskProgress> {
        loop {
            let progress = self.poll(id)?;
            if progress.state.is_terminal() {
                return Some(progress);
            }
            tokio::time::sleep(interval).await;
        }
    }
}

impl TaskQueue for LocalTaskQueue {
    fn submit(&self, name: &str, task: TaskFn) -> TaskId {
        let id = Uuid::new_v4();
        {
            let mut store = self.store.write().unwrap_or_else(|e| e.into_inner());
            store.insert(id, TaskProgress::new(TaskState::Pending, "等待执行..."));
        }

        let reporter = ProgressReporter {
            id,
            store: self.store.clone(),
        };
        let workers = self.workers.clone();
        let name = name.to_string();
        info!("📥 [任务队列] 提交任务 {} ({})", id, name);

        self.runtime.spawn(async move {
            let _permit = match workers.acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => {
                    finish(&reporter, Err(CutterError::Task(format!("任务队列已关闭: {}", e))));
                    return;
                }
            };
            reporter.report("任务开始执行...");
            let start = std::time::Instant::now();

            let worker = reporter.clone();
            let outcome = tokio::task::spawn_blocking(move || task(&worker))
                .await
                .unwrap_or_else(|e| Err(CutterError::Task(format!("任务异常终止: {}", e))));

            match &outcome {
                Ok(_) => info!(
                    "✅ [任务队列] 任务 {} ({}) 完成，耗时: {:.2}秒",
                    id,
                    name,
                    start.elapsed().as_secs_f64()
                ),
                Err(e) => error!("❌ [任务队列] 任务 {} ({}) 失败: {}", id, name, e),
            }
            finish(&reporter, outcome);
        });
        id
    }

    fn poll(&self, id: TaskId) -> Option<TaskProgress> {
        let store = self.store.read().unwrap_or_else(|e| e.into_inner());
        store.get(&id).cloned()
    }
}

fn finish(reporter: &ProgressReporter, outcome: CutterResult<serde_json::Value>) {
    reporter.update(|p| match outcome {
        Ok(value) => {
            p.state = TaskState::Succeeded;
            p.message = "任务完成".to_string();
            p.result = Some(value);
        }
        Err(e) => {
            p.state = TaskState::Failed;
            p.message = e.to_string();
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_task_succeeds_with_result() {
        let queue = LocalTaskQueue::new(2).unwrap();
        let id = queue.submit(
            "ok",
            Box::new(|progress: &ProgressReporter| {
                progress.report("处理中");
                Ok(json!({"value": 42}))
            }),
        );
        let done = queue.wait(id, Duration::from_millis(10)).await.unwrap();
        assert_eq!(done.state, TaskState::Succeeded);
        assert_eq!(done.result, Some(json!({"value": 42})));
    }

    #[tokio::test]
    async fn test_task_failure_is_terminal() {
        let queue = LocalTaskQueue::new(1).unwrap();
        let id = queue.submit(
            "fail",
            Box::new(|_: &ProgressReporter| Err(CutterError::input_not_found("/gone.mp4"))),
        );
        let done = queue.wait(id, Duration::from_millis(10)).await.unwrap();
        assert_eq!(done.state, TaskState::Failed);
        assert!(done.message.contains("/gone.mp4"));
        assert!(done.result.is_none());
    }

    #[tokio::test]
    async fn test_unknown_task_polls_none() {
        let queue = LocalTaskQueue::new(1).unwrap();
        assert!(queue.poll(Uuid::new_v4()).is_none());
    }

    #[test]
    fn test_queue_requires_runtime() {
        assert!(LocalTaskQueue::new(1).is_err());
    }

    #[test]
    fn test_state_names() {
        assert_eq!(TaskState::Succeeded.to_string(), "succeeded");
        assert!(TaskState::Failed.is_terminal());
        assert!(!TaskState::Running.is_terminal());
    }
}
