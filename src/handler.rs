use axum::{
    extract::{DefaultBodyLimit, Json, Multipart, Path as UrlPath, State},
    http::StatusCode,
    response::Json as ResponseJson,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::error::CutterResult;
use crate::job::{JobSpec, OverrideSplit};
use crate::orchestrator::{AnalysisRequest, Orchestrator, VideoSource};
use crate::planner::THUMBNAIL_ROUTE;
use crate::scene_detector::DetectionPolicy;
use crate::task_queue::TaskState;
use crate::upload::{allowed_file, resolve_in_upload_dir, secure_filename, ALLOWED_EXTENSIONS};

/// 单个上传文件的大小上限
pub const MAX_UPLOAD_BYTES: usize = 1 << 30;

/// 路由共享状态
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub config: Arc<AppConfig>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

type ApiError = (StatusCode, ResponseJson<ErrorBody>);

fn bad_request(message: impl Into<String>) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        ResponseJson(ErrorBody {
            error: message.into(),
        }),
    )
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TaskCreated {
    pub task_id: Uuid,
}

/// 上传结果，`filename` 可直接用作 `/analysis` 的 `path`
#[derive(Debug, Serialize, Deserialize)]
pub struct UploadResponse {
    pub filename: String,
}

/// 分析请求：上传目录中的文件或远程地址二选一
#[derive(Debug, Deserialize)]
pub struct AnalysisBody {
    pub path: Option<PathBuf>,
    pub url: Option<String>,
    pub sensitivity: Option<u32>,
    pub policy: Option<DetectionPolicy>,
}

/// 剪辑请求：`jobs` 与 `override` 二选一，`override` 优先
#[derive(Debug, Deserialize)]
pub struct ProcessBody {
    pub video_path: PathBuf,
    pub video_duration: f64,
    #[serde(default)]
    pub jobs: Vec<JobSpec>,
    #[serde(default, rename = "override")]
    pub override_split: Option<OverrideSplit>,
    #[serde(default)]
    pub concatenate: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusBody {
    pub state: TaskState,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
}

/// 构建 HTTP 路由
pub fn router(state: AppState) -> Router {
    let results = ServeDir::new(&state.config.results_dir);
    let thumbnails = ServeDir::new(&state.config.thumbnail_dir);

    Router::new()
        .route("/", get(health_check))
        .route("/health", get(health_check))
        .route(
            "/upload",
            post(handle_upload).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        .route("/analysis", post(handle_analysis))
        .route("/process", post(handle_process))
        .route("/status/:task_id", get(handle_status))
        .nest_service("/results", results)
        .nest_service(&format!("/{}", THUMBNAIL_ROUTE), thumbnails)
        .layer(ServiceBuilder::new().layer(CorsLayer::permissive()))
        .with_state(state)
}

pub async fn health_check() -> &'static str {
    "OK"
}

/// 提交分析任务
pub async fn handle_analysis(
    State(state): State<AppState>,
    Json(body): Json<AnalysisBody>,
) -> Result<ResponseJson<TaskCreated>, ApiError> {
    let source = match (body.path, body.url) {
        (Some(path), _) => {
            VideoSource::Local(resolve_upload(&state.config, path).map_err(|e| bad_request(e.to_string()))?)
        }
        (None, Some(url)) if !url.trim().is_empty() => VideoSource::Url(url.trim().to_string()),
        _ => return Err(bad_request("需要提供 path 或 url")),
    };

    let mut detection = state.config.detection.clone();
    if let Some(sensitivity) = body.sensitivity {
        detection.sensitivity = sensitivity;
    }
    if let Some(policy) = body.policy {
        detection.policy = policy;
    }

    info!("收到分析请求: {:?}", source);
    let task_id = state.orchestrator.start_analysis(AnalysisRequest { source, detection });
    Ok(ResponseJson(TaskCreated { task_id }))
}

/// 提交剪辑任务，参数校验失败返回 400
pub async fn handle_process(
    State(state): State<AppState>,
    Json(body): Json<ProcessBody>,
) -> Result<ResponseJson<TaskCreated>, ApiError> {
    let jobs = match body.override_split {
        Some(split) => split
            .into_jobs(body.video_duration)
            .map_err(|e| bad_request(e.to_string()))?,
        None => body.jobs,
    };

    let video = resolve_upload(&state.config, body.video_path).map_err(|e| {
        warn!("剪辑请求被拒绝: {}", e);
        bad_request(e.to_string())
    })?;
    let task_id = state
        .orchestrator
        .run_jobs(
            &video,
            body.video_duration,
            jobs,
            &state.config.results_dir,
            body.concatenate,
        )
        .map_err(|e| {
            warn!("剪辑请求被拒绝: {}", e);
            bad_request(e.to_string())
        })?;
    Ok(ResponseJson(TaskCreated { task_id }))
}

/// 查询任务进度
pub async fn handle_status(
    State(state): State<AppState>,
    UrlPath(task_id): UrlPath<Uuid>,
) -> Result<ResponseJson<StatusBody>, ApiError> {
    let progress = state.orchestrator.poll(task_id).ok_or_else(|| {
        (
            StatusCode::NOT_FOUND,
            ResponseJson(ErrorBody {
                error: format!("任务不存在: {}", task_id),
            }),
        )
    })?;
    Ok(ResponseJson(StatusBody {
        state: progress.state,
        status: progress.message,
        result: progress.result,
    }))
}

/// 请求中的视频路径只能指向上传目录内的文件
fn resolve_upload(config: &AppConfig, path: PathBuf) -> CutterResult<PathBuf> {
    resolve_in_upload_dir(&config.upload_dir, &path)
}

/// 接收 multipart 上传（字段名 `file`），保存到上传目录
pub async fn handle_upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<ResponseJson<UploadResponse>, ApiError> {
    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request(format!("读取上传内容失败: {}", e)))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let client_name = field.file_name().unwrap_or_default().to_string();
        if !allowed_file(&client_name) {
            return Err(bad_request(format!(
                "不支持的文件类型: {}（允许: {}）",
                client_name,
                ALLOWED_EXTENSIONS.join(", ")
            )));
        }
        let filename = secure_filename(&client_name)
            .filter(|name| allowed_file(name))
            .ok_or_else(|| bad_request(format!("文件名不合法: {}", client_name)))?;

        let upload_dir = &state.config.upload_dir;
        tokio::fs::create_dir_all(upload_dir)
            .await
            .map_err(|e| internal_error(format!("创建上传目录失败: {}", e)))?;
        let path = upload_dir.join(&filename);
        let mut file = tokio::fs::File::create(&path)
            .await
            .map_err(|e| internal_error(format!("保存上传文件失败: {}", e)))?;

        loop {
            let chunk = match field.chunk().await {
                Ok(Some(chunk)) => chunk,
                Ok(None) => break,
                Err(e) => {
                    drop(file);
                    let _ = tokio::fs::remove_file(&path).await;
                    return Err(bad_request(format!("上传中断: {}", e)));
                }
            };
            if let Err(e) = file.write_all(&chunk).await {
                drop(file);
                let _ = tokio::fs::remove_file(&path).await;
                return Err(internal_error(format!("保存上传文件失败: {}", e)));
            }
        }
        file.flush()
            .await
            .map_err(|e| internal_error(format!("保存上传文件失败: {}", e)))?;

        info!("✅ [上传] 已保存: {}", path.display());
        return Ok(ResponseJson(UploadResponse { filename }));
    }
    Err(bad_request("没有上传文件（字段名 file）"))
}

fn internal_error(message: impl Into<String>) -> ApiError {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        ResponseJson(ErrorBody {
            error: message.into(),
        }),
    )
}
