use std::path::PathBuf;
use thiserror::Error;

/// 剪辑流水线的结果类型
pub type CutterResult<T> = Result<T, CutterError>;

/// 剪辑流水线中可能出现的错误
#[derive(Debug, Error)]
pub enum CutterError {
    /// 视频文件不存在（上传丢失或下载后找不到文件）
    #[error("视频文件不存在: {0}")]
    InputNotFound(String),

    /// 无法读取视频帧流
    #[error("视频解码失败: {0}")]
    DecodeFailure(String),

    /// 参考图片缺失或无法读取（检测器会降级，不算致命错误）
    #[error("参考图片不可用: {0}")]
    ReferenceUnavailable(String),

    /// 外部工具（ffmpeg / whisper / yt-dlp）没有产生预期输出
    #[error("{tool} 执行失败: {message}")]
    ExternalToolFailure {
        tool: String,
        message: String,
        stderr: Option<String>,
        exit_code: Option<i32>,
    },

    /// 任务参数不合法，提交前即被拒绝
    #[error("任务参数错误: {0}")]
    SpecificationError(String),

    /// 任务队列错误
    #[error("任务执行错误: {0}")]
    Task(String),

    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON 错误: {0}")]
    Json(#[from] serde_json::Error),
}

impl CutterError {
    pub fn input_not_found(path: impl Into<PathBuf>) -> Self {
        Self::InputNotFound(path.into().display().to_string())
    }

    pub fn tool_failed(
        tool: impl Into<String>,
        message: impl Into<String>,
        stderr: Option<String>,
        exit_code: Option<i32>,
    ) -> Self {
        Self::ExternalToolFailure {
            tool: tool.into(),
            message: message.into(),
            stderr,
            exit_code,
        }
    }

    pub fn spec(message: impl Into<String>) -> Self {
        Self::SpecificationError(message.into())
    }

    /// 错误类别名称，写入任务结果中的失败记录
    pub fn kind(&self) -> &'static str {
        match self {
            CutterError::InputNotFound(_) => "input_not_found",
            CutterError::DecodeFailure(_) => "decode_failure",
            CutterError::ReferenceUnavailable(_) => "reference_unavailable",
            CutterError::ExternalToolFailure { .. } => "external_tool_failure",
            CutterError::SpecificationError(_) => "specification_error",
            CutterError::Task(_) => "task_failure",
            CutterError::Io(_) => "io_error",
            CutterError::Json(_) => "json_error",
        }
    }
}
