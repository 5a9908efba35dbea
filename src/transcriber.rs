use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use tracing::info;
use uuid::Uuid;

use crate::error::{CutterError, CutterResult};
use crate::transcoder::{resolve_binary, run_tool};

/// 语音转文字能力
pub trait Transcriber: Send + Sync {
    fn transcribe(&self, audio: &Path) -> CutterResult<String>;
}

/// 调用 whisper 命令行做转写
#[derive(Debug, Clone)]
pub struct WhisperTranscriber {
    binary: PathBuf,
    model: String,
}

impl WhisperTranscriber {
    pub fn new(binary: &str, model: impl Into<String>) -> Self {
        Self {
            binary: resolve_binary(binary),
            model: model.into(),
        }
    }
}

impl Transcriber for WhisperTranscriber {
    fn transcribe(&self, audio: &Path) -> CutterResult<String> {
        if !audio.exists() {
            return Err(CutterError::input_not_found(audio));
        }
        // whisper 按音频文件名生成 txt，放到独立目录里避免与产物重名
        let parent = audio.parent().unwrap_or_else(|| Path::new("."));
        let work_dir = parent.join(format!(".whisper-{}", Uuid::new_v4()));
        std::fs::create_dir_all(&work_dir)?;

        let result = self.run_in(audio, &work_dir);
        if let Err(e) = std::fs::remove_dir_all(&work_dir) {
            tracing::warn!("⚠️  [语音转写] 清理临时目录失败 {}: {}", work_dir.display(), e);
        }
        result
    }
}

impl WhisperTranscriber {
    fn run_in(&self, audio: &Path, work_dir: &Path) -> CutterResult<String> {
        info!("⏳ [语音转写] 正在转写 {}（模型: {}）", audio.display(), self.model);
        run_tool(
            "whisper",
            &self.binary,
            [
                audio.as_os_str(),
                OsStr::new("--model"),
                OsStr::new(&self.model),
                OsStr::new("--output_format"),
                OsStr::new("txt"),
                OsStr::new("--output_dir"),
                work_dir.as_os_str(),
            ],
        )?;

        let stem = audio
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let text_path = work_dir.join(format!("{}.txt", stem));
        if !text_path.exists() {
            return Err(CutterError::tool_failed(
                "whisper",
                format!("没有生成转写文件: {}", text_path.display()),
                None,
                None,
            ));
        }
        let text = std::fs::read_to_string(&text_path)?;
        Ok(text.trim().to_string())
    }
}
