//! 剪辑任务的参数与产物

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;

use crate::error::{CutterError, CutterResult};

/// 输出格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[serde(alias = "mp4")]
    Video,
    #[serde(alias = "mp3")]
    Audio,
    #[serde(alias = "txt")]
    Text,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Video => "mp4",
            OutputFormat::Audio => "mp3",
            OutputFormat::Text => "txt",
        }
    }
}

/// 用户确认后的单个剪辑任务
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSpec {
    pub start: f64,
    pub end: f64,
    pub formats: BTreeSet<OutputFormat>,
}

impl JobSpec {
    pub fn new(start: f64, end: f64, formats: impl IntoIterator<Item = OutputFormat>) -> Self {
        Self {
            start,
            end,
            formats: formats.into_iter().collect(),
        }
    }

    pub fn duration(&self) -> f64 {
        self.end - self.start
    }

    pub fn wants(&self, format: OutputFormat) -> bool {
        self.formats.contains(&format)
    }

    /// 需要音频源（音频或文字）
    pub fn needs_audio(&self) -> bool {
        self.wants(OutputFormat::Audio) || self.wants(OutputFormat::Text)
    }

    /// 校验时间范围：`0 <= start < end <= duration`
    pub fn validate(&self, video_duration: f64) -> CutterResult<()> {
        if !self.start.is_finite() || !self.end.is_finite() {
            return Err(CutterError::spec("时间必须是有限数值"));
        }
        if self.start < 0.0 {
            return Err(CutterError::spec(format!("开始时间不能为负数: {}", self.start)));
        }
        if self.end <= self.start {
            return Err(CutterError::spec(format!(
                "结束时间必须大于开始时间: start={}, end={}",
                self.start, self.end
            )));
        }
        if self.end > video_duration {
            return Err(CutterError::spec(format!(
                "结束时间超出视频时长: end={}, duration={}",
                self.end, video_duration
            )));
        }
        if self.formats.is_empty() {
            return Err(CutterError::spec("至少需要选择一种输出格式"));
        }
        Ok(())
    }
}

/// 提交前校验一批任务
///
/// 没有选择格式的任务直接丢弃；剩余任务的时间范围必须合法，且不能为空。
pub fn validate_jobs(jobs: Vec<JobSpec>, video_duration: f64) -> CutterResult<Vec<JobSpec>> {
    let jobs: Vec<JobSpec> = jobs.into_iter().filter(|j| !j.formats.is_empty()).collect();
    if jobs.is_empty() {
        return Err(CutterError::spec("没有选择任何片段或输出格式"));
    }
    for (i, job) in jobs.iter().enumerate() {
        job.validate(video_duration).map_err(|e| match e {
            CutterError::SpecificationError(msg) => CutterError::spec(format!("任务 {}: {}", i + 1, msg)),
            other => other,
        })?;
    }
    Ok(jobs)
}

/// 手动指定的分割时间（时:分:秒）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OverrideSplit {
    #[serde(default)]
    pub hours: u32,
    #[serde(default)]
    pub minutes: u32,
    #[serde(default)]
    pub seconds: u32,
    /// 分割点之前片段的输出格式
    #[serde(default)]
    pub before: BTreeSet<OutputFormat>,
    /// 分割点之后片段的输出格式
    #[serde(default)]
    pub after: BTreeSet<OutputFormat>,
}

impl OverrideSplit {
    pub fn split_time(&self) -> f64 {
        f64::from(self.hours) * 3600.0 + f64::from(self.minutes) * 60.0 + f64::from(self.seconds)
    }

    /// 按分割点生成至多两个任务：`[0, t)` 与 `[t, duration)`
    pub fn into_jobs(self, video_duration: f64) -> CutterResult<Vec<JobSpec>> {
        let t = self.split_time();
        if !(t > 0.0 && t < video_duration) {
            return Err(CutterError::spec(format!(
                "分割时间必须在视频时长范围内: {}s (时长 {:.2}s)",
                t, video_duration
            )));
        }
        let mut jobs = Vec::new();
        if !self.before.is_empty() {
            jobs.push(JobSpec::new(0.0, t, self.before));
        }
        if !self.after.is_empty() {
            jobs.push(JobSpec::new(t, video_duration, self.after));
        }
        Ok(jobs)
    }
}

/// 产物类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    Video,
    Audio,
    Text,
}

/// 单个输出产物
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputArtifact {
    pub kind: ArtifactKind,
    pub path: PathBuf,
}

/// 按类型收集的产物，保持创建顺序
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArtifactCollections {
    pub video: Vec<PathBuf>,
    pub audio: Vec<PathBuf>,
    pub text: Vec<PathBuf>,
}

impl ArtifactCollections {
    pub fn push(&mut self, artifact: OutputArtifact) {
        match artifact.kind {
            ArtifactKind::Video => self.video.push(artifact.path),
            ArtifactKind::Audio => self.audio.push(artifact.path),
            ArtifactKind::Text => self.text.push(artifact.path),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.video.is_empty() && self.audio.is_empty() && self.text.is_empty()
    }

    pub fn len(&self) -> usize {
        self.video.len() + self.audio.len() + self.text.len()
    }
}

/// 单个任务的失败记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobFailure {
    /// 任务编号（从 0 开始）
    pub job_index: usize,
    /// 错误类别
    pub kind: String,
    pub message: String,
}

impl JobFailure {
    pub fn from_error(job_index: usize, err: &CutterError) -> Self {
        Self {
            job_index,
            kind: err.kind().to_string(),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStatus {
    Complete,
    /// 拼接模式下一个临时片段都没有生成
    NoSegments,
}

/// 剪辑执行结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineResult {
    pub status: PipelineStatus,
    pub message: String,
    pub artifacts: ArtifactCollections,
    pub failures: Vec<JobFailure>,
}
