//! 把分析流水线与剪辑执行器包装成可轮询的长任务

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use crate::downloader::VideoDownloader;
use crate::error::{CutterError, CutterResult};
use crate::executor::JobExecutor;
use crate::job::{validate_jobs, JobSpec};
use crate::processor::{analyze_video, AnalysisContext};
use crate::scene_detector::DetectionConfig;
use crate::task_queue::{ProgressReporter, TaskId, TaskProgress, TaskQueue};

/// 待分析视频的来源
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VideoSource {
    /// 已上传到本地的文件
    Local(PathBuf),
    /// 远程地址，先下载到上传目录
    Url(String),
}

#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    pub source: VideoSource,
    pub detection: DetectionConfig,
}

pub struct Orchestrator {
    queue: Arc<dyn TaskQueue>,
    analysis: AnalysisContext,
    executor: JobExecutor,
    downloader: Arc<dyn VideoDownloader>,
    upload_dir: PathBuf,
}

impl Orchestrator {
    pub fn new(
        queue: Arc<dyn TaskQueue>,
        analysis: AnalysisContext,
        executor: JobExecutor,
        downloader: Arc<dyn VideoDownloader>,
        upload_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            queue,
            analysis,
            executor,
            downloader,
            upload_dir: upload_dir.into(),
        }
    }

    /// 提交分析任务：下载（如需要）→ 校验文件 → 检测 → 规划
    pub fn start_analysis(&self, request: AnalysisRequest) -> TaskId {
        let ctx = self.analysis.clone();
        let downloader = self.downloader.clone();
        let upload_dir = self.upload_dir.clone();

        self.queue.submit(
            "analysis",
            Box::new(move |progress: &ProgressReporter| {
                let video = match request.source {
                    VideoSource::Local(path) => path,
                    VideoSource::Url(url) => {
                        progress.report("正在下载视频...");
                        downloader.download(&url, &upload_dir)?
                    }
                };
                if !video.exists() {
                    return Err(CutterError::input_not_found(&video));
                }
                progress.report("正在分析视频...");
                let result = analyze_video(&video, &request.detection, &ctx, &|m: &str| progress.report(m))?;
                Ok(serde_json::to_value(result)?)
            }),
        )
    }

    /// 校验任务后提交剪辑；参数不合法时直接返回错误，不提交任何任务
    pub fn run_jobs(
        &self,
        video: &Path,
        video_duration: f64,
        jobs: Vec<JobSpec>,
        output_dir: &Path,
        concatenate: bool,
    ) -> CutterResult<TaskId> {
        let jobs = validate_jobs(jobs, video_duration)?;
        let executor = self.executor.clone();
        let video = video.to_path_buf();
        let output_dir = output_dir.to_path_buf();
        info!(
            "📋 [任务编排] 提交 {} 个剪辑任务（{}）",
            jobs.len(),
            if concatenate { "拼接模式" } else { "独立模式" }
        );

        let name = if concatenate { "concatenate" } else { "segments" };
        Ok(self.queue.submit(
            name,
            Box::new(move |progress: &ProgressReporter| {
                let report = |m: &str| progress.report(m);
                let result = if concatenate {
                    executor.run_concatenated(&video, &jobs, &output_dir, &report)?
                } else {
                    executor.run(&video, &jobs, &output_dir, &report)?
                };
                Ok(serde_json::to_value(result)?)
            }),
        ))
    }

    pub fn poll(&self, id: TaskId) -> Option<TaskProgress> {
        self.queue.poll(id)
    }
}
