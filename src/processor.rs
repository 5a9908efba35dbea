use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};

use crate::error::{CutterError, CutterResult};
use crate::metadata::AnalysisResult;
use crate::planner::{plan_with_progress, ThumbnailExtractor};
use crate::scene_detector::{ChangePointDetector, DetectionConfig};
use crate::video_processor::MediaProbe;

/// 切换点检测能力（默认实现基于 libav 解码）
pub trait ChangeDetection: Send + Sync {
    fn detect(&self, video: &Path, config: &DetectionConfig) -> Vec<f64>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct FfmpegChangeDetection;

impl ChangeDetection for FfmpegChangeDetection {
    fn detect(&self, video: &Path, config: &DetectionConfig) -> Vec<f64> {
        ChangePointDetector::from_config(config.clone()).detect_file(video)
    }
}

/// 分析流水线依赖的外部能力
#[derive(Clone)]
pub struct AnalysisContext {
    pub probe: Arc<dyn MediaProbe>,
    pub detection: Arc<dyn ChangeDetection>,
    pub thumbnails: Arc<dyn ThumbnailExtractor>,
}

/// 分析本地视频：读取信息 → 检测切换点 → 规划片段并截取封面
pub fn analyze_video(
    video: &Path,
    config: &DetectionConfig,
    ctx: &AnalysisContext,
    progress: &dyn Fn(&str),
) -> CutterResult<AnalysisResult> {
    let total_start = Instant::now();
    info!("🎬 [视频分析] 开始分析视频: {}", video.display());
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    if !video.exists() {
        error!("❌ [视频分析] 视频文件不存在: {}", video.display());
        return Err(CutterError::input_not_found(video));
    }

    // 1. 获取视频信息
    let info_start = Instant::now();
    progress("正在读取视频信息...");
    let info = ctx.probe.probe(video).map_err(|e| {
        error!("❌ [视频分析] 获取视频信息失败: {}", e);
        e
    })?;
    info!(
        "✅ [视频分析] 获取视频信息完成，耗时: {:.2}秒",
        info_start.elapsed().as_secs_f64()
    );
    info!("  • 分辨率: {}x{}", info.width, info.height);
    info!("  • 帧率: {:.2} fps", info.fps);
    info!("  • 时长: {:.2}秒", info.duration);

    // 2. 检测切换点
    let detect_start = Instant::now();
    progress("正在检测场景变化...");
    info!("⏳ [视频分析] 正在检测切换点（策略: {:?}, 灵敏度: {}）...", config.policy, config.sensitivity);
    let change_points = ctx.detection.detect(video, config);
    info!(
        "✅ [视频分析] 切换点检测完成，耗时: {:.2}秒",
        detect_start.elapsed().as_secs_f64()
    );
    info!("  • 切换点: {:?}", change_points);

    // 3. 规划片段、截取封面
    let plan_start = Instant::now();
    let segments = plan_with_progress(info.duration, &change_points, video, ctx.thumbnails.as_ref(), |i, n| {
        progress(&format!("正在生成封面 {}/{}...", i, n))
    });
    let with_thumbnail = segments.iter().filter(|s| s.thumbnail.is_some()).count();
    info!(
        "✅ [视频分析] 片段规划完成，耗时: {:.2}秒",
        plan_start.elapsed().as_secs_f64()
    );
    info!("  • 片段数: {} 个（{} 个有封面）", segments.len(), with_thumbnail);

    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    info!(
        "🎉 [视频分析] 分析完成，总耗时: {:.2}秒",
        total_start.elapsed().as_secs_f64()
    );

    Ok(AnalysisResult {
        video_path: video.to_path_buf(),
        video_duration: info.duration,
        change_points,
        segments,
    })
}
