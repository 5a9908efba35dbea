use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::features::ReferenceMatcher;
use crate::frame_stats::{ChangeScore, FrameHistory, FrameStatistics};
use crate::video_processor::{FrameSource, VideoProcessor};

/// 检测策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionPolicy {
    /// 只找第一次参考图匹配，找到即停止。
    /// `sensitivity` 为有效特征匹配数，必须严格大于该值。
    FirstMatch,
    /// 参考图强匹配优先（命中即停止），否则逐帧做亮度 / 直方图变化评分。
    /// `sensitivity` 为 0-10 评分阈值，触发后冷却 2 秒。
    Cooldown,
}

impl std::str::FromStr for DetectionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "first_match" | "first-match" | "firstmatch" => Ok(DetectionPolicy::FirstMatch),
            "cooldown" => Ok(DetectionPolicy::Cooldown),
            other => Err(format!("未知的检测策略: {}", other)),
        }
    }
}

/// 切换点检测配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionConfig {
    pub policy: DetectionPolicy,
    /// 灵敏度，含义由策略决定
    pub sensitivity: u32,
    /// 参考图路径
    pub reference_image: Option<PathBuf>,
    /// FirstMatch 模式下每秒只分析一帧
    pub sample_every_second: bool,
    /// Cooldown 模式下参考图“强匹配”的固定阈值
    pub strong_match_threshold: usize,
    /// 每帧最多提取的特征点数
    pub max_features: usize,
    /// 分析时帧的最大宽度（像素）
    pub analysis_width: u32,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            policy: DetectionPolicy::Cooldown,
            sensitivity: 5,
            reference_image: None,
            sample_every_second: false,
            strong_match_threshold: 80,
            max_features: 1000,
            analysis_width: 320,
        }
    }
}

/// 切换点检测器：单次顺序扫描视频帧
pub struct ChangePointDetector {
    config: DetectionConfig,
    reference: Option<ReferenceMatcher>,
}

impl ChangePointDetector {
    pub fn new(config: DetectionConfig, reference: Option<ReferenceMatcher>) -> Self {
        Self { config, reference }
    }

    /// 按配置加载参考图；参考图不可用时降级为无参考检测
    pub fn from_config(config: DetectionConfig) -> Self {
        let reference = config.reference_image.as_deref().and_then(|path| {
            match ReferenceMatcher::load(path, config.max_features, Some(config.analysis_width)) {
                Ok(matcher) => {
                    info!(
                        "✅ [场景检测] 参考图加载成功: {} ({} 个特征)",
                        path.display(),
                        matcher.descriptor_count()
                    );
                    Some(matcher)
                }
                Err(e) => {
                    warn!("⚠️  [场景检测] {}", e);
                    None
                }
            }
        });
        Self::new(config, reference)
    }

    pub fn has_reference(&self) -> bool {
        self.reference.is_some()
    }

    /// 检测视频文件；无法打开时返回空结果
    pub fn detect_file(&self, video_path: &Path) -> Vec<f64> {
        let source = VideoProcessor::new(video_path)
            .and_then(|p| p.open_frames(Some(self.config.analysis_width)));
        match source {
            Ok(mut source) => self.detect(&mut source),
            Err(e) => {
                warn!("⚠️  [场景检测] 无法读取视频，返回空结果: {}", e);
                Vec::new()
            }
        }
    }

    /// 扫描帧源，返回升序去重的切换时间点（秒）
    pub fn detect<S: FrameSource + ?Sized>(&self, source: &mut S) -> Vec<f64> {
        let start = Instant::now();
        let mut points = match self.config.policy {
            DetectionPolicy::FirstMatch => self.detect_first_match(source),
            DetectionPolicy::Cooldown => self.detect_with_cooldown(source),
        };
        points.sort_by(f64::total_cmp);
        points.dedup();
        info!(
            "✅ [场景检测] 分析完成，检测到 {} 个切换点，耗时: {:.2}秒",
            points.len(),
            start.elapsed().as_secs_f64()
        );
        points
    }

    fn detect_first_match<S: FrameSource + ?Sized>(&self, source: &mut S) -> Vec<f64> {
        let Some(reference) = &self.reference else {
            warn!("⚠️  [场景检测] FirstMatch 模式需要参考图，跳过分析");
            return Vec::new();
        };
        let fps = source.fps();
        let stride = if self.config.sample_every_second {
            comparison_horizon(fps)
        } else {
            1
        };
        let threshold = self.config.sensitivity as usize;

        while let Some(frame) = source.next_frame() {
            if frame.index % stride != 0 {
                continue;
            }
            let Some(matches) = reference.match_frame(&frame.gray()) else {
                continue;
            };
            if matches > threshold {
                let timestamp = frame.index as f64 / fps;
                info!(
                    "🎯 [场景检测] 参考图匹配于 {:.2}s（{} 个有效匹配），停止分析",
                    timestamp, matches
                );
                return vec![timestamp];
            }
        }
        Vec::new()
    }

    fn detect_with_cooldown<S: FrameSource + ?Sized>(&self, source: &mut S) -> Vec<f64> {
        let fps = source.fps();
        let horizon = comparison_horizon(fps);
        let cooldown_frames = 2 * horizon;
        let mut history = FrameHistory::new(horizon);
        let mut last_cut: Option<u64> = None;
        let mut points = Vec::new();

        while let Some(frame) = source.next_frame() {
            let in_cooldown = last_cut.is_some_and(|cut| frame.index < cut + cooldown_frames);
            let gray = frame.gray();

            if !in_cooldown {
                if let Some(reference) = &self.reference {
                    if let Some(matches) = reference.match_frame(&gray) {
                        if matches > self.config.strong_match_threshold {
                            let timestamp = frame.index as f64 / fps;
                            info!(
                                "🎯 [场景检测] 参考图强匹配于 {:.2}s（{} 个有效匹配），停止分析",
                                timestamp, matches
                            );
                            points.push(timestamp);
                            break;
                        }
                    }
                }
            }

            let stats = FrameStatistics::compute(&frame.image, &gray);
            if !in_cooldown {
                if let Some(past) = history.one_horizon_before(frame.index) {
                    let score = ChangeScore::between(&stats, past);
                    if u32::from(score.rating) >= self.config.sensitivity {
                        let timestamp = frame.index as f64 / fps;
                        debug!(
                            "[场景检测] 帧 {} 评分 {}/10 (亮度 {:.2}, 场景 {:.2})",
                            frame.index, score.rating, score.brightness, score.scene
                        );
                        info!("🎬 [场景检测] 检测到场景变化 {:.2}s（评分 {}/10）", timestamp, score.rating);
                        points.push(timestamp);
                        last_cut = Some(frame.index);
                    }
                }
            }
            // 冷却期内也记录统计，保证冷却结束后有一秒前的帧可比较
            history.insert(frame.index, stats);
        }
        points
    }
}

/// 一秒对应的帧数（四舍五入，至少 1），用作比较跨度与抽样步长
pub fn comparison_horizon(fps: f64) -> u64 {
    (fps.round() as u64).max(1)
}
