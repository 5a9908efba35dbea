use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// 单个片段提案
///
/// 半开区间 `[start, end)`，由规划器生成后只读。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    /// 片段编号（从 0 开始，按时间顺序）
    pub index: usize,
    /// 片段开始时间（秒）
    pub start: f64,
    /// 片段结束时间（秒）
    pub end: f64,
    /// 缩略图路径（截取失败时为空）
    pub thumbnail: Option<PathBuf>,
}

impl Segment {
    /// 片段持续时间（秒）
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}

/// 分析任务的结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    /// 本地视频文件路径
    pub video_path: PathBuf,
    /// 视频总时长（秒）
    pub video_duration: f64,
    /// 检测到的切换点（秒，升序去重）
    pub change_points: Vec<f64>,
    /// 片段列表
    pub segments: Vec<Segment>,
}
