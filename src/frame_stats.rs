use image::{GrayImage, RgbImage};
use std::collections::VecDeque;

/// 每个通道的直方图分箱数
pub const HIST_BINS: usize = 8;
const HIST_LEN: usize = HIST_BINS * HIST_BINS * HIST_BINS;

/// 单帧统计：平均亮度 + 归一化的 RGB 三维直方图
#[derive(Debug, Clone, PartialEq)]
pub struct FrameStatistics {
    /// 灰度均值（0-255）
    pub brightness: f64,
    /// 8x8x8 直方图，L2 范数为 1
    pub histogram: Vec<f64>,
}

impl FrameStatistics {
    pub fn compute(rgb: &RgbImage, gray: &GrayImage) -> Self {
        let mut histogram = vec![0.0f64; HIST_LEN];
        let shift = 8 - HIST_BINS.trailing_zeros();
        for pixel in rgb.pixels() {
            let r = (pixel[0] >> shift) as usize;
            let g = (pixel[1] >> shift) as usize;
            let b = (pixel[2] >> shift) as usize;
            histogram[(r * HIST_BINS + g) * HIST_BINS + b] += 1.0;
        }
        let norm = histogram.iter().map(|v| v * v).sum::<f64>().sqrt();
        if norm > 0.0 {
            histogram.iter_mut().for_each(|v| *v /= norm);
        }

        let pixel_count = u64::from(gray.width()) * u64::from(gray.height());
        let brightness = if pixel_count > 0 {
            gray.pixels().map(|p| u64::from(p[0])).sum::<u64>() as f64 / pixel_count as f64
        } else {
            0.0
        };

        Self {
            brightness,
            histogram,
        }
    }

    /// 卡方距离（对称形式）：`2 · Σ (a − b)² / (a + b)`
    pub fn chi_square_alt(&self, other: &FrameStatistics) -> f64 {
        self.histogram
            .iter()
            .zip(other.histogram.iter())
            .filter(|(a, b)| (*a + *b).abs() > f64::EPSILON)
            .map(|(a, b)| {
                let d = a - b;
                d * d / (a + b)
            })
            .sum::<f64>()
            * 2.0
    }
}

/// 滑动窗口形式的帧统计历史
///
/// 只保留最近 `horizon + 1` 帧，比较窗口之外的条目立即淘汰。
#[derive(Debug, Clone)]
pub struct FrameHistory {
    horizon: u64,
    entries: VecDeque<(u64, FrameStatistics)>,
}

impl FrameHistory {
    /// `horizon` 为比较跨度（帧数，通常等于 fps）
    pub fn new(horizon: u64) -> Self {
        let horizon = horizon.max(1);
        Self {
            horizon,
            entries: VecDeque::with_capacity(horizon as usize + 1),
        }
    }

    pub fn horizon(&self) -> u64 {
        self.horizon
    }

    pub fn insert(&mut self, index: u64, stats: FrameStatistics) {
        self.entries.push_back((index, stats));
        while self
            .entries
            .front()
            .is_some_and(|(oldest, _)| oldest + self.horizon < index)
        {
            self.entries.pop_front();
        }
    }

    pub fn get(&self, index: u64) -> Option<&FrameStatistics> {
        self.entries
            .iter()
            .rev()
            .find(|(i, _)| *i == index)
            .map(|(_, stats)| stats)
    }

    /// 一个比较跨度之前的帧
    pub fn one_horizon_before(&self, index: u64) -> Option<&FrameStatistics> {
        index.checked_sub(self.horizon).and_then(|past| self.get(past))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// 两帧之间的变化评分
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChangeScore {
    /// 亮度增量归一化（只计变亮，除以 50，上限 1）
    pub brightness: f64,
    /// 直方图距离归一化（上限 1）
    pub scene: f64,
    /// `0.4 · brightness + 0.6 · scene`
    pub combined: f64,
    /// 0-10 分
    pub rating: u8,
}

impl ChangeScore {
    pub fn between(current: &FrameStatistics, past: &FrameStatistics) -> Self {
        let brightness_delta = current.brightness - past.brightness;
        let brightness = if brightness_delta > 0.0 {
            (brightness_delta / 50.0).min(1.0)
        } else {
            0.0
        };
        let scene = current.chi_square_alt(past).min(1.0);
        let combined = brightness * 0.4 + scene * 0.6;
        let rating = rating(combined);
        Self {
            brightness,
            scene,
            combined,
            rating,
        }
    }
}

/// 综合分映射到 0-10 分，`.5` 取最近的偶数（2.5 → 2，7.5 → 8）
pub fn rating(combined: f64) -> u8 {
    (combined * 10.0).round_ties_even().clamp(0.0, 10.0) as u8
}
