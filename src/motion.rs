// src/motion.rs
//
// Global (camera) motion estimation between consecutive sampled frames.
//
// Corner features are detected in the previous grayscale frame and located
// in the current frame with SAD block matching; the global translation is
// the per-axis median of the confirmed displacement vectors. The median
// resists outliers from moving foreground objects, which is exactly what a
// traffic scene is full of. With no frames, no features, or fewer than the
// configured minimum of confirmed features, the estimator returns (0, 0) —
// a deliberate low-confidence fallback instead of a noisy estimate.

use crate::config::MotionConfig;

/// Simple grayscale frame. Row-major: pixel at (x, y) = data[y * width + x].
#[derive(Clone)]
pub struct GrayFrame {
    pub data: Vec<u8>,
    pub width: usize,
    pub height: usize,
}

impl GrayFrame {
    pub fn new(data: Vec<u8>, width: usize, height: usize) -> Self {
        debug_assert_eq!(data.len(), width * height);
        Self {
            data,
            width,
            height,
        }
    }

    /// Convert from RGB packed bytes (3 bytes per pixel).
    pub fn from_rgb(rgb: &[u8], width: usize, height: usize) -> Self {
        let mut gray = Vec::with_capacity(width * height);
        for pixel in rgb.chunks_exact(3) {
            // ITU-R BT.601 luma
            let g =
                (0.299 * pixel[0] as f32 + 0.587 * pixel[1] as f32 + 0.114 * pixel[2] as f32) as u8;
            gray.push(g);
        }
        Self::new(gray, width, height)
    }

    #[inline]
    fn pixel(&self, x: usize, y: usize) -> i32 {
        self.data[y * self.width + x] as i32
    }
}

/// SAD between a block centered at (px, py) in `prev` and (cx, cy) in `curr`.
#[inline]
fn sad_block(prev: &GrayFrame, curr: &GrayFrame, px: usize, py: usize, cx: usize, cy: usize, size: usize) -> u32 {
    let half = size / 2;
    let mut sum = 0u32;
    for dy in 0..size {
        let p_row = (py - half + dy) * prev.width + (px - half);
        let c_row = (cy - half + dy) * curr.width + (cx - half);
        for dx in 0..size {
            let diff = prev.data[p_row + dx] as i32 - curr.data[c_row + dx] as i32;
            sum += diff.unsigned_abs();
        }
    }
    sum
}

#[derive(Debug, Clone, Copy)]
struct Feature {
    x: usize,
    y: usize,
    score: f32,
}

/// Shi-Tomasi style minimum-eigenvalue corner response over a 5x5 window.
fn corner_score(frame: &GrayFrame, x: usize, y: usize) -> f32 {
    let mut sxx = 0f32;
    let mut syy = 0f32;
    let mut sxy = 0f32;
    for wy in y - 2..=y + 2 {
        for wx in x - 2..=x + 2 {
            let ix = (frame.pixel(wx + 1, wy) - frame.pixel(wx - 1, wy)) as f32;
            let iy = (frame.pixel(wx, wy + 1) - frame.pixel(wx, wy - 1)) as f32;
            sxx += ix * ix;
            syy += iy * iy;
            sxy += ix * iy;
        }
    }
    let trace = sxx + syy;
    let det_term = ((sxx - syy) * (sxx - syy) + 4.0 * sxy * sxy).sqrt();
    0.5 * (trace - det_term)
}

pub struct GlobalMotionEstimator {
    config: MotionConfig,
}

impl GlobalMotionEstimator {
    pub fn new(config: MotionConfig) -> Self {
        Self { config }
    }

    /// Estimate global translation (dx, dy) in pixels from `prev` to `curr`.
    pub fn estimate(&self, prev: Option<&GrayFrame>, curr: Option<&GrayFrame>) -> (f32, f32) {
        let (Some(prev), Some(curr)) = (prev, curr) else {
            return (0.0, 0.0);
        };
        if prev.width != curr.width || prev.height != curr.height {
            return (0.0, 0.0);
        }

        let features = self.detect_features(prev);
        if features.is_empty() {
            return (0.0, 0.0);
        }

        let mut dxs: Vec<f32> = Vec::with_capacity(features.len());
        let mut dys: Vec<f32> = Vec::with_capacity(features.len());
        for feature in &features {
            if let Some((dx, dy)) = self.track_feature(prev, curr, feature) {
                dxs.push(dx);
                dys.push(dy);
            }
        }

        if dxs.len() < self.config.min_confirmed_features {
            return (0.0, 0.0);
        }

        (median(&mut dxs), median(&mut dys))
    }

    /// Detect up to `max_features` corners in `frame`, keeping a minimum
    /// distance between picks.
    fn detect_features(&self, frame: &GrayFrame) -> Vec<Feature> {
        let margin = self.config.block_size / 2 + self.config.search_range + 3;
        if frame.width <= 2 * margin || frame.height <= 2 * margin {
            return Vec::new();
        }

        let step = self.config.min_feature_distance.max(1);
        let mut candidates = Vec::new();
        let mut y = margin;
        while y < frame.height - margin {
            let mut x = margin;
            while x < frame.width - margin {
                let score = corner_score(frame, x, y);
                if score > 0.0 {
                    candidates.push(Feature { x, y, score });
                }
                x += step;
            }
            y += step;
        }

        if candidates.is_empty() {
            return candidates;
        }

        candidates.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));

        // quality gate relative to the strongest corner, like
        // goodFeaturesToTrack's qualityLevel
        let threshold = candidates[0].score * 0.01;
        candidates
            .into_iter()
            .filter(|f| f.score >= threshold)
            .take(self.config.max_features)
            .collect()
    }

    /// Locate one feature in the current frame with an exhaustive SAD
    /// search over every integer offset in range; a feature counts as
    /// confirmed only when its best match is a plausible block (bounded
    /// mean absolute difference).
    fn track_feature(&self, prev: &GrayFrame, curr: &GrayFrame, feature: &Feature) -> Option<(f32, f32)> {
        let size = self.config.block_size;
        let range = self.config.search_range as i32;
        let px = feature.x;
        let py = feature.y;

        let mut best_sad = u32::MAX;
        let mut best = (0i32, 0i32);

        for dy in -range..=range {
            for dx in -range..=range {
                let cx = (px as i32 + dx) as usize;
                let cy = (py as i32 + dy) as usize;
                let score = sad_block(prev, curr, px, py, cx, cy, size);
                if score < best_sad {
                    best_sad = score;
                    best = (dx, dy);
                }
            }
        }

        // confirmation: mean absolute difference under 20 gray levels
        let max_sad = 20 * (size * size) as u32;
        if best_sad > max_sad {
            return None;
        }
        Some((best.0 as f32, best.1 as f32))
    }
}

fn median(values: &mut [f32]) -> f32 {
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}
