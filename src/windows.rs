//! Fixed-duration window aggregation over per-frame samples, plus the
//! congestion score combining density, stopped-ratio, and compensated
//! speed pressure.

use std::collections::BTreeMap;

use crate::config::WindowConfig;
use crate::types::{AnalyticsWindow, FrameSample};

/// Weighted congestion pressure on a 0..100 scale, rounded to two
/// decimals: 45% density, 35% stopped-ratio, 20% low compensated speed.
pub fn congestion_score(
    avg_compensated_speed: f64,
    stopped_ratio: f64,
    density_index: f64,
    cfg: &WindowConfig,
) -> f64 {
    let density = density_index.clamp(0.0, 1.0);
    let stopped = stopped_ratio.clamp(0.0, 1.0);
    let low_speed = 1.0 - (avg_compensated_speed.max(0.0) / cfg.speed_normalizer).min(1.0);
    let score = 100.0 * (0.45 * density + 0.35 * stopped + 0.20 * low_speed);
    (score.clamp(0.0, 100.0) * 100.0).round() / 100.0
}

/// Buckets one clip's samples into `window_s`-second windows indexed by
/// `floor(t / window_s)` on the job-global timeline. Buckets with no
/// samples are not emitted.
pub fn build_windows(
    clip_id: &str,
    samples: &[FrameSample],
    cfg: &WindowConfig,
) -> Vec<AnalyticsWindow> {
    let window_s = f64::from(cfg.window_s);
    let mut buckets: BTreeMap<i64, Vec<&FrameSample>> = BTreeMap::new();
    for sample in samples.iter().filter(|s| s.clip_id == clip_id) {
        let idx = (sample.t / window_s).floor() as i64;
        buckets.entry(idx).or_default().push(sample);
    }

    buckets
        .into_iter()
        .map(|(idx, vals)| {
            let n = vals.len() as f64;
            let active = vals.iter().map(|v| v.active_tracks).max().unwrap_or(0);
            let avg_raw = vals.iter().map(|v| v.raw_motion).sum::<f64>() / n;
            let avg_comp = vals.iter().map(|v| v.comp_motion).sum::<f64>() / n;
            let stopped = vals
                .iter()
                .filter(|v| v.comp_motion < cfg.stopped_speed_threshold)
                .count() as f64
                / n;
            let density = (active as f64 / cfg.density_normalizer).min(1.0);
            AnalyticsWindow {
                clip_id: clip_id.to_string(),
                t_start: idx as f64 * window_s,
                t_end: (idx + 1) as f64 * window_s,
                active_tracks: active as u32,
                avg_raw_speed: avg_raw,
                avg_compensated_speed: avg_comp,
                avg_speed_proxy: avg_comp,
                stopped_ratio: stopped,
                density_index: density,
                congestion_score: congestion_score(avg_comp, stopped, density, cfg),
            }
        })
        .collect()
}
