// src/trajectory.rs
//
// Trajectory aggregation across sampled frames and clips.
//
// The arena maps (clip id, track id) to an append-only point sequence.
// Per frame it also produces the scalar motion sample the window
// aggregator consumes: the mean raw and motion-compensated displacement
// magnitude over tracks whose last two points are close enough in time.
// Clip timestamps are rebased onto one job-global timeline by adding the
// cumulative duration of previously processed clips.

use std::collections::HashMap;

use crate::types::{
    BboxStats, Detection, FrameSample, MotionStats, ObjectClass, TrackRecord, TrajectoryPoint,
};

/// Exported trajectories are uniformly down-sampled to at most this many
/// points.
pub const MAX_TRAJECTORY_POINTS: usize = 20;

/// One appended observation of a track.
#[derive(Debug, Clone, Copy)]
pub struct TrackPoint {
    /// Job-global timestamp.
    pub t: f64,
    pub xc: f32,
    pub yc: f32,
    pub area: f32,
    pub area_ratio: f32,
}

#[derive(Debug)]
struct TrackState {
    class: ObjectClass,
    points: Vec<TrackPoint>,
    raw_speed_sum: f64,
    comp_speed_sum: f64,
    speed_pairs: usize,
}

pub struct TrackArena {
    sample_interval: f64,
    clip_offset: f64,
    tracks: HashMap<(String, i64), TrackState>,
}

impl TrackArena {
    pub fn new(sample_fps: f64) -> Self {
        Self {
            sample_interval: 1.0 / sample_fps.max(f64::EPSILON),
            clip_offset: 0.0,
            tracks: HashMap::new(),
        }
    }

    /// Current clip-local-to-global offset in seconds.
    pub fn clip_offset(&self) -> f64 {
        self.clip_offset
    }

    /// Ingest one sampled frame's detections and return the frame sample.
    ///
    /// `frame_t` is the clip-local frame timestamp; detections are expected
    /// to carry the same clip-local time.
    pub fn observe_frame(
        &mut self,
        clip_id: &str,
        frame_t: f64,
        detections: &[Detection],
        global_motion: (f32, f32),
    ) -> FrameSample {
        let t_global = frame_t + self.clip_offset;
        let mut raw_mags = Vec::new();
        let mut comp_mags = Vec::new();
        let mut active = Vec::new();

        for det in detections {
            if det.track_id < 0 {
                // untracked detections never enter trajectory aggregation
                continue;
            }
            if !active.contains(&det.track_id) {
                active.push(det.track_id);
            }

            let key = (clip_id.to_string(), det.track_id);
            let state = self.tracks.entry(key).or_insert_with(|| TrackState {
                class: det.class,
                points: Vec::new(),
                raw_speed_sum: 0.0,
                comp_speed_sum: 0.0,
                speed_pairs: 0,
            });

            state.points.push(TrackPoint {
                t: det.t + self.clip_offset,
                xc: det.xc,
                yc: det.yc,
                area: det.area,
                area_ratio: det.area_ratio,
            });

            let n = state.points.len();
            if n >= 2 {
                let prev = state.points[n - 2];
                let curr = state.points[n - 1];
                if curr.t - prev.t <= 2.0 * self.sample_interval {
                    let dx = (curr.xc - prev.xc) as f64;
                    let dy = (curr.yc - prev.yc) as f64;
                    let raw = (dx * dx + dy * dy).sqrt();
                    let cdx = dx - global_motion.0 as f64;
                    let cdy = dy - global_motion.1 as f64;
                    let comp = (cdx * cdx + cdy * cdy).sqrt();

                    state.raw_speed_sum += raw;
                    state.comp_speed_sum += comp;
                    state.speed_pairs += 1;
                    raw_mags.push(raw);
                    comp_mags.push(comp);
                }
            }
        }

        FrameSample {
            clip_id: clip_id.to_string(),
            t: t_global,
            active_tracks: active.len(),
            raw_motion: mean(&raw_mags),
            comp_motion: mean(&comp_mags),
            global_motion,
        }
    }

    /// Finalize every track of `clip_id` and clear its state from the
    /// arena, then advance the global offset by the clip's duration.
    /// Tracks are returned in ascending track-id order, each paired with
    /// its full point sequence for the heuristics engine.
    pub fn finalize_clip(&mut self, clip_id: &str, clip_duration_s: f64) -> Vec<FinalizedTrack> {
        let keys: Vec<(String, i64)> = self
            .tracks
            .keys()
            .filter(|(cid, _)| cid == clip_id)
            .cloned()
            .collect();

        let mut finalized = Vec::with_capacity(keys.len());
        for key in keys {
            let state = match self.tracks.remove(&key) {
                Some(s) if !s.points.is_empty() => s,
                _ => continue,
            };
            finalized.push(finalize_track(key.1, clip_id, state));
        }
        finalized.sort_by_key(|f| f.record.track_id);

        self.clip_offset += clip_duration_s;
        finalized
    }
}

/// A drained track: the reduced record plus the point sequence it came from.
#[derive(Debug)]
pub struct FinalizedTrack {
    pub record: TrackRecord,
    pub points: Vec<TrackPoint>,
}

fn finalize_track(track_id: i64, clip_id: &str, state: TrackState) -> FinalizedTrack {
    let points = &state.points;
    let max_area = points.iter().map(|p| p.area).fold(0.0f32, f32::max);
    let mean_area = points.iter().map(|p| p.area).sum::<f32>() / points.len() as f32;

    let motion_stats = if state.speed_pairs > 0 {
        MotionStats {
            mean_raw_speed: state.raw_speed_sum / state.speed_pairs as f64,
            mean_compensated_speed: state.comp_speed_sum / state.speed_pairs as f64,
        }
    } else {
        MotionStats::default()
    };

    let record = TrackRecord {
        track_id,
        clip_id: clip_id.to_string(),
        class: state.class,
        start_t: points[0].t,
        end_t: points[points.len() - 1].t,
        bbox_stats: BboxStats {
            max_area,
            mean_area,
        },
        motion_stats,
        point_count: points.len(),
        trajectory_sampled: downsample_trajectory(points, MAX_TRAJECTORY_POINTS),
    };
    FinalizedTrack {
        record,
        points: state.points,
    }
}

/// Uniform down-sampling preserving first and last points.
pub fn downsample_trajectory(points: &[TrackPoint], max_points: usize) -> Vec<TrajectoryPoint> {
    let n = points.len();
    let take = n.min(max_points);
    if take == 0 {
        return Vec::new();
    }
    if take == 1 {
        let p = points[0];
        return vec![TrajectoryPoint {
            t: p.t,
            xc: p.xc,
            yc: p.yc,
        }];
    }
    (0..take)
        .map(|i| {
            let idx = i * (n - 1) / (take - 1);
            let p = points[idx];
            TrajectoryPoint {
                t: p.t,
                xc: p.xc,
                yc: p.yc,
            }
        })
        .collect()
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ObjectClass;

    fn det(track_id: i64, t: f64, xc: f32, area_side: f32) -> Detection {
        Detection {
            clip_id: "clip_1".to_string(),
            class: ObjectClass::Car,
            track_id,
            t,
            xc,
            yc: 200.0,
            w: area_side,
            h: area_side,
            conf: 0.9,
            area: area_side * area_side,
            area_ratio: 0.05,
        }
    }

    #[test]
    fn untracked_detections_are_discarded() {
        let mut arena = TrackArena::new(5.0);
        let sample = arena.observe_frame("clip_1", 0.0, &[det(-1, 0.0, 100.0, 30.0)], (0.0, 0.0));
        assert_eq!(sample.active_tracks, 0);
        assert!(arena.finalize_clip("clip_1", 1.0).is_empty());
    }

    #[test]
    fn compensation_subtracts_global_motion() {
        let mut arena = TrackArena::new(5.0); // sample interval 0.2s
        arena.observe_frame("clip_1", 0.0, &[det(7, 0.0, 100.0, 30.0)], (0.0, 0.0));
        // object moved +4 px while the camera moved +3 px
        let sample = arena.observe_frame("clip_1", 0.2, &[det(7, 0.2, 104.0, 30.0)], (3.0, 0.0));
        assert!((sample.raw_motion - 4.0).abs() < 1e-9);
        assert!((sample.comp_motion - 1.0).abs() < 1e-9);
        assert_eq!(sample.active_tracks, 1);

        let tracks = arena.finalize_clip("clip_1", 1.0);
        assert_eq!(tracks.len(), 1);
        assert!((tracks[0].record.motion_stats.mean_raw_speed - 4.0).abs() < 1e-9);
        assert!((tracks[0].record.motion_stats.mean_compensated_speed - 1.0).abs() < 1e-9);
    }

    #[test]
    fn stale_pairs_do_not_count_as_motion() {
        let mut arena = TrackArena::new(5.0);
        arena.observe_frame("clip_1", 0.0, &[det(3, 0.0, 100.0, 30.0)], (0.0, 0.0));
        // a gap of 1s exceeds 2 x 0.2s, so this pair is ignored
        let sample = arena.observe_frame("clip_1", 1.0, &[det(3, 1.0, 150.0, 30.0)], (0.0, 0.0));
        assert_eq!(sample.raw_motion, 0.0);
        assert_eq!(sample.comp_motion, 0.0);

        let tracks = arena.finalize_clip("clip_1", 2.0);
        assert_eq!(tracks[0].record.point_count, 2);
        assert_eq!(tracks[0].record.motion_stats.mean_raw_speed, 0.0);
    }

    #[test]
    fn clip_offset_rebases_later_clips() {
        let mut arena = TrackArena::new(5.0);
        arena.observe_frame("clip_1", 0.0, &[det(1, 0.0, 100.0, 30.0)], (0.0, 0.0));
        arena.finalize_clip("clip_1", 10.0);
        assert_eq!(arena.clip_offset(), 10.0);

        let sample = arena.observe_frame("clip_2", 0.4, &[det(2, 0.4, 100.0, 30.0)], (0.0, 0.0));
        assert!((sample.t - 10.4).abs() < 1e-9);

        let tracks = arena.finalize_clip("clip_2", 8.0);
        assert!((tracks[0].record.start_t - 10.4).abs() < 1e-9);
        assert_eq!(arena.clip_offset(), 18.0);
    }

    #[test]
    fn finalize_only_drains_the_named_clip() {
        let mut arena = TrackArena::new(5.0);
        arena.observe_frame("a", 0.0, &[det(1, 0.0, 100.0, 30.0)], (0.0, 0.0));
        let mut other = det(9, 0.0, 100.0, 30.0);
        other.clip_id = "b".to_string();
        arena.observe_frame("b", 0.0, &[other], (0.0, 0.0));

        let a_tracks = arena.finalize_clip("a", 1.0);
        assert_eq!(a_tracks.len(), 1);
        let b_tracks = arena.finalize_clip("b", 1.0);
        assert_eq!(b_tracks.len(), 1);
        assert_eq!(b_tracks[0].record.track_id, 9);
    }

    #[test]
    fn trajectories_are_bounded_to_twenty_points() {
        let mut arena = TrackArena::new(5.0);
        for i in 0..100 {
            let t = i as f64 * 0.2;
            arena.observe_frame("clip_1", t, &[det(4, t, 100.0 + i as f32, 30.0)], (0.0, 0.0));
        }
        let tracks = arena.finalize_clip("clip_1", 20.0);
        let trajectory = &tracks[0].record.trajectory_sampled;
        assert_eq!(trajectory.len(), MAX_TRAJECTORY_POINTS);
        assert_eq!(trajectory[0].xc, 100.0);
        assert_eq!(trajectory[MAX_TRAJECTORY_POINTS - 1].xc, 199.0);
        assert_eq!(tracks[0].record.point_count, 100);
    }
}
