//! Closed-form event heuristics evaluated over finalized track point
//! sequences. Each confidence function is pure; the engine applies the
//! class-specific checks and emits events above the confidence floor.

use crate::config::HeuristicsConfig;
use crate::trajectory::{FinalizedTrack, TrackPoint};
use crate::types::{EventKind, TrackEvent};

const CUT_IN_DEFINITION: &str =
    "Track entered the center lane from a side region with rapid bounding-box growth.";
const CLOSE_FOLLOWING_DEFINITION: &str =
    "Track held the center region at high area ratio for a sustained span.";
const BIKE_PROXIMITY_DEFINITION: &str =
    "Bicycle shared the center lane region in close proximity to the camera.";

/// Horizontal center band is the middle third of the frame (33%..67%).
fn in_center(xc: f32, frame_w: f32) -> bool {
    xc >= frame_w * 0.33 && xc <= frame_w * 0.67
}

/// Side-start, center-end, area growth over 35% of the start area.
pub fn cut_in_confidence(points: &[TrackPoint], frame_w: f32) -> f64 {
    if points.len() < 3 {
        return 0.0;
    }
    let start = &points[0];
    let end = &points[points.len() - 1];
    if in_center(start.xc, frame_w) || !in_center(end.xc, frame_w) {
        return 0.0;
    }
    let growth = f64::from(end.area - start.area) / f64::from(start.area.max(1.0));
    if growth > 0.35 {
        (0.5 + growth / 2.0).min(1.0)
    } else {
        0.0
    }
}

/// Centered points with a large area ratio must span at least
/// `min_seconds`; confidence scales with the span up to six seconds.
pub fn close_following_confidence(points: &[TrackPoint], frame_w: f32, min_seconds: f64) -> f64 {
    let centered: Vec<&TrackPoint> = points
        .iter()
        .filter(|p| in_center(p.xc, frame_w) && p.area_ratio > 0.08)
        .collect();
    let (first, last) = match (centered.first(), centered.last()) {
        (Some(f), Some(l)) => (f, l),
        _ => return 0.0,
    };
    let span = last.t - first.t;
    if span < min_seconds {
        return 0.0;
    }
    (span / 6.0).min(1.0)
}

/// Any centered point with a non-trivial area ratio counts; confidence
/// grows with the number of close points.
pub fn bike_proximity_confidence(points: &[TrackPoint], frame_w: f32) -> f64 {
    let close = points
        .iter()
        .filter(|p| in_center(p.xc, frame_w) && p.area_ratio > 0.01)
        .count();
    if close == 0 {
        return 0.0;
    }
    (0.4 + close as f64 * 0.1).min(1.0)
}

/// Evaluates every heuristic applicable to a track's class and records
/// events above the configured confidence floor.
pub struct EventEngine {
    cfg: HeuristicsConfig,
    next_event_id: i64,
}

impl EventEngine {
    pub fn new(cfg: HeuristicsConfig) -> Self {
        Self {
            cfg,
            next_event_id: 1,
        }
    }

    pub fn evaluate(&mut self, track: &FinalizedTrack, frame_w: f32) -> Vec<TrackEvent> {
        let mut events = Vec::new();
        let last_t = match track.points.last() {
            Some(p) => p.t,
            None => return events,
        };

        let class = track.record.class;
        if class.is_vehicle() {
            let conf = cut_in_confidence(&track.points, frame_w);
            self.record(&mut events, track, EventKind::CutIn, conf, last_t, CUT_IN_DEFINITION);

            let conf = close_following_confidence(
                &track.points,
                frame_w,
                self.cfg.close_following_min_seconds,
            );
            self.record(
                &mut events,
                track,
                EventKind::CloseFollowingProxy,
                conf,
                last_t,
                CLOSE_FOLLOWING_DEFINITION,
            );
        } else if class == crate::types::ObjectClass::Bicycle {
            let conf = bike_proximity_confidence(&track.points, frame_w);
            self.record(
                &mut events,
                track,
                EventKind::BikeProximityLaneShareProxy,
                conf,
                last_t,
                BIKE_PROXIMITY_DEFINITION,
            );
        }
        events
    }

    fn record(
        &mut self,
        events: &mut Vec<TrackEvent>,
        track: &FinalizedTrack,
        kind: EventKind,
        confidence: f64,
        timestamp: f64,
        definition: &str,
    ) {
        if confidence <= self.cfg.min_event_confidence {
            return;
        }
        let event_id = self.next_event_id;
        self.next_event_id += 1;
        events.push(TrackEvent {
            event_id,
            kind,
            timestamp,
            confidence,
            track_id: track.record.track_id,
            clip_id: track.record.clip_id.clone(),
            details: definition.to_string(),
            clip_key: None,
            review_status: "pending".to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trajectory::TrackArena;
    use crate::types::{Detection, ObjectClass};

    fn point(t: f64, xc: f32, area: f32, area_ratio: f32) -> TrackPoint {
        TrackPoint {
            t,
            xc,
            yc: 200.0,
            area,
            area_ratio,
        }
    }

    #[test]
    fn cut_in_from_left_with_area_growth_scores_high() {
        let pts = vec![
            point(0.0, 100.0, 1000.0, 0.01),
            point(0.2, 220.0, 1500.0, 0.015),
            point(0.4, 350.0, 2200.0, 0.022),
        ];
        let conf = cut_in_confidence(&pts, 1000.0);
        assert!(conf > 0.5, "expected > 0.5, got {conf}");
    }

    #[test]
    fn cut_in_needs_three_points_and_side_start() {
        let short = vec![point(0.0, 100.0, 1000.0, 0.01), point(0.2, 350.0, 2200.0, 0.02)];
        assert_eq!(cut_in_confidence(&short, 1000.0), 0.0);

        // Already centered at the start.
        let centered = vec![
            point(0.0, 400.0, 1000.0, 0.01),
            point(0.2, 420.0, 1500.0, 0.015),
            point(0.4, 450.0, 2200.0, 0.022),
        ];
        assert_eq!(cut_in_confidence(&centered, 1000.0), 0.0);
    }

    #[test]
    fn cut_in_requires_area_growth() {
        let flat = vec![
            point(0.0, 100.0, 1000.0, 0.01),
            point(0.2, 220.0, 1050.0, 0.01),
            point(0.4, 350.0, 1100.0, 0.011),
        ];
        assert_eq!(cut_in_confidence(&flat, 1000.0), 0.0);
    }

    #[test]
    fn close_following_needs_a_two_second_span() {
        let long: Vec<TrackPoint> = (0..12)
            .map(|i| point(i as f64 * 0.2, 500.0, 20000.0, 0.1))
            .collect();
        let conf = close_following_confidence(&long, 1000.0, 2.0);
        assert!(conf > 0.0);

        let short: Vec<TrackPoint> = (0..5)
            .map(|i| point(i as f64 * 0.2, 500.0, 20000.0, 0.1))
            .collect();
        assert_eq!(close_following_confidence(&short, 1000.0, 2.0), 0.0);
    }

    #[test]
    fn close_following_ignores_small_or_off_center_points() {
        // Large span but the area ratio never clears the threshold.
        let faint: Vec<TrackPoint> = (0..20)
            .map(|i| point(i as f64 * 0.2, 500.0, 2000.0, 0.02))
            .collect();
        assert_eq!(close_following_confidence(&faint, 1000.0, 2.0), 0.0);
    }

    #[test]
    fn bike_proximity_scales_with_close_point_count() {
        let pts: Vec<TrackPoint> = (0..3)
            .map(|i| point(i as f64 * 0.2, 500.0, 3000.0, 0.02))
            .collect();
        let conf = bike_proximity_confidence(&pts, 1000.0);
        assert!((conf - 0.7).abs() < 1e-9);

        let many: Vec<TrackPoint> = (0..10)
            .map(|i| point(i as f64 * 0.2, 500.0, 3000.0, 0.02))
            .collect();
        assert_eq!(bike_proximity_confidence(&many, 1000.0), 1.0);
    }

    fn detection(clip: &str, class: ObjectClass, track_id: i64, t: f64, xc: f32, area: f32) -> Detection {
        Detection {
            clip_id: clip.to_string(),
            class,
            track_id,
            t,
            xc,
            yc: 200.0,
            w: area.sqrt(),
            h: area.sqrt(),
            conf: 0.9,
            area,
            area_ratio: area / 480_000.0,
        }
    }

    #[test]
    fn engine_routes_heuristics_by_class() {
        let mut arena = TrackArena::new(5.0);
        // A car cutting in from the left and a bicycle holding the center.
        for (i, xc) in [100.0_f32, 220.0, 350.0].iter().enumerate() {
            let t = i as f64 * 0.2;
            let dets = vec![
                detection("c", ObjectClass::Car, 1, t, *xc, 1000.0 + 600.0 * i as f32),
                detection("c", ObjectClass::Bicycle, 2, t, 500.0, 30_000.0),
            ];
            arena.observe_frame("c", t, &dets, (0.0, 0.0));
        }
        let tracks = arena.finalize_clip("c", 0.6);

        let mut engine = EventEngine::new(HeuristicsConfig::default());
        let events: Vec<TrackEvent> = tracks
            .iter()
            .flat_map(|t| engine.evaluate(t, 1000.0))
            .collect();

        let kinds: Vec<EventKind> = events.iter().map(|e| e.kind).collect();
        assert!(kinds.contains(&EventKind::CutIn));
        assert!(kinds.contains(&EventKind::BikeProximityLaneShareProxy));
        // The car never held the center long enough for close-following.
        assert!(!kinds.contains(&EventKind::CloseFollowingProxy));
        for e in &events {
            assert_eq!(e.review_status, "pending");
            assert!(e.confidence > 0.2 && e.confidence <= 1.0);
        }
        // Distinct event ids.
        let mut ids: Vec<i64> = events.iter().map(|e| e.event_id).collect();
        ids.dedup();
        assert_eq!(ids.len(), events.len());
    }
}
