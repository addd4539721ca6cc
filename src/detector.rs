// src/detector.rs
//
// Detector/tracker adapter boundary. The detection-and-tracking model is an
// external capability: given a frame it returns raw detections with stable
// per-clip track ids. This module only defines the capability contract, an
// HTTP implementation for remote inference endpoints, and the normalization
// of raw output into the closed `Detection` shape.
//
// Detection absence is only distinguishable from "nothing detected" at this
// boundary, so adapter failure is a hard job failure, never an empty list.

use std::collections::HashSet;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::PipelineError;
use crate::types::{Detection, Frame, ObjectClass};

/// One raw detection as the external capability reports it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawDetection {
    pub class_label: String,
    /// `None` when the tracker did not assign an identity this frame.
    pub track_id: Option<i64>,
    pub xc: f32,
    pub yc: f32,
    pub w: f32,
    pub h: f32,
    pub conf: f32,
}

/// Capability contract for an external detection + tracking model.
///
/// Track ids persist across frames of one clip while the adapter considers
/// the object continuously tracked; re-identification policy is the
/// adapter's business.
pub trait DetectorAdapter: Send {
    /// Called once before the first frame of each clip so the adapter can
    /// reset its identity state.
    fn begin_clip(&mut self, clip_id: &str) -> Result<(), PipelineError>;

    fn detect_and_track(&mut self, frame: &Frame) -> Result<Vec<RawDetection>, PipelineError>;
}

/// Normalize raw adapter output into `Detection`s: filter to the target
/// taxonomy, compute bbox area and area-ratio, mark untracked objects with
/// `track_id == -1`.
pub fn normalize_detections(
    raw: Vec<RawDetection>,
    targets: &HashSet<ObjectClass>,
    clip_id: &str,
    timestamp_s: f64,
    frame_width: usize,
    frame_height: usize,
) -> Vec<Detection> {
    let frame_area = (frame_width * frame_height).max(1) as f32;
    raw.into_iter()
        .filter_map(|det| {
            let class = ObjectClass::parse(&det.class_label)?;
            if !targets.contains(&class) {
                return None;
            }
            let area = (det.w * det.h).max(1.0);
            Some(Detection {
                clip_id: clip_id.to_string(),
                class,
                track_id: det.track_id.unwrap_or(-1),
                t: timestamp_s,
                xc: det.xc,
                yc: det.yc,
                w: det.w,
                h: det.h,
                conf: det.conf.clamp(0.0, 1.0),
                area,
                area_ratio: (area / frame_area).min(1.0),
            })
        })
        .collect()
}

// ---------------------------------------------------------------------------
// HTTP adapter
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct TrackRequest<'a> {
    clip_id: &'a str,
    timestamp_s: f64,
    width: usize,
    height: usize,
    /// Packed RGB frame bytes, base64-encoded.
    frame_b64: String,
    target_classes: &'a [String],
}

#[derive(Deserialize)]
struct TrackResponse {
    detections: Vec<RawDetection>,
}

/// Adapter that ships sampled frames to a remote inference endpoint.
pub struct HttpDetector {
    client: reqwest::blocking::Client,
    endpoint: String,
    target_classes: Vec<String>,
    current_clip: String,
}

impl HttpDetector {
    pub fn new(
        endpoint: String,
        target_classes: Vec<String>,
        timeout: Duration,
    ) -> Result<Self, PipelineError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PipelineError::DetectorUnavailable(e.to_string()))?;
        Ok(Self {
            client,
            endpoint,
            target_classes,
            current_clip: String::new(),
        })
    }
}

impl DetectorAdapter for HttpDetector {
    fn begin_clip(&mut self, clip_id: &str) -> Result<(), PipelineError> {
        // a new clip id is enough for the endpoint to reset its tracker state
        self.current_clip = clip_id.to_string();
        Ok(())
    }

    fn detect_and_track(&mut self, frame: &Frame) -> Result<Vec<RawDetection>, PipelineError> {
        let request = TrackRequest {
            clip_id: &self.current_clip,
            timestamp_s: frame.timestamp,
            width: frame.width,
            height: frame.height,
            frame_b64: BASE64.encode(&frame.data),
            target_classes: &self.target_classes,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .map_err(|e| PipelineError::DetectorUnavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(PipelineError::DetectorUnavailable(format!(
                "endpoint returned {}",
                response.status()
            )));
        }

        let body: TrackResponse = response
            .json()
            .map_err(|e| PipelineError::DetectorUnavailable(format!("bad response body: {e}")))?;

        debug!(
            clip_id = %self.current_clip,
            t = frame.timestamp,
            count = body.detections.len(),
            "detector response"
        );
        Ok(body.detections)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(label: &str, track_id: Option<i64>, w: f32, h: f32) -> RawDetection {
        RawDetection {
            class_label: label.to_string(),
            track_id,
            xc: 100.0,
            yc: 100.0,
            w,
            h,
            conf: 0.9,
        }
    }

    fn all_targets() -> HashSet<ObjectClass> {
        ["car", "truck", "bus", "motorcycle", "bicycle", "person"]
            .iter()
            .filter_map(|s| ObjectClass::parse(s))
            .collect()
    }

    #[test]
    fn unknown_labels_are_dropped() {
        let out = normalize_detections(
            vec![raw("car", Some(1), 40.0, 30.0), raw("traffic_light", Some(2), 10.0, 10.0)],
            &all_targets(),
            "clip_1",
            0.2,
            1920,
            1080,
        );
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].class, ObjectClass::Car);
    }

    #[test]
    fn untracked_detections_get_minus_one() {
        let out = normalize_detections(
            vec![raw("bus", None, 40.0, 30.0)],
            &all_targets(),
            "clip_1",
            0.2,
            1920,
            1080,
        );
        assert_eq!(out[0].track_id, -1);
    }

    #[test]
    fn area_ratio_stays_in_unit_range() {
        // bbox larger than the frame still clamps to 1.0
        let out = normalize_detections(
            vec![raw("truck", Some(3), 5000.0, 5000.0)],
            &all_targets(),
            "clip_1",
            0.0,
            640,
            480,
        );
        assert_eq!(out[0].area_ratio, 1.0);

        let out = normalize_detections(
            vec![raw("car", Some(3), 64.0, 48.0)],
            &all_targets(),
            "clip_1",
            0.0,
            640,
            480,
        );
        assert!(out[0].area_ratio > 0.0 && out[0].area_ratio < 1.0);
    }

    #[test]
    fn taxonomy_filter_respects_configured_targets() {
        let vehicles_only: HashSet<ObjectClass> =
            [ObjectClass::Car, ObjectClass::Truck].into_iter().collect();
        let out = normalize_detections(
            vec![raw("person", Some(1), 20.0, 60.0), raw("truck", Some(2), 80.0, 60.0)],
            &vehicles_only,
            "clip_1",
            1.0,
            1280,
            720,
        );
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].class, ObjectClass::Truck);
    }
}
