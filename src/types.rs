// src/types.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Fixed detection taxonomy. The adapter boundary validates raw class
/// labels against this enum and drops everything else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectClass {
    Car,
    Truck,
    Bus,
    Motorcycle,
    Bicycle,
    Person,
}

impl ObjectClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Car => "car",
            Self::Truck => "truck",
            Self::Bus => "bus",
            Self::Motorcycle => "motorcycle",
            Self::Bicycle => "bicycle",
            Self::Person => "person",
        }
    }

    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "car" => Some(Self::Car),
            "truck" => Some(Self::Truck),
            "bus" => Some(Self::Bus),
            "motorcycle" => Some(Self::Motorcycle),
            "bicycle" => Some(Self::Bicycle),
            "person" => Some(Self::Person),
            _ => None,
        }
    }

    /// Vehicle classes are eligible for cut-in and close-following checks.
    pub fn is_vehicle(&self) -> bool {
        matches!(self, Self::Car | Self::Truck | Self::Bus | Self::Motorcycle)
    }
}

/// One decoded RGB frame (packed, 3 bytes per pixel) with its clip-local
/// timestamp in seconds.
#[derive(Debug, Clone)]
pub struct Frame {
    pub data: Vec<u8>,
    pub width: usize,
    pub height: usize,
    pub timestamp: f64,
}

/// One observed object in one sampled frame, already normalized to the
/// fixed taxonomy. `track_id == -1` marks an untracked detection that the
/// trajectory aggregator discards.
#[derive(Debug, Clone)]
pub struct Detection {
    pub clip_id: String,
    pub class: ObjectClass,
    pub track_id: i64,
    /// Clip-local timestamp at normalization time; the trajectory
    /// aggregator rebases it onto the job-global timeline.
    pub t: f64,
    pub xc: f32,
    pub yc: f32,
    pub w: f32,
    pub h: f32,
    pub conf: f32,
    pub area: f32,
    /// Bounding-box area over frame area, in [0, 1].
    pub area_ratio: f32,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct BboxStats {
    pub max_area: f32,
    pub mean_area: f32,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct MotionStats {
    pub mean_raw_speed: f64,
    pub mean_compensated_speed: f64,
}

/// One point of a down-sampled exported trajectory.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TrajectoryPoint {
    pub t: f64,
    pub xc: f32,
    pub yc: f32,
}

/// A finalized track: the full point sequence of one physically distinct
/// object across sampled frames of one clip, reduced to stats plus a
/// bounded trajectory sample.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackRecord {
    pub track_id: i64,
    pub clip_id: String,
    pub class: ObjectClass,
    pub start_t: f64,
    pub end_t: f64,
    pub bbox_stats: BboxStats,
    pub motion_stats: MotionStats,
    pub point_count: usize,
    pub trajectory_sampled: Vec<TrajectoryPoint>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    CutIn,
    CloseFollowingProxy,
    BikeProximityLaneShareProxy,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CutIn => "cut_in",
            Self::CloseFollowingProxy => "close_following_proxy",
            Self::BikeProximityLaneShareProxy => "bike_proximity_lane_share_proxy",
        }
    }
}

/// A safety-relevant event derived from one finalized track.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackEvent {
    /// Job-scoped sequential id, assigned at recording time.
    pub event_id: i64,
    #[serde(rename = "type")]
    pub kind: EventKind,
    /// Timestamp of the triggering point (the track's last point).
    pub timestamp: f64,
    /// In [0, 1].
    pub confidence: f64,
    pub track_id: i64,
    pub clip_id: String,
    /// Fixed human-readable definition of the heuristic.
    pub details: String,
    /// Storage key of the artifact holding the preview clip, filled in
    /// during packaging.
    pub clip_key: Option<String>,
    pub review_status: String,
}

/// Per-frame scalar signals consumed only by the window aggregator.
#[derive(Debug, Clone)]
pub struct FrameSample {
    pub clip_id: String,
    /// Job-global timestamp.
    pub t: f64,
    pub active_tracks: usize,
    pub raw_motion: f64,
    pub comp_motion: f64,
    pub global_motion: (f32, f32),
}

/// Fixed 5-second aggregation bucket of per-frame signals for one clip.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsWindow {
    pub clip_id: String,
    pub t_start: f64,
    pub t_end: f64,
    pub active_tracks: u32,
    pub avg_raw_speed: f64,
    pub avg_compensated_speed: f64,
    pub avg_speed_proxy: f64,
    pub stopped_ratio: f64,
    pub density_index: f64,
    /// 0..=100, rounded to 2 decimals.
    pub congestion_score: f64,
}

/// One stored export file, content-addressed by SHA-256.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    pub name: String,
    pub key: String,
    pub mime_type: String,
    pub size_bytes: u64,
    pub sha256: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArtifactManifest {
    pub artifacts: Vec<Artifact>,
}

impl ArtifactManifest {
    pub fn push(&mut self, artifact: Artifact) {
        self.artifacts.push(artifact);
    }

    pub fn get(&self, name: &str) -> Option<&Artifact> {
        self.artifacts.iter().find(|a| a.name == name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

/// A processing job. Owned exclusively by the orchestrator and persisted
/// after each lifecycle transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub status: JobStatus,
    /// Declared filename of the original upload.
    pub filename: String,
    /// Blob-store key of the uploaded bytes.
    pub storage_key: String,
    pub duration_s: Option<f64>,
    pub fps_sampled: Option<u32>,
    /// Free-form settings map; the pipeline records the preview key,
    /// marketplace product key/hash and clip list here on success.
    pub settings: serde_json::Map<String, serde_json::Value>,
    pub artifacts: Option<ArtifactManifest>,
    pub logs_summary: String,
}

impl Job {
    pub fn new(id: i64, filename: impl Into<String>, storage_key: impl Into<String>) -> Self {
        Self {
            id,
            created_at: Utc::now(),
            status: JobStatus::Queued,
            filename: filename.into(),
            storage_key: storage_key.into(),
            duration_s: None,
            fps_sampled: None,
            settings: serde_json::Map::new(),
            artifacts: None,
            logs_summary: String::new(),
        }
    }

    pub fn append_log(&mut self, line: &str) {
        if !self.logs_summary.is_empty() {
            self.logs_summary.push('\n');
        }
        self.logs_summary.push_str(line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn class_roundtrip_and_vehicle_split() {
        for label in ["car", "truck", "bus", "motorcycle", "bicycle", "person"] {
            let class = ObjectClass::parse(label).unwrap();
            assert_eq!(class.as_str(), label);
        }
        assert!(ObjectClass::parse("traffic_light").is_none());
        assert!(ObjectClass::Truck.is_vehicle());
        assert!(!ObjectClass::Bicycle.is_vehicle());
        assert!(!ObjectClass::Person.is_vehicle());
    }

    #[test]
    fn job_log_accumulates_lines() {
        let mut job = Job::new(1, "clip.mp4", "jobs/1/upload/clip.mp4");
        job.append_log("queued");
        job.append_log("running");
        assert_eq!(job.logs_summary, "queued\nrunning");
    }
}
