//! Datapack assembly: serializes tracks, events, and windows into the
//! fixed export file set, hashes payloads deterministically, and builds
//! the marketplace aggregate payload.

use std::collections::BTreeMap;
use std::io::{Cursor, Write};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parquet::data_type::{ByteArray, ByteArrayType, DoubleType, Int32Type};
use parquet::file::properties::WriterProperties;
use parquet::file::writer::{SerializedColumnWriter, SerializedFileWriter, SerializedRowGroupWriter};
use parquet::schema::parser::parse_message_type;
use serde_json::{json, Value};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::PipelineError;
use crate::types::{AnalyticsWindow, Job, TrackEvent, TrackRecord};

pub const DATAPACK_VERSION: &str = "v1";

/// Canonical JSON: lexically sorted keys, compact separators. The
/// default `serde_json` map is ordered, so serializing a `Value` built
/// from any insertion order yields the same bytes.
pub fn canonical_json(payload: &Value) -> String {
    payload.to_string()
}

pub fn hash_payload(payload: &Value) -> String {
    crate::artifacts::sha256_hex(canonical_json(payload).as_bytes())
}

fn tagged(value: &impl serde::Serialize) -> Result<Value, PipelineError> {
    let mut value = serde_json::to_value(value)?;
    if let Value::Object(map) = &mut value {
        map.insert("datapack_version".to_string(), json!(DATAPACK_VERSION));
    }
    Ok(value)
}

fn to_jsonl(values: &[Value]) -> Vec<u8> {
    let mut out = Vec::new();
    for value in values {
        out.extend_from_slice(value.to_string().as_bytes());
        out.push(b'\n');
    }
    out
}

pub fn events_jsonl(events: &[TrackEvent]) -> Result<Vec<u8>, PipelineError> {
    let rows = events.iter().map(tagged).collect::<Result<Vec<_>, _>>()?;
    Ok(to_jsonl(&rows))
}

pub fn tracks_jsonl(tracks: &[TrackRecord]) -> Result<Vec<u8>, PipelineError> {
    let rows = tracks.iter().map(tagged).collect::<Result<Vec<_>, _>>()?;
    Ok(to_jsonl(&rows))
}

fn csv_error(e: csv::Error) -> PipelineError {
    PipelineError::Export(e.to_string())
}

pub fn events_csv(events: &[TrackEvent]) -> Result<Vec<u8>, PipelineError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer
        .write_record([
            "event_id",
            "type",
            "timestamp",
            "confidence",
            "track_id",
            "details",
            "clip_key",
            "review_status",
            "clip_id",
            "datapack_version",
        ])
        .map_err(csv_error)?;
    for e in events {
        writer
            .write_record([
                e.event_id.to_string(),
                e.kind.as_str().to_string(),
                e.timestamp.to_string(),
                e.confidence.to_string(),
                e.track_id.to_string(),
                e.details.clone(),
                e.clip_key.clone().unwrap_or_default(),
                e.review_status.clone(),
                e.clip_id.clone(),
                DATAPACK_VERSION.to_string(),
            ])
            .map_err(csv_error)?;
    }
    writer
        .into_inner()
        .map_err(|e| PipelineError::Export(e.to_string()))
}

pub fn tracks_csv(tracks: &[TrackRecord]) -> Result<Vec<u8>, PipelineError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer
        .write_record([
            "track_id",
            "class",
            "start_t",
            "end_t",
            "bbox_stats",
            "motion_stats",
            "trajectory_sampled",
            "clip_id",
            "datapack_version",
        ])
        .map_err(csv_error)?;
    for t in tracks {
        // Nested stats land in CSV cells as compact JSON.
        writer
            .write_record([
                t.track_id.to_string(),
                t.class.as_str().to_string(),
                t.start_t.to_string(),
                t.end_t.to_string(),
                serde_json::to_value(&t.bbox_stats)?.to_string(),
                serde_json::to_value(&t.motion_stats)?.to_string(),
                serde_json::to_value(&t.trajectory_sampled)?.to_string(),
                t.clip_id.clone(),
                DATAPACK_VERSION.to_string(),
            ])
            .map_err(csv_error)?;
    }
    writer
        .into_inner()
        .map_err(|e| PipelineError::Export(e.to_string()))
}

pub fn windows_csv(windows: &[AnalyticsWindow]) -> Result<Vec<u8>, PipelineError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer
        .write_record([
            "t_start",
            "t_end",
            "active_tracks",
            "avg_raw_speed",
            "avg_compensated_speed",
            "avg_speed_proxy",
            "stopped_ratio",
            "density_index",
            "congestion_score",
            "clip_id",
            "datapack_version",
        ])
        .map_err(csv_error)?;
    for w in windows {
        writer
            .write_record([
                w.t_start.to_string(),
                w.t_end.to_string(),
                w.active_tracks.to_string(),
                w.avg_raw_speed.to_string(),
                w.avg_compensated_speed.to_string(),
                w.avg_speed_proxy.to_string(),
                w.stopped_ratio.to_string(),
                w.density_index.to_string(),
                w.congestion_score.to_string(),
                w.clip_id.clone(),
                DATAPACK_VERSION.to_string(),
            ])
            .map_err(csv_error)?;
    }
    writer
        .into_inner()
        .map_err(|e| PipelineError::Export(e.to_string()))
}

const WINDOWS_PARQUET_SCHEMA: &str = "
message analytics_window {
    required double t_start;
    required double t_end;
    required int32 active_tracks;
    required double avg_raw_speed;
    required double avg_compensated_speed;
    required double avg_speed_proxy;
    required double stopped_ratio;
    required double density_index;
    required double congestion_score;
    required binary clip_id (UTF8);
    required binary datapack_version (UTF8);
}
";

fn parquet_error(e: parquet::errors::ParquetError) -> PipelineError {
    PipelineError::Export(e.to_string())
}

fn next_column<'a, W: Write + Send>(
    group: &'a mut SerializedRowGroupWriter<'_, W>,
) -> Result<SerializedColumnWriter<'a>, PipelineError> {
    group
        .next_column()
        .map_err(parquet_error)?
        .ok_or_else(|| PipelineError::Export("parquet schema exhausted".to_string()))
}

fn write_double_column<W: Write + Send>(
    group: &mut SerializedRowGroupWriter<'_, W>,
    values: &[f64],
) -> Result<(), PipelineError> {
    let mut col = next_column(group)?;
    col.typed::<DoubleType>()
        .write_batch(values, None, None)
        .map_err(parquet_error)?;
    col.close().map_err(parquet_error)
}

/// Columnar windows export. Column order matches the CSV header.
pub fn windows_parquet(windows: &[AnalyticsWindow]) -> Result<Vec<u8>, PipelineError> {
    let schema = Arc::new(parse_message_type(WINDOWS_PARQUET_SCHEMA).map_err(parquet_error)?);
    let props = Arc::new(WriterProperties::builder().build());
    let mut writer =
        SerializedFileWriter::new(Vec::new(), schema, props).map_err(parquet_error)?;
    let mut group = writer.next_row_group().map_err(parquet_error)?;

    write_double_column(&mut group, &windows.iter().map(|w| w.t_start).collect::<Vec<_>>())?;
    write_double_column(&mut group, &windows.iter().map(|w| w.t_end).collect::<Vec<_>>())?;

    let active: Vec<i32> = windows.iter().map(|w| w.active_tracks as i32).collect();
    let mut col = next_column(&mut group)?;
    col.typed::<Int32Type>()
        .write_batch(&active, None, None)
        .map_err(parquet_error)?;
    col.close().map_err(parquet_error)?;

    for values in [
        windows.iter().map(|w| w.avg_raw_speed).collect::<Vec<_>>(),
        windows.iter().map(|w| w.avg_compensated_speed).collect(),
        windows.iter().map(|w| w.avg_speed_proxy).collect(),
        windows.iter().map(|w| w.stopped_ratio).collect(),
        windows.iter().map(|w| w.density_index).collect(),
        windows.iter().map(|w| w.congestion_score).collect(),
    ] {
        write_double_column(&mut group, &values)?;
    }

    let clip_ids: Vec<ByteArray> =
        windows.iter().map(|w| ByteArray::from(w.clip_id.as_str())).collect();
    let versions: Vec<ByteArray> =
        windows.iter().map(|_| ByteArray::from(DATAPACK_VERSION)).collect();
    for strings in [&clip_ids, &versions] {
        let mut col = next_column(&mut group)?;
        col.typed::<ByteArrayType>()
            .write_batch(strings, None, None)
            .map_err(parquet_error)?;
        col.close().map_err(parquet_error)?;
    }

    group.close().map_err(parquet_error)?;
    writer.into_inner().map_err(parquet_error)
}

fn count_by<T>(items: &[T], key: impl Fn(&T) -> &str) -> BTreeMap<String, u64> {
    let mut counts = BTreeMap::new();
    for item in items {
        *counts.entry(key(item).to_string()).or_insert(0) += 1;
    }
    counts
}

pub fn event_counts(events: &[TrackEvent]) -> BTreeMap<String, u64> {
    count_by(events, |e| e.kind.as_str())
}

pub fn class_counts(tracks: &[TrackRecord]) -> BTreeMap<String, u64> {
    count_by(tracks, |t| t.class.as_str())
}

/// Per-job summary document stored as `job_summary.json` and bundled
/// into the datapack archive.
pub fn build_summary(
    job: &Job,
    clip_ids: &[String],
    tracks: &[TrackRecord],
    events: &[TrackEvent],
    windows: &[AnalyticsWindow],
) -> Value {
    json!({
        "job_id": job.id,
        "status": job.status.as_str(),
        "source_file": job.filename,
        "duration_s": job.duration_s,
        "fps_sampled": job.fps_sampled,
        "clips": clip_ids,
        "settings": job.settings,
        "privacy": {
            "contains_raw_video": false,
            "contains_identifiers": false,
        },
        "totals": {
            "tracks": tracks.len(),
            "events": events.len(),
            "windows": windows.len(),
        },
        "class_counts": class_counts(tracks),
        "event_counts": event_counts(events),
        "window_count": windows.len(),
        "datapack_version": DATAPACK_VERSION,
    })
}

/// Aggregates-only payload for marketplace consumers. Carries no media
/// references; its canonical hash is persisted for later verification.
pub fn build_marketplace_payload(
    job_id: i64,
    source_file: &str,
    duration_s: f64,
    created_at: DateTime<Utc>,
    tracks: &[TrackRecord],
    events: &[TrackEvent],
    windows: &[AnalyticsWindow],
) -> Value {
    json!({
        "version": "1.0",
        "job_id": job_id,
        "source_file": source_file,
        "duration_s": (duration_s * 100.0).round() / 100.0,
        "created_at": created_at.to_rfc3339(),
        "privacy": {
            "contains_raw_video": false,
            "contains_identifiers": false,
            "notes": "Aggregated traffic statistics only. No plate or face identifiers.",
        },
        "aggregates": {
            "event_counts": event_counts(events),
            "class_counts": class_counts(tracks),
            "analytics_windows": windows,
        },
    })
}

/// Bundles the summary and tabular exports into `data_pack_v1.zip`.
pub fn build_zip(entries: &[(&str, &[u8])]) -> Result<Vec<u8>, PipelineError> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    for (name, payload) in entries {
        writer
            .start_file(*name, options)
            .map_err(|e| PipelineError::Export(e.to_string()))?;
        writer.write_all(payload)?;
    }
    let cursor = writer
        .finish()
        .map_err(|e| PipelineError::Export(e.to_string()))?;
    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BboxStats, EventKind, MotionStats, ObjectClass};

    fn track(id: i64, clip: &str, class: ObjectClass) -> TrackRecord {
        TrackRecord {
            track_id: id,
            clip_id: clip.to_string(),
            class,
            start_t: 0.0,
            end_t: 2.0,
            bbox_stats: BboxStats { max_area: 2200.0, mean_area: 1600.0 },
            motion_stats: MotionStats { mean_raw_speed: 4.0, mean_compensated_speed: 1.5 },
            point_count: 10,
            trajectory_sampled: Vec::new(),
        }
    }

    fn event(id: i64, kind: EventKind) -> TrackEvent {
        TrackEvent {
            event_id: id,
            kind,
            timestamp: 1.8,
            confidence: 0.75,
            track_id: 1,
            clip_id: "clip_a".to_string(),
            details: "definition".to_string(),
            clip_key: None,
            review_status: "pending".to_string(),
        }
    }

    fn window(clip: &str) -> AnalyticsWindow {
        AnalyticsWindow {
            clip_id: clip.to_string(),
            t_start: 0.0,
            t_end: 5.0,
            active_tracks: 3,
            avg_raw_speed: 4.0,
            avg_compensated_speed: 1.5,
            avg_speed_proxy: 1.5,
            stopped_ratio: 0.25,
            density_index: 0.15,
            congestion_score: 19.5,
        }
    }

    #[test]
    fn hash_is_key_order_independent() {
        let a = json!({"b": 1, "a": {"y": 2, "x": 3}});
        let b = json!({"a": {"x": 3, "y": 2}, "b": 1});
        assert_eq!(hash_payload(&a), hash_payload(&b));
        assert_eq!(canonical_json(&a), r#"{"a":{"x":3,"y":2},"b":1}"#);
    }

    #[test]
    fn jsonl_rows_carry_the_datapack_version() {
        let bytes = events_jsonl(&[event(1, EventKind::CutIn)]).unwrap();
        let line: Value = serde_json::from_slice(bytes.split(|b| *b == b'\n').next().unwrap()).unwrap();
        assert_eq!(line["datapack_version"], DATAPACK_VERSION);
        assert_eq!(line["type"], "cut_in");
        assert_eq!(line["review_status"], "pending");
    }

    #[test]
    fn csv_headers_match_the_export_schema() {
        let bytes = events_csv(&[event(1, EventKind::CloseFollowingProxy)]).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next().unwrap(),
            "event_id,type,timestamp,confidence,track_id,details,clip_key,review_status,clip_id,datapack_version"
        );
        assert!(lines.next().unwrap().contains("close_following_proxy"));

        let bytes = windows_csv(&[window("clip_a")]).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.starts_with("t_start,t_end,active_tracks,"));
        assert!(text.contains("clip_a,v1"));
    }

    #[test]
    fn tracks_csv_embeds_nested_stats_as_json() {
        let bytes = tracks_csv(&[track(5, "clip_a", ObjectClass::Truck)]).unwrap();
        let mut reader = csv::Reader::from_reader(bytes.as_slice());
        let record = reader.records().next().unwrap().unwrap();
        assert_eq!(&record[1], "truck");
        // The quoted cell must parse back as the stats document.
        let motion: Value = serde_json::from_str(&record[5]).unwrap();
        assert_eq!(motion["mean_raw_speed"], 4.0);
        assert_eq!(motion["mean_compensated_speed"], 1.5);
    }

    #[test]
    fn marketplace_payload_aggregates_without_media() {
        let payload = build_marketplace_payload(
            9,
            "dashcam.zip",
            12.345,
            Utc::now(),
            &[track(1, "a", ObjectClass::Car), track(2, "a", ObjectClass::Car)],
            &[event(1, EventKind::CutIn), event(2, EventKind::CutIn)],
            &[window("a")],
        );
        assert_eq!(payload["version"], "1.0");
        assert_eq!(payload["duration_s"], 12.35);
        assert_eq!(payload["aggregates"]["event_counts"]["cut_in"], 2);
        assert_eq!(payload["aggregates"]["class_counts"]["car"], 2);
        assert_eq!(payload["privacy"]["contains_raw_video"], false);
        // The recorded hash must match an independent recomputation.
        assert_eq!(hash_payload(&payload), hash_payload(&payload.clone()));
    }

    #[test]
    fn zip_bundle_contains_every_named_entry() {
        let bytes = build_zip(&[("job_summary.json", b"{}" as &[u8]), ("events.csv", b"a,b\n")]).unwrap();
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        let names: Vec<String> = (0..archive.len())
            .map(|i| archive.by_index(i).unwrap().name().to_string())
            .collect();
        assert_eq!(names, vec!["job_summary.json", "events.csv"]);
    }

    #[test]
    fn parquet_export_round_trips_row_count() {
        use parquet::file::reader::{FileReader, SerializedFileReader};

        let bytes = windows_parquet(&[window("a"), window("b")]).unwrap();
        let reader = SerializedFileReader::new(bytes::Bytes::from(bytes)).unwrap();
        assert_eq!(reader.metadata().file_metadata().num_rows(), 2);
    }
}
