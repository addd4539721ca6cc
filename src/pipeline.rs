//! The per-job processing pipeline: ingest clips, sample frames through
//! the detector and motion estimator, aggregate trajectories, score
//! events and congestion windows, and assemble the privacy-validated
//! datapack. One invocation handles one job sequentially; the
//! orchestrator owns retries and state transitions.

use std::collections::HashSet;
use std::fs;

use chrono::Utc;
use serde_json::json;
use tracing::{info, warn};

use crate::annotate::Annotator;
use crate::artifacts;
use crate::config::Config;
use crate::datapack::{self, DATAPACK_VERSION};
use crate::decode::FrameSource;
use crate::detector::{normalize_detections, DetectorAdapter};
use crate::error::PipelineError;
use crate::heuristics::EventEngine;
use crate::ingest;
use crate::motion::{GlobalMotionEstimator, GrayFrame};
use crate::persistence::AnalyticsRepo;
use crate::privacy;
use crate::storage::BlobStore;
use crate::trajectory::TrackArena;
use crate::transcode::{PreviewEncoder, RawVideoSpec, Transcoder};
use crate::types::{
    AnalyticsWindow, FrameSample, Job, JobStatus, ObjectClass, TrackEvent, TrackRecord,
};
use crate::windows::build_windows;

/// Capabilities the pipeline runs against. Production wires the ffmpeg
/// decoder/encoder, the HTTP detector, and the local blob store;
/// tests substitute fakes at the same seams.
pub struct PipelineDeps<'a> {
    pub store: &'a dyn BlobStore,
    pub frames: &'a dyn FrameSource,
    pub detector: &'a mut dyn DetectorAdapter,
    pub transcoder: &'a dyn Transcoder,
    pub repo: &'a dyn AnalyticsRepo,
}

/// Runs the full pipeline for one job, mutating it in place with the
/// results. The caller persists the job and owns the status transition.
pub fn run_pipeline(
    job: &mut Job,
    deps: &mut PipelineDeps<'_>,
    cfg: &Config,
) -> Result<(), PipelineError> {
    // Job-scoped working directory; dropped (and removed) on every exit
    // path, including errors.
    let workdir = tempfile::tempdir()?;
    let upload_path = workdir.path().join("upload");
    deps.store.fetch(&job.storage_key, &upload_path)?;

    let clips_dir = workdir.path().join("clips");
    fs::create_dir_all(&clips_dir)?;
    let clips = ingest::ingest_upload(&upload_path, &job.filename, &clips_dir)?;
    let clip_ids: Vec<String> = clips.iter().map(|c| c.clip_id.clone()).collect();
    job.append_log(&format!("ingested {} clip(s)", clips.len()));
    info!(job_id = job.id, clips = clips.len(), "ingest complete");

    let targets: HashSet<ObjectClass> = cfg
        .detector
        .target_classes
        .iter()
        .filter_map(|label| ObjectClass::parse(label))
        .collect();
    let sample_fps = cfg.sampling.sample_fps;
    let estimator = GlobalMotionEstimator::new(cfg.motion.clone());
    let mut arena = TrackArena::new(sample_fps);
    let mut engine = EventEngine::new(cfg.heuristics.clone());
    let mut annotator = Annotator::new(cfg.preview.trail_length);

    let preview_path = workdir.path().join(artifacts::PREVIEW);
    let mut encoder: Option<Box<dyn PreviewEncoder>> = None;
    let mut preview_dims = (0usize, 0usize);

    let mut samples: Vec<FrameSample> = Vec::new();
    let mut tracks: Vec<TrackRecord> = Vec::new();
    let mut events: Vec<TrackEvent> = Vec::new();
    let mut total_duration = 0.0f64;

    for clip in &clips {
        let mut frames = deps.frames.open(clip, sample_fps)?;
        let meta = frames.meta().clone();
        deps.detector.begin_clip(&clip.clip_id)?;
        annotator.reset();

        // The preview inherits the first clip's geometry; later clips
        // with different dimensions are resampled into it.
        if encoder.is_none() {
            preview_dims = (meta.width, meta.height);
            encoder = Some(deps.transcoder.start(
                &RawVideoSpec {
                    width: meta.width,
                    height: meta.height,
                    fps: sample_fps,
                },
                &preview_path,
            )?);
        }

        let mut prev_gray: Option<GrayFrame> = None;
        let mut frame_count = 0usize;
        while let Some(frame) = frames.next_frame()? {
            let gray = GrayFrame::from_rgb(&frame.data, frame.width, frame.height);
            let global_motion = estimator.estimate(prev_gray.as_ref(), Some(&gray));

            let raw = deps.detector.detect_and_track(&frame)?;
            let detections = normalize_detections(
                raw,
                &targets,
                &clip.clip_id,
                frame.timestamp,
                frame.width,
                frame.height,
            );

            samples.push(arena.observe_frame(
                &clip.clip_id,
                frame.timestamp,
                &detections,
                global_motion,
            ));

            let mut rgb = frame.data.clone();
            annotator.annotate(&mut rgb, frame.width, frame.height, &detections);
            if (frame.width, frame.height) != preview_dims {
                rgb = resize_rgb_nearest(
                    &rgb,
                    frame.width,
                    frame.height,
                    preview_dims.0,
                    preview_dims.1,
                );
            }
            if let Some(enc) = encoder.as_mut() {
                enc.write_frame(&rgb)?;
            }

            prev_gray = Some(gray);
            frame_count += 1;
        }
        if frame_count == 0 {
            warn!(clip_id = %clip.clip_id, "clip decoded zero sampled frames");
        }

        let frame_w = meta.width as f32;
        let finalized = arena.finalize_clip(&clip.clip_id, meta.duration_s);
        for track in &finalized {
            events.extend(engine.evaluate(track, frame_w));
        }
        job.append_log(&format!(
            "clip {}: {} track(s), {} event(s) so far",
            clip.clip_id,
            finalized.len(),
            events.len()
        ));
        tracks.extend(finalized.into_iter().map(|f| f.record));
        total_duration += meta.duration_s;
    }

    let mut windows: Vec<AnalyticsWindow> = Vec::new();
    for clip_id in &clip_ids {
        windows.extend(build_windows(clip_id, &samples, &cfg.windows));
    }

    // Every event references the job preview as its clip artifact.
    let preview_key = artifacts::artifact_key(job.id, artifacts::PREVIEW);
    for event in &mut events {
        event.clip_key = Some(preview_key.clone());
    }

    info!(
        job_id = job.id,
        tracks = tracks.len(),
        events = events.len(),
        windows = windows.len(),
        "analysis complete"
    );

    // Gate every export payload before anything leaves the pipeline.
    privacy::validate_export("events", &serde_json::to_value(&events)?)?;
    privacy::validate_export("tracks", &serde_json::to_value(&tracks)?)?;
    privacy::validate_export("windows", &serde_json::to_value(&windows)?)?;

    // Delete-then-insert per job id; reprocessing never appends.
    deps.repo.replace_tracks(job.id, &tracks)?;
    deps.repo.replace_events(job.id, &events)?;
    deps.repo.replace_windows(job.id, &windows)?;

    if let Some(enc) = encoder {
        enc.finish()?;
    }
    let preview_bytes = fs::read(&preview_path).map_err(|e| PipelineError::WorkingFile {
        path: preview_path.clone(),
        source: e,
    })?;

    job.duration_s = Some((total_duration * 100.0).round() / 100.0);
    job.fps_sampled = Some(sample_fps.round() as u32);
    job.settings.insert("preview_key".to_string(), json!(preview_key));
    job.settings.insert("clips".to_string(), json!(clip_ids));
    job.settings
        .insert("datapack_version".to_string(), json!(DATAPACK_VERSION));

    // The summary describes the finished job; it is only exported (and
    // the manifest only attached) when the run succeeds.
    let mut summary_job = job.clone();
    summary_job.status = JobStatus::Succeeded;
    let summary = datapack::build_summary(&summary_job, &clip_ids, &tracks, &events, &windows);
    privacy::validate_export("summary", &summary)?;
    let summary_bytes = serde_json::to_vec_pretty(&summary)?;

    let events_jsonl = datapack::events_jsonl(&events)?;
    let events_csv = datapack::events_csv(&events)?;
    let tracks_jsonl = datapack::tracks_jsonl(&tracks)?;
    let tracks_csv = datapack::tracks_csv(&tracks)?;
    let windows_parquet = datapack::windows_parquet(&windows)?;
    let windows_csv = datapack::windows_csv(&windows)?;
    let zip_bytes = datapack::build_zip(&[
        (artifacts::SUMMARY, &summary_bytes),
        (artifacts::EVENTS_JSONL, &events_jsonl),
        (artifacts::EVENTS_CSV, &events_csv),
        (artifacts::TRACKS_JSONL, &tracks_jsonl),
        (artifacts::TRACKS_CSV, &tracks_csv),
        (artifacts::WINDOWS_PARQUET, &windows_parquet),
        (artifacts::WINDOWS_CSV, &windows_csv),
    ])?;

    let mut manifest = crate::types::ArtifactManifest::default();
    for (name, payload) in [
        (artifacts::SUMMARY, &summary_bytes),
        (artifacts::PREVIEW, &preview_bytes),
        (artifacts::EVENTS_JSONL, &events_jsonl),
        (artifacts::EVENTS_CSV, &events_csv),
        (artifacts::TRACKS_JSONL, &tracks_jsonl),
        (artifacts::TRACKS_CSV, &tracks_csv),
        (artifacts::WINDOWS_PARQUET, &windows_parquet),
        (artifacts::WINDOWS_CSV, &windows_csv),
        (artifacts::DATA_PACK_ZIP, &zip_bytes),
    ] {
        let entry = artifacts::artifact_entry(name, job.id, payload);
        deps.store
            .store(&entry.key, payload, &entry.mime_type)?;
        manifest.push(entry);
    }

    // Aggregates-only marketplace product, canonically hashed so
    // consumers can verify integrity later.
    let product = datapack::build_marketplace_payload(
        job.id,
        &job.filename,
        total_duration,
        Utc::now(),
        &tracks,
        &events,
        &windows,
    );
    let product_hash = datapack::hash_payload(&product);
    let product_key = format!("jobs/{}/marketplace/data_product.json", job.id);
    deps.store.store(
        &product_key,
        datapack::canonical_json(&product).as_bytes(),
        "application/json",
    )?;

    job.settings
        .insert("marketplace_product_key".to_string(), json!(product_key));
    job.settings
        .insert("marketplace_hash".to_string(), json!(product_hash));
    job.artifacts = Some(manifest);
    job.append_log("datapack stored");
    info!(job_id = job.id, "datapack assembled and stored");
    Ok(())
}

fn resize_rgb_nearest(
    src: &[u8],
    src_w: usize,
    src_h: usize,
    dst_w: usize,
    dst_h: usize,
) -> Vec<u8> {
    let mut dst = vec![0u8; dst_w * dst_h * 3];
    for y in 0..dst_h {
        let sy = y * src_h / dst_h.max(1);
        for x in 0..dst_w {
            let sx = x * src_w / dst_w.max(1);
            let s = (sy * src_w + sx) * 3;
            let d = (y * dst_w + x) * 3;
            dst[d..d + 3].copy_from_slice(&src[s..s + 3]);
        }
    }
    dst
}
