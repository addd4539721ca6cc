// src/main.rs

use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use tracing::{error, info, warn};
use walkdir::WalkDir;

use trafficlens::config::Config;
use trafficlens::decode::FfmpegFrameSource;
use trafficlens::detector::{DetectorAdapter, HttpDetector, RawDetection};
use trafficlens::error::PipelineError;
use trafficlens::ingest;
use trafficlens::orchestrator::{run_job, RetryPolicy};
use trafficlens::persistence::{AnalyticsRepo, FileRepo};
use trafficlens::pipeline::{run_pipeline, PipelineDeps};
use trafficlens::storage::{BlobStore, LocalBlobStore};
use trafficlens::transcode::FfmpegTranscoder;
use trafficlens::types::{Frame, Job};

/// Stand-in adapter when no inference endpoint is configured. Jobs fail
/// fast with a fatal-model error instead of degrading to zero
/// detections.
struct MissingDetector;

impl DetectorAdapter for MissingDetector {
    fn begin_clip(&mut self, _clip_id: &str) -> Result<(), PipelineError> {
        Err(PipelineError::DetectorUnavailable(
            "no detector endpoint configured".to_string(),
        ))
    }

    fn detect_and_track(&mut self, _frame: &Frame) -> Result<Vec<RawDetection>, PipelineError> {
        Err(PipelineError::DetectorUnavailable(
            "no detector endpoint configured".to_string(),
        ))
    }
}

fn build_detector(config: &Config) -> Result<Box<dyn DetectorAdapter>, PipelineError> {
    match &config.detector.endpoint {
        Some(endpoint) => Ok(Box::new(HttpDetector::new(
            endpoint.clone(),
            config.detector.target_classes.clone(),
            Duration::from_secs(config.detector.request_timeout_s),
        )?)),
        None => {
            warn!("no detector endpoint configured; jobs will fail fast");
            Ok(Box::new(MissingDetector))
        }
    }
}

fn find_uploads(input_dir: &str) -> Vec<std::path::PathBuf> {
    let mut uploads = Vec::new();
    for entry in WalkDir::new(input_dir)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        if ext == "zip" || ingest::VIDEO_EXTS.contains(&ext.as_str()) {
            uploads.push(path.to_path_buf());
        }
    }
    uploads.sort();
    uploads
}

fn enqueue_upload(
    path: &Path,
    store: &dyn BlobStore,
    repo: &dyn AnalyticsRepo,
) -> Result<Job, PipelineError> {
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let job_id = repo.next_job_id()?;
    let storage_key = format!("jobs/{job_id}/upload/{}", ingest::sanitize_name(&filename));
    let bytes = std::fs::read(path)?;
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    let mime = if ext == "zip" {
        "application/zip"
    } else {
        ingest::guess_video_mime(&ext)
    };
    store.store(&storage_key, &bytes, mime)?;

    let job = Job::new(job_id, filename, storage_key);
    repo.insert_job(&job)?;
    Ok(job)
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load("config.yaml").unwrap_or_else(|e| {
        eprintln!("no config.yaml ({e}), using defaults");
        Config::default()
    });

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.clone().into()),
        )
        .init();

    info!("traffic analytics worker starting");

    let store = LocalBlobStore::new(config.storage.blob_root.clone());
    let repo = FileRepo::new(config.storage.data_dir.clone());
    let policy = RetryPolicy::from_config(&config.retry);

    let uploads = find_uploads(&config.worker.input_dir);
    if uploads.is_empty() {
        error!("no uploads found in {}", config.worker.input_dir);
        return Ok(());
    }
    info!(count = uploads.len(), "uploads queued");

    for upload in uploads {
        let job = match enqueue_upload(&upload, &store, &repo) {
            Ok(job) => job,
            Err(e) => {
                error!(path = %upload.display(), error = %e, "failed to enqueue upload");
                continue;
            }
        };
        info!(job_id = job.id, filename = %job.filename, "job queued");

        let config = config.clone();
        let store = LocalBlobStore::new(config.storage.blob_root.clone());
        let repo = FileRepo::new(config.storage.data_dir.clone());
        let policy = policy.clone();
        let job_id = job.id;
        // One job is one sequential unit of blocking work.
        let status = tokio::task::spawn_blocking(move || {
            let mut detector = build_detector(&config)?;
            let frames = FfmpegFrameSource;
            let transcoder = FfmpegTranscoder::new(config.preview.clone());
            run_job(
                job_id,
                &repo,
                &policy,
                |d| std::thread::sleep(d),
                |job| {
                    let mut deps = PipelineDeps {
                        store: &store,
                        frames: &frames,
                        detector: detector.as_mut(),
                        transcoder: &transcoder,
                        repo: &repo,
                    };
                    run_pipeline(job, &mut deps, &config)
                },
            )
        })
        .await?;

        match status {
            Ok(status) => info!(job_id, status = status.as_str(), "job finished"),
            Err(e) => error!(job_id, error = %e, "job could not be driven"),
        }
    }

    Ok(())
}
