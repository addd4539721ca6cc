// src/ingest.rs
//
// Clip ingestion: turn an uploaded file (single clip or zip batch) into a
// set of sanitized, locally extracted clips. Archive entries are screened
// against zip-slip (absolute paths, `..` segments) before extraction.

use std::collections::HashSet;
use std::fs::File;
use std::io;
use std::path::{Component, Path, PathBuf};

use tracing::{debug, warn};

use crate::error::PipelineError;

/// Accepted video extensions (lowercase, without dot).
pub const VIDEO_EXTS: &[&str] = &["mp4", "mov", "mkv"];

/// Clip ids keep at most this many characters of the sanitized stem.
const MAX_CLIP_ID_LEN: usize = 48;

/// One extracted clip, ready for decoding.
#[derive(Debug, Clone)]
pub struct ClipSource {
    pub clip_id: String,
    pub path: PathBuf,
}

/// Keep alphanumerics and `_-.`, replace everything else with `_`.
pub fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '_' | '-' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

pub fn guess_video_mime(ext: &str) -> &'static str {
    match ext.to_ascii_lowercase().as_str() {
        "mp4" => "video/mp4",
        "mov" => "video/quicktime",
        "mkv" => "video/x-matroska",
        _ => "application/octet-stream",
    }
}

fn extension_of(name: &str) -> Option<String> {
    Path::new(name)
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
}

fn clip_id_from_stem(stem: &str, position: usize, taken: &mut HashSet<String>) -> String {
    let mut base: String = sanitize_name(stem).chars().take(MAX_CLIP_ID_LEN).collect();
    // a stem of pure punctuation sanitizes to underscores, not empty; an
    // empty stem falls back to a positional id
    if base.is_empty() {
        base = format!("clip_{}", position + 1);
    }
    let mut candidate = base.clone();
    let mut n = 2;
    while !taken.insert(candidate.clone()) {
        candidate = format!("{base}_{n}");
        n += 1;
    }
    candidate
}

/// Validate and extract an upload into `out_dir`.
///
/// Zip archives yield one clip per accepted entry; single video files
/// yield exactly one clip named from the sanitized stem. Anything else is
/// an `UnsupportedFormat` failure, as is an archive with zero usable
/// entries.
pub fn ingest_upload(
    upload: &Path,
    declared_name: &str,
    out_dir: &Path,
) -> Result<Vec<ClipSource>, PipelineError> {
    let ext = extension_of(declared_name)
        .ok_or_else(|| PipelineError::UnsupportedFormat(declared_name.to_string()))?;

    if ext == "zip" {
        let clips = extract_zip(upload, out_dir)?;
        if clips.is_empty() {
            return Err(PipelineError::UnsupportedFormat(format!(
                "archive '{declared_name}' contains no usable video clips"
            )));
        }
        return Ok(clips);
    }

    if !VIDEO_EXTS.contains(&ext.as_str()) {
        return Err(PipelineError::UnsupportedFormat(declared_name.to_string()));
    }

    let stem = Path::new(declared_name)
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let mut taken = HashSet::new();
    let clip_id = clip_id_from_stem(&stem, 0, &mut taken);
    let dest = out_dir.join(format!("{clip_id}.{ext}"));
    std::fs::copy(upload, &dest)?;
    debug!(clip_id, path = %dest.display(), "single-clip upload ingested");

    Ok(vec![ClipSource {
        clip_id,
        path: dest,
    }])
}

fn extract_zip(zip_path: &Path, out_dir: &Path) -> Result<Vec<ClipSource>, PipelineError> {
    let file = File::open(zip_path)?;
    let mut archive = zip::ZipArchive::new(file)
        .map_err(|e| PipelineError::UnsupportedFormat(format!("unreadable archive: {e}")))?;

    let mut clips = Vec::new();
    let mut taken = HashSet::new();

    for index in 0..archive.len() {
        let mut entry = archive
            .by_index(index)
            .map_err(|e| PipelineError::UnsupportedFormat(format!("corrupt archive entry: {e}")))?;

        if entry.is_dir() {
            continue;
        }

        let raw_name = entry.name().to_string();
        let raw_path = Path::new(&raw_name);

        // zip-slip hardening: no absolute paths, no parent segments
        if raw_path.is_absolute()
            || raw_path
                .components()
                .any(|c| matches!(c, Component::ParentDir | Component::RootDir))
        {
            warn!(entry = %raw_name, "rejecting archive entry with unsafe path");
            continue;
        }

        let Some(ext) = extension_of(&raw_name) else {
            continue;
        };
        if !VIDEO_EXTS.contains(&ext.as_str()) {
            continue;
        }

        let stem = raw_path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        let clip_id = clip_id_from_stem(&stem, clips.len(), &mut taken);

        let dest = out_dir.join(format!("{clip_id}.{ext}"));
        let mut out = File::create(&dest)?;
        io::copy(&mut entry, &mut out)?;

        debug!(clip_id, entry = %raw_name, "clip extracted");
        clips.push(ClipSource {
            clip_id,
            path: dest,
        });
    }

    Ok(clips)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::io::Write;

    fn write_test_zip(path: &Path, entries: &[(&str, &[u8])]) {
        let file = File::create(path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default();
        for (name, body) in entries {
            writer.start_file(*name, options).unwrap();
            writer.write_all(body).unwrap();
        }
        writer.finish().unwrap();
    }

    #[test]
    fn sanitize_replaces_everything_but_safe_chars() {
        assert_eq!(sanitize_name("cam 3/rush hour!"), "cam_3_rush_hour_");
        assert_eq!(sanitize_name("a-b_c.d"), "a-b_c.d");
    }

    #[test]
    fn zip_slip_entries_never_become_clips() {
        let dir = tempfile::tempdir().unwrap();
        let zip_path = dir.path().join("batch.zip");
        write_test_zip(
            &zip_path,
            &[
                ("../evil.mp4", b"x"),
                ("/abs/evil2.mp4", b"x"),
                ("safe_clip.mp4", b"x"),
                ("nested/clip2.mov", b"x"),
                ("notes.txt", b"x"),
            ],
        );

        let out = tempfile::tempdir().unwrap();
        let clips = ingest_upload(&zip_path, "batch.zip", out.path()).unwrap();
        let ids: Vec<&str> = clips.iter().map(|c| c.clip_id.as_str()).collect();
        assert_eq!(ids, vec!["safe_clip", "clip2"]);
        assert!(!ids.iter().any(|id| id.contains("evil")));
    }

    #[test]
    fn archive_with_no_videos_is_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let zip_path = dir.path().join("docs.zip");
        write_test_zip(&zip_path, &[("readme.txt", b"hello")]);

        let out = tempfile::tempdir().unwrap();
        let result = ingest_upload(&zip_path, "docs.zip", out.path());
        assert_matches!(result, Err(PipelineError::UnsupportedFormat(_)));
    }

    #[test]
    fn unknown_extension_is_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let upload = dir.path().join("clip.gif");
        std::fs::write(&upload, b"not video").unwrap();

        let result = ingest_upload(&upload, "clip.gif", dir.path());
        assert_matches!(result, Err(PipelineError::UnsupportedFormat(_)));
    }

    #[test]
    fn single_video_becomes_one_clip() {
        let dir = tempfile::tempdir().unwrap();
        let upload = dir.path().join("raw");
        std::fs::write(&upload, b"fake video bytes").unwrap();

        let out = tempfile::tempdir().unwrap();
        let clips = ingest_upload(&upload, "Main St & 4th.mov", out.path()).unwrap();
        assert_eq!(clips.len(), 1);
        assert_eq!(clips[0].clip_id, "Main_St___4th");
        assert!(clips[0].path.exists());
    }

    #[test]
    fn colliding_stems_are_uniqued() {
        let dir = tempfile::tempdir().unwrap();
        let zip_path = dir.path().join("batch.zip");
        write_test_zip(
            &zip_path,
            &[("a/cam.mp4", b"x"), ("b/cam.mp4", b"x"), ("c/cam.mp4", b"x")],
        );

        let out = tempfile::tempdir().unwrap();
        let clips = ingest_upload(&zip_path, "batch.zip", out.path()).unwrap();
        let ids: Vec<&str> = clips.iter().map(|c| c.clip_id.as_str()).collect();
        assert_eq!(ids, vec!["cam", "cam_2", "cam_3"]);
    }

    #[test]
    fn long_stems_are_truncated() {
        let long = "x".repeat(120);
        let dir = tempfile::tempdir().unwrap();
        let zip_path = dir.path().join("batch.zip");
        let entry = format!("{long}.mp4");
        write_test_zip(&zip_path, &[(entry.as_str(), b"x")]);

        let out = tempfile::tempdir().unwrap();
        let clips = ingest_upload(&zip_path, "batch.zip", out.path()).unwrap();
        assert_eq!(clips[0].clip_id.len(), 48);
    }
}
