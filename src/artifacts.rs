//! Artifact naming, storage keys, and content hashing. The file set is
//! a stable contract; consumers address artifacts by these names.

use sha2::{Digest, Sha256};

use crate::types::Artifact;

pub const SUMMARY: &str = "job_summary.json";
pub const PREVIEW: &str = "preview_tracking.mp4";
pub const EVENTS_JSONL: &str = "events.jsonl";
pub const EVENTS_CSV: &str = "events.csv";
pub const TRACKS_JSONL: &str = "tracks.jsonl";
pub const TRACKS_CSV: &str = "tracks.csv";
pub const WINDOWS_PARQUET: &str = "windows.parquet";
pub const WINDOWS_CSV: &str = "windows.csv";
pub const DATA_PACK_ZIP: &str = "data_pack_v1.zip";

/// Every artifact a successful job produces, in manifest order.
pub const ALL_NAMES: [&str; 9] = [
    SUMMARY,
    PREVIEW,
    EVENTS_JSONL,
    EVENTS_CSV,
    TRACKS_JSONL,
    TRACKS_CSV,
    WINDOWS_PARQUET,
    WINDOWS_CSV,
    DATA_PACK_ZIP,
];

pub fn artifact_key(job_id: i64, name: &str) -> String {
    format!("jobs/{job_id}/artifacts/{name}")
}

pub fn guess_mime(name: &str) -> &'static str {
    match name.rsplit('.').next() {
        Some("json") => "application/json",
        Some("jsonl") => "application/x-ndjson",
        Some("csv") => "text/csv",
        Some("mp4") => "video/mp4",
        Some("zip") => "application/zip",
        _ => "application/octet-stream",
    }
}

pub fn sha256_hex(payload: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(payload);
    format!("{:x}", hasher.finalize())
}

pub fn artifact_entry(name: &str, job_id: i64, payload: &[u8]) -> Artifact {
    Artifact {
        name: name.to_string(),
        key: artifact_key(job_id, name),
        mime_type: guess_mime(name).to_string(),
        size_bytes: payload.len() as u64,
        sha256: sha256_hex(payload),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_scoped_to_the_job() {
        assert_eq!(artifact_key(42, SUMMARY), "jobs/42/artifacts/job_summary.json");
    }

    #[test]
    fn entry_records_size_mime_and_digest() {
        let entry = artifact_entry(EVENTS_CSV, 7, b"event_id,type\n");
        assert_eq!(entry.name, "events.csv");
        assert_eq!(entry.key, "jobs/7/artifacts/events.csv");
        assert_eq!(entry.mime_type, "text/csv");
        assert_eq!(entry.size_bytes, 14);
        // sha256 of the exact bytes above.
        assert_eq!(entry.sha256.len(), 64);
        assert_eq!(entry.sha256, sha256_hex(b"event_id,type\n"));
    }

    #[test]
    fn mime_guessing_covers_the_fixed_file_set() {
        assert_eq!(guess_mime(PREVIEW), "video/mp4");
        assert_eq!(guess_mime(DATA_PACK_ZIP), "application/zip");
        assert_eq!(guess_mime(WINDOWS_PARQUET), "application/octet-stream");
    }
}
