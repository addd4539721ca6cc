// src/lib.rs

//! Traffic video analytics worker. Jobs carry an uploaded clip or
//! archive through ingestion, sampled detection and ego-motion
//! compensation, trajectory aggregation, event heuristics, congestion
//! windows, and privacy-validated datapack export.

pub mod annotate;
pub mod artifacts;
pub mod config;
pub mod datapack;
pub mod decode;
pub mod detector;
pub mod error;
pub mod heuristics;
pub mod ingest;
pub mod motion;
pub mod orchestrator;
pub mod persistence;
pub mod pipeline;
pub mod privacy;
pub mod storage;
pub mod trajectory;
pub mod transcode;
pub mod types;
pub mod windows;
