//! Experiment tracking over HTTP.
//!
//! [`facade`] serves experiments, runs, parameters, metrics and artifacts on
//! top of a [`TrackingStore`], usually a MLflow Tracking Server reached through
//! [`backend::rest::RestStore`]. [`Client`] is the matching SDK for training
//! scripts.

pub mod api;
pub mod backend;
pub mod client;
pub mod facade;

pub use api::id::{ExperimentId, RunId};
pub use api::store::TrackingStore;
pub use client::Client;

/// Utility function to create a MLflow timestamp.
pub fn timestamp() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis().try_into().unwrap_or(i64::MAX))
        .unwrap_or(0)
}

/// Percent-encode one URL path segment.
pub(crate) fn encode_path_segment(segment: &str) -> String {
    let mut encoded = String::with_capacity(segment.len());
    for byte in segment.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => encoded.push(byte as char),
            _ => encoded.push_str(&format!("%{:02X}", byte)),
        }
    }
    encoded
}
