//! Error taxonomy.
//!
//! `ServiceError` describes what went wrong talking to the generation service.
//! `ControllerError` is what the controller reports to its observer; it never
//! crosses an intent call as a `Result`.

use crate::model::JobId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },
    #[error("could not decode response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid service url: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ControllerError {
    #[error("search for {query:?} failed: {reason}")]
    SearchFailed { query: String, reason: String },
    #[error("submission failed: {reason}")]
    SubmissionFailed { reason: String },
    #[error("polling job {job_id} failed: {reason}")]
    PollFailed { job_id: JobId, reason: String },
    #[error("job {job_id} failed: {reason}")]
    JobReportedError { job_id: JobId, reason: String },
    #[error("depth {depth} is outside the accepted range {min}..={max}")]
    DepthOutOfRange { depth: u32, min: u8, max: u8 },
}

/// Flatten an error and its sources into one line for observer messages.
pub(crate) fn describe(err: &(dyn std::error::Error + 'static)) -> String {
    let mut out = err.to_string();
    let mut source = err.source();
    while let Some(s) = source {
        let text = s.to_string();
        if !out.contains(&text) {
            out.push_str(": ");
            out.push_str(&text);
        }
        source = s.source();
    }
    out
}
