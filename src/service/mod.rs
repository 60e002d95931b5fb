//! Remote generation service.
//!
//! The controller only depends on [`GenerationService`]; [`HttpService`] is the
//! reqwest-backed implementation used by the binary.

mod http;

use crate::error::ServiceError;
use crate::model::{Candidate, GenerationRequest, JobId, StatusResponse, SubmitResponse};
use bytes::Bytes;
use url::Url;

pub use http::HttpService;

#[async_trait::async_trait]
pub trait GenerationService: Send + Sync + 'static {
    /// `GET /search?q=<query>`; candidates in service ranking order.
    async fn search(&self, query: &str) -> Result<Vec<Candidate>, ServiceError>;

    /// `POST /generate`.
    async fn submit(&self, request: &GenerationRequest) -> Result<SubmitResponse, ServiceError>;

    /// `GET /status/{job_id}`.
    async fn status(&self, job_id: &JobId) -> Result<StatusResponse, ServiceError>;

    /// Fetch a finished artifact from its absolute location.
    async fn fetch_artifact(&self, location: &Url) -> Result<Bytes, ServiceError>;
}
