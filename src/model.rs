use crate::error::ControllerError;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::time::Duration;
use url::Url;

/// Identifiers arrive as JSON strings from the real service but some deployments
/// hand out integers; both are kept as opaque text.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Text(String),
    Int(i64),
}

impl RawId {
    fn into_string(self) -> String {
        match self {
            RawId::Text(s) => s,
            RawId::Int(n) => n.to_string(),
        }
    }
}

macro_rules! opaque_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                RawId::deserialize(deserializer).map(|raw| Self(raw.into_string()))
            }
        }
    };
}

opaque_id!(
    /// Identity of a search candidate (a MusicBrainz artist id on the real service).
    CandidateId
);
opaque_id!(
    /// Identity of a generation job as issued by the service.
    JobId
);

/// One entry of a search response. Order of the surrounding list is ranking-significant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub id: CandidateId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disambiguation: Option<String>,
    /// Artist kind reported by the service ("Group", "Person", ...).
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

impl Candidate {
    /// Name plus disambiguation, for list rendering.
    pub fn label(&self) -> String {
        match self.disambiguation.as_deref() {
            Some(d) if !d.trim().is_empty() => format!("{} ({})", self.name, d),
            _ => self.name.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Pending,
    #[serde(alias = "Processing")]
    Running,
    Completed,
    Error,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Error)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Pending => "Pending",
            JobStatus::Running => "Running",
            JobStatus::Completed => "Completed",
            JobStatus::Error => "Error",
        };
        f.write_str(s)
    }
}

/// Inclusive range of accepted recursion depths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepthBounds {
    pub min: u8,
    pub max: u8,
}

impl Default for DepthBounds {
    fn default() -> Self {
        Self { min: 1, max: 5 }
    }
}

impl DepthBounds {
    pub fn contains(&self, depth: u32) -> bool {
        depth >= u32::from(self.min) && depth <= u32::from(self.max)
    }
}

/// Recursion depth that has already been checked against its bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Depth(u8);

impl Depth {
    pub fn new(depth: u32, bounds: DepthBounds) -> Result<Self, ControllerError> {
        if !bounds.contains(depth) {
            return Err(ControllerError::DepthOutOfRange {
                depth,
                min: bounds.min,
                max: bounds.max,
            });
        }
        // Bounds are u8, so a contained value always fits.
        Ok(Self(depth as u8))
    }

    pub fn get(self) -> u8 {
        self.0
    }
}

/// Body of `POST /generate`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GenerationRequest {
    pub artist_id: CandidateId,
    pub depth: Depth,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail_level: Option<u8>,
}

/// Response of `POST /generate`. Only `job_id` is guaranteed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub job_id: JobId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<JobStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<i64>,
}

/// Response of `GET /status/{job_id}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: JobStatus,
    #[serde(default)]
    pub progress: i64,
    /// Relative path of the artifact; only present once Completed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_url: Option<String>,
    /// Failure reason, if the service gives one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Clamp a wire progress value into a percentage.
pub fn clamp_progress(progress: i64) -> u8 {
    progress.clamp(0, 100) as u8
}

/// The single live generation job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Job {
    pub id: JobId,
    pub status: JobStatus,
    pub progress: u8,
    pub result_location: Option<Url>,
    pub message: Option<String>,
}

impl Job {
    pub fn new(id: JobId, status: JobStatus, progress: u8) -> Self {
        Self {
            id,
            status,
            progress,
            result_location: None,
            message: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerConfig {
    pub base_url: Url,
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    #[serde(default)]
    pub depth_bounds: DepthBounds,
    /// Upper bound on non-terminal poll responses before giving up. None polls forever.
    #[serde(default)]
    pub max_polls: Option<u32>,
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    pub user_agent: String,
    #[serde(default)]
    pub detail_level: Option<u8>,
}

impl ControllerConfig {
    pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(2000);
    pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            poll_interval: Self::DEFAULT_POLL_INTERVAL,
            depth_bounds: DepthBounds::default(),
            max_polls: None,
            request_timeout: Self::DEFAULT_REQUEST_TIMEOUT,
            user_agent: format!("family-tree-cli/{}", env!("CARGO_PKG_VERSION")),
            detail_level: None,
        }
    }

    /// Build an endpoint URL below the service base, keeping any path prefix of the base.
    pub fn endpoint(&self, path: &str) -> Result<Url, url::ParseError> {
        join_base(&self.base_url, path)
    }

    /// Turn the `result_url` of a completed job into an absolute location.
    pub fn resolve_result_location(&self, result_url: &str) -> Result<Url, url::ParseError> {
        match Url::parse(result_url) {
            Ok(absolute) => Ok(absolute),
            Err(url::ParseError::RelativeUrlWithoutBase) => join_base(&self.base_url, result_url),
            Err(e) => Err(e),
        }
    }
}

fn join_base(base: &Url, path: &str) -> Result<Url, url::ParseError> {
    let base = base.as_str().trim_end_matches('/');
    let path = path.trim_start_matches('/');
    Url::parse(&format!("{base}/{path}"))
}

/// Events emitted by the controller and consumed by presentation layers.
#[derive(Debug, Clone, PartialEq)]
pub enum ControllerEvent {
    SearchCompleted { query: String, count: usize },
    JobStarted { job_id: JobId },
    JobProgress {
        job_id: JobId,
        status: JobStatus,
        progress: u8,
    },
    JobCompleted { job_id: JobId, result_location: Url },
    /// A download was requested; the presentation layer should open this location.
    OpenResult(Url),
    Failure(ControllerError),
}

impl ControllerEvent {
    /// Render a human-readable message for UI/CLI layers.
    pub fn to_message(&self) -> String {
        match self {
            ControllerEvent::SearchCompleted { query, count } => {
                format!("Found {count} candidate(s) for {query:?}")
            }
            ControllerEvent::JobStarted { job_id } => format!("Job {job_id} submitted"),
            ControllerEvent::JobProgress {
                job_id,
                status,
                progress,
            } => format!("Job {job_id}: {status} ({progress}%)"),
            ControllerEvent::JobCompleted {
                job_id,
                result_location,
            } => format!("Job {job_id} completed: {result_location}"),
            ControllerEvent::OpenResult(url) => format!("Result available at {url}"),
            ControllerEvent::Failure(e) => e.to_string(),
        }
    }
}
