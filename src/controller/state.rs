//! Pure job lifecycle state machine.
//!
//! Every method applies one intent or one service response atomically and tells the
//! caller what side effect (if any) to run next. Nothing here touches the network or
//! a clock, so the whole lifecycle is testable synchronously.

use crate::error::{describe, ControllerError, ServiceError};
use crate::model::{
    clamp_progress, Candidate, CandidateId, ControllerConfig, Depth, GenerationRequest, Job,
    JobId, JobStatus, StatusResponse, SubmitResponse,
};
use serde::Serialize;
use url::Url;

/// A search the runtime must issue. `seq` orders responses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchTicket {
    pub seq: u64,
    pub query: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchOutcome {
    Applied { query: String, count: usize },
    Failed(ControllerError),
    /// A newer search was issued after this one; the response was dropped.
    Stale,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionOutcome {
    /// Job created; polling should start.
    Started(JobId),
    Failed(ControllerError),
    Ignored,
}

/// One result of a status poll, as seen by the poll task.
#[derive(Debug)]
pub enum PollReport {
    Status(StatusResponse),
    Transport(ServiceError),
    /// The poll budget ran out before a terminal status was seen.
    Exhausted { polls: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// Report belongs to a job that is no longer live.
    Ignored,
    Continue { status: JobStatus, progress: u8 },
    Completed { job_id: JobId, location: Url },
    Failed(ControllerError),
}

impl PollOutcome {
    /// Polling must stop after this outcome.
    pub fn is_terminal(&self) -> bool {
        matches!(self, PollOutcome::Completed { .. } | PollOutcome::Failed(_))
    }
}

/// Read-only projection of the controller state for presentation layers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ControllerSnapshot {
    pub query: String,
    /// Candidates to render; always empty while a selection exists.
    pub visible_candidates: Vec<Candidate>,
    pub candidate_count: usize,
    pub selection: Option<Candidate>,
    pub job: Option<Job>,
    pub generating: bool,
    pub searching: bool,
    pub result_location: Option<Url>,
    pub last_error: Option<String>,
}

impl ControllerSnapshot {
    pub fn job_status(&self) -> Option<JobStatus> {
        self.job.as_ref().map(|j| j.status)
    }
}

#[derive(Debug, Clone)]
pub struct ControllerState {
    config: ControllerConfig,
    query: String,
    candidates: Vec<Candidate>,
    selection: Option<Candidate>,
    job: Option<Job>,
    generating: bool,
    // A submission call is outstanding (no job id yet).
    submitting: bool,
    latest_search: u64,
    searching: bool,
    last_error: Option<ControllerError>,
}

impl ControllerState {
    pub fn new(config: ControllerConfig) -> Self {
        Self {
            config,
            query: String::new(),
            candidates: Vec::new(),
            selection: None,
            job: None,
            generating: false,
            submitting: false,
            latest_search: 0,
            searching: false,
            last_error: None,
        }
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn begin_search(&mut self, query: &str) -> Option<SearchTicket> {
        let query = query.trim();
        if query.is_empty() {
            return None;
        }
        self.query = query.to_string();
        self.selection = None;
        self.latest_search += 1;
        self.searching = true;
        Some(SearchTicket {
            seq: self.latest_search,
            query: self.query.clone(),
        })
    }

    pub fn apply_search(
        &mut self,
        ticket: &SearchTicket,
        result: Result<Vec<Candidate>, ServiceError>,
    ) -> SearchOutcome {
        if ticket.seq != self.latest_search {
            return SearchOutcome::Stale;
        }
        self.searching = false;
        match result {
            Ok(candidates) => {
                let count = candidates.len();
                self.candidates = candidates;
                self.last_error = None;
                SearchOutcome::Applied {
                    query: ticket.query.clone(),
                    count,
                }
            }
            Err(e) => {
                let err = ControllerError::SearchFailed {
                    query: ticket.query.clone(),
                    reason: describe(&e),
                };
                self.last_error = Some(err.clone());
                SearchOutcome::Failed(err)
            }
        }
    }

    pub fn select_candidate(&mut self, candidate: Candidate) {
        self.selection = Some(candidate);
    }

    /// Select one of the current candidates by id. Returns false if it is not listed.
    pub fn select_candidate_by_id(&mut self, id: &CandidateId) -> bool {
        match self.candidates.iter().find(|c| &c.id == id) {
            Some(c) => {
                self.selection = Some(c.clone());
                true
            }
            None => false,
        }
    }

    pub fn clear_selection(&mut self) {
        self.selection = None;
    }

    /// Start a generation for the current selection.
    ///
    /// `Ok(None)` means the intent was a no-op: nothing selected, or a submission is
    /// already outstanding. Only an outstanding submission blocks; a job that is still
    /// being polled is superseded rather than treated as a generation in flight.
    pub fn begin_generation(
        &mut self,
        depth: u32,
    ) -> Result<Option<GenerationRequest>, ControllerError> {
        let Some(selection) = self.selection.as_ref() else {
            return Ok(None);
        };
        if self.submitting {
            return Ok(None);
        }
        let depth = match Depth::new(depth, self.config.depth_bounds) {
            Ok(depth) => depth,
            Err(e) => {
                self.last_error = Some(e.clone());
                return Err(e);
            }
        };
        let request = GenerationRequest {
            artist_id: selection.id.clone(),
            depth,
            detail_level: self.config.detail_level,
        };
        self.job = None;
        self.generating = true;
        self.submitting = true;
        self.last_error = None;
        Ok(Some(request))
    }

    pub fn apply_submission(
        &mut self,
        result: Result<SubmitResponse, ServiceError>,
    ) -> SubmissionOutcome {
        if !self.submitting {
            return SubmissionOutcome::Ignored;
        }
        self.submitting = false;
        match result {
            Ok(resp) => {
                let status = match resp.status {
                    Some(JobStatus::Pending) => JobStatus::Pending,
                    _ => JobStatus::Running,
                };
                let progress = resp.progress.map(clamp_progress).unwrap_or(0);
                self.job = Some(Job::new(resp.job_id.clone(), status, progress));
                self.last_error = None;
                SubmissionOutcome::Started(resp.job_id)
            }
            Err(e) => {
                self.generating = false;
                let err = ControllerError::SubmissionFailed {
                    reason: describe(&e),
                };
                self.last_error = Some(err.clone());
                SubmissionOutcome::Failed(err)
            }
        }
    }

    pub fn apply_poll(&mut self, job_id: &JobId, report: PollReport) -> PollOutcome {
        let Some(job) = self
            .job
            .as_mut()
            .filter(|j| &j.id == job_id && !j.status.is_terminal())
        else {
            return PollOutcome::Ignored;
        };

        let outcome = match report {
            PollReport::Status(resp) => match resp.status {
                JobStatus::Pending | JobStatus::Running => {
                    job.status = resp.status;
                    job.progress = clamp_progress(resp.progress);
                    self.last_error = None;
                    return PollOutcome::Continue {
                        status: job.status,
                        progress: job.progress,
                    };
                }
                JobStatus::Completed => {
                    let location = resp
                        .result_url
                        .as_deref()
                        .filter(|u| !u.trim().is_empty())
                        .ok_or_else(|| "completed without a result location".to_string())
                        .and_then(|u| {
                            self.config
                                .resolve_result_location(u)
                                .map_err(|e| format!("unusable result location {u:?}: {e}"))
                        });
                    match location {
                        Ok(location) => {
                            job.status = JobStatus::Completed;
                            job.progress = clamp_progress(resp.progress);
                            job.result_location = Some(location.clone());
                            self.last_error = None;
                            PollOutcome::Completed {
                                job_id: job.id.clone(),
                                location,
                            }
                        }
                        Err(reason) => {
                            mark_failed(job, Some(reason.clone()));
                            PollOutcome::Failed(ControllerError::JobReportedError {
                                job_id: job.id.clone(),
                                reason,
                            })
                        }
                    }
                }
                JobStatus::Error => {
                    mark_failed(job, resp.message.clone());
                    PollOutcome::Failed(ControllerError::JobReportedError {
                        job_id: job.id.clone(),
                        reason: resp
                            .message
                            .unwrap_or_else(|| "the service reported an error".to_string()),
                    })
                }
            },
            PollReport::Transport(e) => {
                let reason = describe(&e);
                mark_failed(job, Some(reason.clone()));
                PollOutcome::Failed(ControllerError::PollFailed {
                    job_id: job.id.clone(),
                    reason,
                })
            }
            PollReport::Exhausted { polls } => {
                let reason = format!("no terminal status after {polls} polls");
                mark_failed(job, Some(reason.clone()));
                PollOutcome::Failed(ControllerError::PollFailed {
                    job_id: job.id.clone(),
                    reason,
                })
            }
        };

        self.generating = false;
        if let PollOutcome::Failed(err) = &outcome {
            self.last_error = Some(err.clone());
        }
        outcome
    }

    pub fn live_job_id(&self) -> Option<&JobId> {
        self.job
            .as_ref()
            .filter(|j| !j.status.is_terminal())
            .map(|j| &j.id)
    }

    /// Absolute result location, only once the job has completed.
    pub fn download_location(&self) -> Option<Url> {
        self.job
            .as_ref()
            .filter(|j| j.status == JobStatus::Completed)
            .and_then(|j| j.result_location.clone())
    }

    pub fn snapshot(&self) -> ControllerSnapshot {
        let visible_candidates = if self.selection.is_some() {
            Vec::new()
        } else {
            self.candidates.clone()
        };
        ControllerSnapshot {
            query: self.query.clone(),
            visible_candidates,
            candidate_count: self.candidates.len(),
            selection: self.selection.clone(),
            job: self.job.clone(),
            generating: self.generating,
            searching: self.searching,
            result_location: self.download_location(),
            last_error: self.last_error.as_ref().map(ToString::to_string),
        }
    }
}

fn mark_failed(job: &mut Job, message: Option<String>) {
    job.status = JobStatus::Error;
    job.result_location = None;
    job.message = message;
}
