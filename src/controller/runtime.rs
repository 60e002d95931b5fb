//! Controller task.
//!
//! A single task owns the [`ControllerState`]; intents, service responses and poll
//! reports are all applied from one `select!` loop so no two mutations interleave.

use super::poller::{PollHandle, PollMessage};
use super::state::{
    ControllerSnapshot, ControllerState, PollOutcome, SearchOutcome, SearchTicket,
    SubmissionOutcome,
};
use crate::error::ServiceError;
use crate::model::{Candidate, CandidateId, ControllerConfig, ControllerEvent, SubmitResponse};
use crate::service::GenerationService;
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinSet;
use url::Url;

/// Intents dispatched by presentation layers.
#[derive(Debug)]
enum Intent {
    SubmitSearch(String),
    SelectCandidate(Candidate),
    SelectCandidateById(CandidateId),
    ClearSelection,
    RequestGeneration(u32),
    RequestDownload(oneshot::Sender<Option<Url>>),
    Shutdown,
}

/// Results of one-shot service calls, routed back into the loop.
enum Completion {
    Search {
        ticket: SearchTicket,
        result: Result<Vec<Candidate>, ServiceError>,
    },
    Submission {
        result: Result<SubmitResponse, ServiceError>,
    },
}

/// Cloneable front door to a running controller.
///
/// Intents never fail: once the controller has shut down they are dropped.
#[derive(Clone)]
pub struct ControllerHandle {
    intent_tx: UnboundedSender<Intent>,
    snapshot_rx: watch::Receiver<ControllerSnapshot>,
}

impl ControllerHandle {
    pub fn submit_search(&self, query: impl Into<String>) {
        self.send(Intent::SubmitSearch(query.into()));
    }

    pub fn select_candidate(&self, candidate: Candidate) {
        self.send(Intent::SelectCandidate(candidate));
    }

    /// Select one of the currently listed candidates. Unknown ids are ignored.
    pub fn select_candidate_by_id(&self, id: CandidateId) {
        self.send(Intent::SelectCandidateById(id));
    }

    pub fn clear_selection(&self) {
        self.send(Intent::ClearSelection);
    }

    pub fn request_generation(&self, depth: u32) {
        self.send(Intent::RequestGeneration(depth));
    }

    /// Result location of the completed job, if any. Also emitted as
    /// [`ControllerEvent::OpenResult`] for the observer.
    pub async fn request_download(&self) -> Option<Url> {
        let (tx, rx) = oneshot::channel();
        self.send(Intent::RequestDownload(tx));
        rx.await.ok().flatten()
    }

    pub fn snapshot(&self) -> ControllerSnapshot {
        self.snapshot_rx.borrow().clone()
    }

    /// Receiver that is notified whenever the snapshot changes.
    pub fn subscribe(&self) -> watch::Receiver<ControllerSnapshot> {
        self.snapshot_rx.clone()
    }

    /// Stop the controller and wait until its tasks are gone.
    pub async fn shutdown(&self) {
        self.send(Intent::Shutdown);
        self.closed().await;
    }

    /// Resolves once the controller task has exited.
    pub async fn closed(&self) {
        self.intent_tx.closed().await;
    }

    fn send(&self, intent: Intent) {
        if self.intent_tx.send(intent).is_err() {
            tracing::debug!("controller is gone; intent dropped");
        }
    }
}

/// Start a controller on the current tokio runtime.
///
/// Returns the intent handle and the observer channel. Dropping the observer
/// receiver, calling [`ControllerHandle::shutdown`] or dropping every handle tears
/// the controller down and cancels any polling.
pub fn spawn_controller(
    config: ControllerConfig,
    service: Arc<dyn GenerationService>,
) -> (ControllerHandle, UnboundedReceiver<ControllerEvent>) {
    let state = ControllerState::new(config);
    let (intent_tx, intent_rx) = mpsc::unbounded_channel();
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (snapshot_tx, snapshot_rx) = watch::channel(state.snapshot());
    let (poll_tx, poll_rx) = mpsc::unbounded_channel();

    let task = ControllerTask {
        state,
        service,
        events: event_tx,
        snapshot_tx,
        calls: JoinSet::new(),
        poller: None,
        poll_tx,
    };
    tokio::spawn(task.run(intent_rx, poll_rx));

    (
        ControllerHandle {
            intent_tx,
            snapshot_rx,
        },
        event_rx,
    )
}

struct ControllerTask {
    state: ControllerState,
    service: Arc<dyn GenerationService>,
    events: UnboundedSender<ControllerEvent>,
    snapshot_tx: watch::Sender<ControllerSnapshot>,
    // Outstanding search and submission calls; aborted when the set is dropped.
    calls: JoinSet<Completion>,
    poller: Option<PollHandle>,
    poll_tx: UnboundedSender<PollMessage>,
}

impl ControllerTask {
    async fn run(
        mut self,
        mut intents: UnboundedReceiver<Intent>,
        mut poll_rx: UnboundedReceiver<PollMessage>,
    ) {
        tracing::debug!("controller started");
        loop {
            let events = tokio::select! {
                intent = intents.recv() => match intent {
                    Some(Intent::Shutdown) | None => break,
                    Some(intent) => self.handle_intent(intent),
                },
                Some(done) = self.calls.join_next(), if !self.calls.is_empty() => match done {
                    Ok(completion) => self.handle_completion(completion),
                    Err(e) => {
                        tracing::error!(error = %e, "service call task failed");
                        Vec::new()
                    }
                },
                Some(msg) = poll_rx.recv() => self.handle_poll(msg),
                _ = self.events.closed() => {
                    tracing::debug!("observer detached");
                    break;
                }
            };
            self.publish();
            for event in events {
                let _ = self.events.send(event);
            }
        }
        self.teardown();
    }

    fn handle_intent(&mut self, intent: Intent) -> Vec<ControllerEvent> {
        match intent {
            Intent::SubmitSearch(query) => {
                if let Some(ticket) = self.state.begin_search(&query) {
                    tracing::debug!(seq = ticket.seq, query = %ticket.query, "search issued");
                    let service = self.service.clone();
                    self.calls.spawn(async move {
                        let result = service.search(&ticket.query).await;
                        Completion::Search { ticket, result }
                    });
                }
                Vec::new()
            }
            Intent::SelectCandidate(candidate) => {
                tracing::debug!(id = %candidate.id, "candidate selected");
                self.state.select_candidate(candidate);
                Vec::new()
            }
            Intent::SelectCandidateById(id) => {
                if !self.state.select_candidate_by_id(&id) {
                    tracing::debug!(%id, "select ignored: candidate not listed");
                }
                Vec::new()
            }
            Intent::ClearSelection => {
                self.state.clear_selection();
                Vec::new()
            }
            Intent::RequestGeneration(depth) => match self.state.begin_generation(depth) {
                Ok(Some(request)) => {
                    if let Some(old) = self.poller.take() {
                        tracing::info!(job_id = %old.job_id(), "superseding running job");
                        old.cancel();
                    }
                    tracing::info!(artist_id = %request.artist_id, depth = request.depth.get(), "submitting generation");
                    let service = self.service.clone();
                    self.calls.spawn(async move {
                        let result = service.submit(&request).await;
                        Completion::Submission { result }
                    });
                    Vec::new()
                }
                Ok(None) => {
                    tracing::debug!("generation request ignored");
                    Vec::new()
                }
                Err(e) => {
                    tracing::warn!(error = %e, "generation request rejected");
                    vec![ControllerEvent::Failure(e)]
                }
            },
            Intent::RequestDownload(reply) => {
                let location = self.state.download_location();
                let _ = reply.send(location.clone());
                location.map(ControllerEvent::OpenResult).into_iter().collect()
            }
            Intent::Shutdown => Vec::new(),
        }
    }

    fn handle_completion(&mut self, completion: Completion) -> Vec<ControllerEvent> {
        match completion {
            Completion::Search { ticket, result } => {
                match self.state.apply_search(&ticket, result) {
                    SearchOutcome::Applied { query, count } => {
                        tracing::debug!(seq = ticket.seq, count, "search applied");
                        vec![ControllerEvent::SearchCompleted { query, count }]
                    }
                    SearchOutcome::Failed(e) => {
                        tracing::warn!(error = %e, "search failed");
                        vec![ControllerEvent::Failure(e)]
                    }
                    SearchOutcome::Stale => {
                        tracing::debug!(seq = ticket.seq, "stale search response dropped");
                        Vec::new()
                    }
                }
            }
            Completion::Submission { result } => match self.state.apply_submission(result) {
                SubmissionOutcome::Started(job_id) => {
                    tracing::info!(%job_id, "job started");
                    let cfg = self.state.config();
                    self.poller = Some(PollHandle::spawn(
                        self.service.clone(),
                        job_id.clone(),
                        cfg.poll_interval,
                        cfg.max_polls,
                        self.poll_tx.clone(),
                    ));
                    vec![ControllerEvent::JobStarted { job_id }]
                }
                SubmissionOutcome::Failed(e) => {
                    tracing::warn!(error = %e, "submission failed");
                    vec![ControllerEvent::Failure(e)]
                }
                SubmissionOutcome::Ignored => Vec::new(),
            },
        }
    }

    fn handle_poll(&mut self, msg: PollMessage) -> Vec<ControllerEvent> {
        let job_id = msg.job_id.clone();
        let outcome = self.state.apply_poll(&msg.job_id, msg.report);
        if outcome.is_terminal() {
            if let Some(poller) = self.poller.take() {
                poller.cancel();
            }
        }
        match outcome {
            PollOutcome::Ignored => {
                tracing::trace!(%job_id, "poll report for inactive job dropped");
                Vec::new()
            }
            PollOutcome::Continue { status, progress } => vec![ControllerEvent::JobProgress {
                job_id,
                status,
                progress,
            }],
            PollOutcome::Completed { job_id, location } => {
                tracing::info!(%job_id, %location, "job completed");
                vec![ControllerEvent::JobCompleted {
                    job_id,
                    result_location: location,
                }]
            }
            PollOutcome::Failed(e) => {
                tracing::warn!(error = %e, "job failed");
                vec![ControllerEvent::Failure(e)]
            }
        }
    }

    fn publish(&self) {
        let next = self.state.snapshot();
        self.snapshot_tx.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }

    fn teardown(&mut self) {
        if let Some(poller) = self.poller.take() {
            poller.cancel();
        }
        self.calls.abort_all();
        tracing::debug!("controller stopped");
    }
}
