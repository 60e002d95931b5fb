//! Job lifecycle controller.
//!
//! Owns search, selection, submission and polling of generation jobs. Presentation
//! layers dispatch intents through a [`ControllerHandle`], read
//! [`ControllerSnapshot`]s and receive [`ControllerEvent`](crate::model::ControllerEvent)s.

mod poller;
mod runtime;
mod state;

pub use runtime::{spawn_controller, ControllerHandle};
pub use state::{
    ControllerSnapshot, ControllerState, PollOutcome, PollReport, SearchOutcome, SearchTicket,
    SubmissionOutcome,
};
