//! Client for the family tree generation service.
//!
//! The [`controller`] module drives the search, selection, submission and polling
//! lifecycle of generation jobs; [`service`] talks to the remote API.

pub mod cli;
pub mod controller;
pub mod error;
pub mod logging;
pub mod model;
pub mod service;
