// src/controller/mod.rs

//! Candidate-side admission controller: counts down to the next exam, admits
//! a registration during the window, auto-starts the session and delivers
//! the answers exactly once.

pub mod admission;
pub mod countdown;
pub mod feed;
pub mod gateway;
pub mod outbox;
pub mod practice;
pub mod ranking;
pub mod runtime;
pub mod scoring;
pub mod window;

pub use admission::{AdmissionController, ControllerHandle, Snapshot};
