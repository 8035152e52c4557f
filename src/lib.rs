// src/lib.rs

//! Exam portal: the candidate-side admission controller (`controller`) and
//! the HTTP/WebSocket backend it talks to.

pub mod config;
pub mod controller;
pub mod error;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod state;
pub mod utils;

pub use controller::{AdmissionController, ControllerHandle};
pub use routes::create_router;
