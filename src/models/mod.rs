// src/models/mod.rs

pub mod question;
pub mod registration;
pub mod results;
pub mod schedule;
pub mod score;
pub mod session;
