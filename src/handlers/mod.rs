// src/handlers/mod.rs

pub mod admin;
pub mod catalog;
pub mod registration;
pub mod results;
pub mod session;
