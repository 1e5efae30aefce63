//! Worker process: configuration-driven wiring of stores, steps and workers.

pub mod services;

pub use services::{AppServices, build_services};
