//! # wadispatch-core
//!
//! Core types, traits, configuration, and the delivery engine for wadispatch.

pub mod config;
pub mod credentials;
pub mod engine;
pub mod error;
pub mod policy;
pub mod segment;
pub mod target;
pub mod traits;

pub use config::shellexpand;
