//! # wadispatch-memory
//!
//! Persistent session bookkeeping for wadispatch (SQLite-backed).

pub mod store;

pub use store::{NewSession, Session, SessionStatus, Store};
