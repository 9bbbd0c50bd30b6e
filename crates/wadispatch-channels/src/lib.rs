//! # wadispatch-channels
//!
//! Messaging transport integrations for wadispatch.

pub mod whatsapp;
pub mod whatsapp_store;
