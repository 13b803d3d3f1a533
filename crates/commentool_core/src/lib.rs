//! Core library for the one-time WordPress comment migration: SQL dump row
//! extraction, WXR import, content cleanup passes, and the SQLite comment
//! store they feed.

pub mod cleanup;
pub mod config;
pub mod dump;
pub mod extract;
pub mod markdown;
pub mod report;
pub mod runtime;
pub mod store;
pub mod wp;
pub mod wxr;
