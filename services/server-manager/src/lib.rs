//! Game-server fleet manager.
//!
//! This crate primarily ships a `server-manager` binary, but we expose a small
//! library surface to enable integration testing and reuse.

pub mod api;
pub mod auth;
pub mod config;
pub mod db;
pub mod state;
