//! Library crate for couch-console, exposing modules for binaries and integration tests.

pub mod config;
pub mod console;
pub mod dispatch;
pub mod dto;
pub mod error;
pub mod services;
pub mod state;
