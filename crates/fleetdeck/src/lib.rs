pub mod commands;
pub mod config;
pub mod discover;
pub mod error;
pub mod log_sanitize;
pub mod logbuf;
pub mod remote;
pub mod supervisor;
pub mod ui;

pub use error::{Error, Result};
