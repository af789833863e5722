//! rust-restream library crate.
//!
//! Turns live source references into rolling HLS channels: each channel
//! resolves its source to a fetchable locator, supervises a transcoder
//! writing a bounded segment window, and recovers from failures with
//! backoff. The binary wires these pieces behind a small HTTP API.

pub mod api;
pub mod config;
pub mod database;
pub mod domain;
pub mod error;
pub mod logging;
pub mod manager;
pub mod resolver;
pub mod store;
pub mod transcoder;
pub mod utils;

pub use error::{Error, Result};
