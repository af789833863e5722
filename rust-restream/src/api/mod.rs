//! HTTP binding.
//!
//! A thin layer over the channel manager: conversion requests, channel
//! listing and removal, and serving of playlists and segments.

pub mod error;
pub mod models;
pub mod routes;
pub mod server;

pub use error::{ApiError, ApiResult};
pub use server::{ApiServer, ApiServerConfig, AppState};
