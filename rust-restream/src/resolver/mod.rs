//! Locator resolution.
//!
//! A source reference (for example a page URL) is turned into a directly
//! fetchable, time-limited media locator by an external tool. Locators are
//! never cached: each transcoder launch gets a fresh one.

mod command;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::{ResolverConfig, ResolverKind};
use crate::domain::SourceReference;

pub use command::CommandResolver;

/// A resolved media locator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Locator {
    pub url: String,
    pub resolved_at: DateTime<Utc>,
}

impl Locator {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            resolved_at: Utc::now(),
        }
    }
}

/// Why a locator could not be produced.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolutionError {
    /// The source is invalid or currently unavailable.
    #[error("source not found: {reason}")]
    NotFound { reason: String },

    #[error("resolver timed out after {}s", .timeout.as_secs_f32())]
    Timeout { timeout: Duration },

    /// The tool is missing or crashed.
    #[error("resolver unavailable: {reason}")]
    ResolverUnavailable { reason: String },
}

/// Resolves source references into locators.
#[async_trait]
pub trait LocatorResolver: Send + Sync {
    /// Resolver name for logging.
    fn name(&self) -> &str;

    async fn resolve(&self, source: &SourceReference) -> Result<Locator, ResolutionError>;
}

/// Uses the source reference itself as the locator.
///
/// Suitable when channels are configured with direct media URLs.
#[derive(Debug, Default, Clone)]
pub struct PassthroughResolver;

#[async_trait]
impl LocatorResolver for PassthroughResolver {
    fn name(&self) -> &str {
        "passthrough"
    }

    async fn resolve(&self, source: &SourceReference) -> Result<Locator, ResolutionError> {
        Ok(Locator::new(source.as_str()))
    }
}

/// Build the resolver selected by configuration.
pub fn build_resolver(config: &ResolverConfig) -> Arc<dyn LocatorResolver> {
    match config.kind {
        ResolverKind::Command => Arc::new(CommandResolver::new(config.clone())),
        ResolverKind::Passthrough => Arc::new(PassthroughResolver),
    }
}
