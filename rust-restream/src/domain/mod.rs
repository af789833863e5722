//! Domain types for channels and their pipelines.

pub mod channel;

pub use channel::{
    ChannelKey, ChannelStatus, FailureKind, PipelineFailure, PipelineState, SourceReference,
};
