//! Channel identity, pipeline state machine and failure taxonomy.

mod failure;
mod key;
mod state;
mod status;

pub use failure::{FailureKind, PipelineFailure};
pub use key::{ChannelKey, MAX_KEY_LEN, MAX_SOURCE_LEN, SourceReference};
pub use state::PipelineState;
pub use status::ChannelStatus;
