//! Repository layer.

pub mod channel;

pub use channel::{
    ChannelRecordRepository, InMemoryChannelRecordRepository, SqlxChannelRecordRepository,
};
