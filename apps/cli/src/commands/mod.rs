//! 子命令实现

pub mod config;
pub mod sequence;
pub mod snapshot;
pub mod status;
pub mod stream;

pub use config::ConfigCommand;
pub use sequence::SequenceCommand;
pub use snapshot::SnapshotCommand;
pub use status::StatusCommand;
pub use stream::StreamCommand;
