// ABOUTME: Ordered log output: message decoding, reassembly, stream drivers and sinks

pub mod manager;
pub mod message;
pub mod reassembler;
pub mod sink;
pub mod stream;

pub use manager::LogStreamingManager;
pub use message::{LogMessage, UnmarshalError};
pub use reassembler::{ReassemblyState, FLUSH_TIMEOUT};
pub use sink::{ChannelSink, CollectingSink, ConsoleSink, OutputSink};
pub use stream::{LogStream, LogStreamError};
