//! Oracle redo-log CDC engine: tails archived/online redo, reconstructs
//! committed transactions against a live dictionary cache, and publishes
//! ordered row-change events to file/Kafka/ZeroMQ/network sinks.

pub mod analyzer;
pub mod config;
pub mod encoder;
pub mod error;
pub mod memory;
pub mod output;
pub mod reader;
pub mod redo;
pub mod runtime;
pub mod schema;
pub mod scn;
pub mod systxn;
pub mod txbuffer;
pub mod writer;

pub use error::{CdcError, Result};
