pub mod budget;
pub mod config;
pub mod controller;
pub mod engine;
pub mod error;
pub mod logging;
pub mod manifest;
pub mod planner;
pub mod registry;
pub mod retry;
pub mod scratch;
pub mod source;
pub mod tiering;
pub mod worker;

pub use engine::{CancelOutcome, Engine, JobStatus, PartProgress};
pub use error::TransferError;
pub use source::{ByteStream, MediaInfo, MediaSource};
