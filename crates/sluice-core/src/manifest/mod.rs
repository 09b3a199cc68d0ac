//! Durable manifest of jobs and their parts (SQLite via sqlx).
//!
//! Single source of truth for resume: every part transition is written here
//! before it is acted on, and a part is only ever marked Done after its bytes
//! are durable on the scratch volume.

pub mod db;
pub mod types;

mod read;
mod write;

#[cfg(test)]
mod tests;

pub use db::*;
pub use types::*;
