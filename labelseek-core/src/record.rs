//! Types for recording training metrics.
//!
//! A [`Record`] is a flexible key-value container filled by the trainer and
//! validator each epoch (loss, accuracy, request percentage, reward, margin
//! diagnostics). [`Recorder`] implementations decide where those records go;
//! [`NullRecorder`] discards them and [`BufferedRecorder`] keeps them in
//! memory for inspection in tests.
mod base;
mod buffered_recorder;
mod null_recorder;
mod recorder;

pub use base::{Record, RecordValue};
pub use buffered_recorder::BufferedRecorder;
pub use null_recorder::NullRecorder;
pub use recorder::{AggregateRecorder, Recorder};
