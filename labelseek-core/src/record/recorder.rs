use super::Record;

/// Writes a record to an output destination.
pub trait Recorder {
    /// Write a record to the [`Recorder`].
    fn write(&mut self, record: Record);
}

/// A recorder that buffers records and emits an aggregate on flush.
pub trait AggregateRecorder: Recorder {
    /// Store the record for later aggregation.
    fn store(&mut self, record: Record);

    /// Writes values aggregated from the stored records at the given step.
    fn flush(&mut self, step: i64);
}
