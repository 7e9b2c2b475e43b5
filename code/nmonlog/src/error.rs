/// Error taxonomy for the import pipeline.
///
/// Only `SinkWriteFailure`, `ConfigInvalid` and checkpoint store failures ever leave the
/// pipeline.  The per-line and per-row variants are produced by the helpers that parse lines and
/// rows, and the pipeline logs and skips them.  `ChecksumUnchanged` is control flow: the
/// checkpoint gate returns it and `import_file` turns it into `ImportOutcome::Unchanged`.
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ImportError {
    /// A line could not be used: too few fields, a doubled delimiter, an unparsable value.
    #[error("Skipping line: {reason}")]
    ParseSkip { reason: String },

    /// A data row referenced a time code that has no ZZZZ declaration, or whose declaration
    /// does not hold a valid stamp.
    #[error("Timestamp {code} not found")]
    TimestampUnresolved { code: String },

    /// A data row has more values than its series declaration has columns.
    #[error("Entry at position {position} in series {series} is not in the schema")]
    SchemaMismatch { series: String, position: usize },

    /// The file has been imported before and has not changed.
    #[error("File not changed since last import: {file}")]
    ChecksumUnchanged { file: String },

    /// The point store rejected a batch.
    #[error("Failed to write points: {0}")]
    SinkWriteFailure(#[source] anyhow::Error),

    /// The checkpoint store could not be read or written.
    #[error("Checkpoint store failure: {0}")]
    CheckpointFailure(#[source] anyhow::Error),

    /// Bad configuration, detected before any file is read.
    #[error("Invalid configuration: {0}")]
    ConfigInvalid(String),
}

pub type Result<T> = std::result::Result<T, ImportError>;

pub(crate) fn parse_skip(reason: impl Into<String>) -> ImportError {
    ImportError::ParseSkip {
        reason: reason.into(),
    }
}
