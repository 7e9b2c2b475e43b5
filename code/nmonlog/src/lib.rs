/// An nmon capture is a text file written by the nmon / topas_nmon performance monitors on AIX and
/// Linux.  It has a header, which identifies the host and declares the *series* that the capture
/// contains along with their column names, and a body of *data rows*, each a set of values for one
/// series at one *time code*.  The time codes are declared in the body as they occur.
///
/// This library turns a capture into *metric points* - (measurement, instant, numeric fields,
/// tags) - for a time-series store.  The work for a file happens in two passes over its lines:
///
/// - The header pass classifies every line against an ordered table of patterns, and collects the
///   host metadata, the schema (series -> columns), the time code table, and per-adapter and
///   per-filesystem tables.
///
/// - The data pass turns every data row into a point using the schema, resolves its time code,
///   enriches its tags from the metadata and from configured tag rules, and writes it through a
///   batching writer to a sink.  Rows for CPU_ALL and FCREAD also produce derived SYSINFO and
///   FCSTAT points, and TOP rows feed a bounded per-time-code ranking of the processes with the
///   most threads.
///
/// Around the two passes sits a per-file checkpoint: the checksum of the content and the stamp of
/// the last row imported.  An unchanged file is not imported again, and a changed file is imported
/// from where the last import stopped.
///
/// The sink and the checkpoint store are traits; in-memory implementations of both are provided.
mod checkpoint;
mod error;
mod header;
mod import;
mod point;
mod rules;
mod sink;
mod tagrules;
mod timestamps;
mod topk;

// The error type of the library, and a Result specialized to it.

pub use error::ImportError;
pub use error::Result;

// The pattern rule table, built once per process.

pub use rules::rules;
pub use rules::AdapterField;
pub use rules::HeaderKind;
pub use rules::RuleTable;

// Time zones and time code resolution.

pub use timestamps::parse_stamp;
pub use timestamps::TimestampTable;
pub use timestamps::Timezone;
pub use timestamps::MIN_STAMP;
pub use timestamps::NOW_STAMP;

// The header pass and what it produces.

pub use header::scan_header;
pub use header::AdapterStats;
pub use header::FilesystemSnapshot;
pub use header::HeaderInfo;
pub use header::HeaderOptions;
pub use header::HostMetadata;
pub use header::Schema;

// Configured tag derivation rules.

pub use tagrules::TagRules;
pub use tagrules::ALL_MEASUREMENTS;

// The output point, and its line-protocol encoding.

pub use point::MetricPoint;

// Bounded ranking of process samples.

pub use topk::Ranking;
pub use topk::ThreadSample;
pub use topk::TopK;
pub use topk::TOP_THREADS;

// Where points go: the sink trait, the batching writer, and an in-memory sink.

pub use sink::BatchWriter;
pub use sink::MemorySink;
pub use sink::PointSink;

// Per-file checkpoints: the record, the store trait, the gate, and an in-memory store.

pub use checkpoint::gate;
pub use checkpoint::Checkpoint;
pub use checkpoint::CheckpointStore;
pub use checkpoint::MemoryCheckpoints;

// The per-file import pipeline.

pub use import::compile_skip_metrics;
pub use import::import_file;
pub use import::parse_value;
pub use import::read_header;
pub use import::ImportOptions;
pub use import::ImportOutcome;
pub use import::SourceFile;
