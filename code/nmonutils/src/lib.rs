// Misc utilities useful to both nmonlog and nmonimport.

mod configs;
mod dates;

// The importer configuration, and one tag derivation rule as written in the configuration file.

pub use configs::ImportConfig;
pub use configs::TagInput;

// Default flush thresholds for bulk and per-process series.

pub use configs::DEFAULT_BATCH_SIZE;
pub use configs::DEFAULT_PROCESS_BATCH_SIZE;

// Read the importer configuration from a file, or decode it from an already-parsed JSON value.

pub use configs::decode_import_config;
pub use configs::read_import_config;

// Types and utilities for manipulating timestamps.

pub use dates::Timestamp;

// "A long long time ago".

pub use dates::epoch;

// The time right now.

pub use dates::now;

// Given year, month, day, hour, minute, second (all UTC), return a Timestamp.

pub use dates::timestamp_from_ymdhms;

// Given year, month, day (all UTC), return a Timestamp.

pub use dates::timestamp_from_ymd;

// Return the timestamp with the time of day cleared out.

pub use dates::truncate_to_day;

// Parse "+HH:MM" and friends.

pub use dates::parse_fixed_offset;
