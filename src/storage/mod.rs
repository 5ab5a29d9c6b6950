pub mod csv_log;
pub mod trait_def;

pub use csv_log::{decode_event, decode_row, encode_row, CsvEventLog};
pub use trait_def::{EventStore, StorageError, StorageResult};
