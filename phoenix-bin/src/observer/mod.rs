//! Result sinks registered with the fuzz driver.

mod csv;
mod progress;

pub use self::csv::{CSV_HEADER, CsvWriterObserver};
pub use self::progress::ProgressObserver;
