//! Write-ahead log: redo record types, the on-disk record codec, buffered
//! log file I/O, and the log manager that serializes committed changes in
//! commit-timestamp order.

pub mod log_io;
pub mod log_manager;
pub mod record;

pub use log_io::{BufferedLogReader, BufferedLogWriter};
pub use log_manager::LogManager;
pub use record::{LogRecord, LogRecordKind, RedoEntry, RedoKind, RedoSegment};
