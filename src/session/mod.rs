pub mod state;
pub mod log;
pub mod signals;
pub mod manager;
pub mod poller;
pub mod command;

pub use state::{SessionFlags, SessionId, SessionState};
pub use log::{LineSource, LogClass, LogCursor, LogEntry, LogLine, LogSnapshot, RemoteStatus};
pub use manager::{ExploitSession, SessionSettings, SessionSnapshot};
