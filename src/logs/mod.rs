//! Log acquisition, streaming, caching and filtering.

pub mod cache;
pub mod entry;
pub mod fetcher;
pub mod filter;
pub mod streamer;

pub use cache::LogCache;
pub use entry::{parse_log_output, LogEntry, LogLevel, RunLogs, StepLogs};
pub use fetcher::{check_gh_cli_available, LogFetcher};
pub use filter::{FilterConfig, FilterLevel, FilteredResult, LogFilter, MatchPosition};
pub use streamer::{LogStreamer, StreamState};
