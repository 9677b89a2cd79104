//! Rubyfy: Run a Command or Script on Many Hosts over SSH.

// Serde helper module.
mod serde;
// Command line arguments and configuration.
pub mod config;
// Worker pool and summary.
pub mod dispatcher;
// Error handling.
pub mod error;
// Per-host job execution.
pub mod executor;
// How to read target hosts.
pub mod host;
// How to represent jobs.
pub mod job;
// Synchronized log output.
pub mod log;
// SSH session wrapper.
pub mod session;

pub use config::{Cli, Config, FileConfig};
pub use dispatcher::{report_summary, spawn_worker, Dispatcher};
pub use error::RubyfyError;
pub use executor::{compose_command, Executor, ExecutorSettings};
pub use host::{parse_hosts, read_hosts};
pub use job::{build_jobs, Job, JobSpec, JobStatus, Outcome};
pub use log::{format_line, LogSettings, Logger, Severity};
pub use session::{Connector, OutputSink, Session, SshConnector};
