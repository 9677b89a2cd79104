use std::fmt;
use std::path::PathBuf;

use crate::error::RubyfyError;

/// Settings shared by every job of a run. One `Job` is stamped out per host.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobSpec {
    /// Login identity on the remote host.
    pub user: String,
    /// Shell command to run. Required unless `script` is set.
    pub command: Option<String>,
    /// Local script to upload and run instead of `command`.
    pub script: Option<PathBuf>,
    /// Appended verbatim to the uploaded script path.
    pub script_arguments: Option<String>,
    /// Remote file whose presence aborts the job's main action.
    pub precondition: Option<String>,
    /// Run via sudo.
    pub root: bool,
    /// Detach the remote process instead of waiting for it.
    pub background: bool,
    /// Remote file to fetch after execution.
    pub download: Option<String>,
}

impl JobSpec {
    pub fn for_host(&self, index: usize, server: String) -> Job {
        Job {
            index,
            server,
            user: self.user.clone(),
            command: self.command.clone(),
            script: self.script.clone(),
            script_arguments: self.script_arguments.clone(),
            precondition: self.precondition.clone(),
            root: self.root,
            background: self.background,
            download: self.download.clone(),
            status: JobStatus::None,
        }
    }
}

/// Creates one job per host, in host order.
pub fn build_jobs(spec: &JobSpec, hosts: Vec<String>) -> Vec<Job> {
    hosts
        .into_iter()
        .enumerate()
        .map(|(index, server)| spec.for_host(index, server))
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    /// Not processed yet.
    None,
    Ok,
    Error,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    /// Position in the host list.
    pub index: usize,
    pub server: String,
    pub user: String,
    pub command: Option<String>,
    pub script: Option<PathBuf>,
    pub script_arguments: Option<String>,
    pub precondition: Option<String>,
    pub root: bool,
    pub background: bool,
    pub download: Option<String>,
    /// Written once by the worker that processed this job.
    pub status: JobStatus,
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "user={}", self.user)?;
        if let Some(command) = &self.command {
            write!(f, " command={:?}", command)?;
        }
        if let Some(script) = &self.script {
            write!(f, " script={}", script.display())?;
        }
        if let Some(args) = &self.script_arguments {
            write!(f, " script_arguments={:?}", args)?;
        }
        if let Some(precondition) = &self.precondition {
            write!(f, " precondition={}", precondition)?;
        }
        if let Some(download) = &self.download {
            write!(f, " download={}", download)?;
        }
        write!(f, " root={} background={}", self.root, self.background)
    }
}

/// What the remote executor made of a job.
#[derive(Debug)]
pub enum Outcome {
    /// The host carries a local ignore marker and was never contacted.
    Skipped,
    Succeeded,
    Failed(RubyfyError),
}

impl Outcome {
    pub fn status(&self) -> JobStatus {
        match self {
            Outcome::Skipped | Outcome::Succeeded => JobStatus::Ok,
            Outcome::Failed(_) => JobStatus::Error,
        }
    }
}
