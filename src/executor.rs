//! Per-host job execution.
//!
//! A job goes through: local ignore check, connect, optional script upload,
//! command composition, exec, optional download. Errors from any remote step
//! end the job as [`Outcome::Failed`]; they never reach other jobs.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep_until, timeout_at, Instant};

use crate::error::RubyfyError;
use crate::job::{Job, Outcome};
use crate::log::{Logger, Severity};
use crate::session::{Connector, Session};

#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    /// Drop remote output instead of logging it.
    pub silent: bool,
    /// Where `<server>.ignore` markers are looked up and downloads are written.
    pub workdir: PathBuf,
    /// Remote staging directory for uploaded scripts.
    pub remote_script_dir: String,
    /// How long a background job is given to detach. Background jobs always
    /// take this long.
    pub background_grace: Duration,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            silent: false,
            workdir: PathBuf::from("."),
            remote_script_dir: "./scripts".to_string(),
            background_grace: Duration::from_secs(3),
        }
    }
}

/// Prepends the precondition guard and wraps the result into a single
/// `sh -c` invocation, with sudo and nohup as requested.
pub fn compose_command(
    command: &str,
    precondition: Option<&str>,
    root: bool,
    background: bool,
) -> String {
    let body = match precondition {
        Some(path) => {
            let path = shell_words::quote(path);
            format!(
                "test -f {path} && echo Precondition {path} exists && exit 1; {command}",
                path = path,
                command = command
            )
        }
        None => command.to_owned(),
    };
    let sudo = if root { "sudo " } else { "" };
    let shell = format!("{}sh -c {}", sudo, shell_words::quote(&body));
    if background {
        format!("nohup {} &", shell)
    } else {
        shell
    }
}

pub struct Executor {
    connector: Arc<dyn Connector>,
    logger: Arc<Logger>,
    settings: ExecutorSettings,
}

impl Executor {
    pub fn new(
        connector: Arc<dyn Connector>,
        logger: Arc<Logger>,
        settings: ExecutorSettings,
    ) -> Self {
        Self {
            connector,
            logger,
            settings,
        }
    }

    pub fn logger(&self) -> &Arc<Logger> {
        &self.logger
    }

    pub fn ignore_marker(&self, server: &str) -> PathBuf {
        self.settings.workdir.join(format!("{}.ignore", server))
    }

    pub async fn run_job(&self, job: &Job) -> Outcome {
        self.logger.log(
            Severity::Verbose,
            format!("{}::Running job {}", job.server, job),
        );
        if self.ignore_marker(&job.server).exists() {
            self.logger
                .log(Severity::Info, format!("{}::Ignoring this server", job.server));
            return Outcome::Skipped;
        }
        match self.execute(job).await {
            Ok(()) => Outcome::Succeeded,
            Err(e) => Outcome::Failed(e),
        }
    }

    async fn execute(&self, job: &Job) -> Result<(), RubyfyError> {
        let server = job.server.as_str();
        self.logger
            .log(Severity::Verbose, format!("{}::Connecting", server));
        let session = self.connector.connect(server, &job.user).await?;
        let result = self.run_on(session.as_ref(), job).await;
        self.logger
            .log(Severity::Debug, format!("{}::Terminating connection", server));
        if let Err(e) = session.close().await {
            self.logger.log(
                Severity::Warn,
                format!("{}::Error while terminating: {}", server, e),
            );
        }
        result
    }

    async fn run_on(&self, session: &dyn Session, job: &Job) -> Result<(), RubyfyError> {
        let server = job.server.as_str();
        let command = match &job.script {
            Some(script) => self.stage_script(session, job, script).await?,
            None => job.command.clone().ok_or_else(|| {
                RubyfyError::Config("neither a command nor a script is given".to_string())
            })?,
        };
        let command = compose_command(
            &command,
            job.precondition.as_deref(),
            job.root,
            job.background,
        );

        self.logger
            .log(Severity::Verbose, format!("{}::Executing {}", server, command));
        let logger = Arc::clone(&self.logger);
        let silent = self.settings.silent;
        let output = move |line: &str| {
            if !silent {
                logger.log(Severity::Out, format!("{}::{}", server, line));
            }
        };

        if job.background {
            // The job always takes the full grace period. An exec error within it
            // fails the job; a still running exec is abandoned.
            let deadline = Instant::now() + self.settings.background_grace;
            if let Ok(Err(e)) = timeout_at(deadline, session.exec(&command, &output)).await {
                return Err(e);
            }
            sleep_until(deadline).await;
            return Ok(());
        }

        let code = session.exec(&command, &output).await?;
        match code {
            Some(0) => self
                .logger
                .log(Severity::Verbose, format!("{}::Exited with status 0", server)),
            Some(code) => self
                .logger
                .log(Severity::Info, format!("{}::Exited with status {}", server, code)),
            None => self
                .logger
                .log(Severity::Warn, format!("{}::Terminated by signal", server)),
        }

        if let Some(remote) = &job.download {
            let local = self.settings.workdir.join(server);
            self.logger.log(
                Severity::Verbose,
                format!(
                    "{}::Downloading {} to file {}",
                    server,
                    remote,
                    local.display()
                ),
            );
            session.download(remote, &local).await?;
        }
        Ok(())
    }

    /// Uploads the script into the remote staging directory and returns the
    /// command that runs it.
    async fn stage_script(
        &self,
        session: &dyn Session,
        job: &Job,
        script: &Path,
    ) -> Result<String, RubyfyError> {
        let server = job.server.as_str();
        let basename = script
            .file_name()
            .ok_or_else(|| {
                RubyfyError::Config(format!("script path {} has no file name", script.display()))
            })?
            .to_string_lossy();
        self.logger.log(
            Severity::Verbose,
            format!(
                "{}::Using script {} (command will be overwritten)",
                server,
                script.display()
            ),
        );

        let dir = &self.settings.remote_script_dir;
        self.logger
            .log(Severity::Debug, format!("{}::Creating {}", server, dir));
        let dir_quoted = shell_words::quote(dir);
        self.exec_checked(
            session,
            server,
            &format!("test -d {0} || mkdir {0}", dir_quoted),
        )
        .await?;

        let remote = format!("{}/{}", dir, basename);
        self.logger.log(
            Severity::Debug,
            format!(
                "{}::Uploading file {} => {}",
                server,
                script.display(),
                remote
            ),
        );
        session.upload(script, &remote).await?;

        self.logger.log(
            Severity::Debug,
            format!("{}::Set permissions {} => 0755", server, remote),
        );
        self.exec_checked(
            session,
            server,
            &format!("chmod 755 {}", shell_words::quote(&remote)),
        )
        .await?;

        let mut command = shell_words::quote(&remote).into_owned();
        if let Some(args) = &job.script_arguments {
            command.push(' ');
            command.push_str(args);
        }
        Ok(command)
    }

    /// Runs a housekeeping command whose output only matters in debug mode.
    async fn exec_checked(
        &self,
        session: &dyn Session,
        server: &str,
        command: &str,
    ) -> Result<(), RubyfyError> {
        let logger = Arc::clone(&self.logger);
        let output = move |line: &str| logger.log(Severity::Debug, format!("{}::{}", server, line));
        match session.exec(command, &output).await? {
            Some(0) => Ok(()),
            Some(code) => Err(RubyfyError::Exec(format!(
                "'{}' exited with status {}",
                command, code
            ))),
            None => Err(RubyfyError::Exec(format!(
                "'{}' was terminated by a signal",
                command
            ))),
        }
    }
}
