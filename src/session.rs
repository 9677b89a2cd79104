//! SSH session wrapper.
//!
//! The executor only talks to the [`Connector`] and [`Session`] traits. The
//! openssh-backed implementations live here too; tests plug in their own.

use std::path::Path;

use async_trait::async_trait;
use futures::future::{join, BoxFuture};
use openssh::{KnownHosts, Session as SSHSession, SessionBuilder, Stdio};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};

use crate::error::RubyfyError;

/// Receives remote output, one line at a time, without the line terminator.
pub type OutputSink<'a> = &'a (dyn Fn(&str) + Send + Sync);

#[async_trait]
pub trait Session: Send + Sync {
    /// Runs `command` through the remote login shell, streaming stdout and
    /// stderr lines into `output`. Returns the exit code, or `None` if the
    /// remote process was killed by a signal.
    async fn exec(
        &self,
        command: &str,
        output: OutputSink<'_>,
    ) -> Result<Option<i32>, RubyfyError>;

    async fn upload(&self, local: &Path, remote: &str) -> Result<(), RubyfyError>;

    async fn download(&self, remote: &str, local: &Path) -> Result<(), RubyfyError>;

    /// Shuts the connection down.
    fn close(self: Box<Self>) -> BoxFuture<'static, Result<(), RubyfyError>> {
        Box::pin(async { Ok(()) })
    }
}

#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, host: &str, user: &str) -> Result<Box<dyn Session>, RubyfyError>;
}

/// Opens a multiplexed OpenSSH connection per host.
#[derive(Debug, Clone, Default)]
pub struct SshConnector;

#[async_trait]
impl Connector for SshConnector {
    async fn connect(&self, host: &str, user: &str) -> Result<Box<dyn Session>, RubyfyError> {
        let mut builder = SessionBuilder::default();
        builder
            .user(user.to_owned())
            .known_hosts_check(KnownHosts::Add);
        let session = builder
            .connect_mux(host)
            .await
            .map_err(|e| RubyfyError::Connect {
                host: host.to_owned(),
                reason: e.to_string(),
            })?;
        Ok(Box::new(SshSession { session }))
    }
}

pub struct SshSession {
    session: SSHSession,
}

#[async_trait]
impl Session for SshSession {
    async fn exec(
        &self,
        command: &str,
        output: OutputSink<'_>,
    ) -> Result<Option<i32>, RubyfyError> {
        let mut cmd = self.session.raw_command(command);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        let mut process = cmd.spawn().await?;
        let stdout = process
            .stdout()
            .take()
            .ok_or_else(|| RubyfyError::Exec("remote stdout is not piped".to_string()))?;
        let stderr = process
            .stderr()
            .take()
            .ok_or_else(|| RubyfyError::Exec("remote stderr is not piped".to_string()))?;
        let (out, err) = join(stream(stdout, output), stream(stderr, output)).await;
        out.and(err)
            .map_err(|e| RubyfyError::Exec(format!("failed to read remote output: {}", e)))?;
        let status = process.wait().await?;
        Ok(status.code())
    }

    async fn upload(&self, local: &Path, remote: &str) -> Result<(), RubyfyError> {
        let transfer_error = |reason: String| RubyfyError::Transfer {
            path: local.display().to_string(),
            reason,
        };
        let mut file = tokio::fs::File::open(local)
            .await
            .map_err(|e| transfer_error(e.to_string()))?;
        let mut cmd = self
            .session
            .raw_command(format!("cat > {}", shell_words::quote(remote)));
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        let mut process = cmd.spawn().await?;
        let mut stdin = process
            .stdin()
            .take()
            .ok_or_else(|| transfer_error("remote stdin is not piped".to_string()))?;
        tokio::io::copy(&mut file, &mut stdin)
            .await
            .map_err(|e| transfer_error(e.to_string()))?;
        stdin
            .shutdown()
            .await
            .map_err(|e| transfer_error(e.to_string()))?;
        drop(stdin);
        let status = process.wait().await?;
        if !status.success() {
            return Err(transfer_error(format!("remote cat exited with {}", status)));
        }
        Ok(())
    }

    async fn download(&self, remote: &str, local: &Path) -> Result<(), RubyfyError> {
        let transfer_error = |reason: String| RubyfyError::Transfer {
            path: remote.to_owned(),
            reason,
        };
        let mut cmd = self
            .session
            .raw_command(format!("cat {}", shell_words::quote(remote)));
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null());
        let mut process = cmd.spawn().await?;
        let mut stdout = process
            .stdout()
            .take()
            .ok_or_else(|| transfer_error("remote stdout is not piped".to_string()))?;
        let mut file = tokio::fs::File::create(local)
            .await
            .map_err(|e| transfer_error(e.to_string()))?;
        tokio::io::copy(&mut stdout, &mut file)
            .await
            .map_err(|e| transfer_error(e.to_string()))?;
        file.flush().await.map_err(|e| transfer_error(e.to_string()))?;
        let status = process.wait().await?;
        if !status.success() {
            return Err(transfer_error(format!("remote cat exited with {}", status)));
        }
        Ok(())
    }

    fn close(self: Box<Self>) -> BoxFuture<'static, Result<(), RubyfyError>> {
        Box::pin(async move { Ok(self.session.close().await?) })
    }
}

/// Forwards `stream` to `output` line by line. Lines end at either `\r` or `\n`
/// so progress bars show up too. Invalid UTF-8 is replaced.
async fn stream<B: AsyncRead + Unpin>(
    stream: B,
    output: OutputSink<'_>,
) -> std::io::Result<()> {
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::with_capacity(reader.buffer().len());
    loop {
        read_until2(&mut reader, b'\r', b'\n', &mut buf).await?;
        // An empty buffer means that EOF was reached.
        if buf.is_empty() {
            return Ok(());
        }
        let line = match buf.last() {
            Some(b'\r') | Some(b'\n') => &buf[..buf.len() - 1],
            _ => &buf[..],
        };
        if !line.is_empty() {
            output(&String::from_utf8_lossy(line));
        }
        buf.clear();
    }
}

async fn read_until2<B: AsyncRead + Unpin>(
    reader: &mut BufReader<B>,
    delimiter1: u8,
    delimiter2: u8,
    buf: &mut Vec<u8>,
) -> std::io::Result<()> {
    loop {
        let (done, used) = {
            let available = reader.fill_buf().await?;
            if let Some(i) = memchr::memchr2(delimiter1, delimiter2, available) {
                buf.extend_from_slice(&available[..=i]);
                (true, i + 1)
            } else {
                buf.extend_from_slice(available);
                (false, available.len())
            }
        };
        reader.consume(used);
        if done || used == 0 {
            return Ok(());
        }
    }
}
