//! Severity-tagged log lines.
//!
//! Every line goes to the console. All lines except `ConsoleOnly` ones are also
//! written to a single output file shared by all workers. The file is truncated
//! by the first write of the process and appended to afterwards. Console and file
//! writes of one call happen under one lock, so lines from concurrent jobs never
//! interleave.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, IsTerminal, Write};
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};
use std::time::SystemTime;

use colored::{ColoredString, Colorize};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Verbose,
    Debug,
    Info,
    Warn,
    Error,
    /// Output of a remote command.
    Out,
    /// Never written to the output file.
    ConsoleOnly,
}

impl Severity {
    pub fn tag(&self) -> &'static str {
        match self {
            Severity::Verbose => "VERBOSE",
            Severity::Debug => "DEBUG",
            Severity::Info => "INFO",
            Severity::Warn => "WARN",
            Severity::Error => "ERROR",
            Severity::Out => "OUT",
            Severity::ConsoleOnly => "CONSOLE",
        }
    }

    fn paint(&self) -> ColoredString {
        let tag = self.tag();
        match self {
            Severity::Verbose | Severity::Debug => tag.dimmed(),
            Severity::Info => tag.green(),
            Severity::Warn => tag.yellow(),
            Severity::Error => tag.red().bold(),
            Severity::Out => tag.normal(),
            Severity::ConsoleOnly => tag.cyan(),
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.tag())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LogSettings {
    pub verbose: bool,
    /// Implies `verbose`.
    pub debug: bool,
    pub timestamp: bool,
    /// Color severity tags on the console.
    pub color: bool,
}

impl LogSettings {
    pub fn enabled(&self, severity: Severity) -> bool {
        match severity {
            Severity::Verbose => self.verbose || self.debug,
            Severity::Debug => self.debug,
            _ => true,
        }
    }
}

/// Formats one line without coloring. `timestamp` is prepended when given.
pub fn format_line(severity: Severity, message: &str, timestamp: Option<&str>) -> String {
    match timestamp {
        Some(timestamp) => format!("{}::{}::{}", timestamp, severity, message),
        None => format!("{}::{}", severity, message),
    }
}

/// Lazily opened output file.
struct OutFile {
    path: PathBuf,
    handle: Option<File>,
}

impl OutFile {
    fn write_line(&mut self, line: &str) -> io::Result<()> {
        if self.handle.is_none() {
            let file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&self.path)?;
            self.handle = Some(file);
        }
        match self.handle.as_mut() {
            Some(handle) => writeln!(handle, "{}", line),
            None => Ok(()),
        }
    }
}

struct Sinks {
    console: Box<dyn Write + Send>,
    outfile: Option<OutFile>,
}

pub struct Logger {
    settings: LogSettings,
    sinks: Mutex<Sinks>,
}

impl Logger {
    /// Logs to stdout and, if given, to `outfile`. Coloring is turned off when
    /// stdout is not a terminal.
    pub fn new(mut settings: LogSettings, outfile: Option<PathBuf>) -> Self {
        settings.color = settings.color && io::stdout().is_terminal();
        Self::with_console(settings, Box::new(io::stdout()), outfile)
    }

    pub fn with_console(
        settings: LogSettings,
        console: Box<dyn Write + Send>,
        outfile: Option<PathBuf>,
    ) -> Self {
        Self {
            settings,
            sinks: Mutex::new(Sinks {
                console,
                outfile: outfile.map(|path| OutFile { path, handle: None }),
            }),
        }
    }

    pub fn log(&self, severity: Severity, message: impl fmt::Display) {
        if !self.settings.enabled(severity) {
            return;
        }
        let timestamp = self
            .settings
            .timestamp
            .then(|| humantime::format_rfc3339_seconds(SystemTime::now()).to_string());
        let message = message.to_string();
        let line = format_line(severity, &message, timestamp.as_deref());

        let mut sinks = self.lock();
        let console_result = if self.settings.color {
            match &timestamp {
                Some(timestamp) => writeln!(
                    sinks.console,
                    "{}::{}::{}",
                    timestamp,
                    severity.paint(),
                    message
                ),
                None => writeln!(sinks.console, "{}::{}", severity.paint(), message),
            }
        } else {
            writeln!(sinks.console, "{}", line)
        };
        if let Err(e) = console_result.and_then(|_| sinks.console.flush()) {
            eprintln!("[rubyfy] Failed to write to console: {}", e);
        }
        if severity == Severity::ConsoleOnly {
            return;
        }
        if let Some(outfile) = sinks.outfile.as_mut() {
            if let Err(e) = outfile.write_line(&line) {
                eprintln!(
                    "[rubyfy] Failed to write to {}: {}",
                    outfile.path.display(),
                    e
                );
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Sinks> {
        // A panicking job must not take the log down with it.
        self.sinks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Captured {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    impl Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn logger(settings: LogSettings, outfile: Option<PathBuf>) -> (Logger, Captured) {
        let console = Captured::default();
        let logger = Logger::with_console(settings, Box::new(console.clone()), outfile);
        (logger, console)
    }

    #[test]
    fn test_format_line_is_deterministic() {
        let a = format_line(Severity::Warn, "web1::No job result", None);
        let b = format_line(Severity::Warn, "web1::No job result", None);
        assert_eq!(a, b);
        assert_eq!(a, "WARN::web1::No job result");
        assert_eq!(
            format_line(Severity::Info, "x", Some("2026-01-01T00:00:00Z")),
            "2026-01-01T00:00:00Z::INFO::x"
        );
    }

    #[test]
    fn test_verbose_and_debug_gating() {
        let (log, console) = logger(LogSettings::default(), None);
        log.log(Severity::Verbose, "v");
        log.log(Severity::Debug, "d");
        log.log(Severity::Info, "i");
        assert_eq!(console.text(), "INFO::i\n");

        let settings = LogSettings {
            verbose: true,
            ..Default::default()
        };
        let (log, console) = logger(settings, None);
        log.log(Severity::Verbose, "v");
        log.log(Severity::Debug, "d");
        assert_eq!(console.text(), "VERBOSE::v\n");
    }

    #[test]
    fn test_debug_implies_verbose() {
        let settings = LogSettings {
            debug: true,
            ..Default::default()
        };
        let (log, console) = logger(settings, None);
        log.log(Severity::Verbose, "v");
        log.log(Severity::Debug, "d");
        assert_eq!(console.text(), "VERBOSE::v\nDEBUG::d\n");
    }

    #[test]
    fn test_console_only_skips_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run");
        let (log, console) = logger(LogSettings::default(), Some(path.clone()));
        log.log(Severity::Out, "web1::hello");
        log.log(Severity::ConsoleOnly, "Wrote results");
        assert_eq!(console.text(), "OUT::web1::hello\nCONSOLE::Wrote results\n");
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "OUT::web1::hello\n");
    }

    #[test]
    fn test_first_write_truncates_then_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run");
        std::fs::write(&path, "stale line from last run\n").unwrap();

        let (log, _) = logger(LogSettings::default(), Some(path.clone()));
        // Nothing written yet, the old content is still there.
        assert!(std::fs::read_to_string(&path).unwrap().starts_with("stale"));
        log.log(Severity::Info, "one");
        log.log(Severity::Error, "two");
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "INFO::one\nERROR::two\n"
        );
    }

    #[test]
    fn test_timestamp_prefix() {
        let settings = LogSettings {
            timestamp: true,
            ..Default::default()
        };
        let (log, console) = logger(settings, None);
        log.log(Severity::Info, "hello");
        let text = console.text();
        let (stamp, rest) = text.split_once("::").unwrap();
        assert!(humantime::parse_rfc3339(stamp).is_ok(), "bad stamp {}", stamp);
        assert_eq!(rest, "INFO::hello\n");
    }

    #[test]
    fn test_concurrent_lines_do_not_interleave() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run");
        let (log, _) = logger(LogSettings::default(), Some(path.clone()));
        let log = Arc::new(log);
        let threads: Vec<_> = (0..8)
            .map(|t| {
                let log = Arc::clone(&log);
                std::thread::spawn(move || {
                    for i in 0..50 {
                        log.log(Severity::Out, format!("host{}::line {}", t, i));
                    }
                })
            })
            .collect();
        for thread in threads {
            thread.join().unwrap();
        }
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 400);
        assert!(content
            .lines()
            .all(|line| line.starts_with("OUT::host") && line.contains("::line ")));
    }
}
