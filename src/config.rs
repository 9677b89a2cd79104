//! Configuration for Rubyfy.
//!
//! Settings come from three layers. Command line flags win over the JSON config
//! file, which wins over the built-in defaults. The first layer that sets a key
//! decides its value.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use clap::Parser;
use serde::Deserialize;

use crate::error::RubyfyError;
use crate::job::JobSpec;
use crate::log::LogSettings;
use crate::serde::number_or_string;

const CONFIG_FILE_NAME: &str = "rubyfy.json";

const EXAMPLES: &str = "\
Examples:
  Run command \"hostname\" on server foo.example.com
      echo foo.example.com | rubyfy -c hostname

  Run command \"id\" as root on three servers, two at a time, logging to ./out/jobname
      echo {foo,bar,baz}.example.com | rubyfy -p 2 -r -c id -n jobname

  Upload script \"test.sh\", run it, and download /tmp/test afterwards to file foo.example.com
      echo foo.example.com | rubyfy -s test.sh -D /tmp/test

Hosts are read from standard input. A host is skipped if a file named
<host>.ignore exists in the current directory.";

#[derive(Parser, Debug, Default)]
#[command(version, about, after_help = EXAMPLES)]
pub struct Cli {
    /// Command to run remotely
    #[arg(long, short)]
    pub command: Option<String>,

    /// Login to remote server as a specific user [default: $USER]
    #[arg(long, short)]
    pub user: Option<String>,

    /// Run specified command as user root (via sudo)
    #[arg(long, short)]
    pub root: bool,

    /// Run the command in the background and don't wait for it
    #[arg(long, short)]
    pub background: bool,

    /// Only run command if file in path doesn't exist remotely
    #[arg(long, short = 'P')]
    pub precondition: Option<String>,

    /// Upload the script to the remote server and run it
    #[arg(long, short)]
    pub script: Option<PathBuf>,

    /// Arguments for --script
    #[arg(long, short = 'a', alias = "scriptarguments", allow_hyphen_values = true)]
    pub script_arguments: Option<String>,

    /// Download file from remote path after execution
    #[arg(long, short = 'D')]
    pub download: Option<String>,

    /// Amount of parallel SSH connections [default: 1]
    #[arg(long, short)]
    pub parallel: Option<usize>,

    /// Silent mode (don't log remote output)
    #[arg(long, short = 'S')]
    pub silent: bool,

    /// Enable verbose output
    #[arg(long, short)]
    pub verbose: bool,

    /// Enable debug output (implies verbose)
    #[arg(long, short)]
    pub debug: bool,

    /// Include timestamp in log output
    #[arg(long, short)]
    pub timestamp: bool,

    /// Directory to store output files [default: ./out]
    #[arg(long, short)]
    pub outdir: Option<PathBuf>,

    /// Job name, used as the output file name [default: $USER]
    #[arg(long, short)]
    pub name: Option<String>,

    /// Config file to use instead of ~/.rubyfy.json or ./rubyfy.json
    #[arg(long)]
    pub config: Option<PathBuf>,
}

/// Contents of a JSON config file. Keys mirror the long command line flags.
#[derive(Deserialize, Debug, Default, PartialEq)]
#[serde(default)]
pub struct FileConfig {
    pub command: Option<String>,
    pub user: Option<String>,
    pub root: Option<bool>,
    pub background: Option<bool>,
    pub precondition: Option<String>,
    pub script: Option<PathBuf>,
    #[serde(
        rename = "scriptarguments",
        alias = "script-arguments",
        alias = "script_arguments"
    )]
    pub script_arguments: Option<String>,
    pub download: Option<String>,
    #[serde(deserialize_with = "number_or_string")]
    pub parallel: Option<usize>,
    pub silent: Option<bool>,
    pub verbose: Option<bool>,
    pub debug: Option<bool>,
    pub timestamp: Option<bool>,
    pub outdir: Option<PathBuf>,
    pub name: Option<String>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self, RubyfyError> {
        let file = File::open(path)?;
        serde_json::from_reader(BufReader::new(file)).map_err(|source| RubyfyError::ConfigFile {
            path: path.to_owned(),
            source,
        })
    }
}

/// Returns the first config file that exists: `$HOME/.rubyfy.json`, then
/// `./rubyfy.json`.
pub fn discover_config_file(home: Option<&Path>, cwd: &Path) -> Option<PathBuf> {
    let home_config = home.map(|home| home.join(format!(".{}", CONFIG_FILE_NAME)));
    home_config
        .into_iter()
        .chain(std::iter::once(cwd.join(CONFIG_FILE_NAME)))
        .find(|path| path.is_file())
}

/// The name of the invoking local user.
pub fn current_user() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("LOGNAME"))
        .unwrap_or_else(|_| "root".to_string())
}

/// Fully resolved, read-only settings for one run.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub job: JobSpec,
    pub parallel: usize,
    pub silent: bool,
    pub verbose: bool,
    pub debug: bool,
    pub timestamp: bool,
    pub outdir: PathBuf,
    pub name: String,
}

/// A flag only counts as set when it was given.
fn flag(cli: bool, file: Option<bool>) -> bool {
    cli.then_some(true).or(file).unwrap_or(false)
}

impl Config {
    /// Merges the layers. `current_user` backs both the login user and the
    /// output file name.
    pub fn resolve(cli: Cli, file: FileConfig, current_user: &str) -> Result<Self, RubyfyError> {
        let job = JobSpec {
            user: cli
                .user
                .or(file.user)
                .unwrap_or_else(|| current_user.to_owned()),
            command: cli.command.or(file.command),
            script: cli.script.or(file.script),
            script_arguments: cli.script_arguments.or(file.script_arguments),
            precondition: cli.precondition.or(file.precondition),
            root: flag(cli.root, file.root),
            background: flag(cli.background, file.background),
            download: cli.download.or(file.download),
        };
        if job.command.is_none() && job.script.is_none() {
            return Err(RubyfyError::Config(
                "either --command or --script is required".to_string(),
            ));
        }

        let parallel = cli.parallel.or(file.parallel).unwrap_or(1);
        if parallel == 0 {
            return Err(RubyfyError::Config(
                "--parallel must be at least 1".to_string(),
            ));
        }

        let debug = flag(cli.debug, file.debug);
        Ok(Self {
            job,
            parallel,
            silent: flag(cli.silent, file.silent),
            verbose: debug || flag(cli.verbose, file.verbose),
            debug,
            timestamp: flag(cli.timestamp, file.timestamp),
            outdir: cli
                .outdir
                .or(file.outdir)
                .unwrap_or_else(|| PathBuf::from("./out")),
            name: cli
                .name
                .or(file.name)
                .unwrap_or_else(|| current_user.to_owned()),
        })
    }

    /// Reads the config file named on the command line, or the first one
    /// discovered, and merges it under the command line flags.
    pub fn load(cli: Cli) -> Result<(Self, Option<PathBuf>), RubyfyError> {
        let path = match &cli.config {
            Some(path) => Some(path.clone()),
            None => {
                let home = std::env::var_os("HOME").map(PathBuf::from);
                discover_config_file(home.as_deref(), Path::new("."))
            }
        };
        let file = match &path {
            Some(path) => FileConfig::load(path)?,
            None => FileConfig::default(),
        };
        let config = Self::resolve(cli, file, &current_user())?;
        Ok((config, path))
    }

    pub fn log_settings(&self) -> LogSettings {
        LogSettings {
            verbose: self.verbose,
            debug: self.debug,
            timestamp: self.timestamp,
            color: true,
        }
    }

    pub fn outfile(&self) -> PathBuf {
        self.outdir.join(&self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("rubyfy").chain(args.iter().copied())).unwrap()
    }

    fn file(json: &str) -> FileConfig {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_user_precedence() {
        let resolved =
            Config::resolve(cli(&["-c", "id", "-u", "alice"]), file(r#"{"user": "bob"}"#), "carol")
                .unwrap();
        assert_eq!(resolved.job.user, "alice");

        let resolved =
            Config::resolve(cli(&["-c", "id"]), file(r#"{"user": "bob"}"#), "carol").unwrap();
        assert_eq!(resolved.job.user, "bob");

        let resolved = Config::resolve(cli(&["-c", "id"]), file("{}"), "carol").unwrap();
        assert_eq!(resolved.job.user, "carol");
    }

    #[test]
    fn test_defaults() {
        let resolved = Config::resolve(cli(&["-c", "uptime"]), FileConfig::default(), "carol")
            .unwrap();
        assert_eq!(resolved.parallel, 1);
        assert_eq!(resolved.outdir, PathBuf::from("./out"));
        assert_eq!(resolved.name, "carol");
        assert_eq!(resolved.outfile(), PathBuf::from("./out/carol"));
        assert!(!resolved.job.root);
        assert!(!resolved.job.background);
        assert!(!resolved.silent && !resolved.verbose && !resolved.debug);
    }

    #[test]
    fn test_file_fills_unset_keys_only() {
        let file = file(
            r#"{
                "command": "hostname",
                "parallel": "4",
                "root": true,
                "scriptarguments": "--fast",
                "outdir": "/var/log/rubyfy",
                "name": "nightly"
            }"#,
        );
        let resolved = Config::resolve(cli(&["-c", "id", "-p", "2"]), file, "carol").unwrap();
        assert_eq!(resolved.job.command.as_deref(), Some("id"));
        assert_eq!(resolved.parallel, 2);
        assert!(resolved.job.root);
        assert_eq!(resolved.job.script_arguments.as_deref(), Some("--fast"));
        assert_eq!(resolved.outfile(), PathBuf::from("/var/log/rubyfy/nightly"));
    }

    #[test]
    fn test_false_in_file_is_a_value_not_a_gap() {
        let resolved =
            Config::resolve(cli(&["-c", "id", "-r"]), file(r#"{"root": false}"#), "u").unwrap();
        assert!(resolved.job.root);
        let resolved =
            Config::resolve(cli(&["-c", "id"]), file(r#"{"root": false}"#), "u").unwrap();
        assert!(!resolved.job.root);
    }

    #[test]
    fn test_debug_implies_verbose() {
        let resolved = Config::resolve(cli(&["-c", "id", "-d"]), FileConfig::default(), "u")
            .unwrap();
        assert!(resolved.debug && resolved.verbose);
        let resolved =
            Config::resolve(cli(&["-c", "id"]), file(r#"{"debug": true}"#), "u").unwrap();
        assert!(resolved.debug && resolved.verbose);
    }

    #[test]
    fn test_command_or_script_required() {
        let err = Config::resolve(cli(&["-u", "alice"]), FileConfig::default(), "u").unwrap_err();
        assert!(matches!(err, RubyfyError::Config(_)));

        let resolved = Config::resolve(
            cli(&["-s", "deploy.sh", "-a", "--dry-run"]),
            FileConfig::default(),
            "u",
        )
        .unwrap();
        assert_eq!(resolved.job.script, Some(PathBuf::from("deploy.sh")));
        assert_eq!(resolved.job.script_arguments.as_deref(), Some("--dry-run"));
    }

    #[test]
    fn test_zero_parallel_rejected() {
        let err = Config::resolve(cli(&["-c", "id", "-p", "0"]), FileConfig::default(), "u")
            .unwrap_err();
        assert!(matches!(err, RubyfyError::Config(_)));
    }

    #[test]
    fn test_long_flags() {
        let cli = cli(&[
            "--command",
            "id",
            "--precondition",
            "/etc/nologin",
            "--download",
            "/tmp/report",
            "--scriptarguments",
            "a b",
            "--background",
            "--silent",
            "--timestamp",
        ]);
        let resolved = Config::resolve(cli, FileConfig::default(), "u").unwrap();
        assert_eq!(resolved.job.precondition.as_deref(), Some("/etc/nologin"));
        assert_eq!(resolved.job.download.as_deref(), Some("/tmp/report"));
        assert_eq!(resolved.job.script_arguments.as_deref(), Some("a b"));
        assert!(resolved.job.background && resolved.silent && resolved.timestamp);
    }

    #[test]
    fn test_discover_prefers_home() {
        let home = tempfile::tempdir().unwrap();
        let cwd = tempfile::tempdir().unwrap();
        assert_eq!(discover_config_file(Some(home.path()), cwd.path()), None);

        std::fs::write(cwd.path().join("rubyfy.json"), "{}").unwrap();
        assert_eq!(
            discover_config_file(Some(home.path()), cwd.path()),
            Some(cwd.path().join("rubyfy.json"))
        );

        std::fs::write(home.path().join(".rubyfy.json"), "{}").unwrap();
        assert_eq!(
            discover_config_file(Some(home.path()), cwd.path()),
            Some(home.path().join(".rubyfy.json"))
        );
    }

    #[test]
    fn test_load_reports_bad_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rubyfy.json");
        std::fs::write(&path, "{ not json").unwrap();
        let err = FileConfig::load(&path).unwrap_err();
        assert!(matches!(err, RubyfyError::ConfigFile { .. }));
    }
}
