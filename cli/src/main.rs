//! ftpsync - Command-line interface for the FTP sync engine.
//!
//! Reads the JSON configuration, runs exactly one operation and exits with a
//! status that tells initialization, connection and operation failures apart.
//! Progress goes to stderr through `env_logger` and, unless disabled, is
//! appended to a timestamped log file.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use clap::{ArgAction, Parser, Subcommand};
use engine::{
    job, ChecksumAlgorithm, Config, EngineError, Event, EventSink, FailureClass, LogSink,
    Operation, RunReport, SessionContext,
};
use log::LevelFilter;

const EXIT_INITIALIZATION: i32 = 1;
const EXIT_CONNECTION: i32 = 3;
const EXIT_OPERATION: i32 = 4;

/// ftpsync - mirror a local folder to an FTP server and back
#[derive(Parser, Debug)]
#[command(name = "ftpsync")]
#[command(version)]
#[command(about = "Upload, download and clean up directory trees over FTP")]
struct Args {
    /// Configuration file; by default config.json, .ftp/config.json and
    /// ftp_config.json are tried in the current directory
    #[arg(long, short, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Append log lines to this file
    #[arg(long, global = true, value_name = "PATH", default_value = "ftp.log")]
    log_file: PathBuf,

    /// Do not write a log file
    #[arg(long, global = true)]
    no_log_file: bool,

    /// Write the run report as JSON to this file
    #[arg(long, global = true, value_name = "PATH")]
    report: Option<PathBuf>,

    /// More output: -v for every step, -vv for the FTP conversation
    #[arg(long, short, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
enum Command {
    /// Connect and log in, then disconnect
    Test,
    /// List the remote directory
    List,
    /// Download one file from the remote directory
    Download { name: String },
    /// Download the whole remote tree into the local directory
    DownloadAll,
    /// Upload one file from the local directory
    Upload {
        name: String,

        /// Read the file back and compare checksums
        #[arg(long)]
        verify: bool,

        /// Checksum algorithm for verification: md5, sha256, blake3
        #[arg(long, value_name = "ALGORITHM", default_value = "sha256", requires = "verify")]
        hash: ChecksumAlgorithm,
    },
    /// Upload the whole local tree, stopping at the first failure
    UploadAll,
    /// Delete one remote file
    Delete { name: String },
    /// Delete everything under the remote directory, keeping the directory
    DeleteAll,
    /// Create a remote directory, including missing parents
    Mkdir { name: String },
    /// Delete a remote directory and everything in it
    Rmdir { name: String },
}

impl Command {
    fn operation(&self) -> Operation {
        match self {
            Command::Test => Operation::Test,
            Command::List => Operation::List,
            Command::Download { name } => Operation::Download { name: name.clone() },
            Command::DownloadAll => Operation::DownloadAll,
            Command::Upload { name, verify, hash } => Operation::Upload {
                name: name.clone(),
                verify: verify.then_some(*hash),
            },
            Command::UploadAll => Operation::UploadAll,
            Command::Delete { name } => Operation::Delete { name: name.clone() },
            Command::DeleteAll => Operation::DeleteAll,
            Command::Mkdir { name } => Operation::Mkdir { name: name.clone() },
            Command::Rmdir { name } => Operation::Rmdir { name: name.clone() },
        }
    }
}

/// Forwards events to the `log` facade and appends them to the log file.
struct CliSink {
    console: LogSink,
    file: Mutex<Option<File>>,
    file_level: LevelFilter,
}

impl CliSink {
    fn new(log_file: Option<&Path>, verbose: u8) -> Self {
        let file = log_file.and_then(|path| {
            match OpenOptions::new().create(true).append(true).open(path) {
                Ok(file) => Some(file),
                Err(e) => {
                    log::warn!("cannot open log file {}: {}", path.display(), e);
                    None
                }
            }
        });
        CliSink {
            console: LogSink,
            file: Mutex::new(file),
            file_level: level_for(verbose),
        }
    }
}

impl EventSink for CliSink {
    fn emit(&self, event: &Event) {
        self.console.emit(event);

        if event.level() > self.file_level {
            return;
        }
        let mut guard = match self.file.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(file) = guard.as_mut() {
            let stamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");
            let _ = writeln!(file, "[{}] [{}] {}", stamp, event.level(), event);
        }
    }
}

fn level_for(verbose: u8) -> LevelFilter {
    match verbose {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

fn init_logging(verbose: u8) {
    let default = level_for(verbose).to_string().to_lowercase();
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default))
        .format_target(false)
        .try_init();
}

fn exit_code(class: FailureClass) -> i32 {
    match class {
        FailureClass::Initialization => EXIT_INITIALIZATION,
        FailureClass::Connection => EXIT_CONNECTION,
        FailureClass::Operation => EXIT_OPERATION,
    }
}

fn load_config(args: &Args) -> Result<Config, EngineError> {
    match &args.config {
        Some(path) => Config::load(path),
        None => {
            let (config, path) = Config::discover(Path::new("."))?;
            log::debug!("using configuration {}", path.display());
            Ok(config)
        }
    }
}

/// Parse and validate command-line arguments, then run the operation
fn main() {
    let args = Args::parse();
    init_logging(args.verbose);

    let status = match run_cli(&args) {
        Ok(_) => 0,
        Err(e) => {
            log::error!("{}", e);
            exit_code(e.failure_class())
        }
    };

    std::process::exit(status);
}

fn write_report(report: &RunReport, path: &Path) {
    let written = report
        .to_json()
        .map_err(|e| e.to_string())
        .and_then(|json| std::fs::write(path, json).map_err(|e| e.to_string()));
    if let Err(e) = written {
        log::warn!("cannot write report {}: {}", path.display(), e);
    }
}

/// Main CLI logic - separated for testability
fn run_cli(args: &Args) -> Result<RunReport, EngineError> {
    let operation = args.command.operation();
    operation.validate()?;
    let config = load_config(args)?;

    let log_file = (!args.no_log_file).then_some(args.log_file.as_path());
    let sink = Arc::new(CliSink::new(log_file, args.verbose));
    let ctx = SessionContext::new(&config, sink);

    let mut report = job::run(&ctx, &operation)?;
    log::debug!("run {} finished", report.id);
    if let Some(path) = &args.report {
        write_report(&report, path);
    }
    if let Some(listing) = &report.listing {
        print!("{}", listing);
        let _ = std::io::stdout().flush();
    }
    match report.error.take() {
        Some(err) => Err(err),
        None => Ok(report),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn args_for(command: Command, config: Option<PathBuf>) -> Args {
        Args {
            config,
            log_file: PathBuf::from("ftp.log"),
            no_log_file: true,
            report: None,
            verbose: 0,
            command,
        }
    }

    fn write_config(dir: &Path, port: u16) -> PathBuf {
        let path = dir.join("config.json");
        let json = format!(
            r#"{{"host":"127.0.0.1","port":{},"username":"u","password":"p",
                "remotePath":"/site","timeout":2}}"#,
            port
        );
        std::fs::write(&path, json).expect("Failed to write config");
        path
    }

    fn closed_port() -> u16 {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
        listener.local_addr().expect("addr").port()
    }

    #[test]
    fn test_parse_subcommands() {
        let args = Args::try_parse_from(["ftpsync", "download-all"]).expect("parse");
        assert_eq!(args.command.operation(), Operation::DownloadAll);

        let args = Args::try_parse_from([
            "ftpsync", "upload", "index.html", "--verify", "--hash", "md5", "-vv",
        ])
        .expect("parse");
        assert_eq!(args.verbose, 2);
        assert_eq!(
            args.command.operation(),
            Operation::Upload {
                name: "index.html".to_string(),
                verify: Some(ChecksumAlgorithm::Md5),
            }
        );

        let args = Args::try_parse_from(["ftpsync", "upload", "a.txt"]).expect("parse");
        assert_eq!(
            args.command.operation(),
            Operation::Upload {
                name: "a.txt".to_string(),
                verify: None,
            }
        );
    }

    #[test]
    fn test_parse_rejects_unknown_verb_and_missing_name() {
        assert!(Args::try_parse_from(["ftpsync", "sync"]).is_err());
        assert!(Args::try_parse_from(["ftpsync", "delete"]).is_err());
        assert!(Args::try_parse_from(["ftpsync", "upload", "a", "--hash", "crc32"]).is_err());
    }

    #[test]
    fn test_exit_codes_are_distinct() {
        let codes = [
            exit_code(FailureClass::Initialization),
            exit_code(FailureClass::Connection),
            exit_code(FailureClass::Operation),
        ];
        assert!(codes.iter().all(|&c| c != 0 && c != 2));
        assert_ne!(codes[0], codes[1]);
        assert_ne!(codes[1], codes[2]);
        assert_ne!(codes[0], codes[2]);
    }

    #[test]
    fn test_cli_rejects_missing_config() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let args = args_for(Command::List, Some(dir.path().join("absent.json")));
        let err = run_cli(&args).expect_err("no config");
        assert_eq!(exit_code(err.failure_class()), EXIT_INITIALIZATION);
    }

    #[test]
    fn test_cli_rejects_invalid_name_before_connecting() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let config = write_config(dir.path(), closed_port());
        let args = args_for(
            Command::Delete {
                name: "../outside".to_string(),
            },
            Some(config),
        );
        let err = run_cli(&args).expect_err("invalid name");
        assert_eq!(exit_code(err.failure_class()), EXIT_INITIALIZATION);
    }

    #[test]
    fn test_cli_reports_connection_failure() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let config = write_config(dir.path(), closed_port());
        let args = args_for(Command::Test, Some(config));
        let err = run_cli(&args).expect_err("nothing listening");
        assert_eq!(exit_code(err.failure_class()), EXIT_CONNECTION);
    }

    #[test]
    fn test_parse_report_flag() {
        let args = Args::try_parse_from(["ftpsync", "delete-all", "--report", "run.json"])
            .expect("parse");
        assert_eq!(args.report, Some(PathBuf::from("run.json")));
    }

    #[test]
    fn test_write_report_file() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let path = dir.path().join("run.json");
        let mut report = RunReport::new("list");
        report.listing = Some("index.html\n".to_string());
        report.finish(None);

        write_report(&report, &path);

        let text = std::fs::read_to_string(&path).expect("Failed to read report");
        assert!(text.contains("\"operation\": \"list\""));
        assert!(text.contains(&report.id.to_string()));
    }

    #[test]
    fn test_log_file_lines_are_timestamped() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let log_path = dir.path().join("ftp.log");
        let sink = CliSink::new(Some(&log_path), 0);

        sink.emit(&Event::LoggedIn {
            username: "deploy".to_string(),
        });
        // below the file level at verbosity 0
        sink.emit(&Event::CommandSent {
            line: "NOOP".to_string(),
        });

        let text = std::fs::read_to_string(&log_path).expect("Failed to read log");
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with('['));
        assert!(lines[0].ends_with("[INFO] Logged in as deploy"));
    }
}
