//! Mirror - Command-line front end for the backup engine.
//!
//! Edits a saved backup specification and runs it, rendering progress on
//! stderr. The specification lives at `<home>/Mirror/DefaultFileSet` unless
//! `--spec` points elsewhere.

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::Instant;
use engine::{
    check_target, load_spec, model::measure_sources, save_spec, validate, BackupSpec,
    CancelHandle, CopyEngine, EngineError, EngineOptions, ObservedSpec, PersistError, ProgressSink,
    ProgressSnapshot, RunOutcome, SpecChange,
};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// Name given to a specification created on first use.
const DEFAULT_SPEC_NAME: &str = "DefaultFileSet";

/// Mirror - one-shot backups of a saved list of files and folders
#[derive(Parser, Debug)]
#[command(name = "mirror")]
#[command(version = "0.1.0")]
#[command(about = "Copy a saved list of files and folders into a new backup folder")]
struct Args {
    /// Backup specification file [default: <home>/Mirror/DefaultFileSet]
    #[arg(long, value_name = "FILE", global = true)]
    spec: Option<PathBuf>,

    /// Enable verbose output
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a new, empty specification
    New {
        /// Backup folder name [default: backup-<timestamp>]
        #[arg(long)]
        name: Option<String>,

        /// Directory the backup folder is created in
        #[arg(long, value_name = "DIR")]
        dest: PathBuf,

        /// Replace an existing specification file
        #[arg(long)]
        force: bool,
    },

    /// Add files or folders to the backup
    Add {
        #[arg(required = true, value_name = "PATH")]
        paths: Vec<PathBuf>,
    },

    /// Remove files or folders from the backup
    Remove {
        #[arg(required = true, value_name = "PATH")]
        paths: Vec<PathBuf>,
    },

    /// Change the backup folder name
    SetName { name: String },

    /// Change the directory the backup folder is created in
    SetDest {
        #[arg(value_name = "DIR")]
        dir: PathBuf,
    },

    /// Print the specification
    Show,

    /// Check that the specification is ready to run
    Validate,

    /// Run the backup
    Run {
        /// Copy buffer size in KiB
        #[arg(long, value_name = "KIB", default_value_t = 64)]
        chunk_kib: usize,
    },
}

/// How a successful command finished
#[derive(Debug, PartialEq, Eq)]
enum Finish {
    Clean,
    /// Backup ran but skipped files or was cancelled
    Incomplete,
}

/// CLI implementation of ProgressSink for displaying backup progress
struct CliProgress {
    verbose: bool,
    start_time: Instant,
    last_progress_update: Option<Instant>,
}

impl CliProgress {
    fn new(verbose: bool) -> Self {
        CliProgress {
            verbose,
            start_time: Instant::now(),
            last_progress_update: None,
        }
    }

    fn format_bytes(bytes: u64) -> String {
        const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
        let mut size = bytes as f64;
        let mut unit_idx = 0;

        while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
            size /= 1024.0;
            unit_idx += 1;
        }

        format!("{:.2} {}", size, UNITS[unit_idx])
    }

    fn format_duration(elapsed: std::time::Duration) -> String {
        let secs = elapsed.as_secs();
        let hours = secs / 3600;
        let mins = (secs % 3600) / 60;
        let secs = secs % 60;

        if hours > 0 {
            format!("{}h {}m {}s", hours, mins, secs)
        } else if mins > 0 {
            format!("{}m {}s", mins, secs)
        } else {
            format!("{}s", secs)
        }
    }

    fn print_progress_bar(percent: u32) -> String {
        let filled = (percent.min(100) / 5) as usize;
        let empty = 20 - filled;
        format!(
            "[{}{}] {}%",
            "=".repeat(filled),
            " ".repeat(empty),
            percent
        )
    }
}

impl ProgressSink for CliProgress {
    fn on_progress(&mut self, batch: &[ProgressSnapshot]) {
        for snapshot in batch {
            if snapshot.completed_files == 0 && snapshot.completed_bytes == 0 {
                eprintln!(
                    "Backing up {} in {} files",
                    Self::format_bytes(snapshot.total_bytes),
                    snapshot.total_files
                );
            }
            if let (true, Some(source)) = (self.verbose, &snapshot.source_copied) {
                eprintln!(
                    "\r[{:3}/{}] Copied: {}",
                    snapshot.completed_files,
                    snapshot.total_files,
                    source.display()
                );
            }
        }

        // Throttle progress updates to avoid spam (max once per 200ms)
        if let Some(last) = self.last_progress_update {
            if last.elapsed().as_millis() < 200 {
                return;
            }
        }
        self.last_progress_update = Some(Instant::now());

        let Some(latest) = batch.last() else {
            return;
        };
        eprint!(
            "\rProgress: {} | {}/{} | {}/{} files",
            Self::print_progress_bar(latest.percent_by_bytes() as u32),
            Self::format_bytes(latest.completed_bytes),
            Self::format_bytes(latest.total_bytes),
            latest.completed_files,
            latest.total_files
        );
        let _ = std::io::Write::flush(&mut std::io::stderr());
    }

    fn on_completion(&mut self, outcome: &RunOutcome) {
        eprintln!();
        let report = match outcome {
            RunOutcome::Completed(report) => {
                if report.is_clean() {
                    eprintln!("Backup complete!");
                } else {
                    eprintln!("Backup completed with errors.");
                }
                report
            }
            RunOutcome::Cancelled(report) => {
                eprintln!("Backup cancelled.");
                report
            }
            RunOutcome::Failed(e) => {
                eprintln!("Backup failed: {}", e);
                return;
            }
        };

        eprintln!("Backup folder: {}", report.target.display());
        eprintln!(
            "Summary: {} copied, {} failed",
            report.files_copied,
            report.failures.len()
        );
        eprintln!("Bytes copied: {}", Self::format_bytes(report.bytes_copied));
        eprintln!("Elapsed: {}", Self::format_duration(self.start_time.elapsed()));

        if !report.failures.is_empty() {
            eprintln!();
            eprintln!("Failed files:");
            for failure in &report.failures {
                eprintln!("  {}: {}", failure.path.display(), failure.message);
            }
        }
    }
}

/// Parse and validate command-line arguments, then run the command
fn main() {
    let args = Args::parse();
    init_logging(args.verbose);

    // Ctrl-C stops the backup after the file being copied
    let interrupt = CancelHandle::default();
    let handler_interrupt = interrupt.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        eprintln!("\nInterrupted, stopping after the current file...");
        handler_interrupt.cancel();
    }) {
        warn!(error = %e, "Cannot install Ctrl-C handler");
    }

    // Exit code tracking
    let exit_code = match run_cli(&args, &interrupt) {
        Ok(Finish::Clean) => 0,
        Ok(Finish::Incomplete) => 1,
        Err(msg) => {
            eprintln!("Error: {}", msg);
            2
        }
    };

    std::process::exit(exit_code);
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

/// `<home>/Mirror/DefaultFileSet`
fn default_spec_path() -> Result<PathBuf, String> {
    directories::BaseDirs::new()
        .map(|dirs| dirs.home_dir().join("Mirror").join(DEFAULT_SPEC_NAME))
        .ok_or_else(|| "Cannot determine the home directory; pass --spec".to_string())
}

/// Load the spec at `path`, or start a fresh one if there is none yet.
fn load_or_default(path: &Path) -> Result<BackupSpec, String> {
    match load_spec(path) {
        Ok(spec) => Ok(spec),
        Err(PersistError::NotFound { .. }) => {
            let mut spec = BackupSpec::new();
            spec.set_name(DEFAULT_SPEC_NAME).map_err(|e| e.to_string())?;
            Ok(spec)
        }
        Err(e) => Err(e.to_string()),
    }
}

/// Main CLI logic - separated for testability
///
/// `interrupt` cancels a backup started by `run`.
fn run_cli(args: &Args, interrupt: &CancelHandle) -> Result<Finish, String> {
    let spec_path = match &args.spec {
        Some(path) => path.clone(),
        None => default_spec_path()?,
    };
    debug!(spec = %spec_path.display(), command = ?args.command, "Dispatching command");

    match &args.command {
        Command::New { name, dest, force } => {
            if spec_path.exists() && !force {
                return Err(format!(
                    "Specification already exists: {} (use --force to replace it)",
                    spec_path.display()
                ));
            }
            let name = name.clone().unwrap_or_else(|| {
                chrono::Local::now().format("backup-%Y%m%d-%H%M%S").to_string()
            });
            let spec = BackupSpec::with_name_and_destination(&name, dest).map_err(|e| e.to_string())?;
            save_spec(&spec, &spec_path).map_err(|e| e.to_string())?;
            eprintln!("Created {}", spec_path.display());
            Ok(Finish::Clean)
        }
        Command::Add { paths } => edit_spec(&spec_path, |observed| {
            for path in paths {
                if !observed.add_source(path).map_err(|e| e.to_string())? {
                    eprintln!("Already included: {}", path.display());
                }
            }
            Ok(())
        }),
        Command::Remove { paths } => edit_spec(&spec_path, |observed| {
            for path in paths {
                observed.remove_source(path).map_err(|e| e.to_string())?;
            }
            Ok(())
        }),
        Command::SetName { name } => edit_spec(&spec_path, |observed| {
            observed.set_name(name).map_err(|e| e.to_string())
        }),
        Command::SetDest { dir } => edit_spec(&spec_path, |observed| {
            observed.set_destination(dir).map_err(|e| e.to_string())
        }),
        Command::Show => {
            let spec = load_or_default(&spec_path)?;
            print!("{}", describe_spec(&spec));
            Ok(Finish::Clean)
        }
        Command::Validate => {
            let spec = load_or_default(&spec_path)?;
            let target = preflight(&spec)?;
            eprintln!("Ready: backup will be written to {}", target.display());
            Ok(Finish::Clean)
        }
        Command::Run { chunk_kib } => {
            let spec = load_or_default(&spec_path)?;
            preflight(&spec)?;

            let options = EngineOptions {
                chunk_size: (*chunk_kib).max(1) * 1024,
                ..EngineOptions::default()
            };
            let mut engine = CopyEngine::with_options(&spec, options)
                .map_err(|e| e.to_string())?
                .with_cancel_handle(interrupt.clone());
            info!(sources = spec.len(), chunk_kib, "Starting backup");
            let mut progress = CliProgress::new(args.verbose);

            match engine.run(&mut progress) {
                RunOutcome::Completed(report) if report.is_clean() => Ok(Finish::Clean),
                RunOutcome::Completed(_) | RunOutcome::Cancelled(_) => Ok(Finish::Incomplete),
                RunOutcome::Failed(e) => Err(describe_engine_error(&e)),
            }
        }
    }
}

/// Apply `edit` to the saved spec, echo what changed, and save it back.
fn edit_spec<F>(spec_path: &Path, edit: F) -> Result<Finish, String>
where
    F: FnOnce(&mut ObservedSpec) -> Result<(), String>,
{
    let mut observed = ObservedSpec::new(load_or_default(spec_path)?);
    let changes = observed.subscribe();

    // Nothing is saved unless every edit succeeds
    edit(&mut observed)?;

    for change in changes.try_iter() {
        match change {
            SpecChange::SourceAdded { path, .. } => eprintln!("+ {}", path.display()),
            SpecChange::SourceRemoved { path, .. } => eprintln!("- {}", path.display()),
            SpecChange::NameChanged(name) => eprintln!("Name: {}", name),
            SpecChange::DestinationChanged(dir) => eprintln!("Destination: {}", dir.display()),
            SpecChange::Replaced => {}
        }
    }

    save_spec(observed.spec(), spec_path).map_err(|e| e.to_string())?;
    Ok(Finish::Clean)
}

/// Validation problems come back as one message; destination problems are reported separately.
fn preflight(spec: &BackupSpec) -> Result<PathBuf, String> {
    validate(Some(spec)).map_err(|e| format!("Backup is not ready:\n{}", e))?;
    check_target(spec).map_err(|e| describe_engine_error(&e))
}

fn describe_engine_error(e: &EngineError) -> String {
    match e {
        EngineError::DestinationConflict { path } => format!(
            "A backup named '{}' already exists in this destination ({}). Choose a different name.",
            path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default(),
            path.display()
        ),
        EngineError::DestinationNotWritable { path, .. } => format!(
            "Cannot write to {}. Choose a different destination.",
            path.display()
        ),
        other => other.to_string(),
    }
}

fn describe_spec(spec: &BackupSpec) -> String {
    let mut out = String::new();
    out.push_str(&format!("Name:        {}\n", spec.name().unwrap_or("(none)")));
    out.push_str(&format!(
        "Destination: {}\n",
        spec.destination()
            .map(|d| d.display().to_string())
            .unwrap_or_else(|| "(none)".to_string())
    ));
    if let Some(target) = spec.target() {
        out.push_str(&format!("Backup to:   {}\n", target.display()));
    }
    out.push_str(&format!("Sources ({}):\n", spec.len()));
    for entry in spec.sources() {
        out.push_str(&format!(
            "  {:>12}  {}\n",
            CliProgress::format_bytes(entry.size),
            entry.path.display()
        ));
    }
    out.push_str(&format!(
        "Total: {} when added, {} now\n",
        CliProgress::format_bytes(spec.total_bytes()),
        CliProgress::format_bytes(measure_sources(spec))
    ));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    struct Workspace {
        _root: TempDir,
        spec: PathBuf,
        src: PathBuf,
        dst: PathBuf,
    }

    fn workspace() -> Workspace {
        let root = TempDir::new().expect("Failed to create temp dir");
        let base = std::fs::canonicalize(root.path()).expect("canonicalize");
        let src = base.join("src");
        let dst = base.join("dst");
        std::fs::create_dir(&src).expect("Failed to create src");
        std::fs::create_dir(&dst).expect("Failed to create dst");
        Workspace {
            spec: base.join("config").join("spec.json"),
            _root: root,
            src,
            dst,
        }
    }

    fn args(ws: &Workspace, command: Command) -> Args {
        Args {
            spec: Some(ws.spec.clone()),
            verbose: false,
            command,
        }
    }

    fn run(args: &Args) -> Result<Finish, String> {
        run_cli(args, &CancelHandle::default())
    }

    fn new_spec(ws: &Workspace, name: &str) {
        let result = run(&args(
            ws,
            Command::New {
                name: Some(name.to_string()),
                dest: ws.dst.clone(),
                force: false,
            },
        ));
        assert_eq!(result, Ok(Finish::Clean));
    }

    #[test]
    fn test_cli_new_add_run() {
        let ws = workspace();
        let file = ws.src.join("test.txt");
        std::fs::write(&file, "hello").expect("Failed to write file");

        new_spec(&ws, "backup");
        let added = run(&args(&ws, Command::Add { paths: vec![file.clone()] }));
        assert_eq!(added, Ok(Finish::Clean));

        let result = run(&args(&ws, Command::Run { chunk_kib: 64 }));
        assert_eq!(result, Ok(Finish::Clean), "CLI should succeed with a valid spec");

        let relative = file.strip_prefix("/").unwrap_or(&file);
        let copied = ws.dst.join("backup").join(relative);
        assert_eq!(std::fs::read_to_string(copied).expect("read copy"), "hello");
    }

    #[test]
    fn test_cli_interrupted_run_is_incomplete() {
        let ws = workspace();
        let file = ws.src.join("test.txt");
        std::fs::write(&file, "hello").expect("Failed to write file");
        new_spec(&ws, "backup");
        run(&args(&ws, Command::Add { paths: vec![file.clone()] })).expect("add");

        let interrupt = CancelHandle::default();
        interrupt.cancel();
        let result = run_cli(&args(&ws, Command::Run { chunk_kib: 64 }), &interrupt);
        assert_eq!(result, Ok(Finish::Incomplete));

        let relative = file.strip_prefix("/").unwrap_or(&file);
        assert!(!ws.dst.join("backup").join(relative).exists());
    }

    #[test]
    fn test_cli_run_rejects_incomplete_spec() {
        let ws = workspace();
        let mut spec = BackupSpec::new();
        spec.set_destination(&ws.dst).expect("destination");
        save_spec(&spec, &ws.spec).expect("save");

        let result = run(&args(&ws, Command::Run { chunk_kib: 64 }));
        let message = result.expect_err("CLI should reject a spec with no sources or name");
        assert!(message.contains("no files"));
        assert!(message.contains("no name"));
    }

    #[test]
    fn test_cli_run_reports_existing_backup() {
        let ws = workspace();
        let file = ws.src.join("test.txt");
        std::fs::write(&file, "hello").expect("Failed to write file");
        new_spec(&ws, "backup");
        run(&args(&ws, Command::Add { paths: vec![file] })).expect("add");
        std::fs::create_dir(ws.dst.join("backup")).expect("pre-create target");

        let message = run(&args(&ws, Command::Validate)).expect_err("conflict");
        assert!(message.contains("already exists"));
        let message = run(&args(&ws, Command::Run { chunk_kib: 64 })).expect_err("conflict");
        assert!(message.contains("already exists"));
    }

    #[test]
    fn test_cli_add_rejects_missing_path() {
        let ws = workspace();
        new_spec(&ws, "backup");

        let result = run(&args(
            &ws,
            Command::Add {
                paths: vec![ws.src.join("missing.txt")],
            },
        ));
        assert!(result.is_err(), "CLI should reject a missing source");
        assert!(load_spec(&ws.spec).expect("load").is_empty());
    }

    #[test]
    fn test_cli_remove_absent_path_fails() {
        let ws = workspace();
        new_spec(&ws, "backup");

        let result = run(&args(
            &ws,
            Command::Remove {
                paths: vec![ws.src.join("never-added.txt")],
            },
        ));
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_set_name_and_dest() {
        let ws = workspace();
        new_spec(&ws, "backup");
        let other = ws.src.clone();

        run(&args(&ws, Command::SetName { name: "weekly".to_string() })).expect("set name");
        run(&args(&ws, Command::SetDest { dir: other.clone() })).expect("set dest");

        let spec = load_spec(&ws.spec).expect("load");
        assert_eq!(spec.name(), Some("weekly"));
        assert_eq!(spec.destination(), Some(other.as_path()));

        let result = run(&args(&ws, Command::SetName { name: "a/b".to_string() }));
        assert!(result.is_err(), "CLI should reject a name with separators");
    }

    #[test]
    fn test_cli_new_refuses_to_overwrite() {
        let ws = workspace();
        new_spec(&ws, "backup");

        let result = run(&args(
            &ws,
            Command::New {
                name: Some("other".to_string()),
                dest: ws.dst.clone(),
                force: false,
            },
        ));
        assert!(result.is_err());

        let forced = run(&args(
            &ws,
            Command::New {
                name: Some("other".to_string()),
                dest: ws.dst.clone(),
                force: true,
            },
        ));
        assert_eq!(forced, Ok(Finish::Clean));
        assert_eq!(load_spec(&ws.spec).expect("load").name(), Some("other"));
    }

    #[test]
    fn test_cli_show_without_saved_spec() {
        let ws = workspace();
        let result = run(&args(&ws, Command::Show));
        assert_eq!(result, Ok(Finish::Clean));
    }

    #[test]
    fn test_describe_spec_lists_sources() {
        let ws = workspace();
        let file = ws.src.join("test.txt");
        std::fs::write(&file, "hello").expect("Failed to write file");
        let mut spec = BackupSpec::with_name_and_destination("backup", &ws.dst).expect("spec");
        spec.add_source(&file).expect("add");

        let text = describe_spec(&spec);
        assert!(text.contains("Name:        backup"));
        assert!(text.contains(&file.display().to_string()));
        assert!(text.contains("Sources (1)"));
    }

    #[test]
    fn test_format_helpers() {
        assert_eq!(CliProgress::format_bytes(512), "512.00 B");
        assert_eq!(CliProgress::format_bytes(2048), "2.00 KB");
        assert_eq!(CliProgress::print_progress_bar(50), "[==========          ] 50%");
        assert_eq!(
            CliProgress::format_duration(std::time::Duration::from_secs(3725)),
            "1h 2m 5s"
        );
    }
}
