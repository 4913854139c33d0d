//! partcp - Partitioned Copy
//!
//! Drives the steps of a resumable sharded object copy from the command
//! line. Each subcommand is one bounded step; an external orchestrator (or
//! a shell loop) chains them and threads the JSON state between them.

use clap::{Parser, Subcommand, ValueEnum};
use indicatif::ProgressBar;
use partcopy::{
    ChunkingPolicy, CopyConfig, CopyJobState, CopyWorker, DEFAULT_MIN_PART_SIZE,
    Error as PartcopyError, ErrorCode, FsObjectStore, ObjectLocation, ObjectStore, ShardStats,
    StoreError, WorkerOutput, abort_copy_job, create_progress_bar, finalize_copy_job,
    join_worker_outputs, plan_shard, setup_copy_job,
};
use serde_json::{Value, json};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Exit code telling the orchestrator the step may be retried.
const EXIT_RETRYABLE: i32 = 75;

/// partcp - Resumable sharded object copy
///
/// Copies one object between buckets of a directory-backed object store in
/// independently resumable shards, verifying the composite content id
/// before committing.
///
/// Usage:
///   partcp setup SRC DST > job.json
///   partcp work --index I --state job.json --checkpoint shard-I.json
///   partcp finalize shard-*.json
#[derive(Parser, Debug)]
#[command(name = "partcp", version, about, long_about = None)]
struct Args {
    /// Root directory of the object store (one subdirectory per bucket)
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,

    /// Number of shards the copy is split into [default: 32; `work` reads it
    /// from the job state]
    #[arg(short = 'w', long, global = true)]
    workers: Option<u32>,

    /// Concurrent part copies per worker invocation
    #[arg(short = 'j', long, global = true, default_value = "8")]
    jobs: usize,

    /// Smallest part size in bytes
    #[arg(long, global = true, default_value_t = DEFAULT_MIN_PART_SIZE)]
    min_part_size: u64,

    /// Output format
    #[arg(long, global = true, value_enum, default_value = "human")]
    output: OutputMode,

    /// Disable progress bar and warnings
    #[arg(short = 'q', long, global = true)]
    quiet: bool,

    /// Verbose output
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    /// Do not fsync parts and objects before renaming them into place
    #[arg(long, global = true)]
    no_sync: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show the part plan and shard ranges for an object
    Plan {
        /// Object to plan for
        #[arg(required_unless_present = "size")]
        source: Option<ObjectLocation>,

        /// Plan for an object of this many bytes instead
        #[arg(long, conflicts_with = "source")]
        size: Option<u64>,
    },

    /// Capture the source, plan the parts and open the upload session
    Setup {
        /// Source object (BUCKET/KEY)
        source: ObjectLocation,

        /// Destination object (BUCKET/KEY)
        destination: ObjectLocation,

        /// Write the job state here instead of stdout
        #[arg(long, value_name = "FILE")]
        out: Option<PathBuf>,
    },

    /// Run one bounded invocation of a shard
    Work {
        /// Shard index in 0..workers
        #[arg(long)]
        index: u32,

        /// Job state or previous worker output ("-" for stdin)
        #[arg(long, value_name = "FILE")]
        state: PathBuf,

        /// Seconds until the invocation must return
        #[arg(long, value_name = "SECS", default_value = "900")]
        time_budget: u64,

        /// Stop submitting parts this many seconds before the budget runs out
        #[arg(long, value_name = "SECS", default_value = "10")]
        margin: u64,

        /// Persist every checkpoint here; resumes from it when it exists
        #[arg(long, value_name = "FILE")]
        checkpoint: Option<PathBuf>,

        /// Write the worker output here instead of stdout
        #[arg(long, value_name = "FILE")]
        out: Option<PathBuf>,
    },

    /// Verify the uploaded parts and commit the destination
    Finalize {
        /// Outputs of every shard
        #[arg(required = true)]
        states: Vec<PathBuf>,
    },

    /// Discard the upload session of a failed job
    Abort {
        /// Job state
        #[arg(long, value_name = "FILE")]
        state: PathBuf,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
enum OutputMode {
    Human,
    Json,
}

type CliResult<T> = std::result::Result<T, CliError>;

#[derive(Debug, Error)]
enum CliError {
    #[error("Failed to read {path}: {source}")]
    ReadInput { path: PathBuf, source: io::Error },

    #[error("Invalid job state in {path}: {source}")]
    ParseState {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("{path} does not carry the full job state")]
    NotAJobState { path: PathBuf },

    #[error("Failed to write {path}: {source}")]
    WriteOutput { path: PathBuf, source: io::Error },

    #[error("{step} failed: {source}")]
    Job {
        step: &'static str,
        source: PartcopyError,
    },

    #[error("Failed to serialize JSON output: {source}")]
    JsonSerialize { source: serde_json::Error },
}

impl CliError {
    fn code(&self) -> ErrorCode {
        match self {
            Self::ReadInput { .. } | Self::ParseState { .. } | Self::NotAJobState { .. } => {
                ErrorCode::InvalidInput
            }
            Self::WriteOutput { .. } | Self::JsonSerialize { .. } => ErrorCode::Internal,
            Self::Job { source, .. } => source.code(),
        }
    }

    fn is_retryable(&self) -> bool {
        match self {
            Self::Job { source, .. } => source.is_retryable(),
            _ => false,
        }
    }

    fn to_json_value(&self) -> Value {
        json!({
            "schema_version": "1.0",
            "error": {
                "code": self.code().as_str(),
                "message": self.to_string(),
                "retryable": self.is_retryable(),
            },
        })
    }
}

fn job_error(step: &'static str) -> impl FnOnce(PartcopyError) -> CliError {
    move |source| CliError::Job { step, source }
}

fn exit_code_for(error: &CliError) -> i32 {
    if error.is_retryable() {
        return EXIT_RETRYABLE;
    }
    match error.code() {
        ErrorCode::InvalidInput => 2,
        _ => 1,
    }
}

fn main() {
    let args = Args::parse();
    if let Err(error) = run(&args) {
        if args.output == OutputMode::Json {
            match serde_json::to_string(&error.to_json_value()) {
                Ok(line) => println!("{line}"),
                Err(_) => eprintln!("error[{}]: {}", error.code().as_str(), error),
            }
        } else {
            eprintln!("error[{}]: {}", error.code().as_str(), error);
            if error.is_retryable() {
                eprintln!("The step can be retried.");
            }
        }
        std::process::exit(exit_code_for(&error));
    }
}

fn run(args: &Args) -> CliResult<()> {
    let chunking = ChunkingPolicy::default().with_min_part_size(args.min_part_size);
    let mut store = FsObjectStore::new(&args.root).with_chunking(chunking);
    if args.no_sync {
        store = store.without_fsync();
    }

    let mut config = CopyConfig::default()
        .with_concurrency(args.jobs)
        .with_chunking(chunking);
    if let Some(workers) = args.workers {
        config = config.with_worker_count(workers);
    }
    if !args.quiet {
        config = config.with_warn_handler(|msg| eprintln!("warning: {msg}"));
    }
    if args.verbose {
        config = config.with_verbose_handler(|msg| eprintln!("{msg}"));
    }

    match &args.command {
        Command::Plan { source, size } => cmd_plan(args, &store, &config, source.as_ref(), *size),
        Command::Setup {
            source,
            destination,
            out,
        } => {
            let state = setup_copy_job(&store, source, destination, &config)
                .map_err(job_error("setup"))?;
            if args.output == OutputMode::Human && args.verbose {
                eprintln!(
                    "Set up copy of {} to {}: {} in {} parts of {}",
                    state.source,
                    state.destination,
                    format_bytes(state.total_size),
                    state.part_count,
                    format_bytes(state.part_size)
                );
            }
            emit_payload(args, "setup", &state, out.as_deref(), json!({}))
        }
        Command::Work {
            index,
            state,
            time_budget,
            margin,
            checkpoint,
            out,
        } => {
            let config = config.with_deadline_margin(Duration::from_secs(*margin));
            let deadline = Instant::now() + Duration::from_secs(*time_budget);
            cmd_work(
                args,
                &store,
                &config,
                *index,
                state,
                deadline,
                checkpoint.as_deref(),
                out.as_deref(),
            )
        }
        Command::Finalize { states } => cmd_finalize(args, &store, states),
        Command::Abort { state } => {
            let state = read_job_state(state)?;
            abort_copy_job(&store, &state).map_err(job_error("abort"))?;
            match args.output {
                OutputMode::Human => {
                    if !args.quiet {
                        eprintln!("Aborted upload to {}", state.destination);
                    }
                    Ok(())
                }
                OutputMode::Json => print_json_value(&json!({
                    "schema_version": "1.0",
                    "mode": "abort",
                    "destination": state.destination.to_string(),
                })),
            }
        }
    }
}

fn cmd_plan(
    args: &Args,
    store: &FsObjectStore,
    config: &CopyConfig,
    source: Option<&ObjectLocation>,
    size: Option<u64>,
) -> CliResult<()> {
    let total_size = match (source, size) {
        (_, Some(size)) => size,
        (Some(source), None) => {
            store
                .head_object(source)
                .map_err(|e| match e {
                    StoreError::NotFound(location) => {
                        PartcopyError::SourceNotFound(location)
                    }
                    other => PartcopyError::Store(other),
                })
                .map_err(job_error("plan"))?
                .size
        }
        (None, None) => 0,
    };
    let plan = config.chunking.plan(total_size).map_err(job_error("plan"))?;

    let mut shards = Vec::with_capacity(config.worker_count as usize);
    for index in 0..config.worker_count {
        let shard = plan_shard(plan.part_count, index, config.worker_count)
            .map_err(job_error("plan"))?;
        shards.push((index, shard));
    }

    match args.output {
        OutputMode::Human => {
            println!(
                "{} in {} parts of {}",
                format_bytes(plan.total_size),
                plan.part_count,
                format_bytes(plan.part_size)
            );
            for (index, shard) in &shards {
                if shard.is_complete() {
                    println!("  shard {index}: (empty)");
                } else {
                    println!(
                        "  shard {index}: parts {}-{}",
                        shard.next_part, shard.last_part
                    );
                }
            }
            Ok(())
        }
        OutputMode::Json => print_json_value(&json!({
            "schema_version": "1.0",
            "mode": "plan",
            "total_size": plan.total_size,
            "part_size": plan.part_size,
            "part_count": plan.part_count,
            "multipart": plan.is_multipart(),
            "shards": shards
                .iter()
                .map(|(index, shard)| json!({
                    "index": index,
                    "first_part": shard.next_part,
                    "last_part": shard.last_part,
                    "parts": shard.remaining(),
                }))
                .collect::<Vec<Value>>(),
        })),
    }
}

#[allow(clippy::too_many_arguments)]
fn cmd_work(
    args: &Args,
    store: &FsObjectStore,
    config: &CopyConfig,
    index: u32,
    state_path: &Path,
    deadline: Instant,
    checkpoint: Option<&Path>,
    out: Option<&Path>,
) -> CliResult<()> {
    // A checkpoint left by an earlier invocation wins over the input state.
    let state = match checkpoint.filter(|path| path.exists()) {
        Some(path) => read_job_state(path)?,
        None => read_job_state(state_path)?,
    };
    let config = match args.workers {
        Some(_) => config.clone(),
        None => config.clone().with_worker_count(state.worker_count),
    };

    let cancel = Arc::new(AtomicBool::new(false));
    {
        let cancel_clone = cancel.clone();
        ctrlc::set_handler(move || {
            if cancel_clone.load(Ordering::Relaxed) {
                eprintln!("\nForce quit.");
                std::process::exit(130);
            }
            cancel_clone.store(true, Ordering::Relaxed);
            eprintln!(
                "\nCancelling... finishing in-flight parts. Press Ctrl+C again to abort immediately."
            );
        })
        .ok();
    }

    let pending = match state.shard {
        Some(shard) => shard.remaining(),
        None => plan_shard(state.part_count, index, config.worker_count)
            .map(|shard| shard.remaining())
            .unwrap_or(0),
    };
    let show_progress = args.output == OutputMode::Human && !args.quiet && pending > 0;
    let pb: Option<ProgressBar> = show_progress.then(|| create_progress_bar(u64::from(pending)));

    let sink_error: Mutex<Option<CliError>> = Mutex::new(None);
    let sink = |snapshot: &CopyJobState| {
        if let Some(path) = checkpoint {
            if let Err(e) = write_json_atomic(path, snapshot) {
                let mut slot = sink_error
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner);
                slot.get_or_insert(e);
            }
        }
    };
    let on_part = |_: u32, _: u64| {
        if let Some(pb) = &pb {
            pb.inc(1);
        }
    };

    let worker = CopyWorker::new(store, &config, index)
        .with_cancel_token(cancel)
        .with_checkpoint_sink(&sink)
        .with_part_callback(&on_part);
    let result = worker.run(state, deadline);

    if let Some(pb) = &pb {
        pb.finish_and_clear();
    }
    let report = result.map_err(job_error("work"))?;

    if let Some(error) = sink_error
        .into_inner()
        .unwrap_or_else(PoisonError::into_inner)
    {
        return Err(error);
    }

    if args.output == OutputMode::Human && !args.quiet {
        print_shard_summary(index, &report.output, &report.stats, args.verbose);
    }
    emit_payload(
        args,
        "work",
        &report.output,
        out,
        json!({
            "index": index,
            "next_part": report.progress.next_part,
            "last_part": report.progress.last_part,
            "finished": report.output.is_finished(),
            "stats": stats_json(&report.stats),
        }),
    )
}

fn cmd_finalize(args: &Args, store: &FsObjectStore, paths: &[PathBuf]) -> CliResult<()> {
    let mut outputs = Vec::with_capacity(paths.len());
    for path in paths {
        let text = read_input(path)?;
        let output: WorkerOutput =
            serde_json::from_str(&text).map_err(|source| CliError::ParseState {
                path: path.clone(),
                source,
            })?;
        outputs.push(output);
    }
    let state = join_worker_outputs(outputs).map_err(job_error("finalize"))?;
    let report = finalize_copy_job(store, &state).map_err(job_error("finalize"))?;

    match args.output {
        OutputMode::Human => {
            println!(
                "Committed {} ({} parts, {})",
                report.destination, report.part_count, report.content_id
            );
            Ok(())
        }
        OutputMode::Json => print_json_value(&json!({
            "schema_version": "1.0",
            "mode": "finalize",
            "destination": report.destination.to_string(),
            "content_id": report.content_id.as_str(),
            "part_count": report.part_count,
        })),
    }
}

/// Write the wire payload: bare JSON in human mode, an envelope in JSON mode.
fn emit_payload<T: serde::Serialize>(
    args: &Args,
    mode: &str,
    payload: &T,
    out: Option<&Path>,
    extra: Value,
) -> CliResult<()> {
    if let Some(path) = out {
        write_json_atomic(path, payload)?;
    }
    match args.output {
        OutputMode::Human => {
            if out.is_none() {
                let text = serde_json::to_string_pretty(payload)
                    .map_err(|source| CliError::JsonSerialize { source })?;
                println!("{text}");
            }
            Ok(())
        }
        OutputMode::Json => {
            let payload =
                serde_json::to_value(payload).map_err(|source| CliError::JsonSerialize { source })?;
            let mut envelope = json!({
                "schema_version": "1.0",
                "mode": mode,
                "output": payload,
            });
            if let (Some(envelope), Value::Object(extra)) = (envelope.as_object_mut(), extra) {
                envelope.extend(extra);
            }
            print_json_value(&envelope)
        }
    }
}

fn print_shard_summary(index: u32, output: &WorkerOutput, stats: &ShardStats, verbose: bool) {
    if output.is_finished() {
        eprintln!(
            "Shard {index} finished: copied {} parts ({})",
            stats.parts_copied,
            format_bytes(stats.bytes_copied)
        );
    } else {
        eprintln!(
            "Shard {index} paused: copied {} parts ({}), {} failed, {} deferred. Re-run to resume.",
            stats.parts_copied,
            format_bytes(stats.bytes_copied),
            stats.parts_failed,
            stats.parts_deferred
        );
    }
    if verbose {
        eprintln!("  Already present: {}", stats.parts_present);
        eprintln!("  Duration:        {:?}", stats.duration);
        if stats.duration.as_secs_f64() > 0.0 {
            let speed = stats.bytes_copied as f64 / stats.duration.as_secs_f64();
            eprintln!("  Speed:           {}/s", format_bytes(speed as u64));
        }
    }
}

fn stats_json(stats: &ShardStats) -> Value {
    json!({
        "parts_copied": stats.parts_copied,
        "parts_present": stats.parts_present,
        "parts_failed": stats.parts_failed,
        "parts_deferred": stats.parts_deferred,
        "bytes_copied": stats.bytes_copied,
        "duration_ms": stats.duration.as_millis() as u64,
    })
}

fn read_input(path: &Path) -> CliResult<String> {
    let mut text = String::new();
    let result = if path == Path::new("-") {
        io::stdin().read_to_string(&mut text).map(|_| ())
    } else {
        std::fs::read_to_string(path).map(|t| text = t)
    };
    result.map_err(|source| CliError::ReadInput {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(text)
}

fn read_job_state(path: &Path) -> CliResult<CopyJobState> {
    let text = read_input(path)?;
    let output: WorkerOutput =
        serde_json::from_str(&text).map_err(|source| CliError::ParseState {
            path: path.to_path_buf(),
            source,
        })?;
    output.into_state().ok_or_else(|| CliError::NotAJobState {
        path: path.to_path_buf(),
    })
}

/// Replace `path` with the JSON form of `value` via a temp file and rename.
fn write_json_atomic<T: serde::Serialize + ?Sized>(path: &Path, value: &T) -> CliResult<()> {
    let write_error = |source: io::Error| CliError::WriteOutput {
        path: path.to_path_buf(),
        source,
    };
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut temp = tempfile::NamedTempFile::new_in(dir).map_err(write_error)?;
    serde_json::to_writer_pretty(&mut temp, value).map_err(|e| write_error(e.into()))?;
    temp.write_all(b"\n").map_err(write_error)?;
    temp.persist(path).map_err(|e| write_error(e.error))?;
    Ok(())
}

fn print_json_value(value: &Value) -> CliResult<()> {
    let serialized =
        serde_json::to_string(value).map_err(|source| CliError::JsonSerialize { source })?;
    println!("{serialized}");
    Ok(())
}

fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    const TB: u64 = GB * 1024;

    if bytes >= TB {
        format!("{:.2} TB", bytes as f64 / TB as f64)
    } else if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
