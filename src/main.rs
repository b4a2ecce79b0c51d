use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use clap::{Parser, ValueEnum};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use transcode_cluster::config::{MasterConfig, SelectionPolicy, TaskPlan};
use transcode_cluster::media::{FfprobeInspector, FileInfo, MediaInspector};
use transcode_cluster::scheduler::{EncoderPreset, Job, JobConfig, RateControl, TaskKind};
use transcode_cluster::shutdown::install_shutdown_handler;
use transcode_cluster::Master;

#[derive(Parser, Debug)]
#[command(name = "transcode-master")]
#[command(version)]
#[command(about = "Master node of a distributed video transcoding cluster")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Run the master and accept worker nodes
    Serve(ServeArgs),

    /// Print the tasks a source file would be split into
    Plan {
        /// Source media file
        source: PathBuf,

        /// Duration of one video slice
        #[arg(long, default_value = "300000")]
        task_duration_ms: u64,

        /// Path to the ffprobe binary
        #[arg(long, default_value = "ffprobe")]
        ffprobe: String,

        /// Output format
        #[arg(long, short = 'o', default_value = "table")]
        output: OutputFormat,
    },
}

#[derive(Parser, Debug)]
struct ServeArgs {
    /// Port workers connect to
    #[arg(long, default_value = "1337")]
    port: u16,

    /// Duration of one video slice
    #[arg(long, default_value = "300000")]
    task_duration_ms: u64,

    /// Folder that receives job outputs
    #[arg(long, default_value = "jobs")]
    output_folder: PathBuf,

    /// Interval between liveness sweeps
    #[arg(long, default_value = "5000")]
    liveness_interval_ms: u64,

    /// Timeout of a single liveness probe
    #[arg(long, default_value = "2000")]
    probe_timeout_ms: u64,

    /// Timeout for a worker to acknowledge a pushed task
    #[arg(long, default_value = "10000")]
    dispatch_timeout_ms: u64,

    /// Pick tasks by job priority instead of submission order
    #[arg(long)]
    priority_scheduling: bool,

    /// Make at most one match per scheduling event
    #[arg(long)]
    single_match: bool,

    /// Path to the ffprobe binary
    #[arg(long, default_value = "ffprobe")]
    ffprobe: String,

    /// Rate control mode for submitted sources
    #[arg(long, value_enum, default_value = "crf")]
    rate_control: RateControlArg,

    /// kbps for VBR, quality factor for CRF
    #[arg(long, default_value = "23")]
    rate: u32,

    /// Encoding passes (VBR only allows 2)
    #[arg(long, default_value = "1")]
    passes: u8,

    #[arg(long, value_enum, default_value = "medium")]
    preset: PresetArg,

    /// Priority of submitted jobs
    #[arg(long, default_value = "0")]
    priority: i32,

    /// Source file to transcode. May be repeated.
    #[arg(long = "source")]
    sources: Vec<PathBuf>,
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum RateControlArg {
    Vbr,
    Crf,
}

impl From<RateControlArg> for RateControl {
    fn from(arg: RateControlArg) -> Self {
        match arg {
            RateControlArg::Vbr => RateControl::Vbr,
            RateControlArg::Crf => RateControl::Crf,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum PresetArg {
    Ultrafast,
    Superfast,
    Veryfast,
    Faster,
    Fast,
    Medium,
    Slow,
    Slower,
    Veryslow,
    Placebo,
}

impl From<PresetArg> for EncoderPreset {
    fn from(arg: PresetArg) -> Self {
        match arg {
            PresetArg::Ultrafast => EncoderPreset::Ultrafast,
            PresetArg::Superfast => EncoderPreset::Superfast,
            PresetArg::Veryfast => EncoderPreset::Veryfast,
            PresetArg::Faster => EncoderPreset::Faster,
            PresetArg::Fast => EncoderPreset::Fast,
            PresetArg::Medium => EncoderPreset::Medium,
            PresetArg::Slow => EncoderPreset::Slow,
            PresetArg::Slower => EncoderPreset::Slower,
            PresetArg::Veryslow => EncoderPreset::Veryslow,
            PresetArg::Placebo => EncoderPreset::Placebo,
        }
    }
}

#[derive(Serialize)]
struct PlanRow {
    task_id: u32,
    kind: TaskKind,
    output_file: String,
}

#[derive(Serialize)]
struct PlanOutput {
    job_id: String,
    duration_ms: u64,
    frame_rate: f64,
    frame_count: u64,
    tasks: Vec<PlanRow>,
}

fn job_name(source: &Path) -> String {
    source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "job".to_string())
}

async fn inspect(ffprobe: &str, source: &Path) -> Result<FileInfo, Box<dyn std::error::Error>> {
    let inspector = FfprobeInspector::new(ffprobe);
    let path = source.to_path_buf();
    let info = tokio::task::spawn_blocking(move || inspector.inspect(&path)).await??;
    Ok(info)
}

async fn run_server(args: ServeArgs) -> Result<(), Box<dyn std::error::Error>> {
    let listen_addr: SocketAddr = format!("0.0.0.0:{}", args.port).parse()?;
    let selection = if args.priority_scheduling {
        SelectionPolicy::Priority
    } else {
        SelectionPolicy::Fifo
    };

    let config = MasterConfig::new(listen_addr)
        .with_task_duration_ms(args.task_duration_ms)
        .with_output_folder(args.output_folder)
        .with_liveness(args.liveness_interval_ms, args.probe_timeout_ms)
        .with_dispatch_timeout_ms(args.dispatch_timeout_ms)
        .with_selection(selection)
        .with_drain_matches(!args.single_match);

    tracing::info!(
        listen_addr = %config.listen_addr,
        task_duration_ms = config.plan.task_duration_ms,
        selection = ?config.selection,
        sources = args.sources.len(),
        "Starting transcode master"
    );

    let master = Master::new(config);

    for source in &args.sources {
        let info = match inspect(&args.ffprobe, source).await {
            Ok(info) => info,
            Err(e) => {
                tracing::error!(source = %source.display(), error = %e, "Skipping source");
                continue;
            }
        };
        let job_config = JobConfig::new(
            source.to_string_lossy(),
            args.rate_control.into(),
            args.rate,
        )
        .with_passes(args.passes)
        .with_preset(args.preset.into());

        match master
            .submit_job(job_config, &job_name(source), args.priority, &info)
            .await
        {
            Ok(job_id) => tracing::info!(job_id = %job_id, source = %source.display(), "Job queued"),
            Err(e) => tracing::error!(source = %source.display(), error = %e, "Job rejected"),
        }
    }

    master.run(install_shutdown_handler()).await?;
    Ok(())
}

async fn print_plan(
    source: PathBuf,
    task_duration_ms: u64,
    ffprobe: String,
    output: OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let info = inspect(&ffprobe, &source).await?;
    let plan = TaskPlan {
        task_duration_ms,
        ..TaskPlan::default()
    };
    let config = JobConfig::new(source.to_string_lossy(), RateControl::Crf, 23);
    let job = Job::new(config, job_name(&source), &plan, &info)?;

    match output {
        OutputFormat::Json => {
            let output = PlanOutput {
                job_id: job.id.clone(),
                duration_ms: job.duration_ms,
                frame_rate: job.frame_rate,
                frame_count: job.frame_count,
                tasks: job
                    .tasks()
                    .map(|t| PlanRow {
                        task_id: t.task_id,
                        kind: t.kind.clone(),
                        output_file: t.output_file.clone(),
                    })
                    .collect(),
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Table => {
            println!("Job ID:   {}", job.id);
            println!("Duration: {} ms", job.duration_ms);
            println!("Frames:   {} at {:.3} fps", job.frame_count, job.frame_rate);
            println!();
            println!("{:<6} {:<8} {:<24} OUTPUT", "TASK", "KIND", "RANGE");
            println!("{}", "-".repeat(72));
            for task in job.tasks() {
                let (kind, range) = match &task.kind {
                    TaskKind::Video {
                        start_ms, end_ms, ..
                    } => ("video", format!("{start_ms}-{end_ms}")),
                    TaskKind::Audio { stream_index, .. } => ("audio", format!("stream {stream_index}")),
                };
                println!(
                    "{:<6} {:<8} {:<24} {}",
                    task.task_id, kind, range, task.output_file
                );
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    match args.command {
        Commands::Serve(serve_args) => run_server(serve_args).await?,
        Commands::Plan {
            source,
            task_duration_ms,
            ffprobe,
            output,
        } => print_plan(source, task_duration_ms, ffprobe, output).await?,
    }

    Ok(())
}
