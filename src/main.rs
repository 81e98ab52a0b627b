use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use unai::config::{
    mib_to_bytes, AnalyzerConfig, MediaTools, ServerConfig, DEFAULT_HOST, DEFAULT_MAX_AUDIO_SECS,
    DEFAULT_MAX_IMAGE_PIXELS, DEFAULT_MAX_PENDING, DEFAULT_PORT, DEFAULT_UPLOAD_DIR,
};
use unai::serve::AnalyzeResponse;
use unai::{Analyzer, MediaKind, ScoringProfile};

#[derive(Parser, Debug)]
#[command(name = "unai")]
#[command(author, version, about = "Heuristic detection of AI-generated images, video and audio")]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value = "text", env = "UNAI_LOG_FORMAT")]
    log_format: LogFormat,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP API
    Serve {
        /// Interface to bind
        #[arg(long, default_value = DEFAULT_HOST, env = "UNAI_HOST")]
        host: String,

        /// Port to listen on
        #[arg(short, long, default_value_t = DEFAULT_PORT, env = "UNAI_PORT")]
        port: u16,

        /// Where uploads are staged while being analyzed
        #[arg(long, default_value = DEFAULT_UPLOAD_DIR, env = "UNAI_UPLOAD_DIR")]
        upload_dir: PathBuf,

        /// Largest accepted upload, in MiB
        #[arg(long, default_value_t = 50, env = "UNAI_MAX_UPLOAD_MB")]
        max_upload_mb: u64,

        /// Number of request workers (default: number of CPUs)
        #[arg(short, long, default_value_t = 0, env = "UNAI_WORKERS")]
        workers: usize,

        /// Requests held at once before new ones get 503
        #[arg(long, default_value_t = DEFAULT_MAX_PENDING, env = "UNAI_MAX_PENDING")]
        max_pending: usize,

        #[command(flatten)]
        analyzer: AnalyzerArgs,
    },

    /// Score a single local file
    Analyze {
        /// Image, video or audio file
        file: PathBuf,

        /// Print the full JSON verdict instead of a summary line
        #[arg(long)]
        json: bool,

        /// Show every measured feature
        #[arg(short, long)]
        verbose: bool,

        #[command(flatten)]
        analyzer: AnalyzerArgs,
    },
}

#[derive(clap::Args, Debug)]
struct AnalyzerArgs {
    /// Image heuristics to run
    #[arg(long, value_enum, default_value = "full", env = "UNAI_PROFILE")]
    profile: ScoringProfile,

    /// Add a random term to simple-profile image scores (demo only)
    #[arg(long, env = "UNAI_DEMO_JITTER")]
    demo_jitter: bool,

    /// ffmpeg executable used to extract video frames
    #[arg(long, default_value = "ffmpeg", env = "UNAI_FFMPEG")]
    ffmpeg: PathBuf,

    /// ffprobe executable used to read video metadata
    #[arg(long, default_value = "ffprobe", env = "UNAI_FFPROBE")]
    ffprobe: PathBuf,

    /// Longest stretch of audio decoded per file, in seconds
    #[arg(long, default_value_t = DEFAULT_MAX_AUDIO_SECS, env = "UNAI_MAX_AUDIO_SECS")]
    max_audio_secs: u32,

    /// Largest image or video frame scored, in pixels
    #[arg(long, default_value_t = DEFAULT_MAX_IMAGE_PIXELS, env = "UNAI_MAX_IMAGE_PIXELS")]
    max_image_pixels: u64,
}

impl AnalyzerArgs {
    fn into_analyzer(self) -> Analyzer {
        Analyzer::with_config(AnalyzerConfig {
            profile: self.profile,
            demo_jitter: self.demo_jitter,
            tools: MediaTools { ffmpeg: self.ffmpeg, ffprobe: self.ffprobe },
            max_audio_secs: self.max_audio_secs,
            max_image_pixels: self.max_image_pixels,
        })
    }
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum LogFormat {
    Text,
    Json,
}

fn init_logging(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "unai=info".into());
    let (text, json) = match format {
        LogFormat::Text => (Some(tracing_subscriber::fmt::layer().with_writer(std::io::stderr)), None),
        LogFormat::Json => (
            None,
            Some(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr)),
        ),
    };
    tracing_subscriber::registry().with(filter).with(text).with(json).init();
}

fn main() {
    let args = Args::parse();
    init_logging(args.log_format);

    match run(args.command) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// Returns the process exit code
fn run(command: Command) -> anyhow::Result<i32> {
    match command {
        Command::Serve { host, port, upload_dir, max_upload_mb, workers, max_pending, analyzer } => {
            let config = ServerConfig {
                host,
                port,
                upload_dir,
                max_upload_bytes: mib_to_bytes(max_upload_mb),
                workers,
                max_pending,
            };
            unai::serve::start(config, analyzer.into_analyzer()).context("server error")?;
            Ok(0)
        }
        Command::Analyze { file, json, verbose, analyzer } => {
            analyze_file(&file, json, verbose, &analyzer.into_analyzer())
        }
    }
}

fn analyze_file(file: &Path, json: bool, verbose: bool, analyzer: &Analyzer) -> anyhow::Result<i32> {
    let filename = file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let kind = MediaKind::detect_path(file, &filename)
        .with_context(|| format!("cannot read {}", file.display()))?;

    let verdict = analyzer.analyze(file, kind);
    let code = if verdict.is_error() {
        1
    } else if verdict.is_ai_generated {
        2
    } else {
        0
    };

    let response = AnalyzeResponse { verdict, file_type: kind, filename };
    if json {
        println!("{}", serde_json::to_string_pretty(&response)?);
    } else {
        print_summary(&response, verbose);
    }
    Ok(code)
}

fn print_summary(response: &AnalyzeResponse, verbose: bool) {
    let verdict = &response.verdict;
    let (color, label) = if verdict.is_error() {
        ("\x1b[90m", "ERROR") // Gray
    } else if verdict.is_ai_generated {
        ("\x1b[31m", "AI") // Red
    } else {
        ("\x1b[32m", "AUTHENTIC") // Green
    };
    let reset = "\x1b[0m";

    let flags = if verdict.flags.is_empty() { "-".to_string() } else { verdict.flags.join(",") };

    println!(
        "{}{:<12}{} {:>5.1}%  {:<6}  {:<40}  {}",
        color,
        format!("[{}]", label),
        reset,
        verdict.confidence,
        response.file_type.as_str(),
        flags,
        response.filename
    );

    if let Some(err) = &verdict.error {
        eprintln!("    {}", err);
    }
    if verbose {
        for (name, value) in verdict.features.iter() {
            eprintln!("    {:<26} {:.4}", name, value);
        }
        if let Some(frames) = verdict.frames_analyzed {
            eprintln!("    {:<26} {}", "frames_analyzed", frames);
        }
    }
}
