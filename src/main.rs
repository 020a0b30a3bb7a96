use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use synth_pub::config::{self, FailurePolicy, PublishConfig};
use synth_pub::pacing::VideoDurationPolicy;
use synth_pub::publish::Publisher;
use synth_pub::webrtc::{HttpSignalingBootstrap, VideoCodec};

/// Log level for the application
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Verbose,
    Debug,
    Trace,
}

/// Video unit duration mode
#[derive(Debug, Clone, Copy, ValueEnum)]
enum VideoDurationMode {
    /// Fixed duration (see --video-duration-ms)
    Constant,
    /// Frame interval from the IVF timebase
    Timebase,
}

/// synth-pub command line arguments
#[derive(Parser, Debug)]
#[command(name = "synth-pub")]
#[command(version, about = "Synthetic WebRTC publisher replaying IVF/Ogg files in real time", long_about = None)]
struct CliArgs {
    /// Log level (error, warn, info, verbose, debug, trace)
    #[arg(short = 'l', long, value_name = "LEVEL", default_value = "info", global = true)]
    log_level: LogLevel,

    /// Increase verbosity (-v for verbose, -vv for debug, -vvv for trace)
    #[arg(short = 'v', long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Publish P240.ivf, P360.ivf, P480.ivf and P.ogg as one stream
    Publish(PublishArgs),
}

#[derive(Args, Debug)]
struct PublishArgs {
    /// Source file prefix P
    #[arg(short = 'f', long, value_name = "PREFIX")]
    file: Option<PathBuf>,

    /// Restart publishing after every cycle
    #[arg(long = "loop")]
    loop_forever: bool,

    /// Signaling server address (overrides config file)
    #[arg(short = 'a', long, value_name = "URL")]
    address: Option<String>,

    /// Stream name (overrides config file)
    #[arg(short = 'n', long, value_name = "NAME")]
    name: Option<String>,

    /// JSON configuration file
    #[arg(short = 'c', long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Codec of the IVF sources
    #[arg(long, value_name = "CODEC")]
    codec: Option<VideoCodec>,

    /// Reaction to a failed task
    #[arg(long, value_name = "POLICY")]
    failure_policy: Option<FailurePolicy>,

    /// Duration attached to video units
    #[arg(long, value_name = "MODE")]
    video_duration: Option<VideoDurationMode>,

    /// Constant video unit duration in milliseconds
    #[arg(long, value_name = "MS", default_value_t = 1000)]
    video_duration_ms: u64,

    /// Stop after this many cycles in loop mode
    #[arg(long, value_name = "COUNT")]
    max_cycles: Option<u64>,

    /// Delay before retrying a failed cycle in loop mode
    #[arg(long, value_name = "MS")]
    retry_delay_ms: Option<u64>,

    /// Skip Ogg page checksum verification
    #[arg(long)]
    skip_ogg_checksum: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse command line arguments
    let args = CliArgs::parse();

    // Initialize logging with CLI arguments
    init_logging(args.log_level, args.verbose);

    tracing::info!("Starting synth-pub v{}", env!("CARGO_PKG_VERSION"));

    match args.command {
        Command::Publish(publish) => run_publish(publish).await,
    }
}

async fn run_publish(args: PublishArgs) -> anyhow::Result<()> {
    let mut config = match &args.config {
        Some(path) => config::load(path).await?,
        None => PublishConfig::default(),
    };
    apply_overrides(&mut config, &args);
    config.validate()?;

    tracing::info!(
        "Publishing '{}' from {} to {} ({}, {:?})",
        config.name,
        config.file_prefix.display(),
        config.address,
        config.video_codec,
        config.failure_policy
    );

    let bootstrap = HttpSignalingBootstrap::new(config.webrtc.clone())?;
    let publisher = Publisher::new(bootstrap, config);

    // Setup graceful shutdown
    let shutdown = CancellationToken::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for CTRL+C: {}", e);
            return;
        }
        tracing::info!("Shutdown signal received");
        trigger.cancel();
    });

    let cycles = publisher.run(shutdown).await?;
    tracing::info!("Done after {} cycle(s)", cycles);
    Ok(())
}

/// Command line flags take precedence over the config file
fn apply_overrides(config: &mut PublishConfig, args: &PublishArgs) {
    if let Some(ref file) = args.file {
        config.file_prefix = file.clone();
    }
    if args.loop_forever {
        config.loop_forever = true;
    }
    if let Some(ref address) = args.address {
        config.address = address.clone();
    }
    if let Some(ref name) = args.name {
        config.name = name.clone();
    }
    if let Some(codec) = args.codec {
        config.video_codec = codec;
    }
    if let Some(policy) = args.failure_policy {
        config.failure_policy = policy;
    }
    match args.video_duration {
        Some(VideoDurationMode::Constant) => {
            config.video_duration = VideoDurationPolicy::Constant {
                millis: args.video_duration_ms,
            };
        }
        Some(VideoDurationMode::Timebase) => {
            config.video_duration = VideoDurationPolicy::Timebase;
        }
        None => {}
    }
    if args.max_cycles.is_some() {
        config.max_cycles = args.max_cycles;
    }
    if let Some(delay) = args.retry_delay_ms {
        config.retry_delay_ms = delay;
    }
    if args.skip_ogg_checksum {
        config.verify_ogg_checksum = false;
    }
}

/// Initialize logging with tracing
fn init_logging(level: LogLevel, verbose_count: u8) {
    // Verbose count overrides log level
    let effective_level = match verbose_count {
        0 => level,
        1 => LogLevel::Verbose,
        2 => LogLevel::Debug,
        _ => LogLevel::Trace,
    };

    // Build filter string based on effective level
    let filter = match effective_level {
        LogLevel::Error => "synth_pub=error,webrtc=error",
        LogLevel::Warn => "synth_pub=warn,webrtc=warn",
        LogLevel::Info => "synth_pub=info,webrtc=warn",
        LogLevel::Verbose => "synth_pub=debug,webrtc=warn",
        LogLevel::Debug => "synth_pub=debug,webrtc=info",
        LogLevel::Trace => "synth_pub=trace,webrtc=debug",
    };

    // Environment variable takes highest priority
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into());

    if let Err(err) = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
    {
        eprintln!("failed to initialize tracing: {}", err);
    }
}
