use anyhow::{Context, Result};
use clap::{Arg, ArgMatches, Command};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use clipforge::auth::{login, ClientSecret, CredentialStore, FileCredentialStore, OAuthClient};
use clipforge::config::Config;
use clipforge::llm::{create_llm, LLM};
use clipforge::media::{FfmpegTool, YtDlp};
use clipforge::processing::ChannelProcessor;
use clipforge::publish::YouTubePublisher;

fn cli() -> Command {
    Command::new("clipforge")
        .version(env!("CARGO_PKG_VERSION"))
        .author("TigreRoll")
        .about("Turns long-form video into short captioned clips")
        .subcommand_required(true)
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file (TOML, or legacy JSON)")
                .global(true),
        )
        .arg(
            Arg::new("verbose")
                .long("verbose")
                .help("Enable verbose logging")
                .action(clap::ArgAction::SetTrue)
                .global(true),
        )
        .subcommand(Command::new("login").about("Authorize uploads and store the access token"))
        .subcommand(
            Command::new("exec")
                .about("Process the latest videos of all channels, or of one channel")
                .arg(
                    Arg::new("channel")
                        .value_name("CHANNEL_ID")
                        .help("Only process the channel with this id"),
                )
                .arg(
                    Arg::new("force")
                        .short('f')
                        .long("force")
                        .help("Reprocess videos whose output directory already exists")
                        .action(clap::ArgAction::SetTrue),
                )
                .arg(
                    Arg::new("video")
                        .short('v')
                        .long("video")
                        .alias("v")
                        .value_name("VIDEO_ID")
                        .help("Process one specific video"),
                ),
        )
}

fn init_logging(verbose: bool) {
    let default_filter = if verbose {
        "clipforge=debug,warn"
    } else {
        "clipforge=info,warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = cli().get_matches();
    init_logging(matches.get_flag("verbose"));

    let config_path = matches.get_one::<String>("config").map(PathBuf::from);
    let config = Config::load(config_path.as_deref()).context("Failed to load configuration")?;

    match matches.subcommand() {
        Some(("login", _)) => {
            let store = FileCredentialStore::new(&config.auth.token_file);
            login(&config.auth.client_secret_file, &store).await
        }
        Some(("exec", args)) => exec(config, args).await,
        _ => Ok(()),
    }
}

async fn exec(config: Config, args: &ArgMatches) -> Result<()> {
    config.validate()?;
    info!("🚀 Clipforge starting...");
    info!("{}", config.summary());

    let channels = match args.get_one::<String>("channel") {
        Some(id) => {
            let channel = config
                .find_channel(id)
                .with_context(|| format!("Channel not found: {}", id))?;
            vec![channel.clone()]
        }
        None => config.channels.clone(),
    };
    if channels.is_empty() {
        warn!("No channels configured");
        return Ok(());
    }

    let force = args.get_flag("force");
    let only_video = args
        .get_one::<String>("video")
        .map(|id| id.trim_start_matches('=').to_string());

    let media = Arc::new(FfmpegTool::new(
        &config.tools.ffmpeg,
        &config.tools.ffprobe,
        config.encoding.clone(),
    ));
    let downloader = Arc::new(YtDlp::new(&config.tools.ytdlp));
    let cut_llm: Arc<dyn LLM> = Arc::from(create_llm(&config.llm)?);
    let metadata_llm: Arc<dyn LLM> =
        Arc::from(create_llm(&config.llm.with_timeout(config.llm.metadata_timeout_seconds))?);
    if !cut_llm.is_available().await {
        warn!(
            "⚠️ {:?} service is not reachable, cut proposals will fail",
            cut_llm.provider_type()
        );
    }

    let uploads_enabled = channels.iter().any(|channel| channel.upload_to_youtube);
    let publisher = if uploads_enabled {
        Some(Arc::new(build_publisher(&config).await?))
    } else {
        None
    };

    let config = Arc::new(config);
    let mut processor = ChannelProcessor::new(config, media, downloader, cut_llm)?
        .with_metadata_llm(metadata_llm);
    if let Some(publisher) = publisher {
        processor = processor.with_publisher(publisher);
    }

    let start_time = std::time::Instant::now();
    let reports = processor
        .process_all(&channels, force, only_video.as_deref())
        .await;

    let failed: usize = reports.iter().map(|report| report.failed).sum();
    info!(
        "🎉 Processed {} channels in {:.2}s",
        reports.len(),
        start_time.elapsed().as_secs_f64()
    );
    if failed > 0 {
        error!("{} videos failed", failed);
    }

    Ok(())
}

/// Uploads need a stored token; refreshing it also needs the client secret
async fn build_publisher(config: &Config) -> Result<YouTubePublisher> {
    let store = Arc::new(FileCredentialStore::new(&config.auth.token_file));
    store
        .load()
        .await
        .context("Uploads are enabled but no access token is stored, run `clipforge login`")?;

    let oauth = match ClientSecret::load(&config.auth.client_secret_file).await {
        Ok(secret) => Some(OAuthClient::new(secret)?),
        Err(e) => {
            warn!("Token refresh unavailable: {}", e);
            None
        }
    };

    Ok(YouTubePublisher::new(store, oauth)?)
}
