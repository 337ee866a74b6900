use std::sync::Arc;

use clap::Parser;

mod config;
mod error;
mod handler;
mod retry;
mod server;
mod transcode;
mod upstream;

use config::Config;
use handler::AppState;
use retry::RetryPolicy;
use transcode::Transcoder;
use upstream::{Identity, YtDlpSource};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "yt_opus_proxy=info,tower_http=info".into()),
        )
        .init();

    let config = Config::parse();
    config
        .validate()
        .map_err(|e| format!("invalid configuration: {e}"))?;

    let http_client = reqwest::Client::builder()
        .user_agent(&config.user_agent)
        .build()?;

    let source = YtDlpSource::new(
        config.ytdlp_path.clone(),
        Identity::from_config(&config),
        http_client,
    );

    let state = Arc::new(AppState {
        source: Arc::new(source),
        transcoder: Transcoder::opus_ogg(config.ffmpeg_path.clone(), config.bitrate),
        retry: RetryPolicy::default(),
    });

    let router = server::create_router(state);

    tracing::info!("Upstream extractor: {}", config.ytdlp_path);
    tracing::info!(
        "Encoder: {} (Ogg/Opus @ {} kbit/s)",
        config.ffmpeg_path,
        config.bitrate
    );

    server::run_http_server(&config, router).await?;

    Ok(())
}
