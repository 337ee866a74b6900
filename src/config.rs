//! Configuration structures for the gateway.

use clap::Parser;
use std::net::SocketAddr;

/// User-Agent presented upstream when none is configured.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
    AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

/// YouTube-to-Ogg/Opus streaming gateway configuration.
///
/// Read once at startup and never mutated afterwards.
#[derive(Parser, Debug, Clone)]
#[command(name = "yt-opus-proxy")]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// Address to bind the server to.
    #[arg(short = 'b', long, env = "BIND", default_value = "0.0.0.0:8080")]
    pub bind: SocketAddr,

    /// User-Agent presented to the upstream platform.
    #[arg(long, env = "USER_AGENT", default_value = DEFAULT_USER_AGENT)]
    pub user_agent: String,

    /// Accept-Language presented to the upstream platform.
    #[arg(long, env = "ACCEPT_LANGUAGE", default_value = "en-US,en;q=0.9")]
    pub accept_language: String,

    /// Session cookie for the upstream platform. Omitted from requests when
    /// empty.
    #[arg(long, env = "COOKIE", default_value = "")]
    pub cookie: String,

    /// Path to the yt-dlp executable used for stream extraction.
    #[arg(long, env = "YTDLP_PATH", default_value = "yt-dlp")]
    pub ytdlp_path: String,

    /// Path to the ffmpeg executable used for encoding.
    #[arg(long, env = "FFMPEG_PATH", default_value = "ffmpeg")]
    pub ffmpeg_path: String,

    /// Opus bitrate in kbit/s.
    #[arg(long, env = "BITRATE", default_value_t = 96)]
    pub bitrate: u32,
}

impl Config {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.bitrate == 0 || self.bitrate > 512 {
            return Err(format!(
                "bitrate must be between 1 and 512 kbit/s, got {}",
                self.bitrate
            ));
        }

        if self.ytdlp_path.is_empty() {
            return Err("yt-dlp path must not be empty".to_string());
        }

        if self.ffmpeg_path.is_empty() {
            return Err("ffmpeg path must not be empty".to_string());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> Config {
        Config {
            bind: "127.0.0.1:8080".parse().unwrap(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            accept_language: "en-US,en;q=0.9".to_string(),
            cookie: String::new(),
            ytdlp_path: "yt-dlp".to_string(),
            ffmpeg_path: "ffmpeg".to_string(),
            bitrate: 96,
        }
    }

    #[test]
    fn default_shape_is_valid() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn rejects_zero_bitrate() {
        let mut config = base_config();
        config.bitrate = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_empty_encoder_path() {
        let mut config = base_config();
        config.ffmpeg_path = String::new();
        assert!(config.validate().is_err());
    }
}
