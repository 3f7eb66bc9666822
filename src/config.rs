// Configuration for the recording pipeline

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::cache::CachePolicy;
use crate::encoding::SinkConfig;

/// When the fallback movie assembler runs after a stop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FallbackPolicy {
    /// Assemble from the frame cache only when the streaming writer did
    /// not reach Completed
    OnStreamingFailure,
    /// Assemble and publish on every stop, alongside the streaming
    /// artifact (the original dual-output behavior)
    Always,
}

impl Default for FallbackPolicy {
    fn default() -> Self {
        Self::OnStreamingFailure
    }
}

/// Recorder configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory holding the working recording files
    pub storage_path: PathBuf,

    /// File name of the streaming recording. Fixed: a new recording always
    /// targets the same location and deletes the previous file first.
    pub output_file_name: String,

    /// File name of the fallback movie, kept distinct so the two outputs
    /// never race for one path when both are produced
    pub fallback_file_name: String,

    /// Encoding parameters shared by the streaming writer and the
    /// fallback assembler
    pub sink: SinkConfig,

    /// Frame cache lifetime across recordings
    pub cache_policy: CachePolicy,

    /// When the fallback assembler runs
    pub fallback_policy: FallbackPolicy,

    /// Minimum free space on the storage volume required to start a
    /// recording, in bytes
    pub min_free_bytes: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage_path: default_storage_path(),
            output_file_name: "video.mp4".into(),
            fallback_file_name: "video-fallback.mp4".into(),
            sink: SinkConfig::default(),
            cache_policy: CachePolicy::default(),
            fallback_policy: FallbackPolicy::default(),
            min_free_bytes: 200 * 1024 * 1024,
        }
    }
}

impl Config {
    /// Target path of the streaming recording
    pub fn streaming_output_path(&self) -> PathBuf {
        self.storage_path.join(&self.output_file_name)
    }

    /// Target path of the fallback movie
    pub fn fallback_output_path(&self) -> PathBuf {
        self.storage_path.join(&self.fallback_file_name)
    }

    /// Load config from disk or return default
    pub fn load_or_default() -> Self {
        let config_path = get_config_path();

        if config_path.exists() {
            match std::fs::read_to_string(&config_path) {
                Ok(contents) => match toml::from_str(&contents) {
                    Ok(config) => return config,
                    Err(e) => {
                        log::warn!("Failed to parse config: {}", e);
                    }
                },
                Err(e) => {
                    log::warn!("Failed to read config file: {}", e);
                }
            }
        }

        Self::default()
    }

    /// Save config to disk
    pub fn save(&self) -> anyhow::Result<()> {
        let config_path = get_config_path();

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&config_path, contents)?;

        Ok(())
    }
}

/// Default directory for working recording files
fn default_storage_path() -> PathBuf {
    dirs::video_dir()
        .or_else(|| dirs::home_dir().map(|h| h.join("Videos")))
        .unwrap_or_else(|| PathBuf::from("."))
        .join("camrec")
}

/// Config file location
fn get_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("camrec")
        .join("config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_yields_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.output_file_name, "video.mp4");
        assert_eq!(config.fallback_policy, FallbackPolicy::OnStreamingFailure);
        assert_eq!(config.cache_policy, CachePolicy::ResetPerRecording);
        assert_eq!(config.min_free_bytes, 200 * 1024 * 1024);
    }

    #[test]
    fn toml_round_trip() {
        let mut config = Config::default();
        config.fallback_policy = FallbackPolicy::Always;
        config.sink.width = 1920;

        let serialized = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&serialized).unwrap();
        assert_eq!(parsed.fallback_policy, FallbackPolicy::Always);
        assert_eq!(parsed.sink.width, 1920);
    }

    #[test]
    fn output_paths_join_storage_dir() {
        let config = Config {
            storage_path: PathBuf::from("/tmp/rec"),
            ..Config::default()
        };
        assert_eq!(
            config.streaming_output_path(),
            PathBuf::from("/tmp/rec/video.mp4")
        );
        assert_eq!(
            config.fallback_output_path(),
            PathBuf::from("/tmp/rec/video-fallback.mp4")
        );
    }
}
