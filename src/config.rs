use anyhow::{Context, Result};
use std::{
    env, fs,
    path::{Path, PathBuf},
};

use crate::model::DEFAULT_DOWNLOADS_DIR;
use crate::ytdlp;

pub const DEFAULT_CONFIG_PATH: &str = "tiktok-crawler.env";
pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Values read from a `KEY=VALUE` config file or the environment. Anything
/// left unset falls back to the defaults in [`Settings`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvConfig {
    pub downloads_dir: Option<PathBuf>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub proxy: Option<String>,
    pub ffmpeg_path: Option<PathBuf>,
    pub ytdlp_path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub downloads_dir: PathBuf,
    pub host: String,
    pub port: u16,
    pub proxy: Option<String>,
    pub ffmpeg_path: Option<PathBuf>,
    pub ytdlp_path: PathBuf,
}

impl EnvConfig {
    fn apply(&mut self, key: &str, value: &str, origin: &str) -> Result<()> {
        match key {
            "DOWNLOADS_DIR" if !value.is_empty() => {
                self.downloads_dir = Some(PathBuf::from(value));
            }
            "HOST" if !value.is_empty() => self.host = Some(value.to_string()),
            "PORT" if !value.is_empty() => {
                let port: u16 = value
                    .parse()
                    .with_context(|| format!("Parsing PORT from {origin}"))?;
                self.port = Some(port);
            }
            "PROXY" if !value.is_empty() => self.proxy = Some(value.to_string()),
            "FFMPEG_PATH" if !value.is_empty() => self.ffmpeg_path = Some(PathBuf::from(value)),
            "YTDLP_PATH" if !value.is_empty() => self.ytdlp_path = Some(PathBuf::from(value)),
            _ => {}
        }
        Ok(())
    }

    /// Overlays process environment variables on top of file values.
    pub fn overlay_env(mut self) -> Result<Self> {
        self.overlay_vars(env::vars())?;
        Ok(self)
    }

    fn overlay_vars<I>(&mut self, vars: I) -> Result<()>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            self.apply(&key, value.trim(), "environment")?;
        }
        Ok(())
    }

    pub fn into_settings(self) -> Settings {
        Settings {
            downloads_dir: self
                .downloads_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DOWNLOADS_DIR)),
            host: self.host.unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: self.port.unwrap_or(DEFAULT_PORT),
            proxy: self.proxy,
            ffmpeg_path: self.ffmpeg_path,
            ytdlp_path: self
                .ytdlp_path
                .unwrap_or_else(|| PathBuf::from(ytdlp::DEFAULT_PROGRAM)),
        }
    }
}

pub fn read_env_config(path: &Path) -> Result<Option<EnvConfig>> {
    if !path.exists() {
        return Ok(None);
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
    let origin = path.display().to_string();
    let mut cfg = EnvConfig::default();
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        if let Some((key, value_raw)) = trimmed.split_once('=') {
            let value = value_raw.trim().trim_matches('"');
            cfg.apply(key.trim(), value, &origin)?;
        }
    }
    Ok(Some(cfg))
}

/// Loads settings from the default config file (if present) and the
/// environment.
pub fn load_settings() -> Result<Settings> {
    load_settings_from(Path::new(DEFAULT_CONFIG_PATH))
}

pub fn load_settings_from(path: impl AsRef<Path>) -> Result<Settings> {
    let cfg = read_env_config(path.as_ref())?.unwrap_or_default();
    Ok(cfg.overlay_env()?.into_settings())
}
