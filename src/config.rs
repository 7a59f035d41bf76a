use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

pub const DEFAULT_BIND: &str = "127.0.0.1:8790";
pub const DEFAULT_GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_IMAGE_MODEL: &str = "gemini-2.5-flash-image-preview";
pub const DEFAULT_VIDEO_MODEL: &str = "veo-3.0-generate-001";
const DEFAULT_VIDEO_POLL_SECS: u64 = 10;
const DEFAULT_VIDEO_MAX_POLLS: u32 = 60;
/// Base64 inflates images by a third, so this leaves room for several
/// full-size PNGs in one edit request.
pub const DEFAULT_MAX_BODY_BYTES: usize = 32 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeminiConfig {
    pub api_key: Option<String>,
    pub api_base: String,
    pub image_model: String,
    pub video_model: String,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base: String::from(DEFAULT_GEMINI_API_BASE),
            image_model: String::from(DEFAULT_IMAGE_MODEL),
            video_model: String::from(DEFAULT_VIDEO_MODEL),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub app_root: PathBuf,
    pub bind: String,
    pub gemini: GeminiConfig,
    pub presets_path: Option<PathBuf>,
    pub video_poll_interval: Duration,
    pub video_max_polls: u32,
    pub max_body_bytes: usize,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read '{path}': {source}")]
    ReadDotenv {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("config value {key}='{value}' is not a valid non-negative integer")]
    InvalidNumber { key: &'static str, value: String },
}

/// App root from `SPRITE_LAB_ROOT`, else the working directory.
pub fn default_app_root() -> PathBuf {
    std::env::var("SPRITE_LAB_ROOT")
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Resolves config from the process environment with `<app_root>/.env` as fallback.
pub fn resolve_app_config(app_root: &Path) -> Result<AppConfig, ConfigError> {
    let dotenv = load_dotenv_map(app_root)?;
    resolve_app_config_with(app_root, |key| {
        std::env::var(key).ok().or_else(|| dotenv.get(key).cloned())
    })
}

pub fn resolve_app_config_with<F>(app_root: &Path, lookup: F) -> Result<AppConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let value = |key: &str| {
        lookup(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    };

    let api_key = value("GEMINI_API_KEY")
        .or_else(|| value("GOOGLE_API_KEY"))
        .or_else(|| value("API_KEY"));
    let gemini = GeminiConfig {
        api_key,
        api_base: value("GEMINI_API_BASE")
            .map(|v| v.trim_end_matches('/').to_string())
            .unwrap_or_else(|| String::from(DEFAULT_GEMINI_API_BASE)),
        image_model: value("SPRITE_LAB_IMAGE_MODEL")
            .unwrap_or_else(|| String::from(DEFAULT_IMAGE_MODEL)),
        video_model: value("SPRITE_LAB_VIDEO_MODEL")
            .unwrap_or_else(|| String::from(DEFAULT_VIDEO_MODEL)),
    };

    let presets_path = value("SPRITE_LAB_PRESETS").map(PathBuf::from).map(|p| {
        if p.is_absolute() {
            p
        } else {
            app_root.join(p)
        }
    });

    let poll_secs = parse_number(
        "SPRITE_LAB_VIDEO_POLL_SECS",
        value("SPRITE_LAB_VIDEO_POLL_SECS"),
        DEFAULT_VIDEO_POLL_SECS,
    )?;
    let max_polls = parse_number(
        "SPRITE_LAB_VIDEO_MAX_POLLS",
        value("SPRITE_LAB_VIDEO_MAX_POLLS"),
        u64::from(DEFAULT_VIDEO_MAX_POLLS),
    )?;

    let max_body_bytes = parse_number(
        "SPRITE_LAB_MAX_BODY_BYTES",
        value("SPRITE_LAB_MAX_BODY_BYTES"),
        DEFAULT_MAX_BODY_BYTES as u64,
    )?;

    Ok(AppConfig {
        app_root: app_root.to_path_buf(),
        bind: value("SPRITE_LAB_BIND").unwrap_or_else(|| String::from(DEFAULT_BIND)),
        gemini,
        presets_path,
        video_poll_interval: Duration::from_secs(poll_secs),
        video_max_polls: u32::try_from(max_polls).unwrap_or(u32::MAX),
        max_body_bytes: usize::try_from(max_body_bytes).unwrap_or(usize::MAX),
    })
}

fn parse_number(key: &'static str, raw: Option<String>, default: u64) -> Result<u64, ConfigError> {
    match raw {
        None => Ok(default),
        Some(value) => value
            .parse::<u64>()
            .map_err(|_| ConfigError::InvalidNumber { key, value }),
    }
}

pub fn load_dotenv_map(app_root: &Path) -> Result<HashMap<String, String>, ConfigError> {
    let path = app_root.join(".env");
    if !path.is_file() {
        return Ok(HashMap::new());
    }
    let raw = fs::read_to_string(path.as_path()).map_err(|source| ConfigError::ReadDotenv {
        path: path.display().to_string(),
        source,
    })?;
    Ok(parse_dotenv_content(raw.as_str()))
}

/// Parses `KEY=value` lines. Later lines win, matching how a shell would
/// source the file.
pub fn parse_dotenv_content(raw: &str) -> HashMap<String, String> {
    raw.lines().filter_map(parse_dotenv_line).collect()
}

fn parse_dotenv_line(line: &str) -> Option<(String, String)> {
    let line = line.trim();
    if line.starts_with('#') {
        return None;
    }
    let assignment = line.strip_prefix("export ").map_or(line, str::trim_start);
    let (key, value) = assignment.split_once('=')?;
    let key = key.trim();
    if key.is_empty() || key.contains(char::is_whitespace) {
        return None;
    }
    Some((key.to_string(), dotenv_value(value.trim())))
}

fn dotenv_value(value: &str) -> String {
    for quote in ['"', '\''] {
        if let Some(inner) = value
            .strip_prefix(quote)
            .and_then(|rest| rest.strip_suffix(quote))
        {
            return inner.to_string();
        }
    }
    match value.find(" #") {
        Some(comment) => value[..comment].trim_end().to_string(),
        None => value.to_string(),
    }
}
