//! Configuration for scribeq paths and tools.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (SCRIBEQ_HOME)
//! 2. Config file (.scribeq/config.yaml)
//! 3. Defaults (~/.scribeq)
//!
//! Config file discovery:
//! - Searches current directory and parents for .scribeq/config.yaml
//! - Paths in config file are relative to the config file's parent directory

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<Result<ResolvedConfig, String>> = OnceLock::new();

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    pub version: String,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub tools: Option<ToolsConfig>,
    #[serde(default)]
    pub limits: Option<LimitsConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsConfig {
    /// Engine state directory (relative to config file)
    pub home: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ToolsConfig {
    pub ytdlp: Option<String>,
    pub ffmpeg: Option<String>,
    pub whisper: Option<String>,
    pub whisper_model: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    pub max_upload_mb: Option<u64>,
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Absolute path to scribeq home (engine state)
    pub home: PathBuf,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
    /// External tool binaries and settings
    pub tools: ToolSettings,
    /// Upload limits
    pub limits: LimitSettings,
}

#[derive(Debug, Clone)]
pub struct ToolSettings {
    pub ytdlp: String,
    pub ffmpeg: String,
    pub whisper: String,
    pub whisper_model: String,
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            ytdlp: "yt-dlp".into(),
            ffmpeg: "ffmpeg".into(),
            whisper: "whisper".into(),
            whisper_model: "turbo".into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LimitSettings {
    pub max_upload_bytes: u64,
}

impl Default for LimitSettings {
    fn default() -> Self {
        Self {
            max_upload_bytes: 500 * 1024 * 1024,
        }
    }
}

impl ResolvedConfig {
    /// Queue log path ($SCRIBEQ_HOME/queue.jsonl)
    pub fn queue_log(&self) -> PathBuf {
        self.home.join("queue.jsonl")
    }

    /// Transcript database path ($SCRIBEQ_HOME/transcripts.db)
    pub fn transcript_db(&self) -> PathBuf {
        self.home.join("transcripts.db")
    }

    /// Per-item scratch space ($SCRIBEQ_HOME/work)
    pub fn work_dir(&self) -> PathBuf {
        self.home.join("work")
    }

    /// Stored upload copies ($SCRIBEQ_HOME/uploads)
    pub fn uploads_dir(&self) -> PathBuf {
        self.home.join("uploads")
    }
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(".scribeq").join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to the config file's parent
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
            .canonicalize()
            .unwrap_or_else(|_| base.join(path_str))
    }
}

/// Load configuration from all sources
fn load_config() -> Result<ResolvedConfig> {
    let default_home = dirs::home_dir()
        .context("Failed to determine home directory")?
        .join(".scribeq");

    let config_file = find_config_file();

    let (home, tools, limits) = if let Some(ref config_path) = config_file {
        let config = load_config_file(config_path)?;

        // Resolve home path (env var wins; config path is relative to .scribeq/)
        let home = if let Ok(env_home) = std::env::var("SCRIBEQ_HOME") {
            PathBuf::from(env_home)
        } else if let Some(ref home_path) = config.paths.home {
            let scribeq_dir = config_path.parent().unwrap_or(Path::new("."));
            resolve_path(scribeq_dir, home_path)
        } else {
            default_home.clone()
        };

        let defaults = ToolSettings::default();
        let tools = ToolSettings {
            ytdlp: config
                .tools
                .as_ref()
                .and_then(|t| t.ytdlp.clone())
                .unwrap_or(defaults.ytdlp),
            ffmpeg: config
                .tools
                .as_ref()
                .and_then(|t| t.ffmpeg.clone())
                .unwrap_or(defaults.ffmpeg),
            whisper: config
                .tools
                .as_ref()
                .and_then(|t| t.whisper.clone())
                .unwrap_or(defaults.whisper),
            whisper_model: config
                .tools
                .as_ref()
                .and_then(|t| t.whisper_model.clone())
                .unwrap_or(defaults.whisper_model),
        };

        let limits = LimitSettings {
            max_upload_bytes: config
                .limits
                .as_ref()
                .and_then(|l| l.max_upload_mb)
                .map(|mb| mb * 1024 * 1024)
                .unwrap_or(LimitSettings::default().max_upload_bytes),
        };

        (home, tools, limits)
    } else {
        let home = std::env::var("SCRIBEQ_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_home.clone());

        (home, ToolSettings::default(), LimitSettings::default())
    };

    Ok(ResolvedConfig {
        home,
        config_file,
        tools,
        limits,
    })
}

/// Get the global configuration (loads once, then cached)
pub fn config() -> Result<&'static ResolvedConfig> {
    let result = CONFIG.get_or_init(|| load_config().map_err(|e| e.to_string()));

    match result {
        Ok(config) => Ok(config),
        Err(e) => anyhow::bail!("{}", e),
    }
}

/// Force reload configuration (useful for testing)
pub fn reload_config() -> Result<ResolvedConfig> {
    load_config()
}
