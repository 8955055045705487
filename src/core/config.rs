use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::error::Error as StdError;
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

pub const DEFAULT_MODEL_IDENTIFIER: &str = "openai:o4-mini";
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful AI assistant.";

/// Launch spec for one MCP server. Servers are spawned as child processes
/// speaking the stdio transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McpServerConfig {
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub env: HashMap<String, String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_model_identifier")]
    pub model_identifier: String,
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    #[serde(default)]
    pub mcp_servers: Vec<McpServerConfig>,
}

fn default_model_identifier() -> String {
    DEFAULT_MODEL_IDENTIFIER.to_string()
}

fn default_system_prompt() -> String {
    DEFAULT_SYSTEM_PROMPT.to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model_identifier: default_model_identifier(),
            system_prompt: default_system_prompt(),
            mcp_servers: vec![McpServerConfig {
                name: "run_python".to_string(),
                command: "deno".to_string(),
                args: [
                    "run",
                    "-N",
                    "-R=node_modules",
                    "-W=node_modules",
                    "--node-modules-dir=auto",
                    "jsr:@pydantic/mcp-run-python",
                    "stdio",
                ]
                .iter()
                .map(|s| s.to_string())
                .collect(),
                env: HashMap::new(),
                enabled: true,
            }],
        }
    }
}

/// Errors surfaced when the configuration file cannot be used.
#[derive(Debug)]
pub enum ConfigError {
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    Write {
        path: PathBuf,
        message: String,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Read { path, source } => {
                write!(f, "Failed to read config at {}: {}", path.display(), source)
            }
            ConfigError::Parse { path, source } => {
                write!(
                    f,
                    "Failed to parse config at {}: {}",
                    path.display(),
                    source
                )
            }
            ConfigError::Write { path, message } => {
                write!(
                    f,
                    "Failed to write config at {}: {}",
                    path.display(),
                    message
                )
            }
        }
    }
}

impl StdError for ConfigError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            ConfigError::Read { source, .. } => Some(source),
            ConfigError::Parse { .. } => None,
            ConfigError::Write { .. } => None,
        }
    }
}

impl Config {
    /// Loads the config at `path`, falling back to the built-in default when
    /// the file does not exist. A present-but-broken file is an error, never
    /// silently replaced.
    pub fn load_from_path(path: &Path) -> Result<Config, ConfigError> {
        if !path.exists() {
            return Ok(Config::default());
        }
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Writes the default config file on first run so users have something to
    /// edit. Returns true when a new file was created.
    pub fn ensure_at(path: &Path) -> Result<bool, ConfigError> {
        if path.exists() {
            return Ok(false);
        }
        Config::default().save_to_path(path)?;
        Ok(true)
    }

    /// Atomic save: serialize, write to a temp file in the target directory,
    /// fsync, then persist over the destination. A crash mid-save never
    /// leaves a half-written config behind.
    pub fn save_to_path(&self, path: &Path) -> Result<(), ConfigError> {
        let write_err = |message: String| ConfigError::Write {
            path: path.to_path_buf(),
            message,
        };

        let parent = path.parent().filter(|dir| !dir.as_os_str().is_empty());
        if let Some(dir) = parent {
            fs::create_dir_all(dir).map_err(|e| write_err(e.to_string()))?;
        }

        let contents = toml::to_string_pretty(self).map_err(|e| write_err(e.to_string()))?;
        let mut temp_file = match parent {
            Some(dir) => NamedTempFile::new_in(dir),
            None => NamedTempFile::new(),
        }
        .map_err(|e| write_err(e.to_string()))?;

        temp_file
            .write_all(contents.as_bytes())
            .map_err(|e| write_err(e.to_string()))?;
        temp_file
            .as_file_mut()
            .sync_all()
            .map_err(|e| write_err(e.to_string()))?;
        temp_file
            .persist(path)
            .map_err(|e| write_err(e.to_string()))?;
        Ok(())
    }

    pub fn default_path() -> PathBuf {
        match ProjectDirs::from("org", "permacommons", "confab") {
            Some(dirs) => dirs.config_dir().join("config.toml"),
            None => PathBuf::from("confab.toml"),
        }
    }

    /// Servers that should actually be launched.
    pub fn enabled_servers(&self) -> impl Iterator<Item = &McpServerConfig> {
        self.mcp_servers.iter().filter(|s| s.enabled)
    }

    pub fn server_mut(&mut self, name: &str) -> Option<&mut McpServerConfig> {
        self.mcp_servers.iter_mut().find(|s| s.name == name)
    }
}
