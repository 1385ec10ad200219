//! Tool configuration, persisted as JSON.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Settings shared by the subcommands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolConfig {
    /// Directory `xor` writes to and `list` scans.
    #[serde(default = "default_models_dir")]
    pub models_dir: PathBuf,
    /// Maximum number of array elements `read` prints.
    #[serde(default = "default_array_preview")]
    pub array_preview: usize,
    /// Data alignment for files written by `xor`.
    #[serde(default = "default_alignment")]
    pub alignment: u32,
}

fn default_models_dir() -> PathBuf {
    PathBuf::from("models")
}
fn default_array_preview() -> usize {
    8
}
fn default_alignment() -> u32 {
    gguf_format::GGUF_DEFAULT_ALIGNMENT
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            models_dir: default_models_dir(),
            array_preview: default_array_preview(),
            alignment: default_alignment(),
        }
    }
}

impl ToolConfig {
    /// Platform config directory: `~/.config/gguf-tool/`
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("gguf-tool")
    }

    fn config_file() -> PathBuf {
        Self::config_dir().join("config.json")
    }

    /// Load from disk, or return defaults if the file doesn't exist.
    pub fn load_or_default() -> anyhow::Result<Self> {
        let path = Self::config_file();
        if path.exists() {
            let data = std::fs::read_to_string(&path)?;
            Ok(serde_json::from_str(&data)?)
        } else {
            Ok(Self::default())
        }
    }

    /// Persist to disk.
    pub fn save(&self) -> anyhow::Result<()> {
        let dir = Self::config_dir();
        std::fs::create_dir_all(&dir)?;
        let data = serde_json::to_string_pretty(self)?;
        std::fs::write(Self::config_file(), data)?;
        Ok(())
    }

    /// Apply a `config set <key> <value>` edit.
    pub fn set(&mut self, key: &str, value: String) -> anyhow::Result<()> {
        match key {
            "models_dir" => self.models_dir = PathBuf::from(value),
            "array_preview" => self.array_preview = value.parse()?,
            "alignment" => {
                let alignment: u32 = value.parse()?;
                if !alignment.is_power_of_two() {
                    anyhow::bail!("alignment must be a power of two, got {alignment}");
                }
                self.alignment = alignment;
            }
            _ => anyhow::bail!("Unknown config key: {key}"),
        }
        Ok(())
    }
}
