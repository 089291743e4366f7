use crate::types::Field;
use anyhow::{anyhow, ensure, Context, Result};
use encoding_rs::Encoding;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub data: DataConfig,
    #[serde(default)]
    pub municipalities: Vec<MunicipalityConfig>,
    #[serde(default)]
    pub presentation: PresentationConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DataConfig {
    /// Holds one directory per municipality id.
    pub root: PathBuf,
    #[serde(default = "default_primary_encoding")]
    pub primary_encoding: String,
    #[serde(default = "default_fallback_encoding")]
    pub fallback_encoding: String,
    /// Boundary-file columns tried as the town name, in order.
    #[serde(default = "default_join_key_candidates")]
    pub join_key_candidates: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct MunicipalityConfig {
    pub id: String,
    pub label: String,
    /// Non-empty for combined views: each member is loaded separately.
    #[serde(default)]
    pub members: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PresentationConfig {
    pub default_city: Option<String>,
    #[serde(default = "default_variable")]
    pub default_variable: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    pub static_dir: Option<PathBuf>,
}

fn default_primary_encoding() -> String {
    "utf-8".to_string()
}

fn default_fallback_encoding() -> String {
    "shift_jis".to_string()
}

fn default_join_key_candidates() -> Vec<String> {
    ["s_name", "moji", "name", "町名", "town_name"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_variable() -> String {
    Field::Age20To39.as_str().to_string()
}

fn default_port() -> u16 {
    8049
}

impl Default for PresentationConfig {
    fn default() -> Self {
        Self {
            default_city: None,
            default_variable: default_variable(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            static_dir: None,
        }
    }
}

impl DataConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            primary_encoding: default_primary_encoding(),
            fallback_encoding: default_fallback_encoding(),
            join_key_candidates: default_join_key_candidates(),
        }
    }

    pub fn municipality_dir(&self, id: &str) -> PathBuf {
        self.root.join(id)
    }

    /// Primary and fallback encodings for boundary attribute tables.
    pub fn encodings(&self) -> Result<(&'static Encoding, &'static Encoding)> {
        let resolve = |label: &str| {
            Encoding::for_label(label.as_bytes()).ok_or_else(|| anyhow!("Unknown encoding label: {}", label))
        };
        Ok((resolve(&self.primary_encoding)?, resolve(&self.fallback_encoding)?))
    }
}

impl AppConfig {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        let mut config: AppConfig = toml::from_str(&content)
            .with_context(|| "Failed to parse TOML configuration")?;

        // Relative paths are taken from the config file's directory
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        if config.data.root.is_relative() {
            config.data.root = base.join(&config.data.root);
        }
        if let Some(dir) = config.server.static_dir.as_mut() {
            if dir.is_relative() {
                *dir = base.join(&*dir);
            }
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.data.encodings()?;
        ensure!(
            !self.data.join_key_candidates.is_empty(),
            "data.join_key_candidates must not be empty"
        );
        self.presentation
            .default_variable
            .parse::<Field>()
            .with_context(|| "presentation.default_variable is not a known field")?;
        for municipality in &self.municipalities {
            ensure!(
                !municipality.members.contains(&municipality.id),
                "view {:?} lists itself as a member",
                municipality.id
            );
        }
        if let Some(city) = &self.presentation.default_city {
            ensure!(self.view(city).is_some(), "default_city {:?} is not configured", city);
        }
        Ok(())
    }

    pub fn view(&self, id: &str) -> Option<&MunicipalityConfig> {
        self.municipalities.iter().find(|m| m.id == id)
    }
}
