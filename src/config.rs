// ⚙️ Pipeline configuration
// Everything the run needs is passed in explicitly; nothing is read from globals.

use crate::error::{PipelineError, Result};
use encoding_rs::Encoding;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub paths: PathsConfig,
    pub decoding: DecodingConfig,
    pub filter: FilterConfig,
    pub enrichment: EnrichmentConfig,
    pub validation: ValidationConfig,
    pub discovery: DiscoveryConfig,
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub raw_dir: PathBuf,
    pub output_dir: PathBuf,
    pub registry_file: Option<PathBuf>,
    pub database: Option<PathBuf>,
}

impl Default for PathsConfig {
    fn default() -> Self {
        PathsConfig {
            raw_dir: PathBuf::from("data/raw"),
            output_dir: PathBuf::from("data/processed"),
            registry_file: None,
            database: None,
        }
    }
}

/// Encoding labels as understood by the WHATWG encoding standard
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DecodingConfig {
    pub primary: String,
    pub fallback: String,
}

impl Default for DecodingConfig {
    fn default() -> Self {
        DecodingConfig {
            primary: "utf-8".to_string(),
            fallback: "windows-1252".to_string(),
        }
    }
}

impl DecodingConfig {
    pub fn encodings(&self) -> Result<(&'static Encoding, &'static Encoding)> {
        Ok((lookup_encoding(&self.primary)?, lookup_encoding(&self.fallback)?))
    }
}

fn lookup_encoding(label: &str) -> Result<&'static Encoding> {
    Encoding::for_label(label.trim().as_bytes())
        .ok_or_else(|| PipelineError::Config(format!("unknown encoding label: {}", label)))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Top-level account class for assistance expenses
    pub account_prefix: String,
    pub description_keywords: Vec<String>,
}

impl Default for FilterConfig {
    fn default() -> Self {
        FilterConfig {
            account_prefix: "4".to_string(),
            description_keywords: vec!["EVENTO".to_string(), "SINISTRO".to_string()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnrichmentConfig {
    pub unknown_region: String,
    pub unknown_name: String,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        EnrichmentConfig {
            unknown_region: "unknown".to_string(),
            unknown_name: "DESCONHECIDO".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Drop records whose amount is not strictly positive before enrichment
    pub positive_only: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub max_periods: usize,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        DiscoveryConfig { max_periods: 3 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub consolidated_file: String,
    pub aggregated_file: String,
    /// Also pack each CSV into a `.zip` next to it
    pub archive: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        OutputConfig {
            consolidated_file: "consolidado_despesas.csv".to_string(),
            aggregated_file: "despesas_agregadas.csv".to_string(),
            archive: false,
        }
    }
}

impl PipelineConfig {
    /// Load from a TOML file. Missing sections keep their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            PipelineError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: PipelineConfig =
            toml::from_str(content).map_err(|e| PipelineError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.decoding.encodings()?;

        if self.enrichment.unknown_region.trim().is_empty() {
            return Err(PipelineError::Config(
                "enrichment.unknown_region must not be empty".to_string(),
            ));
        }
        if self.enrichment.unknown_name.trim().is_empty() {
            return Err(PipelineError::Config(
                "enrichment.unknown_name must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    pub fn consolidated_path(&self) -> PathBuf {
        self.paths.output_dir.join(&self.output.consolidated_file)
    }

    pub fn aggregated_path(&self) -> PathBuf {
        self.paths.output_dir.join(&self.output.aggregated_file)
    }
}
