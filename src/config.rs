use std::fs;
use std::path::PathBuf;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::conversion::ConversionRules;
use crate::domain::{Backend, FormatVersion, ProjectName};
use crate::error::ConvertError;
use crate::rds::RdsOptions;

/// On-disk JSON configuration. Every field is optional.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub backend: Option<Backend>,
    #[serde(default)]
    pub rscript: Option<String>,
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default)]
    pub compress: Option<bool>,
    #[serde(default)]
    pub format_version: Option<u32>,
    #[serde(default)]
    pub rules: Option<ConversionRules>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ConvertConfig {
    pub backend: Backend,
    pub rscript: Option<PathBuf>,
    pub project: ProjectName,
    pub rds: RdsOptions,
    pub rules: ConversionRules,
}

/// Command-line values that take precedence over the config file.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub backend: Option<Backend>,
    pub rscript: Option<PathBuf>,
    pub project: Option<ProjectName>,
    pub no_compress: bool,
    pub format_version: Option<FormatVersion>,
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Defaults when no path is given; there is no implicit config file.
    pub fn resolve(path: Option<&str>) -> Result<ConvertConfig, ConvertError> {
        let Some(path) = path else {
            return Ok(ConvertConfig::default());
        };
        let config_path = Utf8PathBuf::from(path);
        let content = fs::read_to_string(config_path.as_std_path())
            .map_err(|_| ConvertError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| ConvertError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ConvertConfig, ConvertError> {
        let defaults = ConvertConfig::default();
        let project = match config.project {
            Some(value) => value.parse()?,
            None => defaults.project,
        };
        let version = match config.format_version {
            Some(value) => FormatVersion::try_from(value)?,
            None => defaults.rds.version,
        };

        Ok(ConvertConfig {
            backend: config.backend.unwrap_or(defaults.backend),
            rscript: config.rscript.map(PathBuf::from),
            project,
            rds: RdsOptions {
                version,
                compress: config.compress.unwrap_or(defaults.rds.compress),
            },
            rules: config.rules.unwrap_or(defaults.rules),
        })
    }
}

impl ConvertConfig {
    pub fn apply(mut self, overrides: ConfigOverrides) -> Self {
        if let Some(backend) = overrides.backend {
            self.backend = backend;
        }
        if let Some(rscript) = overrides.rscript {
            self.rscript = Some(rscript);
        }
        if let Some(project) = overrides.project {
            self.project = project;
        }
        if overrides.no_compress {
            self.rds.compress = false;
        }
        if let Some(version) = overrides.format_version {
            self.rds.version = version;
        }
        self
    }
}
