use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::ConvertError;

/// Which foreign runtime builds and saves the Seurat object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum, Default)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Rscript,
    Payload,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::Rscript => write!(f, "rscript"),
            Backend::Payload => write!(f, "payload"),
        }
    }
}

/// Column of a 10x features file used as the gene identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum, Default)]
#[serde(rename_all = "lowercase")]
pub enum GeneColumn {
    Id,
    #[default]
    Name,
}

impl GeneColumn {
    pub fn index(self) -> usize {
        match self {
            GeneColumn::Id => 0,
            GeneColumn::Name => 1,
        }
    }
}

impl fmt::Display for GeneColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GeneColumn::Id => write!(f, "id"),
            GeneColumn::Name => write!(f, "name"),
        }
    }
}

/// R serialization format version written to RDS files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(try_from = "u32", into = "u32")]
pub enum FormatVersion {
    V2,
    #[default]
    V3,
}

impl FormatVersion {
    pub fn as_i32(self) -> i32 {
        match self {
            FormatVersion::V2 => 2,
            FormatVersion::V3 => 3,
        }
    }
}

impl TryFrom<u32> for FormatVersion {
    type Error = ConvertError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            2 => Ok(FormatVersion::V2),
            3 => Ok(FormatVersion::V3),
            other => Err(ConvertError::InvalidConfig(format!(
                "format_version must be 2 or 3, got {other}"
            ))),
        }
    }
}

impl From<FormatVersion> for u32 {
    fn from(value: FormatVersion) -> Self {
        value.as_i32() as u32
    }
}

impl FromStr for FormatVersion {
    type Err = ConvertError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let parsed = value
            .trim()
            .parse::<u32>()
            .map_err(|_| ConvertError::InvalidConfig(format!("invalid format version: {value}")))?;
        Self::try_from(parsed)
    }
}

impl fmt::Display for FormatVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_i32())
    }
}

/// Seurat project name stored in the object's `project.name` slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ProjectName(String);

impl ProjectName {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ProjectName {
    fn default() -> Self {
        Self("SeuratProject".to_string())
    }
}

impl fmt::Display for ProjectName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ProjectName {
    type Err = ConvertError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim();
        let is_valid = !normalized.is_empty() && !normalized.chars().any(|ch| ch.is_control());
        if !is_valid {
            return Err(ConvertError::InvalidConfig(format!(
                "invalid project name: {value:?}"
            )));
        }
        Ok(Self(normalized.to_string()))
    }
}

impl TryFrom<String> for ProjectName {
    type Error = ConvertError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ProjectName> for String {
    fn from(value: ProjectName) -> Self {
        value.0
    }
}
