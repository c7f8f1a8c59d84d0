use camino::Utf8PathBuf;
use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum ConvertError {
    #[error("required tool not found: {0}")]
    #[diagnostic(help("install R and make sure `Rscript` is on PATH, or pass --rscript"))]
    MissingRuntime(String),

    #[error("R package not available: {package} ({message})")]
    #[diagnostic(help("install it with: R -e \"install.packages('SeuratObject')\""))]
    MissingPackage { package: String, message: String },

    #[error("R runtime failed: {0}")]
    RuntimeFailed(String),

    #[error("matrix shape {rows}x{cols} does not match {cells} cells x {genes} genes")]
    ShapeMismatch {
        rows: usize,
        cols: usize,
        cells: usize,
        genes: usize,
    },

    #[error("metadata has {found} rows but the matrix has {expected} cells")]
    MetadataRowCount { expected: usize, found: usize },

    #[error("metadata row {position} is '{found}', expected cell '{expected}'")]
    MetadataMisaligned {
        position: usize,
        expected: String,
        found: String,
    },

    #[error("metadata column '{column}' has {found} values, expected {expected}")]
    MetadataColumnLength {
        column: String,
        expected: usize,
        found: usize,
    },

    #[error("invalid matrix: {0}")]
    InvalidMatrix(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("no conversion rules are active")]
    NoActiveConversion,

    #[error("failed to encode RDS: {0}")]
    RdsEncode(String),

    #[error("failed to decode RDS: {0}")]
    RdsDecode(String),

    #[error("unsupported RDS content: {0}")]
    UnsupportedRds(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(Utf8PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("invalid config value: {0}")]
    InvalidConfig(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}

impl ConvertError {
    /// Environment errors mean the bridge itself is unusable, independent of
    /// the data being converted.
    pub fn is_environment(&self) -> bool {
        matches!(
            self,
            ConvertError::MissingRuntime(_) | ConvertError::MissingPackage { .. }
        )
    }
}
