pub mod annotated;
pub mod config;
pub mod conversion;
pub mod convert;
pub mod domain;
pub mod error;
pub mod input;
pub mod matrix;
pub mod metadata;
pub mod output;
pub mod rds;
pub mod robject;
pub mod rscript;
pub mod runtime;
pub mod store;

pub use annotated::{AnnotatedData, AnnotatedMatrix};
pub use convert::{ConversionReport, Converter, convert};
pub use error::ConvertError;
