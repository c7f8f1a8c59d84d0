use std::time::Instant;

use camino::Utf8Path;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info};

use crate::annotated::{AnnotatedData, check_alignment};
use crate::config::ConvertConfig;
use crate::conversion::ConversionRules;
use crate::domain::{Backend, ProjectName};
use crate::error::ConvertError;
use crate::rscript::RscriptRuntime;
use crate::runtime::{ForeignRuntime, PayloadRuntime};

#[derive(Debug, Clone, Serialize)]
pub struct ConversionReport {
    pub n_cells: usize,
    pub n_genes: usize,
    pub nnz: usize,
    pub sparse_input: bool,
    pub backend: String,
    pub output: String,
    pub elapsed_ms: u128,
    pub converted_at: DateTime<Utc>,
}

/// Drives one conversion through an injected runtime.
#[derive(Debug, Clone)]
pub struct Converter<F: ForeignRuntime> {
    runtime: F,
    rules: ConversionRules,
}

impl<F: ForeignRuntime> Converter<F> {
    pub fn new(runtime: F) -> Self {
        Self {
            runtime,
            rules: ConversionRules::default(),
        }
    }

    pub fn with_rules(mut self, rules: ConversionRules) -> Self {
        self.rules = rules;
        self
    }

    pub fn runtime(&self) -> &F {
        &self.runtime
    }

    pub fn convert<D>(&self, data: &D, output: &Utf8Path) -> Result<ConversionReport, ConvertError>
    where
        D: AnnotatedData + ?Sized,
    {
        self.run(data, output).inspect_err(|err| {
            error!(backend = self.runtime.name(), error = %err, "conversion failed");
        })
    }

    fn run<D>(&self, data: &D, output: &Utf8Path) -> Result<ConversionReport, ConvertError>
    where
        D: AnnotatedData + ?Sized,
    {
        let started = Instant::now();
        info!(backend = self.runtime.name(), "Starting conversion to Seurat");
        self.runtime.ensure_available()?;

        info!("Extracting data matrix, cell names, gene names, and metadata");
        check_alignment(data)?;
        let matrix = data.matrix();
        let counts = matrix.densify_transposed();
        let cell_ids = data.cell_ids();
        let gene_ids = data.gene_ids();

        info!(
            cells = cell_ids.len(),
            genes = gene_ids.len(),
            "Converting data to R objects"
        );
        let (counts, meta_data) = {
            let scope = self.rules.activate();
            let counts = scope.counts_to_r(&counts, gene_ids, cell_ids)?;
            let meta_data = scope.metadata_to_r(data.metadata())?;
            (counts, meta_data)
        };

        info!("Creating Seurat object");
        let handle = self.runtime.build(counts, meta_data)?;

        info!(path = %output, "Saving Seurat object to {output}");
        self.runtime.save(handle, output)?;

        let elapsed = started.elapsed();
        info!(elapsed_ms = elapsed.as_millis() as u64, "Conversion complete");
        Ok(ConversionReport {
            n_cells: cell_ids.len(),
            n_genes: gene_ids.len(),
            nnz: matrix.nnz(),
            sparse_input: matrix.is_sparse(),
            backend: self.runtime.name().to_string(),
            output: output.to_string(),
            elapsed_ms: elapsed.as_millis(),
            converted_at: Utc::now(),
        })
    }
}

/// Convert `data` to a Seurat object with the installed `Rscript` and save it
/// at `output`.
pub fn convert<D>(data: &D, output: &Utf8Path) -> Result<(), ConvertError>
where
    D: AnnotatedData + ?Sized,
{
    Converter::new(RscriptRuntime::new(ProjectName::default())).convert(data, output)?;
    Ok(())
}

/// Pick the backend named by `config` and run one conversion with it.
pub fn convert_with_config<D>(
    data: &D,
    output: &Utf8Path,
    config: &ConvertConfig,
) -> Result<ConversionReport, ConvertError>
where
    D: AnnotatedData + ?Sized,
{
    match config.backend {
        Backend::Rscript => {
            let runtime = match &config.rscript {
                Some(path) => RscriptRuntime::with_executable(path, config.project.clone()),
                None => RscriptRuntime::new(config.project.clone()),
            };
            Converter::new(runtime)
                .with_rules(config.rules)
                .convert(data, output)
        }
        Backend::Payload => {
            let runtime = PayloadRuntime::new(config.project.clone(), config.rds);
            Converter::new(runtime)
                .with_rules(config.rules)
                .convert(data, output)
        }
    }
}
