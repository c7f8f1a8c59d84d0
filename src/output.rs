use std::io::{self, Write};

use serde::Serialize;

use crate::convert::ConversionReport;
use crate::robject::{RObject, RValue};
use crate::rscript::{RuntimeInfo, RuntimeStatus};

#[derive(Debug, Clone, Serialize)]
pub struct InspectReport {
    pub path: String,
    pub summary: String,
    pub class: Vec<String>,
    pub components: Vec<ComponentSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ComponentSummary {
    pub name: String,
    pub summary: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DoctorReport {
    #[serde(flatten)]
    pub info: RuntimeInfo,
    pub ready: bool,
    pub message: Option<String>,
}

impl DoctorReport {
    pub fn new(info: RuntimeInfo, status: RuntimeStatus) -> Self {
        let (ready, message) = match status {
            RuntimeStatus::Ready => (true, None),
            RuntimeStatus::Missing { message } => (false, Some(message)),
        };
        Self {
            info,
            ready,
            message,
        }
    }
}

impl InspectReport {
    /// Top-level view: list elements for lists, slots for S4 objects,
    /// attributes otherwise.
    pub fn of(path: impl Into<String>, object: &RObject) -> Self {
        let components = match (&object.value, object.names()) {
            (RValue::List(values), Some(names)) if !object.inherits("data.frame") => names
                .into_iter()
                .zip(values)
                .map(|(name, value)| ComponentSummary {
                    name,
                    summary: value.to_string(),
                })
                .collect(),
            _ => object
                .attributes
                .iter()
                .filter(|(name, _)| name != "class")
                .map(|(name, value)| ComponentSummary {
                    name: format!("@{name}"),
                    summary: value.to_string(),
                })
                .collect(),
        };
        Self {
            path: path.into(),
            summary: object.to_string(),
            class: object.class(),
            components,
        }
    }
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_report(report: &ConversionReport) -> io::Result<()> {
        Self::print_json(report)
    }

    pub fn print_inspect(report: &InspectReport) -> io::Result<()> {
        Self::print_json(report)
    }

    pub fn print_doctor(report: &DoctorReport) -> io::Result<()> {
        Self::print_json(report)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

pub struct TextOutput;

impl TextOutput {
    pub fn print_report(report: &ConversionReport) -> io::Result<()> {
        let mut stdout = io::stdout();
        writeln!(
            stdout,
            "wrote {} ({} cells x {} genes, {} non-zero) via {} in {} ms",
            report.output,
            report.n_cells,
            report.n_genes,
            report.nnz,
            report.backend,
            report.elapsed_ms
        )
    }

    pub fn print_inspect(report: &InspectReport) -> io::Result<()> {
        let mut stdout = io::stdout();
        writeln!(stdout, "{}: {}", report.path, report.summary)?;
        for component in &report.components {
            writeln!(stdout, "  {}: {}", component.name, component.summary)?;
        }
        Ok(())
    }

    pub fn print_doctor(report: &DoctorReport) -> io::Result<()> {
        let mut stdout = io::stdout();
        let unknown = "not found";
        writeln!(
            stdout,
            "Rscript:       {}",
            report.info.rscript.as_deref().unwrap_or(unknown)
        )?;
        writeln!(
            stdout,
            "R version:     {}",
            report.info.r_version.as_deref().unwrap_or(unknown)
        )?;
        writeln!(
            stdout,
            "SeuratObject:  {}",
            report.info.seurat_object.as_deref().unwrap_or(unknown)
        )?;
        match &report.message {
            None => writeln!(stdout, "status:        ready"),
            Some(message) => writeln!(stdout, "status:        unavailable ({message})"),
        }
    }
}
