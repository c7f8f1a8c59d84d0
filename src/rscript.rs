use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use camino::{Utf8Path, Utf8PathBuf};
use regex::Regex;
use serde::Serialize;
use tempfile::TempDir;
use tracing::{debug, info};

use crate::domain::ProjectName;
use crate::error::ConvertError;
use crate::rds::{self, RdsOptions};
use crate::robject::RObject;
use crate::runtime::{ForeignRuntime, seurat_payload};
use crate::store;

pub const SEURAT_PACKAGE: &str = "SeuratObject";

/// Exit status the availability check uses for a missing package.
const MISSING_PACKAGE_STATUS: i32 = 3;

const REQUIRE_EXPR: &str =
    "if (!requireNamespace('SeuratObject', quietly = TRUE)) quit(status = 3, save = 'no')";

const VERSION_EXPR: &str = "cat(as.character(utils::packageVersion('SeuratObject')))";

const BUILD_SCRIPT: &str = r#"args <- commandArgs(trailingOnly = TRUE)
payload <- readRDS(args[[1]])
object <- SeuratObject::CreateSeuratObject(
  counts = payload$counts,
  meta.data = payload$meta.data,
  project = payload$project
)
saveRDS(object, file = args[[2]])
"#;

#[derive(Debug, Clone, Serialize)]
pub struct RuntimeInfo {
    pub rscript: Option<String>,
    pub r_version: Option<String>,
    pub seurat_object: Option<String>,
}

#[derive(Debug, Clone)]
pub enum RuntimeStatus {
    Ready,
    Missing { message: String },
}

/// Builds Seurat objects by running `Rscript` with the SeuratObject package.
#[derive(Debug, Clone)]
pub struct RscriptRuntime {
    rscript: Option<PathBuf>,
    project: ProjectName,
    staging: RdsOptions,
}

/// A Seurat object already saved by R into a staging directory.
#[derive(Debug)]
pub struct SeuratHandle {
    _staging: TempDir,
    object_path: Utf8PathBuf,
}

impl SeuratHandle {
    pub fn object_path(&self) -> &Utf8Path {
        &self.object_path
    }
}

impl RscriptRuntime {
    /// Looks up `Rscript` on PATH.
    pub fn new(project: ProjectName) -> Self {
        Self {
            rscript: find_in_path("Rscript"),
            project,
            staging: staging_options(),
        }
    }

    pub fn with_executable(rscript: impl Into<PathBuf>, project: ProjectName) -> Self {
        Self {
            rscript: Some(rscript.into()),
            project,
            staging: staging_options(),
        }
    }

    pub fn executable(&self) -> Option<&Path> {
        self.rscript.as_deref()
    }

    pub fn tool_status(&self) -> RuntimeStatus {
        self.check_status().0
    }

    /// Run the availability check once, keeping both the printable status and
    /// the error it produced.
    pub fn check_status(&self) -> (RuntimeStatus, Result<(), ConvertError>) {
        let result = self.ensure_available();
        let status = match &result {
            Ok(()) => RuntimeStatus::Ready,
            Err(err) => RuntimeStatus::Missing {
                message: err.to_string(),
            },
        };
        (status, result)
    }

    pub fn tool_info(&self) -> RuntimeInfo {
        let Some(rscript) = self.rscript.as_ref() else {
            return RuntimeInfo {
                rscript: None,
                r_version: None,
                seurat_object: None,
            };
        };
        let r_version = Command::new(rscript)
            .arg("--version")
            .output()
            .ok()
            .and_then(|output| {
                // Older R versions print the banner on stderr.
                let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
                text.push_str(&String::from_utf8_lossy(&output.stderr));
                parse_r_version(&text)
            });
        let seurat_object = Command::new(rscript)
            .args(["--vanilla", "-e", VERSION_EXPR])
            .output()
            .ok()
            .filter(|output| output.status.success())
            .map(|output| String::from_utf8_lossy(&output.stdout).trim().to_string())
            .filter(|version| !version.is_empty());
        RuntimeInfo {
            rscript: Some(rscript.display().to_string()),
            r_version,
            seurat_object,
        }
    }

    fn require_rscript(&self) -> Result<&PathBuf, ConvertError> {
        self.rscript
            .as_ref()
            .filter(|path| path.exists())
            .ok_or_else(|| ConvertError::MissingRuntime("Rscript".to_string()))
    }

    fn run(&self, args: &[String]) -> Result<Output, ConvertError> {
        let rscript = self.require_rscript()?;
        debug!(program = %rscript.display(), ?args, "running Rscript");
        Command::new(rscript)
            .args(args)
            .output()
            .map_err(|err| ConvertError::MissingRuntime(format!("{}: {err}", rscript.display())))
    }
}

impl ForeignRuntime for RscriptRuntime {
    type Handle = SeuratHandle;

    fn name(&self) -> &'static str {
        "rscript"
    }

    fn ensure_available(&self) -> Result<(), ConvertError> {
        let output = self.run(&[
            "--vanilla".to_string(),
            "-e".to_string(),
            REQUIRE_EXPR.to_string(),
        ])?;
        if output.status.success() {
            return Ok(());
        }
        let message = stderr_message(&output, "Rscript availability check failed");
        match output.status.code() {
            Some(MISSING_PACKAGE_STATUS) => Err(ConvertError::MissingPackage {
                package: SEURAT_PACKAGE.to_string(),
                message: "requireNamespace() returned FALSE".to_string(),
            }),
            _ => Err(ConvertError::MissingPackage {
                package: SEURAT_PACKAGE.to_string(),
                message,
            }),
        }
    }

    fn build(&self, counts: RObject, meta_data: RObject) -> Result<SeuratHandle, ConvertError> {
        let staging = store::staging_dir()?;
        let root = store::utf8_path(staging.path().to_path_buf())?;
        let payload_path = root.join("payload.rds");
        let script_path = root.join("build.R");
        let object_path = root.join("seurat.rds");

        let payload = seurat_payload(counts, meta_data, &self.project);
        rds::save_rds(&payload_path, &payload, self.staging)?;
        fs::write(script_path.as_std_path(), BUILD_SCRIPT)
            .map_err(|err| ConvertError::Filesystem(err.to_string()))?;

        info!(project = %self.project, "running CreateSeuratObject");
        let output = self.run(&[
            "--vanilla".to_string(),
            script_path.to_string(),
            payload_path.to_string(),
            object_path.to_string(),
        ])?;
        if !output.status.success() {
            return Err(ConvertError::RuntimeFailed(stderr_message(
                &output,
                "CreateSeuratObject failed",
            )));
        }
        if !object_path.as_std_path().exists() {
            return Err(ConvertError::RuntimeFailed(
                "Rscript exited cleanly but wrote no object".to_string(),
            ));
        }

        Ok(SeuratHandle {
            _staging: staging,
            object_path,
        })
    }

    fn save(&self, handle: SeuratHandle, path: &Utf8Path) -> Result<(), ConvertError> {
        store::copy_file_atomic(handle.object_path(), path)
    }
}

/// The staging payload is read back immediately, so skip compression.
fn staging_options() -> RdsOptions {
    RdsOptions {
        compress: false,
        ..RdsOptions::default()
    }
}

fn stderr_message(output: &Output, fallback: &str) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    if stderr.is_empty() {
        match output.status.code() {
            Some(code) => format!("{fallback} (exit status {code})"),
            None => fallback.to_string(),
        }
    } else {
        stderr
    }
}

pub fn parse_r_version(text: &str) -> Option<String> {
    let re = Regex::new(r"version (\d+\.\d+\.\d+)").ok()?;
    re.captures(text)
        .and_then(|captures| captures.get(1))
        .map(|version| version.as_str().to_string())
}

pub fn find_in_path(name: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    for path in std::env::split_paths(&path_var) {
        let exe = path.join(format!("{name}.exe"));
        if exe.exists() {
            return Some(exe);
        }
        let plain = path.join(name);
        if plain.exists() {
            return Some(plain);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn parse_version_banners() {
        assert_eq!(
            parse_r_version("Rscript (R) version 4.4.1 (2024-06-14)").as_deref(),
            Some("4.4.1")
        );
        assert_eq!(
            parse_r_version("R scripting front-end version 4.1.2 (2021-11-01)").as_deref(),
            Some("4.1.2")
        );
        assert_eq!(parse_r_version("no banner"), None);
    }

    #[test]
    fn missing_executable_is_environment_error() {
        let runtime = RscriptRuntime::with_executable(
            "/nonexistent/kira-seurat/Rscript",
            ProjectName::default(),
        );
        let err = runtime.ensure_available().unwrap_err();
        assert_matches!(err, ConvertError::MissingRuntime(_));
        assert!(err.is_environment());
        assert_matches!(runtime.tool_status(), RuntimeStatus::Missing { .. });
    }

    #[test]
    fn tool_info_without_executable() {
        let runtime = RscriptRuntime {
            rscript: None,
            project: ProjectName::default(),
            staging: staging_options(),
        };
        let info = runtime.tool_info();
        assert!(info.rscript.is_none());
        assert!(info.r_version.is_none());
    }
}
