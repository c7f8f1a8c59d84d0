use camino::Utf8Path;
use tracing::debug;

use crate::domain::ProjectName;
use crate::error::ConvertError;
use crate::rds::{self, RdsOptions};
use crate::robject::RObject;

/// A runtime able to construct a Seurat object from R-native counts and
/// metadata and to persist it.
pub trait ForeignRuntime {
    type Handle;

    fn name(&self) -> &'static str;

    /// Fails with an environment error when the runtime or the package that
    /// provides the target object type cannot be used.
    fn ensure_available(&self) -> Result<(), ConvertError>;

    /// `counts` is a genes x cells numeric matrix with dimnames, `meta_data` a
    /// `data.frame` whose row names are the cell ids.
    fn build(&self, counts: RObject, meta_data: RObject) -> Result<Self::Handle, ConvertError>;

    fn save(&self, handle: Self::Handle, path: &Utf8Path) -> Result<(), ConvertError>;
}

/// The list handed to `CreateSeuratObject`:
/// `list(counts = <matrix>, meta.data = <data.frame>, project = <chr>)`.
pub fn seurat_payload(counts: RObject, meta_data: RObject, project: &ProjectName) -> RObject {
    RObject::named_list(vec![
        ("counts".to_string(), counts),
        ("meta.data".to_string(), meta_data),
        (
            "project".to_string(),
            RObject::scalar_string(project.as_str()),
        ),
    ])
}

/// Writes the constructor inputs as an RDS list without needing R. Loading it
/// in R and calling `CreateSeuratObject(x$counts, meta.data = x$meta.data,
/// project = x$project)` yields the Seurat object.
#[derive(Debug, Clone, Default)]
pub struct PayloadRuntime {
    project: ProjectName,
    rds: RdsOptions,
}

impl PayloadRuntime {
    pub fn new(project: ProjectName, rds: RdsOptions) -> Self {
        Self { project, rds }
    }
}

impl ForeignRuntime for PayloadRuntime {
    type Handle = RObject;

    fn name(&self) -> &'static str {
        "payload"
    }

    fn ensure_available(&self) -> Result<(), ConvertError> {
        Ok(())
    }

    fn build(&self, counts: RObject, meta_data: RObject) -> Result<RObject, ConvertError> {
        debug!(project = %self.project, "building payload list");
        Ok(seurat_payload(counts, meta_data, &self.project))
    }

    fn save(&self, handle: RObject, path: &Utf8Path) -> Result<(), ConvertError> {
        rds::save_rds(path, &handle, self.rds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::utf8_path;

    #[test]
    fn payload_runtime_writes_named_list() {
        let dir = tempfile::tempdir().unwrap();
        let path = utf8_path(dir.path().join("payload.rds")).unwrap();
        let runtime = PayloadRuntime::new("pbmc".parse().unwrap(), RdsOptions::default());

        runtime.ensure_available().unwrap();
        let handle = runtime
            .build(RObject::real(vec![1.0]), RObject::data_frame(vec![], vec![]))
            .unwrap();
        runtime.save(handle, &path).unwrap();

        let loaded = rds::load_rds(&path).unwrap();
        assert_eq!(
            loaded.names().unwrap(),
            vec!["counts", "meta.data", "project"]
        );
        assert_eq!(
            loaded.get("project").unwrap().as_strings().unwrap(),
            &[Some("pbmc".to_string())]
        );
    }
}
