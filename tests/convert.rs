use std::cell::Cell;
use std::fs;

use assert_matches::assert_matches;
use camino::{Utf8Path, Utf8PathBuf};

use kira_seurat::annotated::{AnnotatedData, AnnotatedMatrix};
use kira_seurat::conversion::{ConversionRules, MissingFloat, active_rules};
use kira_seurat::convert::Converter;
use kira_seurat::error::ConvertError;
use kira_seurat::matrix::{DenseMatrix, ExpressionMatrix};
use kira_seurat::metadata::{ColumnValues, MetadataTable};
use kira_seurat::rds::{RdsOptions, load_rds};
use kira_seurat::robject::{RObject, is_na_real};
use kira_seurat::runtime::{ForeignRuntime, PayloadRuntime};
use sprs::TriMat;

fn labels(prefix: &str, n: usize) -> Vec<String> {
    (1..=n).map(|idx| format!("{prefix}{idx}")).collect()
}

fn output_in(dir: &tempfile::TempDir, name: &str) -> Utf8PathBuf {
    Utf8PathBuf::from_path_buf(dir.path().join(name)).unwrap()
}

fn payload(project: &str) -> PayloadRuntime {
    PayloadRuntime::new(project.parse().unwrap(), RdsOptions::default())
}

/// Bypasses the alignment checks of `AnnotatedMatrix` to feed bad data.
struct RawData {
    matrix: ExpressionMatrix,
    cells: Vec<String>,
    genes: Vec<String>,
    metadata: MetadataTable,
}

impl AnnotatedData for RawData {
    fn matrix(&self) -> &ExpressionMatrix {
        &self.matrix
    }

    fn cell_ids(&self) -> &[String] {
        &self.cells
    }

    fn gene_ids(&self) -> &[String] {
        &self.genes
    }

    fn metadata(&self) -> &MetadataTable {
        &self.metadata
    }
}

/// A bridge that is never available. Building through it is a test failure.
struct AbsentBridge;

impl ForeignRuntime for AbsentBridge {
    type Handle = ();

    fn name(&self) -> &'static str {
        "absent"
    }

    fn ensure_available(&self) -> Result<(), ConvertError> {
        Err(ConvertError::MissingPackage {
            package: "SeuratObject".to_string(),
            message: "not installed".to_string(),
        })
    }

    fn build(&self, _counts: RObject, _meta_data: RObject) -> Result<(), ConvertError> {
        panic!("build must not run without the bridge");
    }

    fn save(&self, _handle: (), _path: &Utf8Path) -> Result<(), ConvertError> {
        panic!("save must not run without the bridge");
    }
}

#[derive(Default)]
struct FailingBuild {
    builds: Cell<usize>,
}

impl ForeignRuntime for FailingBuild {
    type Handle = ();

    fn name(&self) -> &'static str {
        "failing"
    }

    fn ensure_available(&self) -> Result<(), ConvertError> {
        Ok(())
    }

    fn build(&self, _counts: RObject, _meta_data: RObject) -> Result<(), ConvertError> {
        self.builds.set(self.builds.get() + 1);
        Err(ConvertError::RuntimeFailed("Error in CreateSeuratObject".to_string()))
    }

    fn save(&self, _handle: (), _path: &Utf8Path) -> Result<(), ConvertError> {
        unreachable!("save after failed build")
    }
}

#[test]
fn output_reports_genes_by_cells_in_input_order() {
    let dir = tempfile::tempdir().unwrap();
    let output = output_in(&dir, "pbmc.rds");
    let (n_genes, n_cells) = (3, 4);
    let rows = (0..n_cells)
        .map(|cell| (0..n_genes).map(|gene| (cell * 10 + gene) as f64).collect())
        .collect::<Vec<Vec<f64>>>();
    let cells = vec!["TTAG-1", "AAAC-1", "GGCT-1", "CCTA-1"]
        .into_iter()
        .map(String::from)
        .collect::<Vec<_>>();
    let genes = vec!["MT-CO1", "CD3E", "ACTB"]
        .into_iter()
        .map(String::from)
        .collect::<Vec<_>>();
    let data = AnnotatedMatrix::without_metadata(
        DenseMatrix::from_rows(&rows).unwrap(),
        cells.clone(),
        genes.clone(),
    )
    .unwrap();

    let report = Converter::new(payload("pbmc")).convert(&data, &output).unwrap();
    assert_eq!((report.n_cells, report.n_genes), (n_cells, n_genes));

    let object = load_rds(&output).unwrap();
    let counts = object.get("counts").unwrap();
    assert_eq!(counts.dim().unwrap(), vec![n_genes, n_cells]);
    assert_eq!(counts.dimnames(0).unwrap(), genes);
    assert_eq!(counts.dimnames(1).unwrap(), cells);
    // Column-major genes x cells: counts[gene, cell] = cell * 10 + gene.
    let values = counts.as_reals().unwrap();
    assert_eq!(values[1], 1.0);
    assert_eq!(values[n_genes * 2 + 1], 21.0);

    let meta = object.get("meta.data").unwrap();
    assert!(meta.inherits("data.frame"));
    assert_eq!(meta.row_names().unwrap(), cells);
}

#[test]
fn sparse_values_match_densified() {
    let dir = tempfile::tempdir().unwrap();
    let output = output_in(&dir, "sparse.rds");
    let sparse = TriMat::from_triplets(
        (3, 3),
        vec![0, 1, 2, 2],
        vec![2, 0, 1, 2],
        vec![4.0, 1.5, 7.0, 2.0],
    )
    .to_csr();
    let data = AnnotatedMatrix::without_metadata(sparse, labels("c", 3), labels("g", 3)).unwrap();

    let report = Converter::new(payload("sparse")).convert(&data, &output).unwrap();
    assert!(report.sparse_input);
    assert_eq!(report.nnz, 4);

    let object = load_rds(&output).unwrap();
    let values = object.get("counts").unwrap().as_reals().unwrap().to_vec();
    // Column-major genes x cells is the cells x genes input read row by row.
    assert_eq!(values, vec![0.0, 0.0, 4.0, 1.5, 0.0, 0.0, 0.0, 7.0, 2.0]);
    assert_eq!(values.iter().filter(|value| **value != 0.0).count(), 4);
}

#[test]
fn metadata_row_count_mismatch_fails_before_writing() {
    let dir = tempfile::tempdir().unwrap();
    let output = output_in(&dir, "bad.rds");
    let data = RawData {
        matrix: DenseMatrix::zeros(3, 2).into(),
        cells: labels("c", 3),
        genes: labels("g", 2),
        metadata: MetadataTable::new(labels("c", 2)),
    };

    let err = Converter::new(payload("bad")).convert(&data, &output).unwrap_err();
    assert_matches!(err, ConvertError::MetadataRowCount { expected: 3, found: 2 });
    assert!(!output.as_std_path().exists());
    assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[test]
fn misaligned_metadata_keeps_previous_output() {
    let dir = tempfile::tempdir().unwrap();
    let output = output_in(&dir, "kept.rds");
    fs::write(output.as_std_path(), b"previous").unwrap();
    let data = RawData {
        matrix: DenseMatrix::zeros(2, 1).into(),
        cells: vec!["a".to_string(), "b".to_string()],
        genes: labels("g", 1),
        metadata: MetadataTable::new(vec!["b".to_string(), "a".to_string()]),
    };

    let err = Converter::new(payload("kept")).convert(&data, &output).unwrap_err();
    assert_matches!(err, ConvertError::MetadataMisaligned { position: 0, .. });
    assert_eq!(fs::read(output.as_std_path()).unwrap(), b"previous");
}

#[test]
fn second_conversion_replaces_first() {
    let dir = tempfile::tempdir().unwrap();
    let output = output_in(&dir, "same.rds");
    let first = AnnotatedMatrix::without_metadata(
        DenseMatrix::zeros(2, 2),
        labels("first", 2),
        labels("g", 2),
    )
    .unwrap();
    let second = AnnotatedMatrix::without_metadata(
        DenseMatrix::zeros(3, 1),
        labels("second", 3),
        labels("g", 1),
    )
    .unwrap();

    Converter::new(payload("one")).convert(&first, &output).unwrap();
    Converter::new(payload("two")).convert(&second, &output).unwrap();

    let object = load_rds(&output).unwrap();
    assert_eq!(
        object.get("project").unwrap().as_strings().unwrap(),
        &[Some("two".to_string())]
    );
    assert_eq!(
        object.get("counts").unwrap().dimnames(1).unwrap(),
        labels("second", 3)
    );
    assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
}

#[test]
fn absent_bridge_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let output = output_in(&dir, "never.rds");
    let data =
        AnnotatedMatrix::without_metadata(DenseMatrix::zeros(1, 1), labels("c", 1), labels("g", 1))
            .unwrap();

    let err = Converter::new(AbsentBridge).convert(&data, &output).unwrap_err();
    assert!(err.is_environment());
    assert!(!output.as_std_path().exists());
}

#[test]
fn rules_inactive_after_conversion_even_on_failure() {
    let data =
        AnnotatedMatrix::without_metadata(DenseMatrix::zeros(1, 1), labels("c", 1), labels("g", 1))
            .unwrap();
    let converter = Converter::new(FailingBuild::default());

    let err = converter
        .convert(&data, Utf8Path::new("unused.rds"))
        .unwrap_err();
    assert_matches!(
        err,
        ConvertError::RuntimeFailed(message) if message.contains("CreateSeuratObject")
    );
    assert_eq!(converter.runtime().builds.get(), 1);
    assert!(active_rules().is_none());
}

#[test]
fn metadata_types_reach_r() {
    let dir = tempfile::tempdir().unwrap();
    let output = output_in(&dir, "meta.rds");
    let cells = labels("c", 3);
    let metadata = MetadataTable::new(cells.clone())
        .with_column(
            "cluster",
            ColumnValues::categorical([Some("T"), None, Some("B")]),
        )
        .unwrap()
        .with_column("n_genes", ColumnValues::Integer(vec![Some(10), None, Some(30)]))
        .unwrap()
        .with_column("percent_mito", ColumnValues::Float(vec![0.5, f64::NAN, 1.0]))
        .unwrap()
        .with_column(
            "passed_qc",
            ColumnValues::Boolean(vec![Some(true), Some(false), None]),
        )
        .unwrap();
    let data = AnnotatedMatrix::new(DenseMatrix::zeros(3, 1), cells, labels("g", 1), metadata)
        .unwrap();

    Converter::new(payload("meta")).convert(&data, &output).unwrap();

    let meta = load_rds(&output).unwrap().get("meta.data").unwrap().clone();
    assert_eq!(
        meta.names().unwrap(),
        vec!["cluster", "n_genes", "percent_mito", "passed_qc"]
    );
    let cluster = meta.get("cluster").unwrap();
    assert!(cluster.inherits("factor"));
    assert_eq!(cluster.as_integers().unwrap(), &[Some(1), None, Some(2)]);
    assert_eq!(
        cluster.attr("levels").unwrap().as_strings().unwrap(),
        &[Some("T".to_string()), Some("B".to_string())]
    );
    assert_eq!(
        meta.get("n_genes").unwrap().as_integers().unwrap(),
        &[Some(10), None, Some(30)]
    );
    assert!(is_na_real(meta.get("percent_mito").unwrap().as_reals().unwrap()[1]));
}

#[test]
fn nan_rule_keeps_plain_nan() {
    let dir = tempfile::tempdir().unwrap();
    let output = output_in(&dir, "nan.rds");
    let data = AnnotatedMatrix::without_metadata(
        DenseMatrix::from_rows(&[vec![f64::NAN]]).unwrap(),
        labels("c", 1),
        labels("g", 1),
    )
    .unwrap();
    let rules = ConversionRules {
        missing_float: MissingFloat::NaN,
        ..ConversionRules::default()
    };

    Converter::new(payload("nan"))
        .with_rules(rules)
        .convert(&data, &output)
        .unwrap();

    let value = load_rds(&output).unwrap().get("counts").unwrap().as_reals().unwrap()[0];
    assert!(value.is_nan());
    assert!(!is_na_real(value));
}
