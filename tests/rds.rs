use std::fs;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;

use kira_seurat::domain::FormatVersion;
use kira_seurat::error::ConvertError;
use kira_seurat::output::InspectReport;
use kira_seurat::rds::{RdsOptions, load_rds, save_rds};
use kira_seurat::robject::{RObject, is_na_real, na_real};
use kira_seurat::runtime::seurat_payload;

fn payload() -> RObject {
    let counts = RObject::numeric_matrix(
        2,
        3,
        vec![0.0, 1.0, 2.0, na_real(), 4.0, 5.0],
        vec!["CD3E".to_string(), "MS4A1".to_string()],
        vec!["c1".to_string(), "c2".to_string(), "c3".to_string()],
    );
    let meta = RObject::data_frame(
        vec![
            (
                "cluster".to_string(),
                RObject::factor(&[Some(0), Some(1), None], vec!["T".into(), "B".into()]),
            ),
            (
                "passed_qc".to_string(),
                RObject::logical(vec![Some(true), None, Some(false)]),
            ),
        ],
        vec!["c1".to_string(), "c2".to_string(), "c3".to_string()],
    );
    seurat_payload(counts, meta, &"pbmc3k".parse().unwrap())
}

#[test]
fn saved_payload_reads_back_identically() {
    let dir = tempfile::tempdir().unwrap();
    let path = Utf8PathBuf::from_path_buf(dir.path().join("payload.rds")).unwrap();
    let object = payload();

    save_rds(&path, &object, RdsOptions::default()).unwrap();
    let loaded = load_rds(&path).unwrap();

    assert_eq!(loaded, object);
    let counts = loaded.get("counts").unwrap();
    assert_eq!(counts.dim().unwrap(), vec![2, 3]);
    assert!(is_na_real(counts.as_reals().unwrap()[3]));
    assert_eq!(
        loaded.get("meta.data").unwrap().row_names().unwrap(),
        vec!["c1", "c2", "c3"]
    );
}

#[test]
fn version_two_uncompressed_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = Utf8PathBuf::from_path_buf(dir.path().join("v2.rds")).unwrap();
    let options = RdsOptions {
        version: FormatVersion::V2,
        compress: false,
    };

    save_rds(&path, &payload(), options).unwrap();
    let bytes = fs::read(path.as_std_path()).unwrap();
    assert_eq!(&bytes[..2], b"X\n");
    assert_eq!(&bytes[2..6], &2i32.to_be_bytes());
    assert_eq!(load_rds(&path).unwrap(), payload());
}

#[test]
fn inspect_summarizes_payload() {
    let report = InspectReport::of("payload.rds", &payload());
    let lines = report
        .components
        .iter()
        .map(|component| format!("{}: {}", component.name, component.summary))
        .collect::<Vec<_>>();
    assert_eq!(
        lines,
        vec![
            "counts: double matrix 2 x 3",
            "meta.data: data.frame 3 x 2",
            "project: character[1]",
        ]
    );
}

#[test]
fn non_rds_file_is_decode_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = Utf8PathBuf::from_path_buf(dir.path().join("notes.rds")).unwrap();
    fs::write(path.as_std_path(), b"hello world").unwrap();

    assert_matches!(
        load_rds(&path),
        Err(ConvertError::RdsDecode(_) | ConvertError::UnsupportedRds(_))
    );
}
