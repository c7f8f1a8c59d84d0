use std::fs::File;
use std::io::{BufReader, Read};

use camino::{Utf8Path, Utf8PathBuf};
use flate2::read::GzDecoder;
use sprs::TriMat;
use tracing::{debug, info};

use crate::annotated::AnnotatedMatrix;
use crate::domain::GeneColumn;
use crate::error::ConvertError;
use crate::metadata::{ColumnValues, MetadataTable};

const MISSING_TOKENS: [&str; 3] = ["", "NA", "nan"];

/// Files of a 10x Genomics feature-barcode matrix directory.
#[derive(Debug, Clone)]
pub struct TenxFiles {
    pub matrix: Utf8PathBuf,
    pub barcodes: Utf8PathBuf,
    pub features: Utf8PathBuf,
}

impl TenxFiles {
    /// Locate `matrix.mtx`, `barcodes.tsv` and `features.tsv` (or the older
    /// `genes.tsv`), each optionally gzipped.
    pub fn locate(dir: &Utf8Path) -> Result<Self, ConvertError> {
        Ok(Self {
            matrix: find_variant(dir, &["matrix.mtx"])?,
            barcodes: find_variant(dir, &["barcodes.tsv"])?,
            features: find_variant(dir, &["features.tsv", "genes.tsv"])?,
        })
    }
}

/// Load a 10x directory as a cells x genes dataset with empty metadata.
pub fn read_10x_dir(
    dir: &Utf8Path,
    gene_column: GeneColumn,
) -> Result<AnnotatedMatrix, ConvertError> {
    let files = TenxFiles::locate(dir)?;
    info!(dir = %dir, "reading 10x matrix directory");

    let cells = read_label_column(&files.barcodes, 0)?;
    let genes = read_label_column(&files.features, gene_column.index())?;
    let genes_by_cells = read_matrix_market(open_maybe_gz(&files.matrix)?)
        .map_err(|err| with_path(&files.matrix, err))?;
    debug!(
        rows = genes_by_cells.rows(),
        cols = genes_by_cells.cols(),
        entries = genes_by_cells.nnz(),
        "matrix market parsed"
    );

    // 10x stores features as rows and barcodes as columns.
    let matrix = genes_by_cells.to_csc().transpose_into();
    AnnotatedMatrix::without_metadata(matrix, cells, genes)
}

/// Read a coordinate Matrix Market file into zero-based triplets.
/// Duplicate coordinates are summed once the triplets are compressed.
pub fn read_matrix_market<R: Read>(mut reader: R) -> Result<TriMat<f64>, ConvertError> {
    let mut text = String::new();
    reader
        .read_to_string(&mut text)
        .map_err(|err| ConvertError::InvalidInput(err.to_string()))?;
    check_coordinates(&text)?;
    sprs::io::read_matrix_market_from_bufread(&mut text.as_bytes())
        .map_err(|err| ConvertError::InvalidInput(format!("bad Matrix Market data: {err}")))
}

/// Validate the size line against the entries actually present before
/// `sprs` sizes its buffers from it.
fn check_coordinates(text: &str) -> Result<(), ConvertError> {
    let banner = text.lines().next().unwrap_or_default();
    if !banner.to_ascii_lowercase().starts_with("%%matrixmarket matrix coordinate") {
        return Err(ConvertError::InvalidInput(format!(
            "not a coordinate Matrix Market header: {banner}"
        )));
    }

    let mut lines = text
        .lines()
        .enumerate()
        .map(|(idx, line)| (idx + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty() && !line.starts_with('%'));
    let (line_no, size) = lines
        .next()
        .ok_or_else(|| ConvertError::InvalidInput("missing size line".to_string()))?;
    let [rows, cols, nnz] = size.split_whitespace().collect::<Vec<_>>()[..] else {
        return Err(ConvertError::InvalidInput(format!("bad size line: {size}")));
    };
    let nrows = parse_index(rows, line_no)?;
    let ncols = parse_index(cols, line_no)?;
    let nnz = parse_index(nnz, line_no)?;

    let mut entries = 0usize;
    for (line_no, line) in lines {
        let mut fields = line.split_whitespace();
        let row = parse_index(fields.next().unwrap_or_default(), line_no)?;
        let col = parse_index(fields.next().unwrap_or_default(), line_no)?;
        if row == 0 || col == 0 || row > nrows || col > ncols {
            return Err(ConvertError::InvalidInput(format!(
                "entry ({row}, {col}) outside {nrows}x{ncols} on line {line_no}"
            )));
        }
        entries += 1;
    }
    if entries != nnz {
        return Err(ConvertError::InvalidInput(format!(
            "size line declares {nnz} entries, found {entries}"
        )));
    }
    Ok(())
}

/// Read a delimited metadata table. The first column holds cell ids; the
/// header names the remaining columns. Column types are inferred: integer,
/// float, boolean, otherwise text. Columns listed in `factors` become
/// categorical.
pub fn read_metadata_table(
    path: &Utf8Path,
    factors: &[String],
) -> Result<MetadataTable, ConvertError> {
    let delimiter = if is_tab_separated(path) { b'\t' } else { b',' };
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .from_reader(open_maybe_gz(path)?);

    let headers = reader
        .headers()
        .map_err(|err| ConvertError::InvalidInput(format!("{path}: {err}")))?
        .iter()
        .map(str::to_string)
        .collect::<Vec<_>>();
    if headers.is_empty() {
        return Err(ConvertError::InvalidInput(format!("{path}: no header row")));
    }

    let mut index = Vec::new();
    let mut raw = vec![Vec::<String>::new(); headers.len() - 1];
    for record in reader.records() {
        let record = record.map_err(|err| ConvertError::InvalidInput(format!("{path}: {err}")))?;
        index.push(record.get(0).unwrap_or_default().to_string());
        for (column, value) in raw.iter_mut().zip(record.iter().skip(1)) {
            column.push(value.to_string());
        }
    }

    if let Some(unknown) = factors.iter().find(|name| !headers[1..].contains(name)) {
        return Err(ConvertError::InvalidInput(format!(
            "{path}: no metadata column named '{unknown}'"
        )));
    }

    let mut table = MetadataTable::new(index);
    for (name, values) in headers.into_iter().skip(1).zip(raw) {
        let values = if factors.contains(&name) {
            ColumnValues::categorical(values.iter().map(|value| non_missing(value)))
        } else {
            infer_column(&values)
        };
        table.push_column(name, values)?;
    }
    info!(path = %path, rows = table.len(), columns = table.columns().len(), "metadata loaded");
    Ok(table)
}

pub fn infer_column(values: &[String]) -> ColumnValues {
    let present = values
        .iter()
        .filter_map(|value| non_missing(value))
        .collect::<Vec<_>>();

    // i32::MIN is R's NA_integer_, so a column holding it stays double.
    let fits_integer = |value: &&str| value.parse::<i32>().is_ok_and(|parsed| parsed != i32::MIN);
    if present.iter().all(fits_integer) && !present.is_empty() {
        return ColumnValues::Integer(
            values
                .iter()
                .map(|value| non_missing(value).and_then(|value| value.parse().ok()))
                .collect(),
        );
    }
    if present.iter().all(|value| value.parse::<f64>().is_ok()) && !present.is_empty() {
        return ColumnValues::Float(
            values
                .iter()
                .map(|value| {
                    non_missing(value)
                        .and_then(|value| value.parse().ok())
                        .unwrap_or(f64::NAN)
                })
                .collect(),
        );
    }
    if present.iter().all(|value| parse_bool(value).is_some()) && !present.is_empty() {
        return ColumnValues::Boolean(
            values
                .iter()
                .map(|value| non_missing(value).and_then(parse_bool))
                .collect(),
        );
    }
    ColumnValues::Text(
        values
            .iter()
            .map(|value| non_missing(value).map(str::to_string))
            .collect(),
    )
}

fn non_missing(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    (!MISSING_TOKENS.contains(&trimmed)).then_some(trimmed)
}

fn parse_bool(value: &str) -> Option<bool> {
    match value {
        "true" | "TRUE" | "True" => Some(true),
        "false" | "FALSE" | "False" => Some(false),
        _ => None,
    }
}

fn read_label_column(path: &Utf8Path, column: usize) -> Result<Vec<String>, ConvertError> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .flexible(true)
        .from_reader(open_maybe_gz(path)?);
    reader
        .records()
        .map(|record| {
            let record =
                record.map_err(|err| ConvertError::InvalidInput(format!("{path}: {err}")))?;
            // Single-column files fall back to their only column.
            record
                .get(column)
                .or_else(|| record.get(0))
                .map(str::to_string)
                .ok_or_else(|| ConvertError::InvalidInput(format!("{path}: empty line")))
        })
        .collect()
}

fn open_maybe_gz(path: &Utf8Path) -> Result<Box<dyn Read>, ConvertError> {
    let file = File::open(path.as_std_path())
        .map_err(|err| ConvertError::Filesystem(format!("open {path}: {err}")))?;
    if path.extension() == Some("gz") {
        Ok(Box::new(GzDecoder::new(BufReader::new(file))))
    } else {
        Ok(Box::new(BufReader::new(file)))
    }
}

fn find_variant(dir: &Utf8Path, names: &[&str]) -> Result<Utf8PathBuf, ConvertError> {
    names
        .iter()
        .flat_map(|name| [dir.join(format!("{name}.gz")), dir.join(name)])
        .find(|path| path.as_std_path().is_file())
        .ok_or_else(|| {
            ConvertError::InvalidInput(format!("{dir}: missing {}", names.join(" or ")))
        })
}

fn is_tab_separated(path: &Utf8Path) -> bool {
    let name = path.as_str().trim_end_matches(".gz");
    name.ends_with(".tsv") || name.ends_with(".txt")
}

fn parse_index(value: &str, line_no: usize) -> Result<usize, ConvertError> {
    value
        .parse()
        .map_err(|_| ConvertError::InvalidInput(format!("bad index '{value}' on line {line_no}")))
}

fn with_path(path: &Utf8Path, err: ConvertError) -> ConvertError {
    match err {
        ConvertError::InvalidInput(message) => {
            ConvertError::InvalidInput(format!("{path}: {message}"))
        }
        other => other,
    }
}
