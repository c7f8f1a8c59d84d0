//! R serialization (`saveRDS`/`readRDS`) in the XDR big-endian format.
//!
//! Files are written as format version 3 (or 2 on request), optionally gzip
//! compressed the way `saveRDS` does by default. The reader accepts gzip or
//! uncompressed input and covers the value kinds in [`crate::robject`], plus
//! references and the ALTREP sequences R emits for things like `1:n`.

mod read;
mod write;

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};

use camino::Utf8Path;
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use tracing::debug;

use crate::domain::FormatVersion;
use crate::error::ConvertError;
use crate::robject::RObject;
use crate::store;

pub use read::Deserializer;
pub use write::Serializer;

pub(crate) const NILSXP: i32 = 0;
pub(crate) const SYMSXP: i32 = 1;
pub(crate) const LISTSXP: i32 = 2;
pub(crate) const CHARSXP: i32 = 9;
pub(crate) const LGLSXP: i32 = 10;
pub(crate) const INTSXP: i32 = 13;
pub(crate) const REALSXP: i32 = 14;
pub(crate) const STRSXP: i32 = 16;
pub(crate) const VECSXP: i32 = 19;
pub(crate) const EXPRSXP: i32 = 20;
pub(crate) const S4SXP: i32 = 25;

pub(crate) const ALTREP_SXP: i32 = 238;
pub(crate) const NILVALUE_SXP: i32 = 254;
pub(crate) const REFSXP: i32 = 255;

pub(crate) const IS_OBJECT_BIT: i32 = 1 << 8;
pub(crate) const HAS_ATTR_BIT: i32 = 1 << 9;
pub(crate) const HAS_TAG_BIT: i32 = 1 << 10;

pub(crate) const LATIN1_MASK: i32 = 1 << 2;
pub(crate) const UTF8_MASK: i32 = 1 << 3;
pub(crate) const S4_OBJECT_MASK: i32 = 1 << 4;
pub(crate) const ASCII_MASK: i32 = 1 << 6;

pub(crate) const MAX_PACKED_INDEX: usize = (i32::MAX >> 8) as usize;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RdsOptions {
    pub version: FormatVersion,
    pub compress: bool,
}

impl Default for RdsOptions {
    fn default() -> Self {
        Self {
            version: FormatVersion::V3,
            compress: true,
        }
    }
}

/// Version number as R packs it: `major * 65536 + minor * 256 + patch`.
pub(crate) const fn r_version(major: i32, minor: i32, patch: i32) -> i32 {
    (major << 16) | (minor << 8) | patch
}

/// Unpack an R version number into `major.minor.patch`.
pub fn format_r_version(packed: i32) -> String {
    format!("{}.{}.{}", packed >> 16, (packed >> 8) & 0xff, packed & 0xff)
}

pub fn write_rds<W: Write>(
    writer: W,
    object: &RObject,
    options: RdsOptions,
) -> Result<(), ConvertError> {
    if options.compress {
        let mut encoder = GzEncoder::new(writer, Compression::default());
        Serializer::new(&mut encoder, options.version).serialize(object)?;
        let mut inner = encoder
            .finish()
            .map_err(|err| ConvertError::RdsEncode(err.to_string()))?;
        inner
            .flush()
            .map_err(|err| ConvertError::RdsEncode(err.to_string()))
    } else {
        let mut writer = writer;
        Serializer::new(&mut writer, options.version).serialize(object)?;
        writer
            .flush()
            .map_err(|err| ConvertError::RdsEncode(err.to_string()))
    }
}

pub fn to_rds_bytes(object: &RObject, options: RdsOptions) -> Result<Vec<u8>, ConvertError> {
    let mut out = Vec::new();
    write_rds(&mut out, object, options)?;
    Ok(out)
}

/// Write `object` to `path`, replacing any existing file only once the new
/// content is complete.
pub fn save_rds(
    path: &Utf8Path,
    object: &RObject,
    options: RdsOptions,
) -> Result<(), ConvertError> {
    store::write_atomic(path, |file| {
        let writer = BufWriter::new(file);
        write_rds(writer, object, options)
    })?;
    debug!(path = %path, compress = options.compress, version = %options.version, "rds written");
    Ok(())
}

pub fn read_rds<R: Read>(reader: R) -> Result<RObject, ConvertError> {
    let mut reader = BufReader::new(reader);
    let mut magic = [0u8; 2];
    let peeked = peek(&mut reader, &mut magic)?;
    if peeked == 2 && magic == GZIP_MAGIC {
        Deserializer::new(GzDecoder::new(Prefixed::new(&magic[..peeked], reader))).deserialize()
    } else {
        Deserializer::new(Prefixed::new(&magic[..peeked], reader)).deserialize()
    }
}

pub fn from_rds_bytes(bytes: &[u8]) -> Result<RObject, ConvertError> {
    read_rds(bytes)
}

pub fn load_rds(path: &Utf8Path) -> Result<RObject, ConvertError> {
    let file = File::open(path.as_std_path())
        .map_err(|err| ConvertError::Filesystem(format!("open {path}: {err}")))?;
    read_rds(file)
}

fn peek<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<usize, ConvertError> {
    let mut filled = 0;
    while filled < buf.len() {
        let read = reader
            .read(&mut buf[filled..])
            .map_err(|err| ConvertError::RdsDecode(err.to_string()))?;
        if read == 0 {
            break;
        }
        filled += read;
    }
    Ok(filled)
}

/// Reader that replays already-consumed bytes before the rest of the stream.
struct Prefixed<'a, R> {
    prefix: &'a [u8],
    inner: R,
}

impl<'a, R> Prefixed<'a, R> {
    fn new(prefix: &'a [u8], inner: R) -> Self {
        Self { prefix, inner }
    }
}

impl<R: Read> Read for Prefixed<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if !self.prefix.is_empty() {
            let n = self.prefix.len().min(buf.len());
            buf[..n].copy_from_slice(&self.prefix[..n]);
            self.prefix = &self.prefix[n..];
            return Ok(n);
        }
        self.inner.read(buf)
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::robject::{RValue, is_na_real, na_real};

    fn roundtrip(object: &RObject, options: RdsOptions) -> RObject {
        from_rds_bytes(&to_rds_bytes(object, options).unwrap()).unwrap()
    }

    #[test]
    fn r_version_packing() {
        assert_eq!(r_version(3, 5, 0), 0x030500);
        assert_eq!(format_r_version(r_version(4, 4, 1)), "4.4.1");
    }

    #[test]
    fn compressed_output_is_gzip() {
        let bytes = to_rds_bytes(&RObject::null(), RdsOptions::default()).unwrap();
        assert_eq!(&bytes[..2], &GZIP_MAGIC);
    }

    #[test]
    fn uncompressed_header_v3() {
        let options = RdsOptions {
            compress: false,
            ..RdsOptions::default()
        };
        let bytes = to_rds_bytes(&RObject::null(), options).unwrap();
        assert_eq!(&bytes[..2], b"X\n");
        assert_eq!(&bytes[2..6], &3i32.to_be_bytes());
        assert_eq!(&bytes[14..18], &5i32.to_be_bytes());
        assert_eq!(&bytes[18..23], b"UTF-8");
        assert_eq!(&bytes[23..27], &NILVALUE_SXP.to_be_bytes());
        assert_eq!(bytes.len(), 27);
    }

    #[test]
    fn uncompressed_header_v2_has_no_encoding() {
        let options = RdsOptions {
            version: FormatVersion::V2,
            compress: false,
        };
        let bytes = to_rds_bytes(&RObject::null(), options).unwrap();
        assert_eq!(&bytes[2..6], &2i32.to_be_bytes());
        assert_eq!(&bytes[14..18], &NILVALUE_SXP.to_be_bytes());
    }

    #[test]
    fn ascii_string_flags() {
        let options = RdsOptions {
            compress: false,
            ..RdsOptions::default()
        };
        let bytes = to_rds_bytes(&RObject::scalar_string("a"), options).unwrap();
        let body = &bytes[23..];
        assert_eq!(&body[..4], &STRSXP.to_be_bytes());
        assert_eq!(&body[4..8], &1i32.to_be_bytes());
        assert_eq!(&body[8..12], &(CHARSXP | (ASCII_MASK << 12)).to_be_bytes());
        assert_eq!(&body[12..16], &1i32.to_be_bytes());
        assert_eq!(body[16], b'a');
    }

    #[test]
    fn missing_values_survive() {
        let object = RObject::named_list(vec![
            ("lgl".to_string(), RObject::logical(vec![Some(true), None, Some(false)])),
            ("int".to_string(), RObject::integer(vec![Some(-3), None])),
            ("dbl".to_string(), RObject::real(vec![1.5, na_real(), f64::NAN])),
            (
                "chr".to_string(),
                RObject::from(RValue::Character(vec![Some("é".to_string()), None])),
            ),
        ]);
        let decoded = roundtrip(&object, RdsOptions::default());
        assert_eq!(decoded, object);
        let dbl = decoded.get("dbl").unwrap().as_reals().unwrap();
        assert!(is_na_real(dbl[1]));
        assert!(dbl[2].is_nan() && !is_na_real(dbl[2]));
    }

    #[test]
    fn repeated_attribute_names_use_references() {
        let object = RObject::list(vec![
            RObject::real(vec![1.0]).with_attr("names", RObject::scalar_string("a")),
            RObject::real(vec![2.0]).with_attr("names", RObject::scalar_string("b")),
        ]);
        let options = RdsOptions {
            compress: false,
            ..RdsOptions::default()
        };
        let bytes = to_rds_bytes(&object, options).unwrap();
        let packed_ref = ((1 << 8) | REFSXP).to_be_bytes();
        assert!(bytes.windows(4).any(|window| window == packed_ref));
        assert_eq!(from_rds_bytes(&bytes).unwrap(), object);
    }

    #[test]
    fn data_frame_with_factor() {
        let object = RObject::data_frame(
            vec![
                ("n".to_string(), RObject::integer(vec![Some(1), Some(2)])),
                (
                    "cluster".to_string(),
                    RObject::factor(&[Some(1), Some(0)], vec!["a".into(), "b".into()]),
                ),
            ],
            vec!["c1".into(), "c2".into()],
        );
        let decoded = roundtrip(&object, RdsOptions::default());
        assert!(decoded.inherits("data.frame"));
        assert!(decoded.get("cluster").unwrap().inherits("factor"));
        assert_eq!(decoded.row_names().unwrap(), vec!["c1", "c2"]);
    }

    #[test]
    fn s4_object_roundtrip() {
        let class = RObject::scalar_string("Seurat")
            .with_attr("package", RObject::scalar_string("SeuratObject"));
        let object = RObject::from(RValue::S4)
            .with_attr("project.name", RObject::scalar_string("pbmc"))
            .with_attr("class", class);
        let decoded = roundtrip(&object, RdsOptions::default());
        assert_eq!(decoded, object);
        assert_eq!(
            decoded.to_string(),
            "S4 object of class Seurat (package SeuratObject)"
        );
    }

    #[test]
    fn rejects_ascii_format() {
        let err = from_rds_bytes(b"A\n3\n").unwrap_err();
        assert_matches!(err, ConvertError::UnsupportedRds(_));
    }

    #[test]
    fn rejects_truncated_input() {
        let options = RdsOptions {
            compress: false,
            ..RdsOptions::default()
        };
        let bytes = to_rds_bytes(&RObject::real(vec![1.0, 2.0]), options).unwrap();
        let err = from_rds_bytes(&bytes[..bytes.len() - 3]).unwrap_err();
        assert_matches!(err, ConvertError::RdsDecode(_));
    }

    #[test]
    fn rejects_length_beyond_stream() {
        // v2 header, then a REALSXP claiming a long-vector length.
        let mut bytes = b"X\n".to_vec();
        for word in [2, 0x040401, 0x020300, REALSXP, -1, 0x7fff_ffff, -1] {
            bytes.extend_from_slice(&word.to_be_bytes());
        }
        bytes.extend_from_slice(&1.0f64.to_be_bytes());
        let err = from_rds_bytes(&bytes).unwrap_err();
        assert_matches!(err, ConvertError::RdsDecode(_));
    }
}
