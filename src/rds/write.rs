use std::collections::HashMap;
use std::io::Write;

use crate::domain::FormatVersion;
use crate::error::ConvertError;
use crate::robject::{NA_INTEGER, RObject, RValue};

use super::{
    ASCII_MASK, CHARSXP, HAS_ATTR_BIT, HAS_TAG_BIT, INTSXP, IS_OBJECT_BIT, LGLSXP, LISTSXP,
    MAX_PACKED_INDEX, NILVALUE_SXP, REALSXP, REFSXP, S4_OBJECT_MASK, S4SXP, STRSXP, SYMSXP,
    UTF8_MASK, VECSXP, r_version,
};

/// R version recorded as the writer of the stream.
const WRITER_VERSION: i32 = r_version(4, 4, 1);

pub struct Serializer<W: Write> {
    out: W,
    version: FormatVersion,
    symbols: HashMap<String, usize>,
}

impl<W: Write> Serializer<W> {
    pub fn new(out: W, version: FormatVersion) -> Self {
        Self {
            out,
            version,
            symbols: HashMap::new(),
        }
    }

    /// Header followed by the object.
    pub fn serialize(mut self, object: &RObject) -> Result<(), ConvertError> {
        self.write_header()?;
        self.write_item(object)
    }

    fn write_header(&mut self) -> Result<(), ConvertError> {
        self.write_bytes(b"X\n")?;
        self.write_i32(self.version.as_i32())?;
        self.write_i32(WRITER_VERSION)?;
        match self.version {
            FormatVersion::V2 => self.write_i32(r_version(2, 3, 0)),
            FormatVersion::V3 => {
                self.write_i32(r_version(3, 5, 0))?;
                let encoding = b"UTF-8";
                self.write_i32(encoding.len() as i32)?;
                self.write_bytes(encoding)
            }
        }
    }

    fn write_item(&mut self, object: &RObject) -> Result<(), ConvertError> {
        let has_attr = !object.attributes.is_empty();
        let is_object = object.is_object();
        match &object.value {
            // R_NilValue is a singleton and cannot carry attributes.
            RValue::Null => self.write_i32(NILVALUE_SXP),
            RValue::Symbol(name) => self.write_symbol(name),
            RValue::S4 => {
                self.write_i32(pack_flags(S4SXP, S4_OBJECT_MASK, true, has_attr, false))?;
                self.write_attributes(object)
            }
            RValue::Logical(values) => {
                self.write_i32(pack_flags(LGLSXP, 0, is_object, has_attr, false))?;
                self.write_length(values.len())?;
                for value in values {
                    self.write_i32(match value {
                        Some(true) => 1,
                        Some(false) => 0,
                        None => NA_INTEGER,
                    })?;
                }
                self.write_attributes(object)
            }
            RValue::Integer(values) => {
                self.write_i32(pack_flags(INTSXP, 0, is_object, has_attr, false))?;
                self.write_length(values.len())?;
                for value in values {
                    self.write_i32(value.unwrap_or(NA_INTEGER))?;
                }
                self.write_attributes(object)
            }
            RValue::Real(values) => {
                self.write_i32(pack_flags(REALSXP, 0, is_object, has_attr, false))?;
                self.write_length(values.len())?;
                for value in values {
                    self.write_bytes(&value.to_be_bytes())?;
                }
                self.write_attributes(object)
            }
            RValue::Character(values) => {
                self.write_i32(pack_flags(STRSXP, 0, is_object, has_attr, false))?;
                self.write_length(values.len())?;
                for value in values {
                    self.write_charsxp(value.as_deref())?;
                }
                self.write_attributes(object)
            }
            RValue::List(values) => {
                self.write_i32(pack_flags(VECSXP, 0, is_object, has_attr, false))?;
                self.write_length(values.len())?;
                for value in values {
                    self.write_item(value)?;
                }
                self.write_attributes(object)
            }
        }
    }

    /// Attributes as a tagged pairlist terminated by `NILVALUE_SXP`.
    fn write_attributes(&mut self, object: &RObject) -> Result<(), ConvertError> {
        if object.attributes.is_empty() {
            return Ok(());
        }
        for (name, value) in &object.attributes {
            self.write_i32(pack_flags(LISTSXP, 0, false, false, true))?;
            self.write_symbol(name)?;
            self.write_item(value)?;
        }
        self.write_i32(NILVALUE_SXP)
    }

    fn write_symbol(&mut self, name: &str) -> Result<(), ConvertError> {
        if let Some(&index) = self.symbols.get(name) {
            return self.write_ref(index);
        }
        let index = self.symbols.len() + 1;
        self.symbols.insert(name.to_string(), index);
        self.write_i32(SYMSXP)?;
        self.write_charsxp(Some(name))
    }

    fn write_ref(&mut self, index: usize) -> Result<(), ConvertError> {
        if index > MAX_PACKED_INDEX {
            self.write_i32(REFSXP)?;
            self.write_i32(index as i32)
        } else {
            self.write_i32(((index as i32) << 8) | REFSXP)
        }
    }

    fn write_charsxp(&mut self, value: Option<&str>) -> Result<(), ConvertError> {
        let Some(value) = value else {
            self.write_i32(CHARSXP)?;
            return self.write_i32(-1);
        };
        let encoding = if value.is_ascii() {
            ASCII_MASK
        } else {
            UTF8_MASK
        };
        self.write_i32(pack_flags(CHARSXP, encoding, false, false, false))?;
        let len = i32::try_from(value.len()).map_err(|_| {
            ConvertError::RdsEncode(format!("string of {} bytes is too long", value.len()))
        })?;
        self.write_i32(len)?;
        self.write_bytes(value.as_bytes())
    }

    /// Lengths above `i32::MAX` use R's long-vector form: -1, then the upper
    /// and lower 32 bits.
    fn write_length(&mut self, len: usize) -> Result<(), ConvertError> {
        match i32::try_from(len) {
            Ok(len) => self.write_i32(len),
            Err(_) => {
                let len = len as u64;
                self.write_i32(-1)?;
                self.write_i32((len >> 32) as i32)?;
                self.write_i32((len & 0xFFFF_FFFF) as u32 as i32)
            }
        }
    }

    fn write_i32(&mut self, value: i32) -> Result<(), ConvertError> {
        self.write_bytes(&value.to_be_bytes())
    }

    fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), ConvertError> {
        self.out
            .write_all(bytes)
            .map_err(|err| ConvertError::RdsEncode(err.to_string()))
    }
}

fn pack_flags(kind: i32, levels: i32, is_object: bool, has_attr: bool, has_tag: bool) -> i32 {
    let mut flags = kind | (levels << 12);
    if is_object {
        flags |= IS_OBJECT_BIT;
    }
    if has_attr {
        flags |= HAS_ATTR_BIT;
    }
    if has_tag {
        flags |= HAS_TAG_BIT;
    }
    flags
}
