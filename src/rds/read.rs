use std::io::Read;

use tracing::debug;

use crate::error::ConvertError;
use crate::robject::{NA_INTEGER, RObject, RValue};

use super::{
    ALTREP_SXP, CHARSXP, EXPRSXP, HAS_ATTR_BIT, HAS_TAG_BIT, INTSXP, LATIN1_MASK, LGLSXP, LISTSXP,
    NILSXP, NILVALUE_SXP, REALSXP, REFSXP, S4SXP, STRSXP, SYMSXP, VECSXP, format_r_version,
};

/// Lengths come from the stream, so buffers grow past this only as values
/// actually arrive.
const PREALLOC_LIMIT: usize = 1 << 16;

/// Largest compact sequence expanded in memory.
const MAX_SEQUENCE_LEN: usize = 1 << 28;

/// Pairlist element: optional tag and value.
type Node = (Option<String>, RObject);

pub struct Deserializer<R: Read> {
    input: R,
    refs: Vec<RObject>,
}

impl<R: Read> Deserializer<R> {
    pub fn new(input: R) -> Self {
        Self {
            input,
            refs: Vec::new(),
        }
    }

    pub fn deserialize(mut self) -> Result<RObject, ConvertError> {
        self.read_header()?;
        self.read_item()
    }

    fn read_header(&mut self) -> Result<(), ConvertError> {
        let mut format = [0u8; 2];
        self.read_exact(&mut format)?;
        match &format {
            b"X\n" => {}
            b"A\n" => return Err(ConvertError::UnsupportedRds("ASCII format".to_string())),
            b"B\n" => {
                return Err(ConvertError::UnsupportedRds("native binary format".to_string()));
            }
            [b'B', b'Z'] => {
                return Err(ConvertError::UnsupportedRds("bzip2 compression".to_string()));
            }
            [0xFD, b'7'] => return Err(ConvertError::UnsupportedRds("xz compression".to_string())),
            _ => return Err(ConvertError::RdsDecode("not an RDS stream".to_string())),
        }

        let version = self.read_i32()?;
        let writer = self.read_i32()?;
        let min_reader = self.read_i32()?;
        let encoding = match version {
            2 => None,
            3 => {
                let len = self.read_i32()?;
                let len = usize::try_from(len)
                    .map_err(|_| ConvertError::RdsDecode(format!("bad encoding length {len}")))?;
                let mut bytes = vec![0u8; len];
                self.read_exact(&mut bytes)?;
                Some(String::from_utf8_lossy(&bytes).into_owned())
            }
            other => {
                return Err(ConvertError::UnsupportedRds(format!(
                    "serialization version {other}"
                )));
            }
        };
        debug!(
            version,
            writer = %format_r_version(writer),
            min_reader = %format_r_version(min_reader),
            encoding = encoding.as_deref().unwrap_or("native"),
            "rds header"
        );
        Ok(())
    }

    fn read_item(&mut self) -> Result<RObject, ConvertError> {
        let flags = self.read_i32()?;
        self.read_item_with_flags(flags)
    }

    fn read_item_with_flags(&mut self, flags: i32) -> Result<RObject, ConvertError> {
        let kind = flags & 0xFF;
        let levels = flags >> 12;
        let has_attr = flags & HAS_ATTR_BIT != 0;

        let value = match kind {
            NILVALUE_SXP | NILSXP => return Ok(RObject::null()),
            REFSXP => {
                let index = match flags >> 8 {
                    0 => self.read_i32()?,
                    packed => packed,
                };
                return usize::try_from(index)
                    .ok()
                    .and_then(|index| index.checked_sub(1))
                    .and_then(|index| self.refs.get(index))
                    .cloned()
                    .ok_or_else(|| ConvertError::RdsDecode(format!("dangling reference {index}")));
            }
            SYMSXP => {
                let name = self.read_symbol_name()?;
                let symbol = RObject::symbol(name);
                self.refs.push(symbol.clone());
                return Ok(symbol);
            }
            LISTSXP => {
                let nodes = self.read_pairlist(flags)?;
                return Ok(pairlist_to_list(nodes));
            }
            ALTREP_SXP => return self.read_altrep(),
            S4SXP => RValue::S4,
            LGLSXP => {
                let len = self.read_length()?;
                let mut values = Vec::with_capacity(len.min(PREALLOC_LIMIT));
                for _ in 0..len {
                    values.push(match self.read_i32()? {
                        NA_INTEGER => None,
                        value => Some(value != 0),
                    });
                }
                RValue::Logical(values)
            }
            INTSXP => {
                let len = self.read_length()?;
                let mut values = Vec::with_capacity(len.min(PREALLOC_LIMIT));
                for _ in 0..len {
                    values.push(match self.read_i32()? {
                        NA_INTEGER => None,
                        value => Some(value),
                    });
                }
                RValue::Integer(values)
            }
            REALSXP => {
                let len = self.read_length()?;
                let mut values = Vec::with_capacity(len.min(PREALLOC_LIMIT));
                for _ in 0..len {
                    values.push(self.read_f64()?);
                }
                RValue::Real(values)
            }
            STRSXP => {
                let len = self.read_length()?;
                let mut values = Vec::with_capacity(len.min(PREALLOC_LIMIT));
                for _ in 0..len {
                    let flags = self.read_i32()?;
                    if flags & 0xFF != CHARSXP {
                        return Err(ConvertError::RdsDecode(format!(
                            "expected CHARSXP in character vector, found type {}",
                            flags & 0xFF
                        )));
                    }
                    values.push(self.read_charsxp(flags >> 12)?);
                }
                RValue::Character(values)
            }
            VECSXP | EXPRSXP => {
                let len = self.read_length()?;
                let mut values = Vec::with_capacity(len.min(PREALLOC_LIMIT));
                for _ in 0..len {
                    values.push(self.read_item()?);
                }
                RValue::List(values)
            }
            CHARSXP => {
                // A bare CHARSXP outside a character vector.
                RValue::Character(vec![self.read_charsxp(levels)?])
            }
            other => {
                return Err(ConvertError::UnsupportedRds(format!("SEXP type {other}")));
            }
        };

        let mut object = RObject::from(value);
        if has_attr {
            object.attributes = self.read_attributes()?;
        }
        Ok(object)
    }

    /// Pairlist starting at a node whose flags were already read. Walks the
    /// CDR chain iteratively.
    fn read_pairlist(&mut self, mut flags: i32) -> Result<Vec<Node>, ConvertError> {
        let mut nodes = Vec::new();
        loop {
            if flags & HAS_ATTR_BIT != 0 {
                // Attributes on individual pairlist cells carry nothing we model.
                self.read_item()?;
            }
            let tag = if flags & HAS_TAG_BIT != 0 {
                match self.read_item()?.value {
                    RValue::Symbol(name) => Some(name),
                    RValue::Null => None,
                    other => {
                        return Err(ConvertError::RdsDecode(format!(
                            "pairlist tag is {}, expected a symbol",
                            other.type_name()
                        )));
                    }
                }
            } else {
                None
            };
            let value = self.read_item()?;
            nodes.push((tag, value));

            flags = self.read_i32()?;
            match flags & 0xFF {
                LISTSXP => continue,
                NILVALUE_SXP => return Ok(nodes),
                other => {
                    return Err(ConvertError::UnsupportedRds(format!(
                        "dotted pairlist ending in type {other}"
                    )));
                }
            }
        }
    }

    fn read_attributes(&mut self) -> Result<Vec<(String, RObject)>, ConvertError> {
        let flags = self.read_i32()?;
        match flags & 0xFF {
            LISTSXP => Ok(self
                .read_pairlist(flags)?
                .into_iter()
                .map(|(tag, value)| (tag.unwrap_or_default(), value))
                .collect()),
            NILVALUE_SXP => Ok(Vec::new()),
            other => Err(ConvertError::RdsDecode(format!(
                "attributes stored as type {other}"
            ))),
        }
    }

    /// ALTREP objects are expanded into ordinary vectors.
    fn read_altrep(&mut self) -> Result<RObject, ConvertError> {
        let info = self.read_item()?;
        let class = info
            .as_list()
            .and_then(|items| items.first())
            .and_then(|item| match &item.value {
                RValue::Symbol(name) => Some(name.clone()),
                _ => None,
            })
            .ok_or_else(|| ConvertError::RdsDecode("ALTREP info without class".to_string()))?;
        let state = self.read_item()?;
        let attributes = match self.read_item()? {
            RObject {
                value: RValue::List(values),
                attributes,
            } => {
                let names = attributes
                    .iter()
                    .find(|(key, _)| key == "names")
                    .and_then(|(_, names)| names.as_strings())
                    .map(|names| names.to_vec())
                    .unwrap_or_default();
                values
                    .into_iter()
                    .enumerate()
                    .map(|(idx, value)| {
                        let name = names.get(idx).cloned().flatten().unwrap_or_default();
                        (name, value)
                    })
                    .collect()
            }
            _ => Vec::new(),
        };

        let value = match class.as_str() {
            "compact_intseq" => {
                let (len, start, step) = sequence_state(&state)?;
                RValue::Integer(
                    (0..len)
                        .map(|idx| Some((start + step * idx as f64) as i32))
                        .collect(),
                )
            }
            "compact_realseq" => {
                let (len, start, step) = sequence_state(&state)?;
                RValue::Real((0..len).map(|idx| start + step * idx as f64).collect())
            }
            "wrap_integer" | "wrap_real" | "wrap_logical" | "wrap_string" | "wrap_list"
            | "wrap_complex" | "wrap_raw" => state
                .as_list()
                .and_then(|items| items.first())
                .map(|inner| inner.value.clone())
                .ok_or_else(|| ConvertError::RdsDecode(format!("{class} without payload")))?,
            "deferred_string" => {
                let source = state
                    .as_list()
                    .and_then(|items| items.first())
                    .ok_or_else(|| {
                        ConvertError::RdsDecode("deferred_string without payload".to_string())
                    })?;
                RValue::Character(deferred_strings(source)?)
            }
            other => {
                return Err(ConvertError::UnsupportedRds(format!("ALTREP class {other}")));
            }
        };
        Ok(RObject { value, attributes })
    }

    fn read_symbol_name(&mut self) -> Result<String, ConvertError> {
        let flags = self.read_i32()?;
        if flags & 0xFF != CHARSXP {
            return Err(ConvertError::RdsDecode(format!(
                "symbol name stored as type {}",
                flags & 0xFF
            )));
        }
        self.read_charsxp(flags >> 12)?
            .ok_or_else(|| ConvertError::RdsDecode("symbol with NA name".to_string()))
    }

    fn read_charsxp(&mut self, levels: i32) -> Result<Option<String>, ConvertError> {
        let len = self.read_i32()?;
        if len == -1 {
            return Ok(None);
        }
        let len = usize::try_from(len)
            .map_err(|_| ConvertError::RdsDecode(format!("bad string length {len}")))?;
        let mut bytes = Vec::with_capacity(len.min(PREALLOC_LIMIT));
        (&mut self.input)
            .take(len as u64)
            .read_to_end(&mut bytes)
            .map_err(|err| ConvertError::RdsDecode(err.to_string()))?;
        if bytes.len() != len {
            return Err(ConvertError::RdsDecode(format!(
                "string of {len} bytes cut short after {}",
                bytes.len()
            )));
        }
        if levels & LATIN1_MASK != 0 {
            return Ok(Some(bytes.iter().map(|&byte| byte as char).collect()));
        }
        String::from_utf8(bytes)
            .map(Some)
            .map_err(|err| ConvertError::RdsDecode(format!("invalid UTF-8 string: {err}")))
    }

    fn read_length(&mut self) -> Result<usize, ConvertError> {
        let len = self.read_i32()?;
        if len == -1 {
            let upper = self.read_i32()? as u32 as u64;
            let lower = self.read_i32()? as u32 as u64;
            return usize::try_from((upper << 32) | lower).map_err(|_| {
                ConvertError::RdsDecode("vector too long for this platform".to_string())
            });
        }
        usize::try_from(len).map_err(|_| ConvertError::RdsDecode(format!("bad length {len}")))
    }

    fn read_i32(&mut self) -> Result<i32, ConvertError> {
        let mut buf = [0u8; 4];
        self.read_exact(&mut buf)?;
        Ok(i32::from_be_bytes(buf))
    }

    fn read_f64(&mut self) -> Result<f64, ConvertError> {
        let mut buf = [0u8; 8];
        self.read_exact(&mut buf)?;
        Ok(f64::from_be_bytes(buf))
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), ConvertError> {
        self.input
            .read_exact(buf)
            .map_err(|err| ConvertError::RdsDecode(err.to_string()))
    }
}

fn pairlist_to_list(nodes: Vec<Node>) -> RObject {
    let has_tags = nodes.iter().any(|(tag, _)| tag.is_some());
    let (tags, values): (Vec<_>, Vec<_>) = nodes.into_iter().unzip();
    let list = RObject::list(values);
    if has_tags {
        list.with_attr(
            "names",
            RObject::character(tags.into_iter().map(Option::unwrap_or_default)),
        )
    } else {
        list
    }
}

/// `(length, start, step)` of a compact sequence.
fn sequence_state(state: &RObject) -> Result<(usize, f64, f64), ConvertError> {
    let (len, start, step) = match state.as_reals() {
        Some([len, start, step]) => (*len, *start, *step),
        _ => match state.as_integers() {
            Some([Some(len), Some(start), Some(step)]) => {
                (*len as f64, *start as f64, *step as f64)
            }
            _ => {
                return Err(ConvertError::RdsDecode(
                    "compact sequence state must have three elements".to_string(),
                ));
            }
        },
    };
    if !(0.0..=MAX_SEQUENCE_LEN as f64).contains(&len) {
        return Err(ConvertError::RdsDecode(format!(
            "compact sequence length {len} out of range"
        )));
    }
    Ok((len as usize, start, step))
}

fn deferred_strings(source: &RObject) -> Result<Vec<Option<String>>, ConvertError> {
    match &source.value {
        RValue::Integer(values) => Ok(values
            .iter()
            .map(|value| value.map(|value| value.to_string()))
            .collect()),
        RValue::Real(values) => Ok(values
            .iter()
            .map(|value| (!value.is_nan()).then(|| value.to_string()))
            .collect()),
        other => Err(ConvertError::UnsupportedRds(format!(
            "deferred_string over {}",
            other.type_name()
        ))),
    }
}
