//! In-memory model of the R values this crate reads and writes.
//!
//! Only the value kinds that show up in single-cell data exchange are
//! modelled: atomic vectors, generic lists, symbols and S4 objects, each
//! carrying an ordered attribute list. Missing values follow R's conventions:
//! `None` for logical, integer and character elements, and the `NA_real_` bit
//! pattern for doubles.

use std::fmt;

/// Low word R uses to tell `NA_real_` apart from an ordinary NaN.
const NA_REAL_LOW_WORD: u64 = 1954;

pub const NA_INTEGER: i32 = i32::MIN;

pub fn na_real() -> f64 {
    f64::from_bits(0x7FF0_0000_0000_0000 | NA_REAL_LOW_WORD)
}

pub fn is_na_real(value: f64) -> bool {
    value.is_nan() && (value.to_bits() & 0xFFFF_FFFF) == NA_REAL_LOW_WORD
}

#[derive(Debug, Clone)]
pub enum RValue {
    Null,
    Symbol(String),
    Logical(Vec<Option<bool>>),
    Integer(Vec<Option<i32>>),
    Real(Vec<f64>),
    Character(Vec<Option<String>>),
    List(Vec<RObject>),
    S4,
}

impl PartialEq for RValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (RValue::Null, RValue::Null) | (RValue::S4, RValue::S4) => true,
            (RValue::Symbol(a), RValue::Symbol(b)) => a == b,
            (RValue::Logical(a), RValue::Logical(b)) => a == b,
            (RValue::Integer(a), RValue::Integer(b)) => a == b,
            (RValue::Real(a), RValue::Real(b)) => {
                a.len() == b.len()
                    && a
                        .iter()
                        .zip(b)
                        .all(|(x, y)| x == y || x.to_bits() == y.to_bits())
            }
            (RValue::Character(a), RValue::Character(b)) => a == b,
            (RValue::List(a), RValue::List(b)) => a == b,
            _ => false,
        }
    }
}

impl RValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            RValue::Null => "NULL",
            RValue::Symbol(_) => "symbol",
            RValue::Logical(_) => "logical",
            RValue::Integer(_) => "integer",
            RValue::Real(_) => "double",
            RValue::Character(_) => "character",
            RValue::List(_) => "list",
            RValue::S4 => "S4",
        }
    }

    pub fn len(&self) -> usize {
        match self {
            RValue::Null | RValue::S4 => 0,
            RValue::Symbol(_) => 1,
            RValue::Logical(values) => values.len(),
            RValue::Integer(values) => values.len(),
            RValue::Real(values) => values.len(),
            RValue::Character(values) => values.len(),
            RValue::List(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RObject {
    pub value: RValue,
    pub attributes: Vec<(String, RObject)>,
}

impl From<RValue> for RObject {
    fn from(value: RValue) -> Self {
        Self {
            value,
            attributes: Vec::new(),
        }
    }
}

impl RObject {
    pub fn null() -> Self {
        RValue::Null.into()
    }

    pub fn symbol(name: impl Into<String>) -> Self {
        RValue::Symbol(name.into()).into()
    }

    pub fn logical(values: Vec<Option<bool>>) -> Self {
        RValue::Logical(values).into()
    }

    pub fn integer(values: Vec<Option<i32>>) -> Self {
        RValue::Integer(values).into()
    }

    pub fn real(values: Vec<f64>) -> Self {
        RValue::Real(values).into()
    }

    pub fn character<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        RValue::Character(values.into_iter().map(|value| Some(value.into())).collect()).into()
    }

    pub fn scalar_string(value: impl Into<String>) -> Self {
        Self::character([value.into()])
    }

    pub fn list(values: Vec<RObject>) -> Self {
        RValue::List(values).into()
    }

    /// `list(a = ..., b = ...)`
    pub fn named_list(entries: Vec<(String, RObject)>) -> Self {
        let (names, values): (Vec<_>, Vec<_>) = entries.into_iter().unzip();
        Self::list(values).with_attr("names", Self::character(names))
    }

    /// Numeric matrix from column-major values with `dimnames`.
    pub fn numeric_matrix(
        nrow: usize,
        ncol: usize,
        column_major: Vec<f64>,
        row_names: Vec<String>,
        col_names: Vec<String>,
    ) -> Self {
        Self::real(column_major)
            .with_attr(
                "dim",
                Self::integer(vec![Some(nrow as i32), Some(ncol as i32)]),
            )
            .with_attr(
                "dimnames",
                Self::list(vec![Self::character(row_names), Self::character(col_names)]),
            )
    }

    /// `factor()` from zero-based codes.
    pub fn factor(codes: &[Option<u32>], levels: Vec<String>) -> Self {
        Self::integer(
            codes
                .iter()
                .map(|code| code.map(|code| code as i32 + 1))
                .collect(),
        )
        .with_attr("levels", Self::character(levels))
        .with_attr("class", Self::scalar_string("factor"))
    }

    pub fn data_frame(columns: Vec<(String, RObject)>, row_names: Vec<String>) -> Self {
        let (names, values): (Vec<_>, Vec<_>) = columns.into_iter().unzip();
        Self::list(values)
            .with_attr("names", Self::character(names))
            .with_attr("class", Self::scalar_string("data.frame"))
            .with_attr("row.names", Self::character(row_names))
    }

    /// Compact `row.names` for a data frame with `n` unnamed rows.
    pub fn compact_row_names(n: usize) -> Self {
        Self::integer(vec![None, Some(-(n as i32))])
    }

    pub fn with_attr(mut self, name: impl Into<String>, value: RObject) -> Self {
        self.set_attr(name, value);
        self
    }

    pub fn set_attr(&mut self, name: impl Into<String>, value: RObject) {
        let name = name.into();
        if let Some(slot) = self.attributes.iter_mut().find(|(key, _)| *key == name) {
            slot.1 = value;
        } else {
            self.attributes.push((name, value));
        }
    }

    pub fn attr(&self, name: &str) -> Option<&RObject> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }

    /// Whether R would flag this value as an object (it has a class).
    pub fn is_object(&self) -> bool {
        self.attr("class").is_some()
    }

    pub fn len(&self) -> usize {
        self.value.len()
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }

    pub fn as_strings(&self) -> Option<&[Option<String>]> {
        match &self.value {
            RValue::Character(values) => Some(values),
            _ => None,
        }
    }

    pub fn as_integers(&self) -> Option<&[Option<i32>]> {
        match &self.value {
            RValue::Integer(values) => Some(values),
            _ => None,
        }
    }

    pub fn as_reals(&self) -> Option<&[f64]> {
        match &self.value {
            RValue::Real(values) => Some(values),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[RObject]> {
        match &self.value {
            RValue::List(values) => Some(values),
            _ => None,
        }
    }

    pub fn class(&self) -> Vec<String> {
        self.attr("class")
            .and_then(RObject::as_strings)
            .map(|values| values.iter().flatten().cloned().collect())
            .unwrap_or_default()
    }

    pub fn inherits(&self, class: &str) -> bool {
        self.class().iter().any(|value| value == class)
    }

    pub fn names(&self) -> Option<Vec<String>> {
        self.attr("names")
            .and_then(RObject::as_strings)
            .map(|values| values.iter().map(|v| v.clone().unwrap_or_default()).collect())
    }

    /// Element of a named list.
    pub fn get(&self, name: &str) -> Option<&RObject> {
        let names = self.names()?;
        let position = names.iter().position(|candidate| candidate == name)?;
        self.as_list()?.get(position)
    }

    pub fn dim(&self) -> Option<Vec<usize>> {
        let values = self.attr("dim")?.as_integers()?;
        values
            .iter()
            .map(|value| value.and_then(|value| usize::try_from(value).ok()))
            .collect()
    }

    /// Row names of a data frame, expanding the compact `c(NA, -n)` form.
    pub fn row_names(&self) -> Option<Vec<String>> {
        let attr = self.attr("row.names")?;
        match &attr.value {
            RValue::Character(values) => {
                Some(values.iter().map(|v| v.clone().unwrap_or_default()).collect())
            }
            RValue::Integer(values) => match values.as_slice() {
                [None, Some(n)] => Some(
                    (1..=n.unsigned_abs() as usize)
                        .map(|idx| idx.to_string())
                        .collect(),
                ),
                _ => Some(
                    values
                        .iter()
                        .map(|value| value.map(|v| v.to_string()).unwrap_or_default())
                        .collect(),
                ),
            },
            _ => None,
        }
    }

    /// `dimnames(x)[[axis]]`
    pub fn dimnames(&self, axis: usize) -> Option<Vec<String>> {
        let names = self.attr("dimnames")?.as_list()?.get(axis)?;
        names
            .as_strings()
            .map(|values| values.iter().map(|v| v.clone().unwrap_or_default()).collect())
    }
}

impl fmt::Display for RObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let RValue::S4 = self.value {
            let package = self
                .attr("class")
                .and_then(|class| class.attr("package"))
                .and_then(RObject::as_strings)
                .and_then(|values| values.first().cloned().flatten());
            let class = self.class().join("/");
            return match package {
                Some(package) => write!(f, "S4 object of class {class} (package {package})"),
                None => write!(f, "S4 object of class {class}"),
            };
        }
        if self.inherits("data.frame") {
            let rows = self.row_names().map(|names| names.len()).unwrap_or(0);
            return write!(f, "data.frame {rows} x {}", self.len());
        }
        if self.inherits("factor") {
            let levels = self.attr("levels").map(RObject::len).unwrap_or(0);
            return write!(f, "factor[{}] with {levels} levels", self.len());
        }
        if let Some(dim) = self.dim() {
            let dims = dim
                .iter()
                .map(|value| value.to_string())
                .collect::<Vec<_>>()
                .join(" x ");
            return write!(f, "{} matrix {dims}", self.value.type_name());
        }
        match &self.value {
            RValue::Null => write!(f, "NULL"),
            RValue::Symbol(name) => write!(f, "symbol `{name}`"),
            other => write!(f, "{}[{}]", other.type_name(), other.len()),
        }
    }
}
