use std::collections::HashMap;

use crate::error::ConvertError;

/// Values of one metadata column. Missing entries are `None`, or NaN for floats.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnValues {
    Integer(Vec<Option<i32>>),
    Float(Vec<f64>),
    Boolean(Vec<Option<bool>>),
    Text(Vec<Option<String>>),
    Categorical {
        codes: Vec<Option<u32>>,
        levels: Vec<String>,
    },
}

impl ColumnValues {
    pub fn len(&self) -> usize {
        match self {
            ColumnValues::Integer(values) => values.len(),
            ColumnValues::Float(values) => values.len(),
            ColumnValues::Boolean(values) => values.len(),
            ColumnValues::Text(values) => values.len(),
            ColumnValues::Categorical { codes, .. } => codes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ColumnValues::Integer(_) => "integer",
            ColumnValues::Float(_) => "float",
            ColumnValues::Boolean(_) => "boolean",
            ColumnValues::Text(_) => "text",
            ColumnValues::Categorical { .. } => "categorical",
        }
    }

    /// Encode labels as a categorical column; levels keep first-seen order.
    pub fn categorical<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = Option<S>>,
        S: AsRef<str>,
    {
        let mut levels = Vec::new();
        let mut lookup = HashMap::<String, u32>::new();
        let codes = labels
            .into_iter()
            .map(|label| {
                label.map(|label| {
                    let label = label.as_ref();
                    if let Some(code) = lookup.get(label) {
                        return *code;
                    }
                    let code = levels.len() as u32;
                    levels.push(label.to_string());
                    lookup.insert(label.to_string(), code);
                    code
                })
            })
            .collect();
        ColumnValues::Categorical { codes, levels }
    }

    fn select(&self, order: &[usize]) -> ColumnValues {
        match self {
            ColumnValues::Integer(values) => {
                ColumnValues::Integer(order.iter().map(|&idx| values[idx]).collect())
            }
            ColumnValues::Float(values) => {
                ColumnValues::Float(order.iter().map(|&idx| values[idx]).collect())
            }
            ColumnValues::Boolean(values) => {
                ColumnValues::Boolean(order.iter().map(|&idx| values[idx]).collect())
            }
            ColumnValues::Text(values) => {
                ColumnValues::Text(order.iter().map(|&idx| values[idx].clone()).collect())
            }
            ColumnValues::Categorical { codes, levels } => ColumnValues::Categorical {
                codes: order.iter().map(|&idx| codes[idx]).collect(),
                levels: levels.clone(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MetadataColumn {
    pub name: String,
    pub values: ColumnValues,
}

/// Per-cell attribute table. `index` holds the cell identifier of each row.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MetadataTable {
    index: Vec<String>,
    columns: Vec<MetadataColumn>,
}

impl MetadataTable {
    pub fn new(index: Vec<String>) -> Self {
        Self {
            index,
            columns: Vec::new(),
        }
    }

    pub fn with_column(
        mut self,
        name: impl Into<String>,
        values: ColumnValues,
    ) -> Result<Self, ConvertError> {
        self.push_column(name, values)?;
        Ok(self)
    }

    pub fn push_column(
        &mut self,
        name: impl Into<String>,
        values: ColumnValues,
    ) -> Result<(), ConvertError> {
        let name = name.into();
        if values.len() != self.index.len() {
            return Err(ConvertError::MetadataColumnLength {
                column: name,
                expected: self.index.len(),
                found: values.len(),
            });
        }
        if let ColumnValues::Categorical { codes, levels } = &values {
            if let Some(bad) = codes.iter().flatten().find(|&&code| code as usize >= levels.len()) {
                return Err(ConvertError::InvalidInput(format!(
                    "column '{name}' has code {bad} but only {} levels",
                    levels.len()
                )));
            }
        }
        self.columns.push(MetadataColumn { name, values });
        Ok(())
    }

    pub fn index(&self) -> &[String] {
        &self.index
    }

    pub fn columns(&self) -> &[MetadataColumn] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&MetadataColumn> {
        self.columns.iter().find(|column| column.name == name)
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Reorder rows to follow `cells`. Every cell must have exactly one row;
    /// rows for cells not listed are dropped.
    pub fn align_to(&self, cells: &[String]) -> Result<MetadataTable, ConvertError> {
        let mut positions = HashMap::with_capacity(self.index.len());
        for (idx, id) in self.index.iter().enumerate() {
            if positions.insert(id.as_str(), idx).is_some() {
                return Err(ConvertError::InvalidInput(format!(
                    "duplicate metadata row for cell '{id}'"
                )));
            }
        }

        let order = cells
            .iter()
            .map(|cell| {
                positions.get(cell.as_str()).copied().ok_or_else(|| {
                    ConvertError::InvalidInput(format!("no metadata row for cell '{cell}'"))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(MetadataTable {
            index: cells.to_vec(),
            columns: self
                .columns
                .iter()
                .map(|column| MetadataColumn {
                    name: column.name.clone(),
                    values: column.values.select(&order),
                })
                .collect(),
        })
    }
}
