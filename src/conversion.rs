//! Type mapping from Rust tables to R values.
//!
//! Conversions only run while a [`ConversionScope`] is alive on the current
//! thread. The scope pushes its [`ConversionRules`] onto a thread-local stack
//! and pops them when dropped, so the rules apply to exactly the conversions
//! made inside it, whether those succeed or fail.

use std::cell::RefCell;
use std::marker::PhantomData;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ConvertError;
use crate::matrix::DenseMatrix;
use crate::metadata::{ColumnValues, MetadataTable};
use crate::robject::{RObject, RValue, na_real};

/// How NaN doubles are represented in R.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MissingFloat {
    /// `NA_real_`, so `is.na()` and `complete.cases()` see the gap.
    #[default]
    Na,
    NaN,
}

/// How categorical metadata columns are represented in R.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CategoricalMapping {
    #[default]
    Factor,
    Character,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ConversionRules {
    pub missing_float: MissingFloat,
    pub categorical: CategoricalMapping,
}

thread_local! {
    static ACTIVE_RULES: RefCell<Vec<ConversionRules>> = const { RefCell::new(Vec::new()) };
}

impl ConversionRules {
    /// Make these rules the active ruleset until the returned scope is dropped.
    pub fn activate(self) -> ConversionScope {
        let depth = ACTIVE_RULES.with(|stack| {
            let mut stack = stack.borrow_mut();
            stack.push(self);
            stack.len()
        });
        debug!(depth, "conversion rules activated");
        ConversionScope {
            depth,
            _not_send: PhantomData,
        }
    }

    fn map_float(&self, value: f64) -> f64 {
        match self.missing_float {
            MissingFloat::Na if value.is_nan() => na_real(),
            _ => value,
        }
    }
}

/// Rules currently in force on this thread, if any.
pub fn active_rules() -> Option<ConversionRules> {
    ACTIVE_RULES.with(|stack| stack.borrow().last().copied())
}

/// Guard for an active ruleset. Not `Send`: the rules belong to the thread
/// that activated them.
#[must_use = "conversion rules are deactivated as soon as the scope is dropped"]
pub struct ConversionScope {
    depth: usize,
    _not_send: PhantomData<*const ()>,
}

impl ConversionScope {
    /// Genes x cells matrix with gene ids as row names and cell ids as column
    /// names.
    pub fn counts_to_r(
        &self,
        matrix: &DenseMatrix,
        gene_ids: &[String],
        cell_ids: &[String],
    ) -> Result<RObject, ConvertError> {
        let rules = self.rules()?;
        let (rows, cols) = matrix.shape();
        if rows != gene_ids.len() || cols != cell_ids.len() {
            // Reported in the caller's cells x genes orientation.
            return Err(ConvertError::ShapeMismatch {
                rows: cols,
                cols: rows,
                cells: cell_ids.len(),
                genes: gene_ids.len(),
            });
        }
        let values = matrix
            .to_column_major()
            .into_iter()
            .map(|value| rules.map_float(value))
            .collect();
        Ok(RObject::numeric_matrix(
            rows,
            cols,
            values,
            gene_ids.to_vec(),
            cell_ids.to_vec(),
        ))
    }

    /// `data.frame` with one column per metadata column and the cell ids as
    /// row names.
    pub fn metadata_to_r(&self, table: &MetadataTable) -> Result<RObject, ConvertError> {
        let rules = self.rules()?;
        let columns = table
            .columns()
            .iter()
            .map(|column| {
                if column.values.len() != table.len() {
                    return Err(ConvertError::MetadataColumnLength {
                        column: column.name.clone(),
                        expected: table.len(),
                        found: column.values.len(),
                    });
                }
                Ok((column.name.clone(), column_to_r(&rules, &column.values)))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(RObject::data_frame(columns, table.index().to_vec()))
    }

    fn rules(&self) -> Result<ConversionRules, ConvertError> {
        active_rules().ok_or(ConvertError::NoActiveConversion)
    }
}

impl Drop for ConversionScope {
    fn drop(&mut self) {
        ACTIVE_RULES.with(|stack| stack.borrow_mut().truncate(self.depth - 1));
        debug!(depth = self.depth, "conversion rules released");
    }
}

fn column_to_r(rules: &ConversionRules, values: &ColumnValues) -> RObject {
    match values {
        ColumnValues::Integer(values) => RObject::integer(values.clone()),
        ColumnValues::Float(values) => {
            RObject::real(values.iter().map(|value| rules.map_float(*value)).collect())
        }
        ColumnValues::Boolean(values) => RObject::logical(values.clone()),
        ColumnValues::Text(values) => {
            RObject::from(RValue::Character(values.clone()))
        }
        ColumnValues::Categorical { codes, levels } => match rules.categorical {
            CategoricalMapping::Factor => RObject::factor(codes, levels.clone()),
            CategoricalMapping::Character => RObject::from(RValue::Character(
                codes
                    .iter()
                    .map(|code| code.map(|code| levels[code as usize].clone()))
                    .collect(),
            )),
        },
    }
}
