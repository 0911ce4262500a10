use crate::error::{AllocatorError, Result};
use crate::table::{Table, Value};
use log::info;
use std::collections::{BTreeSet, HashMap, HashSet};

const INDEX: &str = "index";
const VARIABLE: &str = "variable";
const VALUE: &str = "value";

/// Dense matrix multiplier for finance and BI reallocations.
///
/// Built from a long-form matrix with the fixed columns `index`,
/// `variable`, `value`; missing cells are filled with zero. Where the
/// allocators join and aggregate row by row, this variant multiplies a
/// whole wide data block against the matrix in one pass.
#[derive(Debug)]
pub struct MatrixMultiplier {
    row_labels: Vec<String>,
    variables: Vec<String>,
    /// Row-major, `row_labels.len() x variables.len()`.
    wide: Vec<Vec<f64>>,
}

impl MatrixMultiplier {
    /// Validates the long-form matrix and builds the wide form.
    ///
    /// The schema is strict: exactly the three expected columns, numeric
    /// values, and unique (index, variable) pairs.
    pub fn new(mat_long: Table) -> Result<Self> {
        if mat_long.is_empty() {
            return Err(AllocatorError::EmptyTable("matrix"));
        }
        for name in [INDEX, VARIABLE, VALUE] {
            if !mat_long.has_column(name) {
                return Err(AllocatorError::MissingColumn {
                    column: name.to_string(),
                    table: "matrix",
                });
            }
        }
        for column in mat_long.columns() {
            if column != INDEX && column != VARIABLE && column != VALUE {
                return Err(AllocatorError::ColumnCollision(column.clone()));
            }
        }

        let idx = mat_long.column_index(INDEX).unwrap();
        let var = mat_long.column_index(VARIABLE).unwrap();
        let val = mat_long.column_index(VALUE).unwrap();

        let mut seen: HashSet<(String, String)> = HashSet::new();
        let mut duplicates = 0usize;
        let mut row_set: BTreeSet<String> = BTreeSet::new();
        let mut var_set: BTreeSet<String> = BTreeSet::new();
        for r in 0..mat_long.len() {
            mat_long.number(r, val)?;
            let key = (mat_long.key(r, idx), mat_long.key(r, var));
            row_set.insert(key.0.clone());
            var_set.insert(key.1.clone());
            if !seen.insert(key) {
                duplicates += 1;
            }
        }
        if duplicates > 0 {
            return Err(AllocatorError::DuplicateMatrixKeys(duplicates));
        }

        let row_labels: Vec<String> = row_set.into_iter().collect();
        let variables: Vec<String> = var_set.into_iter().collect();
        let row_pos: HashMap<&str, usize> = row_labels
            .iter()
            .enumerate()
            .map(|(i, l)| (l.as_str(), i))
            .collect();
        let var_pos: HashMap<&str, usize> = variables
            .iter()
            .enumerate()
            .map(|(i, v)| (v.as_str(), i))
            .collect();

        let mut wide = vec![vec![0.0; variables.len()]; row_labels.len()];
        for r in 0..mat_long.len() {
            let i = row_pos[mat_long.key(r, idx).as_str()];
            let j = var_pos[mat_long.key(r, var).as_str()];
            wide[i][j] = mat_long.number(r, val)?;
        }

        Ok(Self {
            row_labels,
            variables,
            wide,
        })
    }

    /// Multiplies a wide data block against the matrix.
    ///
    /// The data columns after `id_var` must match the matrix row labels
    /// exactly and in order. The output keeps the id column and gains one
    /// column per matrix variable.
    pub fn multiply(&self, data: &Table, id_var: &str) -> Result<Table> {
        let id_idx = data
            .column_index(id_var)
            .ok_or_else(|| AllocatorError::MissingColumn {
                column: id_var.to_string(),
                table: "data",
            })?;

        let value_columns: Vec<(usize, &String)> = data
            .columns()
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != id_idx)
            .collect();

        if value_columns.len() != self.row_labels.len() {
            return Err(AllocatorError::ShapeMismatch {
                matrix: self.row_labels.len(),
                data: value_columns.len(),
            });
        }
        let mismatched = value_columns
            .iter()
            .zip(&self.row_labels)
            .filter(|((_, column), label)| column != label)
            .count();
        if mismatched > 0 {
            return Err(AllocatorError::LabelMismatch(mismatched));
        }

        info!(
            "multiplying {} data rows by a {}x{} matrix",
            data.len(),
            self.row_labels.len(),
            self.variables.len()
        );

        let mut columns = vec![id_var.to_string()];
        columns.extend(self.variables.iter().cloned());
        let mut out = Table::new(columns);

        for r in 0..data.len() {
            let mut row = vec![data.get(r, id_idx).clone()];
            let inputs: Vec<f64> = value_columns
                .iter()
                .map(|(c, _)| data.number(r, *c))
                .collect::<Result<_>>()?;
            for j in 0..self.variables.len() {
                let mut acc = 0.0;
                for (k, input) in inputs.iter().enumerate() {
                    acc += input * self.wide[k][j];
                }
                row.push(Value::Number(acc));
            }
            out.push_row(row)?;
        }

        Ok(out)
    }

    pub fn row_labels(&self) -> &[String] {
        &self.row_labels
    }

    pub fn output_variables(&self) -> &[String] {
        &self.variables
    }
}
