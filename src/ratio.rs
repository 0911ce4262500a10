use crate::error::{AllocatorError, Result};
use crate::schema::{DataSpec, QuotientTerm, RatioSpec};
use crate::table::{Table, Value};
use log::{debug, info};
use std::collections::{BTreeMap, HashMap};

/// Quotient allocator: the definitions tag each id with `num` or `den`,
/// and the result is `num / den` per (new_var, group) instead of a
/// weighted sum.
///
/// Division is deliberately unguarded: a zero or missing denominator
/// propagates whatever `f64` produces (`NaN` or `inf`), and `drop_na`
/// removes only `NaN` quotients.
#[derive(Debug)]
pub struct RatioAllocator {
    defs: Table,
    spec: RatioSpec,
    bound: Option<BoundData>,
    joined: Option<Table>,
}

#[derive(Debug)]
struct BoundData {
    data: Table,
    amt_var: String,
    group_vars: Vec<String>,
}

impl RatioAllocator {
    /// Validates and takes ownership of the ratio definitions.
    ///
    /// Beyond the shared construction contract, the term column must hold
    /// exactly the two-term vocabulary `{num, den}`.
    pub fn new(defs: Table, spec: RatioSpec) -> Result<Self> {
        if defs.is_empty() {
            return Err(AllocatorError::EmptyTable("definitions"));
        }

        let roles = [
            ("id_var", &spec.id_var),
            ("new_var", &spec.new_var),
            ("term_var", &spec.term_var),
        ];
        for (role, name) in roles {
            if name.is_empty() {
                return Err(AllocatorError::EmptyColumnName(role));
            }
            if !defs.has_column(name) {
                return Err(AllocatorError::MissingColumn {
                    column: name.clone(),
                    table: "definitions",
                });
            }
        }
        if spec.calc_var.is_empty() {
            return Err(AllocatorError::EmptyColumnName("calc_var"));
        }

        let term_idx = defs.column_index(&spec.term_var).unwrap();
        let mut terms: Vec<String> = (0..defs.len()).map(|r| defs.key(r, term_idx)).collect();
        terms.sort();
        terms.dedup();
        let expected = [
            QuotientTerm::Den.as_str().to_string(),
            QuotientTerm::Num.as_str().to_string(),
        ];
        if terms != expected {
            return Err(AllocatorError::InvalidQuotientTerms(terms));
        }

        Ok(Self {
            defs,
            spec,
            bound: None,
            joined: None,
        })
    }

    /// Binds the amounts table, keeping only the relevant columns.
    pub fn set_data(&mut self, data: Table, spec: DataSpec) -> Result<()> {
        if data.is_empty() {
            return Err(AllocatorError::EmptyTable("data"));
        }

        if spec.id_var != self.spec.id_var {
            return Err(AllocatorError::JoinKeyMismatch {
                data: spec.id_var.clone(),
                definitions: self.spec.id_var.clone(),
            });
        }

        let roles = [("id_var", &spec.id_var), ("amt_var", &spec.amt_var)];
        for (role, name) in roles {
            if name.is_empty() {
                return Err(AllocatorError::EmptyColumnName(role));
            }
            if !data.has_column(name) {
                return Err(AllocatorError::MissingColumn {
                    column: name.clone(),
                    table: "data",
                });
            }
        }

        for name in [&self.spec.new_var, &self.spec.term_var, &self.spec.calc_var] {
            if data.has_column(name) {
                return Err(AllocatorError::ColumnCollision(name.clone()));
            }
        }

        let absent = spec
            .group_vars
            .iter()
            .filter(|g| !data.has_column(g))
            .count();
        if absent > 0 {
            return Err(AllocatorError::MissingGroupVars(absent));
        }

        let mut keep: Vec<&str> = vec![&spec.id_var, &spec.amt_var];
        keep.extend(spec.group_vars.iter().map(|g| g.as_str()));
        let data = data.select(&keep)?;

        self.bound = Some(BoundData {
            data,
            amt_var: spec.amt_var,
            group_vars: spec.group_vars,
        });
        Ok(())
    }

    /// Joins on the id, pivots the quotient terms into sibling operands
    /// per (new_var, group) and divides.
    pub fn calculate(&mut self, drop_na: bool) -> Result<Table> {
        let bound = self.bound.as_ref().ok_or(AllocatorError::DataNotBound)?;

        let defs_id = self.defs.column_index(&self.spec.id_var).unwrap();
        let defs_new = self.defs.column_index(&self.spec.new_var).unwrap();
        let defs_term = self.defs.column_index(&self.spec.term_var).unwrap();

        let data_id = bound.data.column_index(&self.spec.id_var).unwrap();
        let data_amt = bound.data.column_index(&bound.amt_var).unwrap();
        let data_groups: Vec<usize> = bound
            .group_vars
            .iter()
            .map(|g| bound.data.column_index(g).unwrap())
            .collect();

        info!(
            "calculating {} over {} ratio definitions and {} data rows",
            self.spec.calc_var,
            self.defs.len(),
            bound.data.len()
        );

        let mut by_id: HashMap<String, Vec<usize>> = HashMap::new();
        for r in 0..bound.data.len() {
            by_id.entry(bound.data.key(r, data_id)).or_default().push(r);
        }

        let mut joined_columns = vec![
            self.spec.id_var.clone(),
            self.spec.new_var.clone(),
            self.spec.term_var.clone(),
        ];
        joined_columns.extend(bound.group_vars.iter().cloned());
        joined_columns.push(bound.amt_var.clone());
        let mut joined = Table::new(joined_columns);

        struct Operands {
            values: Vec<Value>,
            num: Option<f64>,
            den: Option<f64>,
        }
        let mut groups: BTreeMap<Vec<String>, Operands> = BTreeMap::new();
        let mut duplicates = 0usize;

        for r in 0..self.defs.len() {
            let id = self.defs.key(r, defs_id);
            let term = QuotientTerm::parse(&self.defs.key(r, defs_term))
                .expect("terms validated at construction");

            let Some(matches) = by_id.get(&id) else {
                continue;
            };
            for &s in matches {
                let amt = bound.data.number(s, data_amt)?;

                let mut row = vec![
                    bound.data.get(s, data_id).clone(),
                    self.defs.get(r, defs_new).clone(),
                    self.defs.get(r, defs_term).clone(),
                ];
                let mut key = vec![self.defs.key(r, defs_new)];
                let mut key_values = vec![self.defs.get(r, defs_new).clone()];
                for &g in &data_groups {
                    row.push(bound.data.get(s, g).clone());
                    key.push(bound.data.key(s, g));
                    key_values.push(bound.data.get(s, g).clone());
                }
                row.push(bound.data.get(s, data_amt).clone());
                joined.push_row(row)?;

                let operands = groups.entry(key).or_insert_with(|| Operands {
                    values: key_values,
                    num: None,
                    den: None,
                });
                let slot = match term {
                    QuotientTerm::Num => &mut operands.num,
                    QuotientTerm::Den => &mut operands.den,
                };
                if slot.replace(amt).is_some() {
                    duplicates += 1;
                }
            }
        }

        if duplicates > 0 {
            return Err(AllocatorError::DuplicateRows(duplicates));
        }
        self.joined = Some(joined);

        let mut result_columns = vec![self.spec.new_var.clone()];
        result_columns.extend(bound.group_vars.iter().cloned());
        result_columns.push(self.spec.calc_var.clone());
        let mut result = Table::new(result_columns);

        let mut dropped = 0usize;
        for operands in groups.into_values() {
            let num = operands.num.unwrap_or(f64::NAN);
            let den = operands.den.unwrap_or(f64::NAN);
            let quotient = num / den;
            if drop_na && quotient.is_nan() {
                dropped += 1;
                continue;
            }
            let mut row = operands.values;
            row.push(Value::Number(quotient));
            result.push_row(row)?;
        }

        if dropped > 0 {
            debug!("dropped {} NaN quotient row(s)", dropped);
        }

        Ok(result)
    }

    /// The ratio definitions as supplied at construction.
    pub fn defs(&self) -> &Table {
        &self.defs
    }

    /// The bound amounts (projected to the relevant columns).
    pub fn data(&self) -> Option<&Table> {
        self.bound.as_ref().map(|b| &b.data)
    }

    /// The joined table of the most recent `calculate`, kept for
    /// inspection.
    pub fn joined(&self) -> Option<&Table> {
        self.joined.as_ref()
    }
}
