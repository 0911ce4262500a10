use crate::error::{AllocatorError, Result};
use crate::schema::{CalcOptions, DataSpec, SumSpec};
use crate::table::{Table, Value};
use log::{debug, info};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};

/// Diagnostics from the missing-coefficient cleanup of the most recent
/// `calculate` call.
///
/// `id` lists join keys present in the data but absent from the
/// definitions; `new_var` lists derived variables dropped because at least
/// one of their significant coefficients points at an id the data never
/// supplies.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MissingVars {
    pub id: Vec<String>,
    pub new_var: Vec<String>,
}

#[derive(Debug)]
struct BoundData {
    raw: Table,
    /// Pivot/melt round trip of `raw`: one row for every observed
    /// (group, id) pair, `Null` where the source never supplied a value.
    completed: Table,
    amt_var: String,
    group_vars: Vec<String>,
}

/// Coefficient-matrix allocator: joins a long-form definitions table to a
/// long-form amounts table on a shared id, multiplies amount by
/// coefficient and sums the products per group.
///
/// Construction validates the definitions; `set_data` validates and binds
/// the amounts; `calculate` runs the join-multiply-aggregate pipeline with
/// caller-selected missing-data semantics.
#[derive(Debug)]
pub struct SumAllocator {
    defs: Table,
    spec: SumSpec,
    bound: Option<BoundData>,
    joined: Option<Table>,
    missing: MissingVars,
}

impl SumAllocator {
    /// Validates and takes ownership of the definitions table.
    ///
    /// Fails fast: an empty table, an empty configured name or a missing
    /// column is reported here, never deferred to calculation time.
    pub fn new(defs: Table, spec: SumSpec) -> Result<Self> {
        if defs.is_empty() {
            return Err(AllocatorError::EmptyTable("definitions"));
        }

        let roles = [
            ("id_var", &spec.id_var),
            ("new_var", &spec.new_var),
            ("coef_var", &spec.coef_var),
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

        // calc_var is the extra column created by the calculation
        if spec.calc_var.is_empty() {
            return Err(AllocatorError::EmptyColumnName("calc_var"));
        }

        Ok(Self {
            defs,
            spec,
            bound: None,
            joined: None,
            missing: MissingVars::default(),
        })
    }

    /// Binds the amounts table.
    ///
    /// The join-key name must equal the definitions' id_var exactly, and no
    /// definitions-owned column name may also appear in the data. The
    /// NaN-complete table is built eagerly here so each `calculate` call
    /// only pays for the join and the aggregation.
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

        for name in [&self.spec.new_var, &self.spec.coef_var, &self.spec.calc_var] {
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

        let completed = nan_complete(&data, &spec.id_var, &spec.amt_var, &spec.group_vars)?;
        debug!(
            "bound {} data rows; NaN-completion has {} rows",
            data.len(),
            completed.len()
        );

        self.bound = Some(BoundData {
            raw: data,
            completed,
            amt_var: spec.amt_var,
            group_vars: spec.group_vars,
        });
        Ok(())
    }

    /// Joins, multiplies and aggregates per the given options.
    ///
    /// With `sum_na` the join runs against the NaN-complete table and any
    /// missing source value poisons its whole group to NaN; an ordinary
    /// skip-missing sum would silently understate point-in-time totals,
    /// which is the core subtlety this component exists for. Without
    /// `sum_na`, missing values contribute zero.
    pub fn calculate(&mut self, opts: &CalcOptions) -> Result<Table> {
        let bound = self.bound.as_ref().ok_or(AllocatorError::DataNotBound)?;

        let defs_id = self.defs.column_index(&self.spec.id_var).unwrap();
        let defs_new = self.defs.column_index(&self.spec.new_var).unwrap();
        let defs_coef = self.defs.column_index(&self.spec.coef_var).unwrap();

        info!(
            "calculating {} over {} definition rows and {} data rows",
            self.spec.calc_var,
            self.defs.len(),
            bound.raw.len()
        );

        // Audit the two tables against each other before joining.
        let raw_id = bound.raw.column_index(&self.spec.id_var).unwrap();
        let data_ids: HashSet<String> = (0..bound.raw.len())
            .map(|r| bound.raw.key(r, raw_id))
            .collect();
        let defs_ids: HashSet<String> = (0..self.defs.len())
            .map(|r| self.defs.key(r, defs_id))
            .collect();

        // new_vars with a significant coefficient pointing at an id the
        // data never supplies: dropped entirely so their absence is
        // visible, instead of aggregating to a misleading zero or NaN.
        let mut not_todo: Vec<String> = Vec::new();
        let mut not_todo_seen: HashSet<String> = HashSet::new();
        for r in 0..self.defs.len() {
            let coef = self.defs.number(r, defs_coef)?;
            if coef.abs() >= opts.tol && !data_ids.contains(&self.defs.key(r, defs_id)) {
                let new_var = self.defs.key(r, defs_new);
                if not_todo_seen.insert(new_var.clone()) {
                    not_todo.push(new_var);
                }
            }
        }

        let mut missing_id: Vec<String> = Vec::new();
        let mut missing_id_seen: HashSet<String> = HashSet::new();
        for r in 0..bound.raw.len() {
            let id = bound.raw.key(r, raw_id);
            if !defs_ids.contains(&id) && missing_id_seen.insert(id.clone()) {
                missing_id.push(id);
            }
        }

        if !not_todo.is_empty() {
            debug!(
                "dropping {} new_var(s) with structurally absent source data: {:?}",
                not_todo.len(),
                not_todo
            );
        }
        if !missing_id.is_empty() {
            debug!(
                "{} id value(s) in the data are not found in the definitions: {:?}",
                missing_id.len(),
                missing_id
            );
        }
        self.missing = MissingVars {
            id: missing_id,
            new_var: not_todo,
        };

        // Select the join source per the missing-data policy.
        let source = if opts.sum_na {
            &bound.completed
        } else {
            &bound.raw
        };
        let src_id = source.column_index(&self.spec.id_var).unwrap();
        let src_amt = source.column_index(&bound.amt_var).unwrap();
        let src_groups: Vec<usize> = bound
            .group_vars
            .iter()
            .map(|g| source.column_index(g).unwrap())
            .collect();

        let mut by_id: HashMap<String, Vec<usize>> = HashMap::new();
        for r in 0..source.len() {
            by_id.entry(source.key(r, src_id)).or_default().push(r);
        }

        let mut joined_columns = vec![
            self.spec.id_var.clone(),
            self.spec.new_var.clone(),
            self.spec.coef_var.clone(),
        ];
        joined_columns.extend(bound.group_vars.iter().cloned());
        joined_columns.push(bound.amt_var.clone());
        joined_columns.push(self.spec.calc_var.clone());
        let mut joined = Table::new(joined_columns);

        struct GroupAgg {
            values: Vec<Value>,
            sum: f64,
            any_nan: bool,
        }
        let mut groups: BTreeMap<Vec<String>, GroupAgg> = BTreeMap::new();
        let mut filtered = 0usize;

        for r in 0..self.defs.len() {
            let new_var = self.defs.key(r, defs_new);
            if not_todo_seen.contains(&new_var) {
                continue;
            }
            let coef = self.defs.number(r, defs_coef)?;
            let id = self.defs.key(r, defs_id);

            let Some(matches) = by_id.get(&id) else {
                continue;
            };
            for &s in matches {
                // A near-zero coefficient times a NaN amount would poison
                // an otherwise valid group; filter it out after the join.
                if coef.abs() < opts.tol {
                    filtered += 1;
                    continue;
                }
                let amt = source.number(s, src_amt)?;
                let calc = coef * amt;

                let mut row = vec![
                    source.get(s, src_id).clone(),
                    self.defs.get(r, defs_new).clone(),
                    Value::Number(coef),
                ];
                let mut key: Vec<String> = Vec::with_capacity(src_groups.len() + 1);
                let mut key_values: Vec<Value> = Vec::with_capacity(src_groups.len() + 1);
                for &g in &src_groups {
                    row.push(source.get(s, g).clone());
                    key.push(source.key(s, g));
                    key_values.push(source.get(s, g).clone());
                }
                key.push(new_var.clone());
                key_values.push(self.defs.get(r, defs_new).clone());
                row.push(source.get(s, src_amt).clone());
                row.push(Value::Number(calc));
                joined.push_row(row)?;

                let agg = groups.entry(key).or_insert_with(|| GroupAgg {
                    values: key_values,
                    sum: 0.0,
                    any_nan: false,
                });
                if calc.is_nan() {
                    agg.any_nan = true;
                } else {
                    agg.sum += calc;
                }
            }
        }

        if filtered > 0 {
            debug!(
                "filtered {} joined row(s) with |{}| < {}",
                filtered, self.spec.coef_var, opts.tol
            );
        }
        self.joined = Some(joined);

        let mut result_columns = bound.group_vars.clone();
        result_columns.push(self.spec.new_var.clone());
        result_columns.push(self.spec.calc_var.clone());
        let mut result = Table::new(result_columns);

        for agg in groups.into_values() {
            let value = if opts.sum_na && agg.any_nan {
                f64::NAN
            } else {
                agg.sum
            };
            if opts.drop_na && value.is_nan() {
                continue;
            }
            let mut row = agg.values;
            row.push(Value::Number(value));
            result.push_row(row)?;
        }

        Ok(result)
    }

    /// The definitions as supplied at construction.
    pub fn defs(&self) -> &Table {
        &self.defs
    }

    /// The raw bound amounts, if `set_data` has succeeded.
    pub fn data(&self) -> Option<&Table> {
        self.bound.as_ref().map(|b| &b.raw)
    }

    /// The pre-aggregation joined table of the most recent `calculate`,
    /// kept for inspection.
    pub fn joined(&self) -> Option<&Table> {
        self.joined.as_ref()
    }

    /// Diagnostics from the most recent `calculate`.
    pub fn missing_vars(&self) -> &MissingVars {
        &self.missing
    }
}

/// Pivot (group_vars x id -> amount) then melt back to long form.
///
/// Guarantees a row for every pair in the cross-product of observed groups
/// and observed ids, with `Null` standing in for values never supplied.
/// This covers only ids seen somewhere in the bound data, not every id the
/// definitions expect.
fn nan_complete(data: &Table, id_var: &str, amt_var: &str, group_vars: &[String]) -> Result<Table> {
    let id_idx = data.column_index(id_var).unwrap();
    let amt_idx = data.column_index(amt_var).unwrap();
    let group_idx: Vec<usize> = group_vars
        .iter()
        .map(|g| data.column_index(g).unwrap())
        .collect();

    let mut ids: Vec<(String, Value)> = Vec::new();
    let mut id_seen: HashSet<String> = HashSet::new();
    let mut groups: Vec<Vec<Value>> = Vec::new();
    let mut group_pos: HashMap<Vec<String>, usize> = HashMap::new();
    let mut cells: HashMap<(usize, String), Value> = HashMap::new();
    let mut duplicates = 0usize;

    for r in 0..data.len() {
        let id_key = data.key(r, id_idx);
        if id_seen.insert(id_key.clone()) {
            ids.push((id_key.clone(), data.get(r, id_idx).clone()));
        }

        let key: Vec<String> = group_idx.iter().map(|&g| data.key(r, g)).collect();
        let pos = *group_pos.entry(key).or_insert_with(|| {
            groups.push(group_idx.iter().map(|&g| data.get(r, g).clone()).collect());
            groups.len() - 1
        });

        if cells
            .insert((pos, id_key), data.get(r, amt_idx).clone())
            .is_some()
        {
            duplicates += 1;
        }
    }

    if duplicates > 0 {
        return Err(AllocatorError::DuplicateRows(duplicates));
    }

    let mut columns = vec![id_var.to_string()];
    columns.extend(group_vars.iter().cloned());
    columns.push(amt_var.to_string());
    let mut out = Table::new(columns);

    for (pos, group_values) in groups.iter().enumerate() {
        for (id_key, id_value) in &ids {
            let amt = cells
                .get(&(pos, id_key.clone()))
                .cloned()
                .unwrap_or(Value::Null);
            let mut row = vec![id_value.clone()];
            row.extend(group_values.iter().cloned());
            row.push(amt);
            out.push_row(row)?;
        }
    }

    Ok(out)
}
