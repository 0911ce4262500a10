//! # Matrix Allocator
//!
//! A library for coefficient-matrix reallocation of financial amounts
//! across dimensions (typically periods) with explicit missing-data
//! semantics.
//!
//! ## Core Concepts
//!
//! - **Definitions table**: long-form table of (id, new_var, coefficient)
//!   rows describing how amounts redistribute into derived variables
//! - **Amounts table**: long-form table of (id, group dimensions, amount)
//!   rows supplying the source values
//! - **sum_na**: whether a missing source value poisons its whole
//!   aggregate to NaN (point-in-time sums) or contributes zero
//!   (chronological sums)
//! - **Tolerance**: coefficients below `tol` are treated as structurally
//!   zero, both when auditing definitions and when joining
//!
//! ## Example
//!
//! ```rust,ignore
//! use matrix_allocator::*;
//!
//! let defs = Table::from_rows(
//!     vec!["period".into(), "new_var".into(), "coef".into()],
//!     vec![
//!         vec!["p1".into(), "roll".into(), 1.0.into()],
//!         vec!["p2".into(), "roll".into(), 1.0.into()],
//!     ],
//! )?;
//! let data = Table::from_rows(
//!     vec!["period".into(), "acct".into(), "amt".into()],
//!     vec![
//!         vec!["p1".into(), "cash".into(), 10.0.into()],
//!         vec!["p2".into(), "cash".into(), 20.0.into()],
//!     ],
//! )?;
//!
//! let spec = SumSpec {
//!     id_var: "period".into(),
//!     new_var: "new_var".into(),
//!     coef_var: "coef".into(),
//!     calc_var: "calc".into(),
//! };
//! let binding = DataSpec {
//!     id_var: "period".into(),
//!     amt_var: "amt".into(),
//!     group_vars: vec!["acct".into()],
//! };
//!
//! let result = allocate(defs, spec, data, binding, &CalcOptions::default())?;
//! ```

pub mod allocator;
pub mod error;
pub mod matrix;
pub mod ratio;
pub mod schema;
pub mod table;

pub use allocator::{MissingVars, SumAllocator};
pub use error::{AllocatorError, Result};
pub use matrix::MatrixMultiplier;
pub use ratio::RatioAllocator;
pub use schema::{CalcOptions, DataSpec, QuotientTerm, RatioSpec, SumSpec, DEFAULT_TOL};
pub use table::{Table, Value};

/// Construct, bind and calculate a sum-of-products allocation in one call.
pub fn allocate(
    defs: Table,
    spec: SumSpec,
    data: Table,
    binding: DataSpec,
    opts: &CalcOptions,
) -> Result<Table> {
    let mut allocator = SumAllocator::new(defs, spec)?;
    allocator.set_data(data, binding)?;
    allocator.calculate(opts)
}

/// Construct, bind and calculate a ratio allocation in one call.
pub fn allocate_ratio(
    defs: Table,
    spec: RatioSpec,
    data: Table,
    binding: DataSpec,
    drop_na: bool,
) -> Result<Table> {
    let mut allocator = RatioAllocator::new(defs, spec)?;
    allocator.set_data(data, binding)?;
    allocator.calculate(drop_na)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rolling_defs() -> Table {
        Table::from_rows(
            vec!["period".into(), "new_var".into(), "coef".into()],
            vec![
                vec!["p1".into(), "roll".into(), 1.0.into()],
                vec!["p2".into(), "roll".into(), 1.0.into()],
            ],
        )
        .unwrap()
    }

    fn sum_spec() -> SumSpec {
        SumSpec {
            id_var: "period".into(),
            new_var: "new_var".into(),
            coef_var: "coef".into(),
            calc_var: "calc".into(),
        }
    }

    fn binding() -> DataSpec {
        DataSpec {
            id_var: "period".into(),
            amt_var: "amt".into(),
            group_vars: vec!["grp".into()],
        }
    }

    #[test]
    fn test_allocate_end_to_end() {
        let data = Table::from_rows(
            vec!["period".into(), "grp".into(), "amt".into()],
            vec![
                vec!["p1".into(), "A".into(), 10.0.into()],
                vec!["p2".into(), "A".into(), 20.0.into()],
            ],
        )
        .unwrap();

        let opts = CalcOptions {
            sum_na: false,
            drop_na: true,
            ..Default::default()
        };
        let result = allocate(rolling_defs(), sum_spec(), data, binding(), &opts).unwrap();

        assert_eq!(result.len(), 1);
        assert_eq!(result.get(0, 0), &Value::Text("A".into()));
        assert_eq!(result.get(0, 1), &Value::Text("roll".into()));
        assert_eq!(result.number(0, 2).unwrap(), 30.0);
    }

    #[test]
    fn test_allocate_ratio_end_to_end() {
        let defs = Table::from_rows(
            vec!["period".into(), "ratio".into(), "term".into()],
            vec![
                vec!["p1".into(), "rev_ratio".into(), "num".into()],
                vec!["p2".into(), "rev_ratio".into(), "den".into()],
            ],
        )
        .unwrap();
        let data = Table::from_rows(
            vec!["period".into(), "grp".into(), "amt".into()],
            vec![
                vec!["p1".into(), "rev".into(), 100.0.into()],
                vec!["p2".into(), "rev".into(), 50.0.into()],
            ],
        )
        .unwrap();

        let spec = RatioSpec {
            id_var: "period".into(),
            new_var: "ratio".into(),
            term_var: "term".into(),
            calc_var: "calc".into(),
        };
        let result = allocate_ratio(defs, spec, data, binding(), false).unwrap();

        assert_eq!(result.len(), 1);
        assert_eq!(result.number(0, 2).unwrap(), 2.0);
    }

    #[test]
    fn test_allocate_propagates_validation_errors() {
        let data = Table::from_rows(
            vec!["month".into(), "grp".into(), "amt".into()],
            vec![vec!["p1".into(), "A".into(), 10.0.into()]],
        )
        .unwrap();
        let mut bad_binding = binding();
        bad_binding.id_var = "month".into();

        let err = allocate(
            rolling_defs(),
            sum_spec(),
            data,
            bad_binding,
            &CalcOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, AllocatorError::JoinKeyMismatch { .. }));
    }
}
