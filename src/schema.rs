use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Default tolerance below which a coefficient is treated as structurally
/// zero.
pub const DEFAULT_TOL: f64 = 1e-8;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct SumSpec {
    #[schemars(description = "Column used to join the definitions with the data (e.g. a period id)")]
    pub id_var: String,

    #[schemars(description = "Column naming the new variable created by the calculation")]
    pub new_var: String,

    #[schemars(description = "Column holding the numeric coefficients")]
    pub coef_var: String,

    #[schemars(description = "Name of the output column created by the sum of products")]
    pub calc_var: String,
}

impl SumSpec {
    pub fn generate_json_schema() -> schemars::schema::RootSchema {
        schemars::schema_for!(SumSpec)
    }

    pub fn schema_as_json() -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&Self::generate_json_schema())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct RatioSpec {
    #[schemars(description = "Column used to join the definitions with the data (e.g. a period id)")]
    pub id_var: String,

    #[schemars(description = "Column naming the new ratio created by the calculation")]
    pub new_var: String,

    #[schemars(description = "Column holding the quotient terms 'num' and 'den'")]
    pub term_var: String,

    #[schemars(description = "Name of the output column created by the quotient")]
    pub calc_var: String,
}

impl RatioSpec {
    pub fn generate_json_schema() -> schemars::schema::RootSchema {
        schemars::schema_for!(RatioSpec)
    }

    pub fn schema_as_json() -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&Self::generate_json_schema())
    }
}

/// Names the roles of the amounts table bound via `set_data`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct DataSpec {
    #[schemars(
        description = "Join key column; must be the same name as the definitions' id_var, not merely a column whose contents would join"
    )]
    pub id_var: String,

    #[schemars(description = "Column holding the numeric amounts to reallocate")]
    pub amt_var: String,

    #[schemars(
        description = "Dimension columns preserved through aggregation (e.g. account, entity)"
    )]
    pub group_vars: Vec<String>,
}

/// Policy flags for a sum-of-products calculation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CalcOptions {
    #[schemars(
        description = "If true, any group containing a missing source value aggregates to NaN (point-in-time sums). If false, missing values contribute zero (chronological sums; the most recent period is frequently incomplete and may need manual removal)."
    )]
    pub sum_na: bool,

    #[schemars(description = "Remove result rows whose calculated value is NaN")]
    pub drop_na: bool,

    #[schemars(description = "Coefficients with absolute value below this are treated as structurally absent")]
    pub tol: f64,
}

impl Default for CalcOptions {
    fn default() -> Self {
        Self {
            sum_na: true,
            drop_na: false,
            tol: DEFAULT_TOL,
        }
    }
}

/// The fixed two-term vocabulary of the ratio definitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum QuotientTerm {
    Den,
    Num,
}

impl QuotientTerm {
    pub fn parse(text: &str) -> Option<Self> {
        match text {
            "num" => Some(QuotientTerm::Num),
            "den" => Some(QuotientTerm::Den),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            QuotientTerm::Num => "num",
            QuotientTerm::Den => "den",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_generation() {
        let schema_json = SumSpec::schema_as_json().unwrap();
        assert!(schema_json.contains("id_var"));
        assert!(schema_json.contains("coef_var"));

        let schema_json = RatioSpec::schema_as_json().unwrap();
        assert!(schema_json.contains("term_var"));
    }

    #[test]
    fn test_default_options() {
        let opts = CalcOptions::default();
        assert!(opts.sum_na);
        assert!(!opts.drop_na);
        assert_eq!(opts.tol, DEFAULT_TOL);
    }

    #[test]
    fn test_quotient_term_parsing() {
        assert_eq!(QuotientTerm::parse("num"), Some(QuotientTerm::Num));
        assert_eq!(QuotientTerm::parse("den"), Some(QuotientTerm::Den));
        assert_eq!(QuotientTerm::parse("ratio"), None);
    }

    #[test]
    fn test_spec_serialization() {
        let spec = SumSpec {
            id_var: "period".to_string(),
            new_var: "new_var".to_string(),
            coef_var: "coef".to_string(),
            calc_var: "calc".to_string(),
        };

        let json = serde_json::to_string(&spec).unwrap();
        let back: SumSpec = serde_json::from_str(&json).unwrap();
        assert_eq!(back, spec);
    }
}
