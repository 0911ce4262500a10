use thiserror::Error;

#[derive(Error, Debug)]
pub enum AllocatorError {
    #[error("`{0}` must not be empty")]
    EmptyTable(&'static str),

    #[error("`{0}` is an empty string")]
    EmptyColumnName(&'static str),

    #[error("'{column}' is not a column of `{table}`")]
    MissingColumn { column: String, table: &'static str },

    #[error("the data's id_var '{data}' must equal the definitions' id_var '{definitions}'")]
    JoinKeyMismatch { data: String, definitions: String },

    #[error("the column name '{0}' appears in both the definitions and the data; it must be in only one of the two")]
    ColumnCollision(String),

    #[error("`group_vars` has {0} variables not found in the data columns")]
    MissingGroupVars(usize),

    #[error("the quotient terms must be exactly ['den', 'num'], found {0:?}")]
    InvalidQuotientTerms(Vec<String>),

    #[error("{0} duplicate rows for the same pivot key")]
    DuplicateRows(usize),

    #[error("{0} duplicate (index, variable) pairs in the matrix")]
    DuplicateMatrixKeys(usize),

    #[error("no data bound; call `set_data` before `calculate`")]
    DataNotBound,

    #[error("non-numeric value in column '{column}' at row {row}")]
    NonNumeric { column: String, row: usize },

    #[error("row has {got} values but the table has {expected} columns")]
    RowLength { expected: usize, got: usize },

    #[error("index and columns must have the same length: matrix has {matrix} rows, data has {data} value columns")]
    ShapeMismatch { matrix: usize, data: usize },

    #[error("column and row labels must match exactly: {0} labels differ")]
    LabelMismatch(usize),

    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, AllocatorError>;
