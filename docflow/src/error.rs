use thiserror::Error;

#[derive(Error, Debug)]
pub enum DocflowError {
    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("cyclic $ref detected while resolving schema: {reference}")]
    SchemaCycle { reference: String },

    #[error("Document not found: {index}/{doc_type}/{id}")]
    NotFound {
        index: String,
        doc_type: String,
        id: String,
    },

    #[error("cannot map {values} values to the {documents} documents referenced by {path}")]
    ReferenceMismatch {
        values: usize,
        documents: usize,
        path: String,
    },

    #[error("'{keyword}' entity cannot be overridden manually")]
    ManualOverride { keyword: String },

    #[error("no request identity bound in processing context")]
    MissingIdentity,

    #[error("Store error: {0}")]
    Store(String),

    #[error("Geocoding error: {0}")]
    Geocode(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, DocflowError>;
