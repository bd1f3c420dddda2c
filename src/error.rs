// src/error.rs
// Job-fatal error kinds. The Display form starts with a stable machine code
// so reconciliation_jobs.last_error stays greppable across releases.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// CSV header is missing one of transaction_date / description / amount.
    #[error("missing_required_column: {0}")]
    MissingRequiredColumn(String),

    /// The job row carries no CSV bytes.
    #[error("file_content_missing")]
    FileContentMissing,

    /// The CSV header could not be read at all.
    #[error("csv_read_failed: {0}")]
    CsvRead(String),

    #[error("invoice_cache_load_failed: {0}")]
    InvoiceCacheLoad(String),

    /// A buffered multi-row insert failed; the buffer was rolled back.
    #[error("batch_insert_failed: {0}")]
    BatchInsert(String),

    #[error("progress_write_failed: {0}")]
    ProgressWrite(String),

    /// Leftover rows from a crashed prior attempt could not be cleared.
    #[error("partial_rows_cleanup_failed: {0}")]
    PartialRowsCleanup(String),
}

impl PipelineError {
    /// The stable code alone, without detail text.
    pub fn code(&self) -> &'static str {
        match self {
            PipelineError::MissingRequiredColumn(_) => "missing_required_column",
            PipelineError::FileContentMissing => "file_content_missing",
            PipelineError::CsvRead(_) => "csv_read_failed",
            PipelineError::InvoiceCacheLoad(_) => "invoice_cache_load_failed",
            PipelineError::BatchInsert(_) => "batch_insert_failed",
            PipelineError::ProgressWrite(_) => "progress_write_failed",
            PipelineError::PartialRowsCleanup(_) => "partial_rows_cleanup_failed",
        }
    }
}
