// src/ingest.rs
// Streaming CSV ingest for one batch. Header problems fail the job; bad
// data rows are skipped and counted so one stray line never sinks a file.

use chrono::NaiveDate;
use csv::{ReaderBuilder, StringRecord};
use log::debug;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::str::FromStr;

use crate::error::PipelineError;

const COLUMN_TRANSACTION_DATE: &str = "transaction_date";
const COLUMN_DESCRIPTION: &str = "description";
const COLUMN_AMOUNT: &str = "amount";
const COLUMN_REFERENCE_NUMBER: &str = "reference_number";

const DATE_FORMAT: &str = "%Y-%m-%d";

/// One validated CSV row.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionRow {
    pub transaction_date: NaiveDate,
    pub description: String,
    /// Raw textual value from the CSV; the matcher compares this
    /// string-for-string against invoice amounts.
    pub amount: String,
    /// The same amount, parsed. Used for storage, never for matching.
    pub amount_value: Decimal,
    pub reference_number: Option<String>,
}

struct ColumnMap {
    transaction_date: usize,
    description: usize,
    amount: usize,
    reference_number: Option<usize>,
}

enum RowError {
    MissingField(&'static str),
    InvalidDate(String),
    InvalidAmount(String),
}

impl std::fmt::Display for RowError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RowError::MissingField(col) => write!(f, "missing field: {}", col),
            RowError::InvalidDate(v) => write!(f, "invalid_date: {:?}", v),
            RowError::InvalidAmount(v) => write!(f, "invalid_amount: {:?}", v),
        }
    }
}

/// Pull-based reader over the batch's CSV bytes. Memory use is one record
/// plus the reader's buffer, independent of file size.
pub struct CsvIngester<'a> {
    reader: csv::Reader<&'a [u8]>,
    columns: ColumnMap,
    record: StringRecord,
    row_num: u64,
    invalid_rows: u64,
}

impl<'a> CsvIngester<'a> {
    /// Reads and validates the header. A missing required column is a
    /// job-fatal error; nothing has been emitted yet.
    pub fn new(content: &'a [u8]) -> Result<Self, PipelineError> {
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(content);

        let headers = reader
            .headers()
            .map_err(|e| PipelineError::CsvRead(e.to_string()))?;

        let mut index: HashMap<String, usize> = HashMap::new();
        for (i, name) in headers.iter().enumerate() {
            index.entry(name.trim().to_lowercase()).or_insert(i);
        }

        let required = |name: &'static str| -> Result<usize, PipelineError> {
            index
                .get(name)
                .copied()
                .ok_or_else(|| PipelineError::MissingRequiredColumn(name.to_string()))
        };

        let columns = ColumnMap {
            transaction_date: required(COLUMN_TRANSACTION_DATE)?,
            description: required(COLUMN_DESCRIPTION)?,
            amount: required(COLUMN_AMOUNT)?,
            reference_number: index.get(COLUMN_REFERENCE_NUMBER).copied(),
        };

        Ok(CsvIngester {
            reader,
            columns,
            record: StringRecord::new(),
            row_num: 0,
            invalid_rows: 0,
        })
    }

    /// Next valid row, or None at end of file. Unparseable rows are skipped
    /// and counted.
    pub fn next_row(&mut self) -> Option<TransactionRow> {
        loop {
            match self.reader.read_record(&mut self.record) {
                Ok(false) => return None,
                Ok(true) => {
                    self.row_num += 1;
                    match self.parse_record() {
                        Ok(row) => return Some(row),
                        Err(e) => {
                            debug!("Skipping invalid row {}: {}", self.row_num, e);
                            self.invalid_rows += 1;
                        }
                    }
                }
                Err(e) => {
                    self.row_num += 1;
                    debug!("Skipping unreadable row {}: {}", self.row_num, e);
                    self.invalid_rows += 1;
                }
            }
        }
    }

    /// Rows skipped so far.
    pub fn invalid_rows(&self) -> u64 {
        self.invalid_rows
    }

    fn parse_record(&self) -> Result<TransactionRow, RowError> {
        let date_raw = self
            .record
            .get(self.columns.transaction_date)
            .ok_or(RowError::MissingField(COLUMN_TRANSACTION_DATE))?;
        let transaction_date = NaiveDate::parse_from_str(date_raw, DATE_FORMAT)
            .map_err(|_| RowError::InvalidDate(date_raw.to_string()))?;

        let description = self
            .record
            .get(self.columns.description)
            .ok_or(RowError::MissingField(COLUMN_DESCRIPTION))?
            .to_string();

        let amount = self
            .record
            .get(self.columns.amount)
            .ok_or(RowError::MissingField(COLUMN_AMOUNT))?
            .to_string();
        let amount_value = Decimal::from_str(&amount)
            .map_err(|_| RowError::InvalidAmount(amount.clone()))?;
        if amount_value.is_sign_negative() {
            return Err(RowError::InvalidAmount(amount));
        }

        let reference_number = self
            .columns
            .reference_number
            .and_then(|idx| self.record.get(idx))
            .filter(|v| !v.is_empty())
            .map(str::to_string);

        Ok(TransactionRow {
            transaction_date,
            description,
            amount,
            amount_value,
            reference_number,
        })
    }
}
