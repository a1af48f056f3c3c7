//! Row-oriented text fallback.

use std::io::Cursor;
use std::sync::Arc;

use arrow::csv::reader::{Format, ReaderBuilder};
use arrow::record_batch::RecordBatch;
use bytes::Bytes;
use ensagg_result::DecodeError;

use crate::decode::{TableDecoder, arrow_failure, single_batch};

/// CSV with a header row.
///
/// The payload must be non-empty UTF-8 without NUL bytes before Arrow parses it, so binary
/// payloads are not mistaken for a one-column text table. Record structure, quoting and
/// field counts are left to Arrow's reader.
#[derive(Debug, Clone)]
pub struct CsvDecoder {
    pub delimiter: u8,
    pub max_read_records: Option<usize>,
}

impl Default for CsvDecoder {
    fn default() -> Self {
        Self {
            delimiter: b',',
            max_read_records: None,
        }
    }
}

impl CsvDecoder {
    fn to_format(&self) -> Format {
        let mut format = Format::default().with_header(true);
        if self.delimiter != b',' {
            format = format.with_delimiter(self.delimiter);
        }
        format
    }

    fn validate(&self, bytes: &Bytes) -> Result<(), DecodeError> {
        let name = self.name();
        let text = std::str::from_utf8(bytes)
            .map_err(|e| DecodeError::new(name, format!("not UTF-8: {e}")))?;
        if text.contains('\0') {
            return Err(DecodeError::new(name, "payload contains NUL bytes"));
        }
        if text.trim().is_empty() {
            return Err(DecodeError::new(name, "empty payload"));
        }
        Ok(())
    }
}

impl TableDecoder for CsvDecoder {
    fn name(&self) -> &'static str {
        "csv"
    }

    fn decode(&self, bytes: &Bytes) -> Result<RecordBatch, DecodeError> {
        let name = self.name();
        self.validate(bytes)?;

        let format = self.to_format();
        let (schema, _) = format
            .infer_schema(Cursor::new(bytes.as_ref()), self.max_read_records)
            .map_err(|e| arrow_failure(name, e))?;
        let schema = Arc::new(schema);
        let reader = ReaderBuilder::new(Arc::clone(&schema))
            .with_format(format)
            .build(Cursor::new(bytes.as_ref()))
            .map_err(|e| arrow_failure(name, e))?;
        let batches = reader
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| arrow_failure(name, e))?;
        single_batch(name, schema, batches)
    }
}
