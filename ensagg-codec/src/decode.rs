//! Format probing for fetched payloads.

use std::io::Cursor;

use arrow::compute::concat_batches;
use arrow::datatypes::SchemaRef;
use arrow::error::ArrowError;
use arrow::ipc::reader::{FileReader, StreamReader};
use arrow::record_batch::RecordBatch;
use bytes::Bytes;
use ensagg_result::DecodeError;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;

use crate::csv::CsvDecoder;

const PARQUET_MAGIC: &[u8] = b"PAR1";
const ARROW_FILE_MAGIC: &[u8] = b"ARROW1";
const IPC_CONTINUATION: [u8; 4] = [0xFF; 4];

/// One payload format.
///
/// A decoder either returns the complete table or a [`DecodeError`]; it never returns a
/// partially decoded table.
pub trait TableDecoder: Send + Sync {
    fn name(&self) -> &'static str;

    fn decode(&self, bytes: &Bytes) -> Result<RecordBatch, DecodeError>;
}

/// Successful decode, tagged with the decoder that produced it.
#[derive(Debug, Clone)]
pub struct Decoded {
    pub batch: RecordBatch,
    pub format: &'static str,
}

/// Ordered list of decoders tried in turn until one succeeds.
pub struct DecoderChain {
    decoders: Vec<Box<dyn TableDecoder>>,
}

impl Default for DecoderChain {
    fn default() -> Self {
        Self::new(vec![
            Box::new(ParquetDecoder),
            Box::new(IpcFileDecoder),
            Box::new(IpcStreamDecoder),
            Box::new(CsvDecoder::default()),
        ])
    }
}

impl DecoderChain {
    pub fn new(decoders: Vec<Box<dyn TableDecoder>>) -> Self {
        Self { decoders }
    }

    pub fn formats(&self) -> Vec<&'static str> {
        self.decoders.iter().map(|d| d.name()).collect()
    }

    /// Decode `bytes` with the first decoder that accepts them.
    ///
    /// On failure every decoder's error is returned, in probe order.
    pub fn decode(&self, bytes: &Bytes) -> Result<Decoded, Vec<DecodeError>> {
        let mut failures = Vec::with_capacity(self.decoders.len());
        for decoder in &self.decoders {
            match decoder.decode(bytes) {
                Ok(batch) => {
                    tracing::debug!(
                        format = decoder.name(),
                        rows = batch.num_rows(),
                        columns = batch.num_columns(),
                        rejected = failures.len(),
                        "decoded payload"
                    );
                    return Ok(Decoded {
                        batch,
                        format: decoder.name(),
                    });
                }
                Err(err) => {
                    tracing::debug!(
                        format = decoder.name(),
                        error = %err,
                        "decoder rejected payload"
                    );
                    failures.push(err);
                }
            }
        }
        Err(failures)
    }
}

/// Render a list of decoder failures as one line.
pub fn describe_failures(failures: &[DecodeError]) -> String {
    if failures.is_empty() {
        return "no decoder configured".to_string();
    }
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Concatenate batches from a multi-batch payload into one.
pub(crate) fn single_batch(
    format: &'static str,
    schema: SchemaRef,
    mut batches: Vec<RecordBatch>,
) -> Result<RecordBatch, DecodeError> {
    match batches.len() {
        0 => Ok(RecordBatch::new_empty(schema)),
        1 => Ok(batches.remove(0)),
        _ => concat_batches(&schema, &batches).map_err(|e| arrow_failure(format, e)),
    }
}

pub(crate) fn arrow_failure(format: &'static str, err: ArrowError) -> DecodeError {
    DecodeError::new(format, err.to_string())
}

/// Parquet, the primary realization format.
#[derive(Debug, Default, Clone, Copy)]
pub struct ParquetDecoder;

impl TableDecoder for ParquetDecoder {
    fn name(&self) -> &'static str {
        "parquet"
    }

    fn decode(&self, bytes: &Bytes) -> Result<RecordBatch, DecodeError> {
        let name = self.name();
        if bytes.len() < 2 * PARQUET_MAGIC.len()
            || !bytes.starts_with(PARQUET_MAGIC)
            || !bytes.ends_with(PARQUET_MAGIC)
        {
            return Err(DecodeError::new(name, "missing PAR1 magic"));
        }

        let builder = ParquetRecordBatchReaderBuilder::try_new(bytes.clone())
            .map_err(|e| DecodeError::new(name, format!("failed to create reader: {e}")))?;
        let schema = builder.schema().clone();
        let reader = builder
            .build()
            .map_err(|e| DecodeError::new(name, format!("failed to build reader: {e}")))?;

        let mut batches = Vec::new();
        for batch in reader {
            batches.push(batch.map_err(|e| arrow_failure(name, e))?);
        }
        single_batch(name, schema, batches)
    }
}

/// Arrow IPC file format (feather v2).
#[derive(Debug, Default, Clone, Copy)]
pub struct IpcFileDecoder;

impl TableDecoder for IpcFileDecoder {
    fn name(&self) -> &'static str {
        "arrow-ipc-file"
    }

    fn decode(&self, bytes: &Bytes) -> Result<RecordBatch, DecodeError> {
        let name = self.name();
        if !bytes.starts_with(ARROW_FILE_MAGIC) || !bytes.ends_with(ARROW_FILE_MAGIC) {
            return Err(DecodeError::new(name, "missing ARROW1 magic"));
        }

        let reader = FileReader::try_new(Cursor::new(bytes.as_ref()), None)
            .map_err(|e| arrow_failure(name, e))?;
        let schema = reader.schema();
        let batches = reader
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| arrow_failure(name, e))?;
        single_batch(name, schema, batches)
    }
}

/// Arrow IPC stream format. Only the continuation-marker framing is accepted.
#[derive(Debug, Default, Clone, Copy)]
pub struct IpcStreamDecoder;

impl TableDecoder for IpcStreamDecoder {
    fn name(&self) -> &'static str {
        "arrow-ipc-stream"
    }

    fn decode(&self, bytes: &Bytes) -> Result<RecordBatch, DecodeError> {
        let name = self.name();
        if !bytes.starts_with(&IPC_CONTINUATION) {
            return Err(DecodeError::new(name, "missing continuation marker"));
        }

        let reader = StreamReader::try_new(Cursor::new(bytes.as_ref()), None)
            .map_err(|e| arrow_failure(name, e))?;
        let schema = reader.schema();
        let batches = reader
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| arrow_failure(name, e))?;
        single_batch(name, schema, batches)
    }
}
