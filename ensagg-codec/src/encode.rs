//! Payload encoders.

use arrow::csv::WriterBuilder;
use arrow::ipc::writer::FileWriter;
use arrow::record_batch::RecordBatch;
use bytes::Bytes;
use ensagg_result::{Error, Result};
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;

/// Canonical artifact encoding: an uncompressed Arrow IPC file (feather v2).
///
/// The output depends only on the batch's schema and data, so equal tables always
/// produce equal bytes and therefore equal checksums.
pub fn encode_ipc_file(batch: &RecordBatch) -> Result<Bytes> {
    let mut writer = FileWriter::try_new(Vec::new(), &batch.schema())?;
    writer.write(batch)?;
    writer.finish()?;
    Ok(Bytes::from(writer.into_inner()?))
}

/// Write a RecordBatch to an in-memory Parquet file.
///
/// Realization tables produced by the seeding helpers use this format.
pub fn write_parquet_to_memory(batch: &RecordBatch) -> Result<Bytes> {
    let mut buffer = Vec::new();

    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .set_max_row_group_size(8192)
        .build();

    let mut writer = ArrowWriter::try_new(&mut buffer, batch.schema(), Some(props))
        .map_err(|e| Error::Internal(format!("failed to create Parquet writer: {e}")))?;
    writer
        .write(batch)
        .map_err(|e| Error::Internal(format!("failed to write RecordBatch to Parquet: {e}")))?;
    writer
        .close()
        .map_err(|e| Error::Internal(format!("failed to close Parquet writer: {e}")))?;

    Ok(Bytes::from(buffer))
}

/// Write a RecordBatch as CSV with a header row.
pub fn encode_csv(batch: &RecordBatch) -> Result<Bytes> {
    let mut writer = WriterBuilder::new().with_header(true).build(Vec::new());
    writer.write(batch)?;
    Ok(Bytes::from(writer.into_inner()))
}
