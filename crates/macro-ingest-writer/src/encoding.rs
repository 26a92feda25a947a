use std::sync::OnceLock;

use arrow::compute::concat_batches;
use arrow::record_batch::RecordBatch;
use bytes::Bytes;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::{EnabledStatistics, WriterProperties};
use parquet::format::KeyValue;

use crate::error::{Result, WriterError};

/// Shared writer properties (cached)
///
/// - Snappy compression
/// - Dictionary encoding enabled
/// - Writer version embedded in file metadata
pub(crate) fn writer_properties() -> &'static WriterProperties {
    static PROPERTIES: OnceLock<WriterProperties> = OnceLock::new();
    PROPERTIES.get_or_init(|| {
        let metadata = vec![KeyValue {
            key: "macro_ingest.version".to_string(),
            value: Some(env!("CARGO_PKG_VERSION").to_string()),
        }];

        WriterProperties::builder()
            .set_dictionary_enabled(true)
            .set_statistics_enabled(EnabledStatistics::Page)
            .set_compression(Compression::SNAPPY)
            .set_data_page_size_limit(256 * 1024)
            .set_write_batch_size(32 * 1024)
            .set_max_row_group_size(32 * 1024)
            .set_dictionary_page_size_limit(128 * 1024)
            .set_key_value_metadata(Some(metadata))
            .build()
    })
}

/// Encode a frame into an in-memory Parquet file. `path` only labels errors.
pub fn encode_parquet(batch: &RecordBatch, path: &str) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    let mut writer = ArrowWriter::try_new(&mut buffer, batch.schema(), Some(writer_properties().clone()))
        .map_err(|e| WriterError::parquet("encode", path, e))?;
    writer
        .write(batch)
        .map_err(|e| WriterError::parquet("encode", path, e))?;
    writer
        .close()
        .map_err(|e| WriterError::parquet("encode", path, e))?;
    Ok(buffer)
}

/// Decode a Parquet file back into a single frame.
pub fn decode_parquet(bytes: Bytes, path: &str) -> Result<RecordBatch> {
    let builder = ParquetRecordBatchReaderBuilder::try_new(bytes)
        .map_err(|e| WriterError::parquet("decode", path, e))?;
    let schema = builder.schema().clone();
    let reader = builder
        .build()
        .map_err(|e| WriterError::parquet("decode", path, e))?;
    let batches = reader
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| WriterError::parquet("decode", path, e))?;
    concat_batches(&schema, &batches).map_err(|e| WriterError::parquet("decode", path, e))
}
