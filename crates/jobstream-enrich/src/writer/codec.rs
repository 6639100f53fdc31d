//! Enriched records <-> Arrow record batch <-> Parquet bytes

use std::sync::{Arc, OnceLock};

use arrow::array::{
    Array, ArrayRef, AsArray, BooleanArray, GenericListArray, ListBuilder, StringArray,
    StringBuilder, TimestampMicrosecondArray, UInt64Array, UInt8Array,
};
use arrow::datatypes::{
    DataType, Field, Schema, SchemaRef, TimeUnit, TimestampMicrosecondType, UInt64Type, UInt8Type,
};
use arrow::record_batch::RecordBatch;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;

use jobstream_common::types::EnrichedJobRecord;

use crate::error::{ReadError, WriteError};

const UTC: &str = "UTC";

fn timestamp_type() -> DataType {
    DataType::Timestamp(TimeUnit::Microsecond, Some(UTC.into()))
}

fn string_list_type() -> DataType {
    DataType::List(Arc::new(Field::new("item", DataType::Utf8, true)))
}

/// Schema of `records.parquet`
pub fn records_schema() -> SchemaRef {
    static SCHEMA: OnceLock<SchemaRef> = OnceLock::new();
    Arc::clone(SCHEMA.get_or_init(|| {
        Arc::new(Schema::new(vec![
            Field::new("source_id", DataType::Utf8, false),
            Field::new("title", DataType::Utf8, false),
            Field::new("company", DataType::Utf8, false),
            Field::new("location", DataType::Utf8, false),
            Field::new("posted_at", timestamp_type(), true),
            Field::new("detail_ref", DataType::Utf8, true),
            Field::new("ingest_seq", DataType::UInt64, false),
            Field::new("description", DataType::Utf8, false),
            Field::new("requirements", string_list_type(), false),
            Field::new("responsibilities", string_list_type(), false),
            Field::new("resolution_status", DataType::Utf8, false),
            Field::new("resolved_at", timestamp_type(), true),
            Field::new("matched_ref", DataType::Utf8, true),
            Field::new("candidate_refs", string_list_type(), false),
            Field::new("low_confidence", DataType::Boolean, false),
            Field::new("failure_reason", DataType::Utf8, true),
            Field::new("category", DataType::Utf8, false),
            Field::new("seniority_level", DataType::Utf8, false),
            Field::new("complexity_score", DataType::UInt8, false),
        ]))
    }))
}

fn string_column<'a>(values: impl Iterator<Item = &'a str>) -> ArrayRef {
    Arc::new(StringArray::from_iter_values(values))
}

fn optional_string_column<'a>(values: impl Iterator<Item = Option<&'a str>>) -> ArrayRef {
    Arc::new(values.collect::<StringArray>())
}

fn timestamp_column(values: impl Iterator<Item = Option<DateTime<Utc>>>) -> ArrayRef {
    let micros: TimestampMicrosecondArray = values.map(|ts| ts.map(|t| t.timestamp_micros())).collect();
    Arc::new(micros.with_timezone(UTC))
}

fn list_column<'a>(values: impl Iterator<Item = &'a Vec<String>>) -> ArrayRef {
    let mut builder = ListBuilder::new(StringBuilder::new());
    for items in values {
        for item in items {
            builder.values().append_value(item);
        }
        builder.append(true);
    }
    Arc::new(builder.finish())
}

pub fn to_record_batch(records: &[EnrichedJobRecord]) -> Result<RecordBatch, WriteError> {
    let columns: Vec<ArrayRef> = vec![
        string_column(records.iter().map(|r| r.source_id.as_str())),
        string_column(records.iter().map(|r| r.title.as_str())),
        string_column(records.iter().map(|r| r.company.as_str())),
        string_column(records.iter().map(|r| r.location.as_str())),
        timestamp_column(records.iter().map(|r| r.posted_at)),
        optional_string_column(records.iter().map(|r| r.detail_ref.as_deref())),
        Arc::new(UInt64Array::from_iter_values(records.iter().map(|r| r.ingest_seq))),
        string_column(records.iter().map(|r| r.description.as_str())),
        list_column(records.iter().map(|r| &r.requirements)),
        list_column(records.iter().map(|r| &r.responsibilities)),
        string_column(records.iter().map(|r| r.resolution_status.as_str())),
        timestamp_column(records.iter().map(|r| r.resolved_at)),
        optional_string_column(records.iter().map(|r| r.matched_ref.as_deref())),
        list_column(records.iter().map(|r| &r.candidate_refs)),
        Arc::new(BooleanArray::from(
            records.iter().map(|r| r.low_confidence).collect::<Vec<_>>(),
        )),
        optional_string_column(records.iter().map(|r| r.failure_reason.as_deref())),
        string_column(records.iter().map(|r| r.category.as_str())),
        string_column(records.iter().map(|r| r.seniority_level.as_str())),
        Arc::new(UInt8Array::from_iter_values(records.iter().map(|r| r.complexity_score))),
    ];

    Ok(RecordBatch::try_new(records_schema(), columns)?)
}

/// Encode records as a single-row-group, Snappy-compressed Parquet file
pub fn encode_records(records: &[EnrichedJobRecord]) -> Result<Bytes, WriteError> {
    let batch = to_record_batch(records)?;
    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .set_created_by(concat!("jobstream-enrich ", env!("CARGO_PKG_VERSION")).to_string())
        .build();

    let mut buf = Vec::new();
    let mut writer = ArrowWriter::try_new(&mut buf, batch.schema(), Some(props))?;
    writer.write(&batch)?;
    writer.close()?;

    Ok(Bytes::from(buf))
}

// ============================================================================
// Decoding
// ============================================================================

fn column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a ArrayRef, ReadError> {
    batch
        .column_by_name(name)
        .ok_or_else(|| ReadError::Decode(format!("missing column {name}")))
}

fn strings<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray, ReadError> {
    column(batch, name)?
        .as_string_opt::<i32>()
        .ok_or_else(|| ReadError::Decode(format!("column {name} is not utf8")))
}

fn lists<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a GenericListArray<i32>, ReadError> {
    column(batch, name)?
        .as_list_opt::<i32>()
        .ok_or_else(|| ReadError::Decode(format!("column {name} is not a list")))
}

fn timestamps<'a>(
    batch: &'a RecordBatch,
    name: &str,
) -> Result<&'a TimestampMicrosecondArray, ReadError> {
    column(batch, name)?
        .as_primitive_opt::<TimestampMicrosecondType>()
        .ok_or_else(|| ReadError::Decode(format!("column {name} is not a timestamp")))
}

fn optional_string(array: &StringArray, row: usize) -> Option<String> {
    (!array.is_null(row)).then(|| array.value(row).to_string())
}

fn optional_timestamp(array: &TimestampMicrosecondArray, row: usize) -> Result<Option<DateTime<Utc>>, ReadError> {
    if array.is_null(row) {
        return Ok(None);
    }
    let micros = array.value(row);
    DateTime::from_timestamp_micros(micros)
        .map(Some)
        .ok_or_else(|| ReadError::Decode(format!("timestamp {micros} out of range")))
}

fn string_list(array: &GenericListArray<i32>, row: usize) -> Result<Vec<String>, ReadError> {
    let values = array.value(row);
    let values = values
        .as_string_opt::<i32>()
        .ok_or_else(|| ReadError::Decode("list items are not utf8".to_string()))?;
    Ok(values.iter().flatten().map(str::to_string).collect())
}

pub fn from_record_batch(batch: &RecordBatch) -> Result<Vec<EnrichedJobRecord>, ReadError> {
    let source_id = strings(batch, "source_id")?;
    let title = strings(batch, "title")?;
    let company = strings(batch, "company")?;
    let location = strings(batch, "location")?;
    let posted_at = timestamps(batch, "posted_at")?;
    let detail_ref = strings(batch, "detail_ref")?;
    let ingest_seq = column(batch, "ingest_seq")?
        .as_primitive_opt::<UInt64Type>()
        .ok_or_else(|| ReadError::Decode("column ingest_seq is not u64".to_string()))?;
    let description = strings(batch, "description")?;
    let requirements = lists(batch, "requirements")?;
    let responsibilities = lists(batch, "responsibilities")?;
    let resolution_status = strings(batch, "resolution_status")?;
    let resolved_at = timestamps(batch, "resolved_at")?;
    let matched_ref = strings(batch, "matched_ref")?;
    let candidate_refs = lists(batch, "candidate_refs")?;
    let low_confidence = column(batch, "low_confidence")?
        .as_boolean_opt()
        .ok_or_else(|| ReadError::Decode("column low_confidence is not boolean".to_string()))?;
    let failure_reason = strings(batch, "failure_reason")?;
    let category = strings(batch, "category")?;
    let seniority_level = strings(batch, "seniority_level")?;
    let complexity_score = column(batch, "complexity_score")?
        .as_primitive_opt::<UInt8Type>()
        .ok_or_else(|| ReadError::Decode("column complexity_score is not u8".to_string()))?;

    (0..batch.num_rows())
        .map(|row| -> Result<EnrichedJobRecord, ReadError> {
            Ok(EnrichedJobRecord {
                source_id: source_id.value(row).to_string(),
                title: title.value(row).to_string(),
                company: company.value(row).to_string(),
                location: location.value(row).to_string(),
                posted_at: optional_timestamp(posted_at, row)?,
                detail_ref: optional_string(detail_ref, row),
                ingest_seq: ingest_seq.value(row),
                description: description.value(row).to_string(),
                requirements: string_list(requirements, row)?,
                responsibilities: string_list(responsibilities, row)?,
                resolution_status: resolution_status.value(row).parse()?,
                resolved_at: optional_timestamp(resolved_at, row)?,
                matched_ref: optional_string(matched_ref, row),
                candidate_refs: string_list(candidate_refs, row)?,
                low_confidence: low_confidence.value(row),
                failure_reason: optional_string(failure_reason, row),
                category: category.value(row).parse()?,
                seniority_level: seniority_level.value(row).parse()?,
                complexity_score: complexity_score.value(row),
            })
        })
        .collect()
}

pub fn decode_records(data: Bytes) -> Result<Vec<EnrichedJobRecord>, ReadError> {
    let reader = ParquetRecordBatchReaderBuilder::try_new(data)?.build()?;

    let mut records = Vec::new();
    for batch in reader {
        records.extend(from_record_batch(&batch?)?);
    }
    Ok(records)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use jobstream_common::types::{JobCategory, ResolutionStatus, SeniorityLevel};

    fn ambiguous_record() -> EnrichedJobRecord {
        EnrichedJobRecord {
            source_id: String::new(),
            title: "Software Engineer".to_string(),
            company: "Acme".to_string(),
            location: "Remote".to_string(),
            posted_at: Some(Utc.with_ymd_and_hms(2026, 4, 1, 12, 0, 0).unwrap()),
            detail_ref: None,
            ingest_seq: 17,
            description: String::new(),
            requirements: Vec::new(),
            responsibilities: Vec::new(),
            resolution_status: ResolutionStatus::Ambiguous,
            resolved_at: None,
            matched_ref: Some("https://x/a/".to_string()),
            candidate_refs: vec!["https://x/a/".to_string(), "https://x/b/".to_string()],
            low_confidence: true,
            failure_reason: None,
            category: JobCategory::Engineering,
            seniority_level: SeniorityLevel::Mid,
            complexity_score: 0,
        }
    }

    #[test]
    fn test_schema_matches_batch() {
        let batch = to_record_batch(&[ambiguous_record()]).unwrap();
        assert_eq!(batch.schema(), records_schema());
        assert_eq!(batch.num_rows(), 1);
    }

    #[test]
    fn test_parquet_preserves_nulls_and_lists() {
        let mut resolved = ambiguous_record();
        resolved.ingest_seq = 18;
        resolved.resolution_status = ResolutionStatus::Resolved;
        resolved.candidate_refs.clear();
        resolved.low_confidence = false;
        resolved.requirements = vec!["Rust".to_string(), String::new()];
        resolved.resolved_at = Some(Utc.with_ymd_and_hms(2026, 4, 2, 8, 30, 0).unwrap());
        resolved.complexity_score = 73;

        let mut failed = ambiguous_record();
        failed.ingest_seq = 19;
        failed.resolution_status = ResolutionStatus::Failed;
        failed.matched_ref = None;
        failed.candidate_refs.clear();
        failed.low_confidence = false;
        failed.failure_reason = Some("Resolver timed out after 5s".to_string());

        let records = vec![ambiguous_record(), resolved, failed];
        let decoded = decode_records(encode_records(&records).unwrap()).unwrap();
        assert_eq!(decoded, records);
    }

    #[test]
    fn test_encoding_is_deterministic() {
        let records = vec![ambiguous_record()];
        assert_eq!(
            encode_records(&records).unwrap(),
            encode_records(&records).unwrap()
        );
    }
}
