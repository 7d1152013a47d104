//! Capture log Parquet writer and reader

use super::session::CompletedSession;
use super::types::{CaptureRecord, RecordKind, RecordPayload, SessionKey};
use crate::feed::TradeSide;
use arrow::array::{
    Array, ArrayRef, Float64Array, StringArray, TimestampMicrosecondArray, UInt64Array,
};
use arrow::datatypes::{DataType, Field, Schema, TimeUnit};
use arrow::record_batch::RecordBatch;
use chrono::{DateTime, Utc};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::metadata::KeyValue;
use parquet::file::properties::WriterProperties;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

fn timestamp_field(name: &str) -> Field {
    Field::new(
        name,
        DataType::Timestamp(TimeUnit::Microsecond, Some("UTC".into())),
        false,
    )
}

/// Capture log schema; quote and trade columns are null for the other kind
pub fn capture_schema() -> Schema {
    Schema::new(vec![
        Field::new("kind", DataType::Utf8, false),
        timestamp_field("local_ts"),
        timestamp_field("event_ts"),
        Field::new("latency_ms", DataType::Float64, false),
        // Decimals stored as strings to keep precision
        Field::new("bid_price", DataType::Utf8, true),
        Field::new("bid_qty", DataType::Utf8, true),
        Field::new("ask_price", DataType::Utf8, true),
        Field::new("ask_qty", DataType::Utf8, true),
        Field::new("update_id", DataType::UInt64, true),
        Field::new("trade_price", DataType::Utf8, true),
        Field::new("trade_qty", DataType::Utf8, true),
        Field::new("side", DataType::Utf8, true),
        Field::new("trade_id", DataType::UInt64, true),
    ])
}

/// Session-level key-value metadata stored in the file footer
pub fn session_metadata(session: &CompletedSession) -> Vec<KeyValue> {
    let ts = |t: DateTime<Utc>| t.to_rfc3339_opts(chrono::SecondsFormat::Micros, true);
    vec![
        KeyValue::new("symbol".to_string(), session.key.symbol.clone()),
        KeyValue::new("settlement".to_string(), ts(session.key.settlement)),
        KeyValue::new("session_id".to_string(), session.id.to_string()),
        KeyValue::new("funding_rate".to_string(), session.funding_rate.to_string()),
        KeyValue::new(
            "interval_hours".to_string(),
            session.interval_hours.to_string(),
        ),
        KeyValue::new(
            "clock_offset_ms".to_string(),
            session.offset.offset_ms.to_string(),
        ),
        KeyValue::new("window_start".to_string(), ts(session.window_start)),
        KeyValue::new("window_end".to_string(), ts(session.window_end)),
        KeyValue::new("started_at".to_string(), ts(session.started_at)),
        KeyValue::new("ended_at".to_string(), ts(session.ended_at)),
        KeyValue::new("partial".to_string(), session.partial.to_string()),
    ]
}

/// Writes one Parquet file per completed session
#[derive(Debug, Clone)]
pub struct CaptureLogWriter {
    output_dir: PathBuf,
}

impl CaptureLogWriter {
    pub fn new(output_dir: PathBuf) -> Self {
        Self { output_dir }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Ensure output directory exists
    pub fn ensure_dir(&self) -> anyhow::Result<()> {
        fs::create_dir_all(&self.output_dir)?;
        Ok(())
    }

    /// Final path of a session's log
    pub fn file_path(&self, key: &SessionKey) -> PathBuf {
        self.output_dir.join(format!("{}.parquet", key.file_stem()))
    }

    /// Write a session's log
    ///
    /// The file appears under its final name only once fully written. A
    /// session without records still produces a file carrying its metadata.
    pub fn write(&self, session: &CompletedSession) -> anyhow::Result<PathBuf> {
        self.ensure_dir()?;

        let path = self.file_path(&session.key);
        let tmp_path = path.with_extension("parquet.tmp");

        let result = Self::write_file(&tmp_path, session);
        if let Err(e) = result {
            let _ = fs::remove_file(&tmp_path);
            return Err(e);
        }
        fs::rename(&tmp_path, &path)?;

        tracing::debug!(path = ?path, count = session.records.len(), "Wrote capture log to Parquet");

        Ok(path)
    }

    fn write_file(path: &Path, session: &CompletedSession) -> anyhow::Result<()> {
        let schema = Arc::new(capture_schema());
        let file = File::create(path)?;

        let props = WriterProperties::builder()
            .set_compression(Compression::SNAPPY)
            .set_key_value_metadata(Some(session_metadata(session)))
            .build();

        let mut writer = ArrowWriter::try_new(file, schema.clone(), Some(props))?;

        if !session.records.is_empty() {
            let batch = Self::build_batch(schema, &session.records, &session.latencies())?;
            writer.write(&batch)?;
        }
        writer.close()?;

        Ok(())
    }

    fn build_batch(
        schema: Arc<Schema>,
        records: &[CaptureRecord],
        latencies: &[f64],
    ) -> anyhow::Result<RecordBatch> {
        let kinds: Vec<&str> = records.iter().map(|r| r.kind().as_str()).collect();
        let local_ts: Vec<i64> = records.iter().map(|r| r.local_ts.timestamp_micros()).collect();
        let event_ts: Vec<i64> = records.iter().map(|r| r.event_ts.timestamp_micros()).collect();

        let optional_strings = |f: fn(&RecordPayload) -> Option<String>| -> Vec<Option<String>> {
            records.iter().map(|r| f(&r.payload)).collect()
        };

        let bid_prices = optional_strings(|p| match p {
            RecordPayload::Quote { bid_price, .. } => Some(bid_price.to_string()),
            _ => None,
        });
        let bid_qtys = optional_strings(|p| match p {
            RecordPayload::Quote { bid_qty, .. } => Some(bid_qty.to_string()),
            _ => None,
        });
        let ask_prices = optional_strings(|p| match p {
            RecordPayload::Quote { ask_price, .. } => Some(ask_price.to_string()),
            _ => None,
        });
        let ask_qtys = optional_strings(|p| match p {
            RecordPayload::Quote { ask_qty, .. } => Some(ask_qty.to_string()),
            _ => None,
        });
        let trade_prices = optional_strings(|p| match p {
            RecordPayload::Trade { price, .. } => Some(price.to_string()),
            _ => None,
        });
        let trade_qtys = optional_strings(|p| match p {
            RecordPayload::Trade { qty, .. } => Some(qty.to_string()),
            _ => None,
        });
        let sides = optional_strings(|p| match p {
            RecordPayload::Trade { side, .. } => Some(side.as_str().to_string()),
            _ => None,
        });
        let update_ids: Vec<Option<u64>> = records
            .iter()
            .map(|r| match r.payload {
                RecordPayload::Quote { update_id, .. } => Some(update_id),
                _ => None,
            })
            .collect();
        let trade_ids: Vec<Option<u64>> = records
            .iter()
            .map(|r| match r.payload {
                RecordPayload::Trade { trade_id, .. } => Some(trade_id),
                _ => None,
            })
            .collect();

        let columns: Vec<ArrayRef> = vec![
            Arc::new(StringArray::from(kinds)),
            Arc::new(TimestampMicrosecondArray::from(local_ts).with_timezone("UTC")),
            Arc::new(TimestampMicrosecondArray::from(event_ts).with_timezone("UTC")),
            Arc::new(Float64Array::from(latencies.to_vec())),
            Arc::new(StringArray::from(bid_prices)),
            Arc::new(StringArray::from(bid_qtys)),
            Arc::new(StringArray::from(ask_prices)),
            Arc::new(StringArray::from(ask_qtys)),
            Arc::new(UInt64Array::from(update_ids)),
            Arc::new(StringArray::from(trade_prices)),
            Arc::new(StringArray::from(trade_qtys)),
            Arc::new(StringArray::from(sides)),
            Arc::new(UInt64Array::from(trade_ids)),
        ];

        Ok(RecordBatch::try_new(schema, columns)?)
    }
}

/// A capture log read back from disk
#[derive(Debug, Clone)]
pub struct CaptureLog {
    pub metadata: HashMap<String, String>,
    pub records: Vec<CaptureRecord>,
    /// Latencies as written
    pub latencies: Vec<f64>,
}

/// Reader for capture log files
pub struct CaptureLogReader {
    path: PathBuf,
}

impl CaptureLogReader {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Get the file path
    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    pub fn read(&self) -> anyhow::Result<CaptureLog> {
        let file = File::open(&self.path)?;
        let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;

        let metadata: HashMap<String, String> = builder
            .metadata()
            .file_metadata()
            .key_value_metadata()
            .map(|kvs| {
                kvs.iter()
                    .filter_map(|kv| Some((kv.key.clone(), kv.value.clone()?)))
                    .collect()
            })
            .unwrap_or_default();

        let reader = builder.build()?;
        let mut records = Vec::new();
        let mut latencies = Vec::new();

        for batch_result in reader {
            let batch = batch_result?;

            let kinds = string_column(&batch, "kind")?;
            let local_ts = timestamp_column(&batch, "local_ts")?;
            let event_ts = timestamp_column(&batch, "event_ts")?;
            let latency = batch
                .column_by_name("latency_ms")
                .and_then(|c| c.as_any().downcast_ref::<Float64Array>())
                .ok_or_else(|| anyhow::anyhow!("Invalid latency_ms column"))?;
            let bid_prices = string_column(&batch, "bid_price")?;
            let bid_qtys = string_column(&batch, "bid_qty")?;
            let ask_prices = string_column(&batch, "ask_price")?;
            let ask_qtys = string_column(&batch, "ask_qty")?;
            let update_ids = u64_column(&batch, "update_id")?;
            let trade_prices = string_column(&batch, "trade_price")?;
            let trade_qtys = string_column(&batch, "trade_qty")?;
            let sides = string_column(&batch, "side")?;
            let trade_ids = u64_column(&batch, "trade_id")?;

            for i in 0..batch.num_rows() {
                let kind = RecordKind::from_str(kinds.value(i)).map_err(anyhow::Error::msg)?;
                let payload = match kind {
                    RecordKind::Quote => RecordPayload::Quote {
                        bid_price: Decimal::from_str(bid_prices.value(i))?,
                        bid_qty: Decimal::from_str(bid_qtys.value(i))?,
                        ask_price: Decimal::from_str(ask_prices.value(i))?,
                        ask_qty: Decimal::from_str(ask_qtys.value(i))?,
                        update_id: update_ids.value(i),
                    },
                    RecordKind::Trade => RecordPayload::Trade {
                        price: Decimal::from_str(trade_prices.value(i))?,
                        qty: Decimal::from_str(trade_qtys.value(i))?,
                        side: TradeSide::from_str(sides.value(i)).map_err(anyhow::Error::msg)?,
                        trade_id: trade_ids.value(i),
                    },
                };

                records.push(CaptureRecord {
                    local_ts: DateTime::from_timestamp_micros(local_ts.value(i))
                        .ok_or_else(|| anyhow::anyhow!("Invalid local_ts"))?,
                    event_ts: DateTime::from_timestamp_micros(event_ts.value(i))
                        .ok_or_else(|| anyhow::anyhow!("Invalid event_ts"))?,
                    payload,
                });
                latencies.push(latency.value(i));
            }
        }

        Ok(CaptureLog {
            metadata,
            records,
            latencies,
        })
    }
}

fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> anyhow::Result<&'a StringArray> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<StringArray>())
        .ok_or_else(|| anyhow::anyhow!("Invalid {} column", name))
}

fn u64_column<'a>(batch: &'a RecordBatch, name: &str) -> anyhow::Result<&'a UInt64Array> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<UInt64Array>())
        .ok_or_else(|| anyhow::anyhow!("Invalid {} column", name))
}

fn timestamp_column<'a>(
    batch: &'a RecordBatch,
    name: &str,
) -> anyhow::Result<&'a TimestampMicrosecondArray> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<TimestampMicrosecondArray>())
        .ok_or_else(|| anyhow::anyhow!("Invalid {} column", name))
}
