//! Export: batches from the executor written to a tabular sink.

use crate::ast::values::json_to_text;
use crate::engine::batch::{BatchExecutor, RowSource};
use crate::engine::Row;
use crate::error::{EtlError, EtlResult};

/// A tabular serializer fed one batch at a time.
///
/// The header is written with the first batch; later batches only append.
pub trait TabularSink: Send {
    fn content_type(&self) -> &'static str;

    fn extension(&self) -> &'static str;

    fn write_batch(&mut self, rows: &[Row]) -> EtlResult<()>;

    /// Flush and return the serialized file.
    fn finish(self) -> EtlResult<Vec<u8>>
    where
        Self: Sized;
}

/// A finished export, ready to send as an attachment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportPayload {
    pub bytes: Vec<u8>,
    pub content_type: String,
    pub filename: String,
}

/// CSV sink backed by the `csv` crate.
pub struct CsvSink {
    writer: csv::Writer<Vec<u8>>,
    header: Option<Vec<String>>,
    fallback_header: Vec<String>,
}

impl Default for CsvSink {
    fn default() -> Self {
        Self::new()
    }
}

impl CsvSink {
    pub fn new() -> Self {
        Self {
            writer: csv::Writer::from_writer(Vec::new()),
            header: None,
            fallback_header: Vec::new(),
        }
    }

    /// Header written when the export produced no rows.
    pub fn with_fallback_header(mut self, columns: Vec<String>) -> Self {
        self.fallback_header = columns;
        self
    }

    fn write_header(&mut self, columns: Vec<String>) -> EtlResult<()> {
        self.writer.write_record(&columns).map_err(csv_error)?;
        self.header = Some(columns);
        Ok(())
    }
}

impl TabularSink for CsvSink {
    fn content_type(&self) -> &'static str {
        "text/csv; charset=utf-8"
    }

    fn extension(&self) -> &'static str {
        "csv"
    }

    fn write_batch(&mut self, rows: &[Row]) -> EtlResult<()> {
        let Some(first) = rows.first() else {
            return Ok(());
        };
        if self.header.is_none() {
            self.write_header(first.keys().cloned().collect())?;
        }
        let header = self.header.as_deref().unwrap_or_default();
        for row in rows {
            let record = header
                .iter()
                .map(|column| row.get(column).and_then(json_to_text).unwrap_or_default());
            self.writer.write_record(record).map_err(csv_error)?;
        }
        Ok(())
    }

    fn finish(mut self) -> EtlResult<Vec<u8>> {
        if self.header.is_none() && !self.fallback_header.is_empty() {
            let columns = std::mem::take(&mut self.fallback_header);
            self.write_header(columns)?;
        }
        self.writer
            .into_inner()
            .map_err(|e| EtlError::Execution(format!("csv: {}", e)))
    }
}

fn csv_error(e: csv::Error) -> EtlError {
    EtlError::Execution(format!("csv: {}", e))
}

/// Drain `executor` into `sink`.
///
/// A failing batch aborts the export; nothing partial is returned.
pub async fn export_to<S, K>(mut executor: BatchExecutor<'_, S>, mut sink: K, name: &str) -> EtlResult<ExportPayload>
where
    S: RowSource,
    K: TabularSink,
{
    let mut batches = 0usize;
    while let Some(batch) = executor.next_batch().await? {
        sink.write_batch(&batch)?;
        batches += 1;
    }
    tracing::info!(batches, rows = executor.scanned(), "export finished");

    let content_type = sink.content_type().to_string();
    let filename = format!("{}_export.{}", name, sink.extension());
    Ok(ExportPayload {
        bytes: sink.finish()?,
        content_type,
        filename,
    })
}
