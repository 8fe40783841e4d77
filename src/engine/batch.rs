//! Streaming batch executor.
//!
//! Pages through a plan's unbounded query with `LIMIT/OFFSET`, one resident
//! batch at a time. The plan always carries an ORDER BY, so pages neither
//! skip nor repeat rows.

use async_trait::async_trait;
use futures::Stream;
use tokio_util::sync::CancellationToken;

use crate::ast::Value;
use crate::engine::Row;
use crate::error::{EtlError, EtlResult};
use crate::transpiler::plan::normalize_booleans;
use crate::transpiler::{Dialect, QueryPlan, SourceColumn};

/// Something that can run compiled SQL.
#[async_trait]
pub trait RowSource: Send + Sized {
    fn dialect(&self) -> Dialect;

    async fn fetch(&mut self, sql: &str, params: &[Value]) -> EtlResult<Vec<Row>>;

    /// Run a `SELECT COUNT(*) AS total` query.
    async fn count(&mut self, sql: &str, params: &[Value]) -> EtlResult<i64>;

    /// Columns of `table` in ordinal order, with their types.
    async fn columns(&mut self, table: &str) -> EtlResult<Vec<SourceColumn>>;

    async fn close(self) -> EtlResult<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchOptions {
    pub batch_size: usize,
    /// Stop after this many rows have been read
    pub max_scanned: Option<usize>,
    /// Rows a preview may hand back after transformation
    pub max_emitted: Option<usize>,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            batch_size: 5000,
            max_scanned: None,
            max_emitted: None,
        }
    }
}

impl BatchOptions {
    /// Preview caps: 100,000 rows scanned, 1,000 rows emitted.
    pub fn preview() -> Self {
        Self {
            max_scanned: Some(100_000),
            max_emitted: Some(1_000),
            ..Self::default()
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }
}

/// Lazy, forward-only sequence of row batches.
pub struct BatchExecutor<'a, S> {
    source: &'a mut S,
    sql: String,
    params: Vec<Value>,
    dialect: Dialect,
    booleans: Vec<String>,
    options: BatchOptions,
    cancel: CancellationToken,
    offset: usize,
    scanned: usize,
    done: bool,
}

impl<'a, S: RowSource> BatchExecutor<'a, S> {
    pub fn new(source: &'a mut S, plan: &QueryPlan, options: BatchOptions, cancel: CancellationToken) -> Self {
        Self {
            source,
            sql: plan.stream_sql.clone(),
            params: plan.stream_params.clone(),
            dialect: plan.dialect,
            booleans: plan.boolean_columns.clone(),
            options,
            cancel,
            offset: 0,
            scanned: 0,
            done: false,
        }
    }

    /// Rows read so far.
    pub fn scanned(&self) -> usize {
        self.scanned
    }

    pub fn options(&self) -> BatchOptions {
        self.options
    }

    /// Fetch the next batch. `Ok(None)` once the sequence is exhausted.
    ///
    /// The cancellation token is checked before every fetch; a cancelled
    /// sequence ends with [`EtlError::Cancelled`].
    pub async fn next_batch(&mut self) -> EtlResult<Option<Vec<Row>>> {
        if self.done {
            return Ok(None);
        }
        if self.cancel.is_cancelled() {
            self.done = true;
            tracing::info!(scanned = self.scanned, "batch sequence cancelled");
            return Err(EtlError::Cancelled);
        }

        let mut size = self.options.batch_size.max(1);
        if let Some(max) = self.options.max_scanned {
            let remaining = max.saturating_sub(self.scanned);
            if remaining == 0 {
                self.done = true;
                return Ok(None);
            }
            size = size.min(remaining);
        }

        let generator = self.dialect.generator();
        let mut params = self.params.clone();
        let limit = generator.placeholder(params.len() + 1);
        let offset = generator.placeholder(params.len() + 2);
        params.push(Value::Int(size as i64));
        params.push(Value::Int(self.offset as i64));
        let sql = format!("{}{}", self.sql, generator.limit_offset(&limit, &offset));

        tracing::debug!(offset = self.offset, size, "fetching batch");
        let mut rows = match self.source.fetch(&sql, &params).await {
            Ok(rows) => rows,
            Err(e) => {
                self.done = true;
                return Err(e);
            }
        };

        normalize_booleans(&mut rows, &self.booleans);
        self.offset += rows.len();
        self.scanned += rows.len();
        if rows.len() < size {
            self.done = true;
        }
        if rows.is_empty() {
            return Ok(None);
        }
        Ok(Some(rows))
    }

    /// The same sequence as a [`Stream`]. An error is the last item.
    pub fn into_stream(self) -> impl Stream<Item = EtlResult<Vec<Row>>> + 'a {
        futures::stream::unfold(self, |mut executor| async move {
            match executor.next_batch().await {
                Ok(Some(batch)) => Some((Ok(batch), executor)),
                Ok(None) => None,
                Err(e) => Some((Err(e), executor)),
            }
        })
    }
}
