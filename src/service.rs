//! Request boundary.
//!
//! Every entry point follows the same path: reject a missing principal,
//! build the request's [`ScopedClient`], resolve and open the connection,
//! discover columns when none were listed, compile, run, and close the
//! connection whatever happened. Errors become a [`TransformResponse`]
//! here and nowhere else.

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::ast::{Source, TransformSpec};
use crate::config::LimitsConfig;
use crate::engine::{
    BatchExecutor, ConnectionResolver, Connector, CsvSink, ExportPayload, Principal, Row, RowSource, ScopedClient,
    export,
};
use crate::error::{EtlError, EtlResult};
use crate::pipeline::PipelineExecutor;
use crate::transpiler::{QueryCompiler, QueryPlan, SourceSchema};

/// Uniform output of a transform call.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TransformResponse {
    pub ok: bool,
    /// HTTP-style status; not part of the body
    #[serde(skip)]
    pub status: u16,
    pub rows: Vec<Row>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Preview transformation log
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub log: Vec<String>,
}

impl TransformResponse {
    pub fn success(rows: Vec<Row>, total: Option<i64>) -> Self {
        Self {
            ok: true,
            status: 200,
            rows,
            total,
            ..Self::default()
        }
    }

    pub fn failure(error: &EtlError) -> Self {
        Self {
            ok: false,
            status: error.status_code(),
            error: Some(error.public_message()),
            ..Self::default()
        }
    }

    fn from_result(result: EtlResult<Self>) -> Self {
        match result {
            Ok(response) => response,
            Err(e) => {
                tracing::error!(status = e.status_code(), error = %e, "transform request failed");
                Self::failure(&e)
            }
        }
    }
}

/// The compiler and executor behind a resolver and a connector.
pub struct EtlService<R, C> {
    resolver: R,
    connector: C,
    limits: LimitsConfig,
}

impl<R, C> EtlService<R, C>
where
    R: ConnectionResolver,
    C: Connector,
{
    pub fn new(resolver: R, connector: C) -> Self {
        Self {
            resolver,
            connector,
            limits: LimitsConfig::default(),
        }
    }

    pub fn with_limits(mut self, limits: LimitsConfig) -> Self {
        self.limits = limits;
        self
    }

    /// Bounded call: one page of transformed rows, plus the total when
    /// the request asks for it.
    pub async fn execute(&self, principal: Option<&Principal>, spec: &TransformSpec) -> TransformResponse {
        TransformResponse::from_result(self.try_execute(principal, spec).await)
    }

    /// Fetch raw rows and run the preview pipeline over them.
    pub async fn preview(&self, principal: Option<&Principal>, spec: &TransformSpec) -> TransformResponse {
        TransformResponse::from_result(self.try_preview(principal, spec).await)
    }

    /// Stream every matching row into a CSV file.
    ///
    /// Fails as a whole: a batch error or cancellation returns no payload.
    pub async fn export(
        &self,
        principal: Option<&Principal>,
        spec: &TransformSpec,
        cancel: CancellationToken,
    ) -> EtlResult<ExportPayload> {
        let result = self.try_export(principal, spec, cancel).await;
        if let Err(e) = &result {
            tracing::error!(status = e.status_code(), error = %e, "export failed");
        }
        result
    }

    /// Compile against the live connection without running the query.
    pub async fn plan(&self, principal: Option<&Principal>, spec: &TransformSpec) -> EtlResult<QueryPlan> {
        let mut source = self.open(principal, spec, "plan").await?;
        let result = self.compile(&mut source, spec).await;
        close(source, result).await
    }

    async fn try_execute(&self, principal: Option<&Principal>, spec: &TransformSpec) -> EtlResult<TransformResponse> {
        let mut source = self.open(principal, spec, "execute").await?;
        let result = async {
            let plan = self.compile(&mut source, spec).await?;
            let mut rows = source.fetch(&plan.sql, &plan.params).await?;
            plan.normalize_rows(&mut rows);
            let total = match &plan.count_sql {
                Some(sql) => Some(source.count(sql, &plan.count_params).await?),
                None => None,
            };
            Ok::<_, EtlError>(TransformResponse::success(rows, total))
        }
        .await;
        close(source, result).await
    }

    async fn try_preview(&self, principal: Option<&Principal>, spec: &TransformSpec) -> EtlResult<TransformResponse> {
        let mut source = self.open(principal, spec, "preview").await?;
        let result = async {
            let plan = self.compile(&mut source, &raw_spec(spec)).await?;
            let mut pipeline = PipelineExecutor::for_spec(spec);
            let options = self.limits.preview_options();
            let cap = options.max_emitted.unwrap_or(usize::MAX);

            let mut executor = BatchExecutor::new(&mut source, &plan, options, CancellationToken::new());
            let mut rows = Vec::new();
            while let Some(batch) = executor.next_batch().await? {
                let transformed = pipeline.apply(batch)?;
                let room = cap.saturating_sub(rows.len());
                rows.extend(transformed.into_iter().take(room));
                // A count step has to see every scanned row
                if rows.len() >= cap && !pipeline.counts() {
                    break;
                }
            }
            tracing::info!(scanned = executor.scanned(), emitted = rows.len(), "preview finished");

            let total = pipeline.count().map(|n| n as i64);
            Ok::<_, EtlError>(TransformResponse {
                log: pipeline.log().lines(),
                ..TransformResponse::success(rows, total)
            })
        }
        .await;
        close(source, result).await
    }

    async fn try_export(
        &self,
        principal: Option<&Principal>,
        spec: &TransformSpec,
        cancel: CancellationToken,
    ) -> EtlResult<ExportPayload> {
        let mut source = self.open(principal, spec, "export").await?;
        let result = async {
            let plan = self.compile(&mut source, spec).await?;
            let sink = CsvSink::new().with_fallback_header(output_columns(&plan, spec));
            let executor = BatchExecutor::new(&mut source, &plan, self.limits.batch_options(), cancel);
            export::export_to(executor, sink, &spec.source_name()).await
        }
        .await;
        close(source, result).await
    }

    /// Authorize, resolve and connect.
    async fn open(&self, principal: Option<&Principal>, spec: &TransformSpec, mode: &str) -> EtlResult<C::Source> {
        let principal = principal.ok_or(EtlError::Unauthorized)?;
        let client = ScopedClient::for_principal(principal);
        let connection_id = spec
            .connection_id()
            .ok_or_else(|| EtlError::Validation("missing 'connection'".to_string()))?;
        spec.source()?;

        tracing::info!(
            user = client.user_id(),
            elevated = client.is_elevated(),
            connection = connection_id,
            mode,
            "transform request"
        );
        let descriptor = self.resolver.resolve(&client, connection_id).await?;
        self.connector.connect(&descriptor).await
    }

    async fn compile(&self, source: &mut C::Source, spec: &TransformSpec) -> EtlResult<QueryPlan> {
        let schema = discover(source, spec).await?;
        QueryCompiler::new(source.dialect())
            .with_schema(schema)
            .with_limits(self.limits.query_limits())
            .compile(spec)
    }
}

/// Close `source`, then hand back `result`. A failed close is logged only.
async fn close<S: RowSource, T>(source: S, result: EtlResult<T>) -> EtlResult<T> {
    if let Err(e) = source.close().await {
        tracing::warn!(error = %e, "closing connection failed");
    }
    result
}

/// Column metadata for every source table. Names fill open column lists;
/// types decide how compared values are bound.
async fn discover<S: RowSource>(source: &mut S, spec: &TransformSpec) -> EtlResult<SourceSchema> {
    let mut schema = SourceSchema::new();
    let tables: Vec<&str> = match spec.source()? {
        Source::Table(table) => vec![table],
        Source::Join(join) => std::iter::once(join.primary.table.trim())
            .chain(join.joins.iter().map(|edge| edge.secondary_table.trim()))
            .collect(),
    };
    for table in tables {
        if schema.columns(table).is_none() {
            schema.insert(table, source.columns(table).await?);
        }
    }
    Ok(schema)
}

/// The request reduced to its source and projection, for previews.
fn raw_spec(spec: &TransformSpec) -> TransformSpec {
    TransformSpec {
        connection: spec.connection.clone(),
        table: spec.table.clone(),
        join: spec.join.clone(),
        columns: spec.columns.clone(),
        ..TransformSpec::default()
    }
}

/// Output column names when no row comes back to take them from.
fn output_columns(plan: &QueryPlan, spec: &TransformSpec) -> Vec<String> {
    let derived = spec
        .operations
        .iter()
        .map(|op| op.result_column.trim().to_string())
        .chain(
            spec.rules
                .iter()
                .filter_map(|r| r.result_column.as_deref())
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty()),
        );
    plan.aliases
        .entries()
        .iter()
        .map(|(_, alias)| alias.clone())
        .chain(derived)
        .collect()
}
