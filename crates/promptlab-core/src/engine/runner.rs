use crate::codec::{self, LOADING_SENTINEL};
use crate::model::{ChatMessage, TokenUsage, ValidationResult};
use crate::providers::keys::Entitlements;
use crate::providers::llm::LlmClient;
use crate::storage::MatrixStore;
use crate::usage::log_usage_event;
use crate::validation::ValidationBridge;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Which prompt version a run writes into.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExecutionContext {
    pub prompt_id: String,
    pub version_id: String,
}

impl ExecutionContext {
    pub fn new(prompt_id: impl Into<String>, version_id: impl Into<String>) -> Self {
        Self {
            prompt_id: prompt_id.into(),
            version_id: version_id.into(),
        }
    }
}

/// Scope of one execution request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Granularity {
    Cell { row_id: String, model_id: String },
    /// One row across every selected model.
    Row(String),
    /// One model across every row with input text.
    Column(String),
    /// Every selected model across every row with input text.
    All,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CellOutcome {
    Succeeded {
        text: String,
        duration_ms: f64,
        usage: Option<TokenUsage>,
    },
    Failed {
        message: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionResult {
    pub row_id: String,
    pub model_id: String,
    pub outcome: CellOutcome,
    pub validation: Option<ValidationResult>,
}

impl ExecutionResult {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, CellOutcome::Succeeded { .. })
    }

    /// The string this result was stored as.
    pub fn stored_value(&self) -> String {
        match &self.outcome {
            CellOutcome::Succeeded {
                text,
                duration_ms,
                usage,
            } => codec::encode(text, *duration_ms, usage.as_ref()),
            CellOutcome::Failed { message } => codec::encode_error(message),
        }
    }
}

#[derive(Debug, Clone)]
struct CellTarget {
    row_id: String,
    model_id: String,
    input: String,
}

fn elapsed_ms(d: Duration) -> f64 {
    d.as_micros() as f64 / 1000.0
}

/// Fans invocations out over the matrix and writes results back into the
/// store as they settle.
///
/// There is no generation tracking: two overlapping runs on the same cell
/// race and the last write wins. Nothing here cancels or times out an
/// invocation, so a provider call that never returns leaves its cell pending.
#[derive(Clone)]
pub struct Runner {
    pub store: MatrixStore,
    pub client: Arc<dyn LlmClient>,
    pub entitlements: Arc<dyn Entitlements>,
    pub validation: Option<ValidationBridge>,
}

impl Runner {
    pub fn new(
        store: MatrixStore,
        client: Arc<dyn LlmClient>,
        entitlements: Arc<dyn Entitlements>,
    ) -> Self {
        Self {
            store,
            client,
            entitlements,
            validation: None,
        }
    }

    pub fn with_validation(mut self, bridge: ValidationBridge) -> Self {
        self.validation = Some(bridge);
        self
    }

    /// Context for the store's active prompt/version, if any.
    pub fn active_context(&self) -> Option<ExecutionContext> {
        self.store
            .active()
            .map(|(p, v)| ExecutionContext::new(p, v))
    }

    pub async fn run_cell(
        &self,
        ctx: &ExecutionContext,
        row_id: &str,
        model_id: &str,
    ) -> Vec<ExecutionResult> {
        self.run(
            ctx,
            Granularity::Cell {
                row_id: row_id.to_string(),
                model_id: model_id.to_string(),
            },
        )
        .await
    }

    pub async fn run_row(&self, ctx: &ExecutionContext, row_id: &str) -> Vec<ExecutionResult> {
        self.run(ctx, Granularity::Row(row_id.to_string())).await
    }

    pub async fn run_column(&self, ctx: &ExecutionContext, model_id: &str) -> Vec<ExecutionResult> {
        self.run(ctx, Granularity::Column(model_id.to_string()))
            .await
    }

    pub async fn run_all(&self, ctx: &ExecutionContext) -> Vec<ExecutionResult> {
        self.run(ctx, Granularity::All).await
    }

    /// Marks every target cell pending, then runs them all concurrently and
    /// returns once every one has settled. One cell failing never stops the
    /// others.
    pub async fn run(&self, ctx: &ExecutionContext, scope: Granularity) -> Vec<ExecutionResult> {
        let targets = self.plan(ctx, &scope);
        if targets.is_empty() {
            tracing::debug!(
                event = "batch_empty",
                prompt_id = %ctx.prompt_id,
                version_id = %ctx.version_id,
                scope = ?scope
            );
            return Vec::new();
        }

        for t in &targets {
            self.store.write_cell(
                &ctx.prompt_id,
                &ctx.version_id,
                &t.row_id,
                &t.model_id,
                LOADING_SENTINEL,
            );
            // the previous answer's verdict no longer applies
            self.store
                .clear_validation(&ctx.prompt_id, &ctx.version_id, &t.row_id, &t.model_id);
        }

        tracing::info!(
            event = "batch_start",
            prompt_id = %ctx.prompt_id,
            version_id = %ctx.version_id,
            scope = ?scope,
            cells = targets.len()
        );

        let mut handles = Vec::with_capacity(targets.len());
        for t in targets {
            let this = self.clone();
            let task_ctx = ctx.clone();
            let key = (t.row_id.clone(), t.model_id.clone());
            let h = tokio::spawn(async move {
                this.run_single_execution(&task_ctx, &t.model_id, &t.input, &t.row_id)
                    .await
            });
            handles.push((key, h));
        }

        let mut results = Vec::with_capacity(handles.len());
        for ((row_id, model_id), h) in handles {
            let r = match h.await {
                Ok(r) => r,
                Err(e) => self.fail(ctx, &row_id, &model_id, format!("task error: {}", e)),
            };
            results.push(r);
        }

        let failed = results.iter().filter(|r| !r.is_success()).count();
        tracing::info!(
            event = "batch_done",
            prompt_id = %ctx.prompt_id,
            version_id = %ctx.version_id,
            cells = results.len(),
            failed = failed
        );
        results
    }

    fn plan(&self, ctx: &ExecutionContext, scope: &Granularity) -> Vec<CellTarget> {
        let Some(prompt) = self.store.prompt(&ctx.prompt_id) else {
            return Vec::new();
        };
        let Some(version) = prompt.version(&ctx.version_id) else {
            return Vec::new();
        };

        let with_input = || prompt.inputs.iter().filter(|r| !r.input.trim().is_empty());
        let target = |row_id: &str, input: &str, model_id: &str| CellTarget {
            row_id: row_id.to_string(),
            model_id: model_id.to_string(),
            input: input.to_string(),
        };

        match scope {
            Granularity::Cell { row_id, model_id } => prompt
                .input(row_id)
                .map(|r| vec![target(&r.id, &r.input, model_id)])
                .unwrap_or_default(),
            Granularity::Row(row_id) => match prompt.input(row_id) {
                Some(r) => version
                    .selected_models
                    .iter()
                    .map(|m| target(&r.id, &r.input, m))
                    .collect(),
                None => Vec::new(),
            },
            Granularity::Column(model_id) => with_input()
                .map(|r| target(&r.id, &r.input, model_id))
                .collect(),
            Granularity::All => with_input()
                .flat_map(|r| {
                    version
                        .selected_models
                        .iter()
                        .map(move |m| target(&r.id, &r.input, m))
                })
                .collect(),
        }
    }

    /// Runs one (row, model) cell and stores its outcome. Never panics or
    /// returns an error: failures come back as `CellOutcome::Failed` and are
    /// written to the cell as `Error: <message>`.
    pub async fn run_single_execution(
        &self,
        ctx: &ExecutionContext,
        model_id: &str,
        input: &str,
        row_id: &str,
    ) -> ExecutionResult {
        if !self.entitlements.has_valid_key_for_model(model_id) {
            let reason = self.entitlements.denial_reason(model_id);
            return self.fail(ctx, row_id, model_id, reason);
        }

        let (text, duration_ms, usage) = match self.invoke(ctx, model_id, input).await {
            Ok(done) => done,
            Err(e) => return self.fail(ctx, row_id, model_id, e.to_string()),
        };

        self.store.write_cell(
            &ctx.prompt_id,
            &ctx.version_id,
            row_id,
            model_id,
            codec::encode(&text, duration_ms, usage.as_ref()),
        );
        if let Some(u) = &usage {
            log_usage_event(model_id, u);
        }

        let validation = self.validation.as_ref().and_then(|b| {
            b.validate_cell(&ctx.prompt_id, &ctx.version_id, row_id, model_id, &text)
        });

        tracing::debug!(
            event = "cell_done",
            prompt_id = %ctx.prompt_id,
            row_id = %row_id,
            model_id = %model_id,
            duration_ms = duration_ms
        );

        ExecutionResult {
            row_id: row_id.to_string(),
            model_id: model_id.to_string(),
            outcome: CellOutcome::Succeeded {
                text,
                duration_ms,
                usage,
            },
            validation,
        }
    }

    async fn invoke(
        &self,
        ctx: &ExecutionContext,
        model_id: &str,
        input: &str,
    ) -> anyhow::Result<(String, f64, Option<TokenUsage>)> {
        let version = self
            .store
            .version(&ctx.prompt_id, &ctx.version_id)
            .ok_or_else(|| anyhow::anyhow!("version {} not found", ctx.version_id))?;

        let system = self
            .store
            .substitute_variables(&ctx.prompt_id, &version.instruction);
        let messages = [ChatMessage::system(system), ChatMessage::user(input)];

        let start = Instant::now();
        let completion = self.client.invoke(&messages, model_id).await?;
        let duration_ms = elapsed_ms(start.elapsed());

        Ok((completion.text, duration_ms, completion.usage))
    }

    fn fail(
        &self,
        ctx: &ExecutionContext,
        row_id: &str,
        model_id: &str,
        message: String,
    ) -> ExecutionResult {
        tracing::warn!(
            event = "cell_failed",
            prompt_id = %ctx.prompt_id,
            version_id = %ctx.version_id,
            row_id = %row_id,
            model_id = %model_id,
            error = %message
        );
        self.store.write_cell(
            &ctx.prompt_id,
            &ctx.version_id,
            row_id,
            model_id,
            codec::encode_error(&message),
        );
        self.store
            .clear_validation(&ctx.prompt_id, &ctx.version_id, row_id, model_id);
        ExecutionResult {
            row_id: row_id.to_string(),
            model_id: model_id.to_string(),
            outcome: CellOutcome::Failed { message },
            validation: None,
        }
    }
}
