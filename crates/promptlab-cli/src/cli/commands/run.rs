use super::{exit_codes, resolve_config};
use crate::cli::args::{OutputFormat, ProviderMode, RunArgs};
use crate::cli::init_logging;
use anyhow::Context;
use promptlab_core::codec::CellState;
use promptlab_core::config::{load_matrix_file, LabConfig};
use promptlab_core::engine::{ExecutionContext, Granularity, Runner};
use promptlab_core::providers::keys::{AllowAll, ApiKeys, Entitlements};
use promptlab_core::providers::llm::anthropic::AnthropicClient;
use promptlab_core::providers::llm::fake::FakeClient;
use promptlab_core::providers::llm::openai::OpenAIClient;
use promptlab_core::providers::llm::LlmClient;
use promptlab_core::providers::router::ProviderRouter;
use promptlab_core::providers::Provider;
use promptlab_core::report::console;
use promptlab_core::storage::{MatrixStore, SqliteSnapshotStore};
use promptlab_core::sync::{SyncBridge, SyncHandle};
use promptlab_core::validation::ValidationBridge;
use promptlab_schema::JsonSchemaValidator;
use std::sync::Arc;

pub async fn run(args: RunArgs, log_json: bool) -> anyhow::Result<i32> {
    let cfg = match resolve_config(args.config.as_deref(), args.strict) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{}", e);
            return Ok(exit_codes::CONFIG_ERROR);
        }
    };
    init_logging(cfg.log_level(), log_json);

    let matrix = match load_matrix_file(&args.matrix, args.strict) {
        Ok(m) => m,
        Err(e) => {
            eprintln!("{}", e);
            return Ok(exit_codes::CONFIG_ERROR);
        }
    };

    let catalog = cfg.catalog();
    let store = MatrixStore::new(catalog.default_selection());

    let snapshot_path = args.snapshot.clone().or_else(|| cfg.sync.snapshot_path.clone());
    let sync = match &snapshot_path {
        Some(path) => {
            let sink = SqliteSnapshotStore::open(path)
                .with_context(|| format!("failed to open snapshot db {}", path.display()))?;
            let bridge = SyncBridge::new(store.clone(), Arc::new(sink), cfg.debounce());
            bridge.hydrate().await;
            Some(bridge.spawn())
        }
        None => None,
    };

    let Some((prompt_id, version_id)) = matrix.seed(&store) else {
        anyhow::bail!("failed to create prompt from {}", args.matrix.display());
    };
    let ctx = ExecutionContext::new(prompt_id, version_id);

    let scope = match scope_for(&store, &ctx, &args) {
        Ok(s) => s,
        Err(msg) => {
            eprintln!("{}", msg);
            stop_sync(sync).await;
            return Ok(exit_codes::CONFIG_ERROR);
        }
    };

    let (client, entitlements) = build_clients(args.provider, &cfg);
    let bridge = ValidationBridge::new(store.clone(), Arc::new(JsonSchemaValidator));
    let runner = Runner::new(store.clone(), client, entitlements).with_validation(bridge);

    tracing::info!(
        event = "run_start",
        matrix = %args.matrix.display(),
        provider = ?args.provider,
        scope = ?scope
    );
    let results = runner.run(&ctx, scope).await;

    match args.format {
        OutputFormat::Text => console::print_summary(&results, &catalog),
        OutputFormat::Json => {
            let rows = store.test_matrix(&ctx.prompt_id, &ctx.version_id);
            println!("{}", serde_json::to_string_pretty(&rows)?);
        }
    }

    let pending = pending_cells(&store, &ctx);
    if !pending.is_empty() {
        console::print_pending(&pending);
    }

    stop_sync(sync).await;

    let failed = results
        .iter()
        .any(|r| !r.is_success() || r.validation.as_ref().is_some_and(|v| !v.is_valid));
    Ok(if failed || !pending.is_empty() {
        exit_codes::TEST_FAILED
    } else {
        exit_codes::OK
    })
}

async fn stop_sync(sync: Option<SyncHandle>) {
    if let Some(handle) = sync {
        handle.shutdown().await;
    }
}

fn scope_for(store: &MatrixStore, ctx: &ExecutionContext, args: &RunArgs) -> Result<Granularity, String> {
    let row_id = match args.row {
        None => None,
        Some(n) => {
            let prompt = store
                .prompt(&ctx.prompt_id)
                .ok_or_else(|| "prompt disappeared".to_string())?;
            let row = n
                .checked_sub(1)
                .and_then(|i| prompt.inputs.get(i))
                .ok_or_else(|| {
                    format!("--row {} is out of range (1..={})", n, prompt.inputs.len())
                })?;
            Some(row.id.clone())
        }
    };

    Ok(match (row_id, args.model.clone()) {
        (Some(row_id), Some(model_id)) => Granularity::Cell { row_id, model_id },
        (Some(row_id), None) => Granularity::Row(row_id),
        (None, Some(model_id)) => Granularity::Column(model_id),
        (None, None) => Granularity::All,
    })
}

fn build_clients(mode: ProviderMode, cfg: &LabConfig) -> (Arc<dyn LlmClient>, Arc<dyn Entitlements>) {
    match mode {
        ProviderMode::Fake => (Arc::new(FakeClient::new()), Arc::new(AllowAll)),
        ProviderMode::Live => {
            let keys = ApiKeys::from_env(&cfg.key_env_names());
            let mut router = ProviderRouter::new();
            if let Some(key) = keys.get(Provider::OpenAi) {
                let mut c = OpenAIClient::new(key.to_string())
                    .with_temperature(cfg.temperature(Provider::OpenAi));
                if let Some(url) = cfg.base_url(Provider::OpenAi) {
                    c = c.with_base_url(url);
                }
                router = router.register(Provider::OpenAi, Arc::new(c));
            }
            if let Some(key) = keys.get(Provider::Anthropic) {
                let mut c = AnthropicClient::new(key.to_string());
                if let Some(url) = cfg.base_url(Provider::Anthropic) {
                    c = c.with_base_url(url);
                }
                router = router.register(Provider::Anthropic, Arc::new(c));
            }
            tracing::debug!(event = "providers_configured", providers = ?keys.providers());
            (Arc::new(router), Arc::new(keys))
        }
    }
}

fn pending_cells(store: &MatrixStore, ctx: &ExecutionContext) -> Vec<(String, String)> {
    store
        .test_matrix(&ctx.prompt_id, &ctx.version_id)
        .into_iter()
        .flat_map(|row| {
            let row_id = row.id;
            row.responses
                .into_iter()
                .filter(|(_, raw)| CellState::from_stored(Some(raw)).is_pending())
                .map(move |(model, _)| (row_id.clone(), model))
        })
        .collect()
}

