use promptlab_core::codec::CellState;
use promptlab_core::engine::{CellOutcome, ExecutionContext, Runner};
use promptlab_core::model::{Role, TokenUsage, ValidationResult};
use promptlab_core::providers::keys::{AllowAll, ApiKeys};
use promptlab_core::providers::llm::fake::FakeClient;
use promptlab_core::providers::Provider;
use promptlab_core::storage::MatrixStore;
use promptlab_core::validation::{SchemaValidator, ValidationBridge};
use std::sync::Arc;
use std::time::Duration;

fn usage(p: u64, c: u64, t: u64) -> TokenUsage {
    TokenUsage {
        prompt_tokens: p,
        completion_tokens: c,
        total_tokens: t,
    }
}

/// Prompt with `instruction`, the given input rows and model selection.
fn setup(instruction: &str, inputs: &[&str], models: &[&str]) -> (MatrixStore, ExecutionContext, Vec<String>) {
    let store = MatrixStore::new(models.iter().map(|m| m.to_string()).collect());
    let pid = store.create_prompt(instruction);
    let (_, vid) = store.active().unwrap();

    let mut rows = vec![store.prompt(&pid).unwrap().inputs[0].id.clone()];
    store.update_input_row(&pid, &rows[0], inputs[0]);
    for input in &inputs[1..] {
        rows.push(store.add_input_row(&pid, input).unwrap());
    }
    (store, ExecutionContext::new(pid, vid), rows)
}

/// Accepts any answer that parses as JSON.
struct JsonOnly;

impl SchemaValidator for JsonOnly {
    fn validate(&self, text: &str, _schema: &str) -> ValidationResult {
        match serde_json::from_str(text) {
            Ok(v) => ValidationResult::valid(v),
            Err(e) => ValidationResult::invalid(vec![format!("root: {}", e)]),
        }
    }
}

fn validating_runner(store: &MatrixStore, client: Arc<FakeClient>) -> Runner {
    let bridge = ValidationBridge::new(store.clone(), Arc::new(JsonOnly));
    runner(store, client).with_validation(bridge)
}

fn runner(store: &MatrixStore, client: Arc<FakeClient>) -> Runner {
    Runner::new(store.clone(), client, Arc::new(AllowAll))
}

#[tokio::test(start_paused = true)]
async fn substituted_instruction_and_encoded_cell() {
    let (store, ctx, rows) = setup("Translate: {{word}}", &["ignored"], &["m1"]);
    store.set_variable(&ctx.prompt_id, "word", "hola");
    let client = Arc::new(
        FakeClient::new()
            .with_reply("m1", "hello", Some(usage(5, 1, 6)))
            .with_delay(Duration::from_millis(120)),
    );

    let results = runner(&store, client.clone()).run_all(&ctx).await;

    assert_eq!(results.len(), 1);
    assert_eq!(
        store.read_cell(&ctx.prompt_id, &ctx.version_id, &rows[0], "m1").as_deref(),
        Some("hello__TIMING__120__USAGE__5,1,6")
    );

    let calls = client.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].messages[0].role, Role::System);
    assert_eq!(calls[0].messages[0].content, "Translate: hola");
    assert_eq!(calls[0].messages[1].role, Role::User);
    assert_eq!(calls[0].messages[1].content, "ignored");
}

#[tokio::test]
async fn provider_error_becomes_error_cell() {
    let (store, ctx, rows) = setup("Translate: {{word}}", &["ignored"], &["m1"]);
    let client = Arc::new(FakeClient::new().with_error("m1", "rate limited"));

    let results = runner(&store, client).run_all(&ctx).await;

    assert_eq!(
        results[0].outcome,
        CellOutcome::Failed {
            message: "rate limited".into()
        }
    );
    assert_eq!(
        store.read_cell(&ctx.prompt_id, &ctx.version_id, &rows[0], "m1").as_deref(),
        Some("Error: rate limited")
    );
}

#[tokio::test]
async fn one_failure_does_not_stop_the_batch() {
    let (store, ctx, rows) = setup("p", &["a", "b"], &["good", "bad"]);
    let client = Arc::new(FakeClient::new().with_error("bad", "boom"));

    let results = runner(&store, client).run_all(&ctx).await;

    assert_eq!(results.len(), 4);
    assert_eq!(results.iter().filter(|r| r.is_success()).count(), 2);
    for row in &rows {
        let good = store.cell_state(&ctx.prompt_id, &ctx.version_id, row, "good");
        assert!(matches!(good, CellState::Succeeded(_)), "{:?}", good);
        let bad = store.cell_state(&ctx.prompt_id, &ctx.version_id, row, "bad");
        assert_eq!(bad, CellState::Failed { message: "boom".into() });
    }
}

#[tokio::test]
async fn full_matrix_settles_every_cell() {
    let models = ["m1", "m2", "m3"];
    let (store, ctx, rows) = setup("p", &["a", "b", "c", "d"], &models);
    let client = Arc::new(FakeClient::new().with_error("m2", "down"));

    let results = runner(&store, client.clone()).run_all(&ctx).await;

    assert_eq!(results.len(), rows.len() * models.len());
    assert_eq!(client.calls().len(), rows.len() * models.len());
    for row in store.test_matrix(&ctx.prompt_id, &ctx.version_id) {
        assert_eq!(row.responses.len(), models.len());
        for raw in row.responses.values() {
            assert!(CellState::from_stored(Some(raw)).is_settled(), "{}", raw);
        }
    }
}

#[tokio::test(start_paused = true)]
async fn cells_run_concurrently() {
    let (store, ctx, _) = setup("p", &["a", "b"], &["m1", "m2", "m3"]);
    let client = Arc::new(FakeClient::new().with_delay(Duration::from_millis(100)));

    let start = tokio::time::Instant::now();
    let results = runner(&store, client).run_all(&ctx).await;

    assert_eq!(results.len(), 6);
    assert_eq!(start.elapsed(), Duration::from_millis(100));
}

#[tokio::test(start_paused = true)]
async fn cells_are_pending_while_in_flight() {
    let (store, ctx, rows) = setup("p", &["a"], &["fast", "slow"]);
    let client = Arc::new(
        FakeClient::new()
            .with_model_delay("fast", Duration::from_millis(10))
            .with_model_delay("slow", Duration::from_secs(5)),
    );
    let r = runner(&store, client);
    let task_ctx = ctx.clone();
    let batch = tokio::spawn(async move { r.run_all(&task_ctx).await });

    tokio::task::yield_now().await;
    let state = |m: &str| store.cell_state(&ctx.prompt_id, &ctx.version_id, &rows[0], m);
    assert!(state("fast").is_pending());
    assert!(state("slow").is_pending());

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(state("fast").is_settled());
    assert!(state("slow").is_pending());

    let results = batch.await.unwrap();
    assert_eq!(results.len(), 2);
    assert!(state("slow").is_settled());
}

#[tokio::test]
async fn missing_entitlement_skips_the_provider() {
    let (store, ctx, rows) = setup("p", &["a"], &["gpt-4o", "claude-3-5-haiku-latest"]);
    let client = Arc::new(FakeClient::new());
    let keys = ApiKeys::new().with_key(Provider::OpenAi, "sk-test");
    let r = Runner::new(store.clone(), client.clone(), Arc::new(keys));

    let results = r.run_all(&ctx).await;

    assert_eq!(results.len(), 2);
    let calls = client.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].model_id, "gpt-4o");
    assert_eq!(
        store
            .read_cell(&ctx.prompt_id, &ctx.version_id, &rows[0], "claude-3-5-haiku-latest")
            .as_deref(),
        Some("Error: No valid API key configured for anthropic (model claude-3-5-haiku-latest)")
    );
}

#[tokio::test]
async fn column_skips_blank_inputs() {
    let (store, ctx, rows) = setup("p", &["a", "   ", "b"], &["m1", "m2"]);
    let client = Arc::new(FakeClient::new());

    let results = runner(&store, client.clone()).run_column(&ctx, "m2").await;

    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|r| r.model_id == "m2"));
    assert_eq!(
        store.cell_state(&ctx.prompt_id, &ctx.version_id, &rows[1], "m2"),
        CellState::Unset
    );
    assert_eq!(
        store.cell_state(&ctx.prompt_id, &ctx.version_id, &rows[0], "m1"),
        CellState::Unset
    );
}

#[tokio::test]
async fn row_and_cell_run_even_without_input() {
    let (store, ctx, rows) = setup("p", &[""], &["m1", "m2"]);
    let client = Arc::new(FakeClient::new());
    let r = runner(&store, client.clone());

    assert_eq!(r.run_row(&ctx, &rows[0]).await.len(), 2);
    assert_eq!(r.run_cell(&ctx, &rows[0], "m1").await.len(), 1);
    assert_eq!(r.run_all(&ctx).await.len(), 0);
    assert_eq!(client.calls().len(), 3);
}

#[tokio::test]
async fn unknown_ids_run_nothing() {
    let (store, ctx, _) = setup("p", &["a"], &["m1"]);
    let client = Arc::new(FakeClient::new());
    let r = runner(&store, client.clone());

    let ghost = ExecutionContext::new(ctx.prompt_id.clone(), "v_missing");
    assert!(r.run_all(&ghost).await.is_empty());
    assert!(r.run_row(&ctx, "row_missing").await.is_empty());
    assert!(client.calls().is_empty());
}

#[tokio::test]
async fn revisions_keep_results_apart() {
    let (store, ctx, rows) = setup("first", &["a"], &["m1"]);
    let client = Arc::new(FakeClient::new());
    let r = runner(&store, client);
    r.run_all(&ctx).await;
    let v1_cell = store.read_cell(&ctx.prompt_id, &ctx.version_id, &rows[0], "m1");
    assert!(v1_cell.is_some());

    let v2 = store.revise_instruction(&ctx.prompt_id, "second").unwrap();
    let prompt = store.prompt(&ctx.prompt_id).unwrap();
    assert_eq!(prompt.versions.len(), 2);
    assert!(prompt.version(&v2).unwrap().responses.is_empty());

    let ctx2 = r.active_context().unwrap();
    assert_eq!(ctx2.version_id, v2);
    r.run_all(&ctx2).await;

    assert_eq!(
        store.read_cell(&ctx.prompt_id, &ctx.version_id, &rows[0], "m1"),
        v1_cell
    );
    assert!(store.read_cell(&ctx.prompt_id, &v2, &rows[0], "m1").is_some());
}

#[tokio::test]
async fn removing_a_row_clears_it_from_every_version() {
    let (store, ctx, rows) = setup("first", &["r1 input", "r2 input"], &["m1"]);
    let client = Arc::new(FakeClient::new());
    let r = runner(&store, client);
    r.run_all(&ctx).await;
    let v2 = store.revise_instruction(&ctx.prompt_id, "second").unwrap();
    r.run_all(&ExecutionContext::new(ctx.prompt_id.clone(), v2.clone())).await;

    for vid in [&ctx.version_id, &v2] {
        for row in &rows {
            assert!(store.set_validation(
                &ctx.prompt_id,
                vid,
                row,
                "m1",
                ValidationResult::invalid(vec!["root: nope".into()]),
            ));
        }
    }

    assert!(store.remove_input_row(&ctx.prompt_id, &rows[0]));

    let prompt = store.prompt(&ctx.prompt_id).unwrap();
    assert_eq!(prompt.versions.len(), 2);
    for v in &prompt.versions {
        assert!(!v.responses.contains_key(&rows[0]), "version {}", v.id);
        assert!(!v.validations.contains_key(&rows[0]), "version {}", v.id);
        assert!(v.responses.contains_key(&rows[1]), "version {}", v.id);
        assert!(v.validations.contains_key(&rows[1]), "version {}", v.id);
    }
}

#[tokio::test(start_paused = true)]
async fn late_results_for_removed_rows_are_dropped() {
    let (store, ctx, rows) = setup("p", &["a"], &["m1"]);
    let client = Arc::new(FakeClient::new().with_delay(Duration::from_millis(100)));
    let r = runner(&store, client);
    let task_ctx = ctx.clone();
    let batch = tokio::spawn(async move { r.run_all(&task_ctx).await });

    tokio::task::yield_now().await;
    store.remove_input_row(&ctx.prompt_id, &rows[0]);
    batch.await.unwrap();

    let version = store.version(&ctx.prompt_id, &ctx.version_id).unwrap();
    assert!(version.responses.is_empty());
}

#[tokio::test]
async fn overlapping_runs_end_settled() {
    let (store, ctx, rows) = setup("p", &["a"], &["m1"]);
    let client = Arc::new(FakeClient::new().with_reply("m1", "same", None));
    let r = runner(&store, client);

    let (a, b) = tokio::join!(r.run_all(&ctx), r.run_cell(&ctx, &rows[0], "m1"));
    assert_eq!(a.len() + b.len(), 2);
    match store.cell_state(&ctx.prompt_id, &ctx.version_id, &rows[0], "m1") {
        CellState::Succeeded(d) => assert_eq!(d.text, "same"),
        other => panic!("unexpected {:?}", other),
    }
}

#[tokio::test]
async fn failed_rerun_drops_the_previous_verdict() {
    let (store, ctx, rows) = setup("Extract the person", &["Ada"], &["m"]);
    store.set_schema(&ctx.prompt_id, &ctx.version_id, Some("{}".into()));

    let ok = Arc::new(FakeClient::new().with_reply("m", "{\"name\":\"Ada\"}", None));
    validating_runner(&store, ok).run_all(&ctx).await;
    let first = store
        .validation(&ctx.prompt_id, &ctx.version_id, &rows[0], "m")
        .unwrap();
    assert!(first.is_valid);

    let down = Arc::new(FakeClient::new().with_error("m", "rate limited"));
    validating_runner(&store, down)
        .run_cell(&ctx, &rows[0], "m")
        .await;

    assert_eq!(
        store.read_cell(&ctx.prompt_id, &ctx.version_id, &rows[0], "m").as_deref(),
        Some("Error: rate limited")
    );
    assert!(store
        .validation(&ctx.prompt_id, &ctx.version_id, &rows[0], "m")
        .is_none());
}

#[tokio::test]
async fn denied_cell_drops_the_previous_verdict() {
    let (store, ctx, rows) = setup("p", &["a"], &["claude-3-5-haiku-latest"]);
    store.set_validation(
        &ctx.prompt_id,
        &ctx.version_id,
        &rows[0],
        "claude-3-5-haiku-latest",
        ValidationResult::valid(serde_json::json!({})),
    );
    let r = Runner::new(store.clone(), Arc::new(FakeClient::new()), Arc::new(ApiKeys::new()));

    let result = r
        .run_single_execution(&ctx, "claude-3-5-haiku-latest", "a", &rows[0])
        .await;

    assert!(!result.is_success());
    assert!(store
        .validation(&ctx.prompt_id, &ctx.version_id, &rows[0], "claude-3-5-haiku-latest")
        .is_none());
}

#[tokio::test(start_paused = true)]
async fn pending_cells_carry_no_verdict() {
    let (store, ctx, rows) = setup("p", &["a"], &["m"]);
    store.set_schema(&ctx.prompt_id, &ctx.version_id, Some("{}".into()));
    let first = Arc::new(FakeClient::new().with_reply("m", "[1]", None));
    validating_runner(&store, first).run_all(&ctx).await;
    assert!(store
        .validation(&ctx.prompt_id, &ctx.version_id, &rows[0], "m")
        .is_some());

    let slow = Arc::new(
        FakeClient::new()
            .with_reply("m", "not json", None)
            .with_delay(Duration::from_secs(1)),
    );
    let r = validating_runner(&store, slow);
    let task_ctx = ctx.clone();
    let batch = tokio::spawn(async move { r.run_all(&task_ctx).await });

    tokio::task::yield_now().await;
    assert!(store
        .cell_state(&ctx.prompt_id, &ctx.version_id, &rows[0], "m")
        .is_pending());
    assert!(store
        .validation(&ctx.prompt_id, &ctx.version_id, &rows[0], "m")
        .is_none());

    batch.await.unwrap();
    let second = store
        .validation(&ctx.prompt_id, &ctx.version_id, &rows[0], "m")
        .unwrap();
    assert!(!second.is_valid);
}
