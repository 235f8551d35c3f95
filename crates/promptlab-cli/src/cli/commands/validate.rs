use super::exit_codes;
use crate::cli::args::ValidateArgs;
use crate::cli::init_logging;
use anyhow::Context;

pub async fn run(args: ValidateArgs, log_json: bool) -> anyhow::Result<i32> {
    let level = std::env::var(promptlab_core::config::ENV_LOG).unwrap_or_else(|_| "warn".into());
    init_logging(&level, log_json);

    let schema = tokio::fs::read_to_string(&args.schema)
        .await
        .with_context(|| format!("failed to read schema {}", args.schema.display()))?;
    let response = tokio::fs::read_to_string(&args.response)
        .await
        .with_context(|| format!("failed to read response {}", args.response.display()))?;

    let result = promptlab_schema::validate(&response, &schema);
    println!("{}", serde_json::to_string_pretty(&result)?);

    if result.is_valid {
        eprintln!("✅ response matches schema");
        Ok(exit_codes::OK)
    } else {
        eprintln!("❌ {} problem(s)", result.errors.len());
        for e in &result.errors {
            eprintln!("      → {}", e);
        }
        Ok(exit_codes::TEST_FAILED)
    }
}
