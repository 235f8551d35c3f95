//! Token usage telemetry.
//!
//! Emitted on a dedicated target so log pipelines can meter spend without
//! parsing cell values.

use crate::model::TokenUsage;

pub const TARGET: &str = "promptlab_usage";

/// Logs one metered usage event for a completed invocation.
pub fn log_usage_event(model_id: &str, usage: &TokenUsage) {
    tracing::info!(
        target: "promptlab_usage",
        event = "promptlab.usage.metered",
        model_id = %model_id,
        prompt_tokens = usage.prompt_tokens,
        completion_tokens = usage.completion_tokens,
        total_tokens = usage.total_tokens,
    );
}
