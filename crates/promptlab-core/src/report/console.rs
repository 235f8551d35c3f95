use crate::catalog::{derive_cost, PriceLookup};
use crate::engine::{CellOutcome, ExecutionResult};
use crate::model::ValidationResult;

fn verdict(v: Option<&ValidationResult>) -> String {
    match v {
        None => String::new(),
        Some(v) if v.is_valid => "  schema ✓".into(),
        Some(v) => format!("  schema ✗ ({} errors)", v.errors.len()),
    }
}

/// One status line per cell.
pub fn render_line(r: &ExecutionResult, prices: &dyn PriceLookup) -> String {
    let cell = format!("{} × {}", r.row_id, r.model_id);
    match &r.outcome {
        CellOutcome::Succeeded {
            text,
            duration_ms,
            usage,
        } => {
            let tokens = usage
                .as_ref()
                .map(|u| format!("  {} tok", u.total_tokens))
                .unwrap_or_default();
            let cost = usage
                .as_ref()
                .zip(prices.price(&r.model_id))
                .map(|(u, p)| format!("  ${:.6}", derive_cost(u, &p)))
                .unwrap_or_default();
            let preview: String = text.chars().take(60).collect();
            let ellipsis = if text.chars().count() > 60 { "..." } else { "" };
            format!(
                "✅ {:<36} ({:.0}ms){}{}{}\n    {}{}",
                cell,
                duration_ms,
                tokens,
                cost,
                verdict(r.validation.as_ref()),
                preview.replace('\n', " "),
                ellipsis
            )
        }
        CellOutcome::Failed { message } => format!("❌ {:<36} {}", cell, message),
    }
}

pub fn print_summary(results: &[ExecutionResult], prices: &dyn PriceLookup) {
    let mut ok = 0;
    let mut failed = 0;
    let mut invalid = 0;
    let mut total_cost = 0.0;

    eprintln!("\nRan {} cells...", results.len());

    for r in results {
        eprintln!("{}", render_line(r, prices));
        match &r.outcome {
            CellOutcome::Succeeded { usage, .. } => {
                ok += 1;
                if let (Some(u), Some(p)) = (usage, prices.price(&r.model_id)) {
                    total_cost += derive_cost(u, &p);
                }
            }
            CellOutcome::Failed { .. } => failed += 1,
        }
        if r.validation.as_ref().is_some_and(|v| !v.is_valid) {
            invalid += 1;
            if let Some(v) = &r.validation {
                for e in &v.errors {
                    eprintln!("      → {}", e);
                }
            }
        }
    }

    eprintln!(
        "\nSummary: {} ok, {} failed, {} schema violations, est. cost ${:.6}",
        ok, failed, invalid, total_cost
    );
}

/// Cells still marked as loading, e.g. after an interrupted run.
pub fn print_pending(cells: &[(String, String)]) {
    for (row, model) in cells {
        eprintln!("⏳ {} × {}", row, model);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ModelCatalog;
    use crate::model::TokenUsage;

    #[test]
    fn success_line_shows_cost_and_verdict() {
        let r = ExecutionResult {
            row_id: "r1".into(),
            model_id: "gpt-4o".into(),
            outcome: CellOutcome::Succeeded {
                text: "hello".into(),
                duration_ms: 120.0,
                usage: Some(TokenUsage {
                    prompt_tokens: 1000,
                    completion_tokens: 1000,
                    total_tokens: 2000,
                }),
            },
            validation: Some(ValidationResult::invalid(vec!["root: bad".into()])),
        };
        let line = render_line(&r, &ModelCatalog::default());
        assert!(line.starts_with("✅"));
        assert!(line.contains("(120ms)"));
        assert!(line.contains("2000 tok"));
        assert!(line.contains("$0.012500"));
        assert!(line.contains("schema ✗ (1 errors)"));
        assert!(line.ends_with("hello"));
    }

    #[test]
    fn unknown_model_has_no_cost() {
        let r = ExecutionResult {
            row_id: "r1".into(),
            model_id: "local".into(),
            outcome: CellOutcome::Succeeded {
                text: "x".into(),
                duration_ms: 1.0,
                usage: Some(TokenUsage::default()),
            },
            validation: None,
        };
        assert!(!render_line(&r, &ModelCatalog::default()).contains('$'));
    }

    #[test]
    fn failure_line_carries_message() {
        let r = ExecutionResult {
            row_id: "r1".into(),
            model_id: "m".into(),
            outcome: CellOutcome::Failed {
                message: "rate limited".into(),
            },
            validation: None,
        };
        let line = render_line(&r, &ModelCatalog::default());
        assert!(line.starts_with("❌"));
        assert!(line.ends_with("rate limited"));
    }
}
