use crate::codec::CellState;
use crate::model::ValidationResult;
use crate::storage::MatrixStore;
use std::sync::Arc;

/// `validate(text, schema)`: the schema is raw JSON-Schema text. Never fails;
/// problems are reported as an invalid result.
pub trait SchemaValidator: Send + Sync {
    fn validate(&self, text: &str, schema: &str) -> ValidationResult;
}

/// Runs the validator against a version's configured schema and stores the
/// outcome per cell.
#[derive(Clone)]
pub struct ValidationBridge {
    store: MatrixStore,
    validator: Arc<dyn SchemaValidator>,
}

impl ValidationBridge {
    pub fn new(store: MatrixStore, validator: Arc<dyn SchemaValidator>) -> Self {
        Self { store, validator }
    }

    /// Returns `None` when the version has no schema (nothing is stored).
    pub fn validate_cell(
        &self,
        prompt_id: &str,
        version_id: &str,
        row_id: &str,
        model_id: &str,
        text: &str,
    ) -> Option<ValidationResult> {
        let schema = self.store.schema(prompt_id, version_id)?;
        let result = self.validator.validate(text, &schema);
        if !result.is_valid {
            tracing::debug!(
                event = "validation_failed",
                prompt_id = %prompt_id,
                version_id = %version_id,
                row_id = %row_id,
                model_id = %model_id,
                errors = result.errors.len()
            );
        }
        self.store
            .set_validation(prompt_id, version_id, row_id, model_id, result.clone());
        Some(result)
    }

    /// Re-checks every succeeded cell of a version, e.g. after its schema
    /// changed. Returns how many cells were validated.
    pub fn revalidate_version(&self, prompt_id: &str, version_id: &str) -> usize {
        if self.store.schema(prompt_id, version_id).is_none() {
            return 0;
        }
        let mut n = 0;
        for row in self.store.test_matrix(prompt_id, version_id) {
            for (model_id, raw) in &row.responses {
                if let CellState::Succeeded(decoded) = CellState::from_stored(Some(raw)) {
                    if self
                        .validate_cell(prompt_id, version_id, &row.id, model_id, &decoded.text)
                        .is_some()
                    {
                        n += 1;
                    }
                }
            }
        }
        n
    }
}
