use crate::codec::CellState;
use crate::model::{InputRow, Prompt, TestMatrixRow, ValidationResult, Version};
use crate::variables;
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;

#[derive(Debug, Default)]
struct StoreState {
    prompts: Vec<Prompt>,
    active_prompt: Option<String>,
    active_version: Option<String>,
    seq: u64,
}

impl StoreState {
    fn next_id(&mut self, prefix: &str) -> String {
        self.seq += 1;
        format!(
            "{}_{:x}{:04x}",
            prefix,
            Utc::now().timestamp_millis(),
            self.seq
        )
    }

    fn select_latest(&mut self) {
        let latest = self
            .prompts
            .last()
            .and_then(|p| p.versions.last().map(|v| (p.id.clone(), v.id.clone())));
        match latest {
            Some((p, v)) => {
                self.active_prompt = Some(p);
                self.active_version = Some(v);
            }
            None => {
                self.active_prompt = None;
                self.active_version = None;
            }
        }
    }
}

/// Single source of truth for prompts, versions, input rows and cell values.
///
/// Cheap to clone; all clones share state. Every mutation replaces the affected
/// prompt or version as a whole value and bumps a revision counter that
/// observers (the sync bridge) can watch. Writes are last-write-wins.
///
/// Operations on unknown ids are no-ops: readers get `None` or an empty value,
/// writers return `false`.
#[derive(Clone)]
pub struct MatrixStore {
    state: Arc<Mutex<StoreState>>,
    changes: Arc<watch::Sender<u64>>,
    default_models: Arc<Vec<String>>,
}

impl MatrixStore {
    /// `default_models` is the selection given to every new prompt.
    pub fn new(default_models: Vec<String>) -> Self {
        let (tx, _rx) = watch::channel(0);
        Self {
            state: Arc::new(Mutex::new(StoreState::default())),
            changes: Arc::new(tx),
            default_models: Arc::new(default_models),
        }
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn mutate<R>(&self, f: impl FnOnce(&mut StoreState) -> Option<R>) -> Option<R> {
        let out = {
            let mut st = self.lock();
            f(&mut st)
        };
        if out.is_some() {
            self.changes.send_modify(|rev| *rev = rev.wrapping_add(1));
        }
        out
    }

    fn replace_prompt(&self, prompt_id: &str, f: impl FnOnce(&Prompt) -> Option<Prompt>) -> bool {
        self.mutate(|st| {
            let idx = st.prompts.iter().position(|p| p.id == prompt_id)?;
            let next = f(&st.prompts[idx])?;
            st.prompts[idx] = next;
            Some(())
        })
        .is_some()
    }

    fn replace_version(
        &self,
        prompt_id: &str,
        version_id: &str,
        f: impl FnOnce(&Prompt, &Version) -> Option<Version>,
    ) -> bool {
        self.mutate(|st| {
            let p = st.prompts.iter_mut().find(|p| p.id == prompt_id)?;
            let idx = p.versions.iter().position(|v| v.id == version_id)?;
            let current: &Prompt = p;
            let next = f(current, &current.versions[idx])?;
            p.versions[idx] = next;
            Some(())
        })
        .is_some()
    }

    fn read_version<R>(
        &self,
        prompt_id: &str,
        version_id: &str,
        f: impl FnOnce(&Prompt, &Version) -> R,
    ) -> Option<R> {
        let st = self.lock();
        let p = st.prompts.iter().find(|p| p.id == prompt_id)?;
        let v = p.version(version_id)?;
        Some(f(p, v))
    }

    // --- change observation ---

    pub fn revision(&self) -> u64 {
        *self.changes.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }

    // --- prompts & versions ---

    /// Creates a prompt with one version, one empty input row and the default
    /// model selection, and makes it active.
    pub fn create_prompt(&self, instruction: &str) -> String {
        let default_models = self.default_models.as_ref().clone();
        self.mutate(|st| {
            let now = Utc::now();
            let prompt_id = st.next_id("prompt");
            let version_id = st.next_id("v");
            let row_id = st.next_id("row");

            let mut vars = BTreeMap::new();
            variables::register_discovered(instruction, &mut vars);

            let version = Version {
                id: version_id.clone(),
                title: default_title(instruction),
                instruction: instruction.to_string(),
                created_at: now,
                selected_models: default_models,
                schema: None,
                responses: BTreeMap::new(),
                validations: BTreeMap::new(),
            };
            st.prompts.push(Prompt {
                id: prompt_id.clone(),
                versions: vec![version],
                inputs: vec![InputRow {
                    id: row_id,
                    input: String::new(),
                    created_at: now,
                }],
                variables: vars,
            });
            st.active_prompt = Some(prompt_id.clone());
            st.active_version = Some(version_id);

            tracing::debug!(event = "prompt_created", prompt_id = %prompt_id);
            Some(prompt_id)
        })
        .unwrap_or_default()
    }

    /// Appends a version with new instruction text. Title, model selection and
    /// schema carry over from the latest version; responses and validation
    /// results start empty. The new version becomes active.
    pub fn revise_instruction(&self, prompt_id: &str, instruction: &str) -> Option<String> {
        self.mutate(|st| {
            let version_id = st.next_id("v");
            let p = st.prompts.iter_mut().find(|p| p.id == prompt_id)?;
            let prior = p.versions.last()?;

            let version = Version {
                id: version_id.clone(),
                title: prior.title.clone(),
                instruction: instruction.to_string(),
                created_at: Utc::now(),
                selected_models: prior.selected_models.clone(),
                schema: prior.schema.clone(),
                responses: BTreeMap::new(),
                validations: BTreeMap::new(),
            };

            let mut next = p.clone();
            next.versions.push(version);
            let added = variables::register_discovered(instruction, &mut next.variables);
            *p = next;

            st.active_prompt = Some(prompt_id.to_string());
            st.active_version = Some(version_id.clone());

            tracing::debug!(
                event = "instruction_revised",
                prompt_id = %prompt_id,
                version_id = %version_id,
                new_variables = added.len()
            );
            Some(version_id)
        })
    }

    pub fn rename_version(&self, prompt_id: &str, version_id: &str, title: &str) -> bool {
        self.replace_version(prompt_id, version_id, |_, v| {
            Some(Version {
                title: title.to_string(),
                ..v.clone()
            })
        })
    }

    pub fn delete_prompt(&self, prompt_id: &str) -> bool {
        self.mutate(|st| {
            let idx = st.prompts.iter().position(|p| p.id == prompt_id)?;
            st.prompts.remove(idx);
            if st.active_prompt.as_deref() == Some(prompt_id) {
                st.select_latest();
            }
            Some(())
        })
        .is_some()
    }

    /// Removing the last remaining version of a prompt is refused.
    pub fn delete_version(&self, prompt_id: &str, version_id: &str) -> bool {
        self.mutate(|st| {
            let p = st.prompts.iter_mut().find(|p| p.id == prompt_id)?;
            if p.versions.len() <= 1 {
                return None;
            }
            let idx = p.versions.iter().position(|v| v.id == version_id)?;

            let mut next = p.clone();
            next.versions.remove(idx);
            let fallback = next.versions.last().map(|v| v.id.clone());
            *p = next;

            if st.active_version.as_deref() == Some(version_id) {
                st.active_prompt = Some(prompt_id.to_string());
                st.active_version = fallback;
            }
            Some(())
        })
        .is_some()
    }

    pub fn set_active(&self, prompt_id: &str, version_id: &str) -> bool {
        self.mutate(|st| {
            let p = st.prompts.iter().find(|p| p.id == prompt_id)?;
            p.version(version_id)?;
            st.active_prompt = Some(prompt_id.to_string());
            st.active_version = Some(version_id.to_string());
            Some(())
        })
        .is_some()
    }

    /// `(prompt id, version id)` of the active selection.
    pub fn active(&self) -> Option<(String, String)> {
        let st = self.lock();
        Some((st.active_prompt.clone()?, st.active_version.clone()?))
    }

    pub fn prompt(&self, prompt_id: &str) -> Option<Prompt> {
        self.lock().prompts.iter().find(|p| p.id == prompt_id).cloned()
    }

    pub fn prompts(&self) -> Vec<Prompt> {
        self.lock().prompts.clone()
    }

    pub fn version(&self, prompt_id: &str, version_id: &str) -> Option<Version> {
        self.read_version(prompt_id, version_id, |_, v| v.clone())
    }

    /// Replaces everything with a loaded snapshot. Prompts without versions
    /// are dropped; the most recent prompt/version becomes active.
    pub fn restore(&self, prompts: Vec<Prompt>) {
        self.mutate(|st| {
            st.prompts = prompts
                .into_iter()
                .filter(|p| !p.versions.is_empty())
                .collect();
            st.select_latest();
            Some(())
        });
    }

    // --- input rows ---

    pub fn add_input_row(&self, prompt_id: &str, input: &str) -> Option<String> {
        self.mutate(|st| {
            let row_id = st.next_id("row");
            let p = st.prompts.iter_mut().find(|p| p.id == prompt_id)?;
            let mut next = p.clone();
            next.inputs.push(InputRow {
                id: row_id.clone(),
                input: input.to_string(),
                created_at: Utc::now(),
            });
            *p = next;
            Some(row_id)
        })
    }

    pub fn update_input_row(&self, prompt_id: &str, row_id: &str, input: &str) -> bool {
        self.replace_prompt(prompt_id, |p| {
            p.input(row_id)?;
            let mut next = p.clone();
            for row in next.inputs.iter_mut().filter(|r| r.id == row_id) {
                row.input = input.to_string();
            }
            Some(next)
        })
    }

    /// Removes the row and purges its cells from every version.
    pub fn remove_input_row(&self, prompt_id: &str, row_id: &str) -> bool {
        self.replace_prompt(prompt_id, |p| {
            p.input(row_id)?;
            let mut next = p.clone();
            next.inputs.retain(|r| r.id != row_id);
            for v in next.versions.iter_mut() {
                v.responses.remove(row_id);
                v.validations.remove(row_id);
            }
            Some(next)
        })
    }

    /// Input rows joined with `version_id`'s responses.
    pub fn test_matrix(&self, prompt_id: &str, version_id: &str) -> Vec<TestMatrixRow> {
        self.read_version(prompt_id, version_id, |p, v| {
            p.inputs
                .iter()
                .map(|row| TestMatrixRow {
                    id: row.id.clone(),
                    input: row.input.clone(),
                    responses: v.responses.get(&row.id).cloned().unwrap_or_default(),
                })
                .collect()
        })
        .unwrap_or_default()
    }

    // --- cells ---

    /// Last write wins. Writes for rows that no longer exist are dropped so a
    /// late result cannot resurrect a removed row.
    pub fn write_cell(
        &self,
        prompt_id: &str,
        version_id: &str,
        row_id: &str,
        model_id: &str,
        value: impl Into<String>,
    ) -> bool {
        let value = value.into();
        self.replace_version(prompt_id, version_id, |p, v| {
            p.input(row_id)?;
            let mut next = v.clone();
            next.responses
                .entry(row_id.to_string())
                .or_default()
                .insert(model_id.to_string(), value);
            Some(next)
        })
    }

    pub fn read_cell(
        &self,
        prompt_id: &str,
        version_id: &str,
        row_id: &str,
        model_id: &str,
    ) -> Option<String> {
        self.read_version(prompt_id, version_id, |_, v| {
            v.responses
                .get(row_id)
                .and_then(|m| m.get(model_id))
                .cloned()
        })
        .flatten()
    }

    pub fn cell_state(
        &self,
        prompt_id: &str,
        version_id: &str,
        row_id: &str,
        model_id: &str,
    ) -> CellState {
        CellState::from_stored(
            self.read_cell(prompt_id, version_id, row_id, model_id)
                .as_deref(),
        )
    }

    // --- variables ---

    pub fn variables(&self, prompt_id: &str) -> BTreeMap<String, String> {
        self.prompt(prompt_id)
            .map(|p| p.variables)
            .unwrap_or_default()
    }

    pub fn set_variable(&self, prompt_id: &str, name: &str, value: &str) -> bool {
        self.replace_prompt(prompt_id, |p| {
            let mut next = p.clone();
            next.variables.insert(name.to_string(), value.to_string());
            Some(next)
        })
    }

    pub fn remove_variable(&self, prompt_id: &str, name: &str) -> bool {
        self.replace_prompt(prompt_id, |p| {
            p.variables.get(name)?;
            let mut next = p.clone();
            next.variables.remove(name);
            Some(next)
        })
    }

    pub fn substitute_variables(&self, prompt_id: &str, text: &str) -> String {
        variables::substitute(text, &self.variables(prompt_id))
    }

    // --- version-scoped settings ---

    pub fn selected_models(&self, prompt_id: &str, version_id: &str) -> Vec<String> {
        self.read_version(prompt_id, version_id, |_, v| v.selected_models.clone())
            .unwrap_or_default()
    }

    pub fn set_selected_models(&self, prompt_id: &str, version_id: &str, models: Vec<String>) -> bool {
        self.replace_version(prompt_id, version_id, |_, v| {
            Some(Version {
                selected_models: models,
                ..v.clone()
            })
        })
    }

    pub fn schema(&self, prompt_id: &str, version_id: &str) -> Option<String> {
        self.read_version(prompt_id, version_id, |_, v| v.schema.clone())
            .flatten()
    }

    /// Clearing the schema also clears the version's validation results.
    pub fn set_schema(&self, prompt_id: &str, version_id: &str, schema: Option<String>) -> bool {
        let schema = schema.filter(|s| !s.trim().is_empty());
        self.replace_version(prompt_id, version_id, |_, v| {
            let mut next = v.clone();
            if schema.is_none() {
                next.validations.clear();
            }
            next.schema = schema;
            Some(next)
        })
    }

    pub fn validation(
        &self,
        prompt_id: &str,
        version_id: &str,
        row_id: &str,
        model_id: &str,
    ) -> Option<ValidationResult> {
        self.read_version(prompt_id, version_id, |_, v| {
            v.validations
                .get(row_id)
                .and_then(|m| m.get(model_id))
                .cloned()
        })
        .flatten()
    }

    pub fn set_validation(
        &self,
        prompt_id: &str,
        version_id: &str,
        row_id: &str,
        model_id: &str,
        result: ValidationResult,
    ) -> bool {
        self.replace_version(prompt_id, version_id, |p, v| {
            p.input(row_id)?;
            let mut next = v.clone();
            next.validations
                .entry(row_id.to_string())
                .or_default()
                .insert(model_id.to_string(), result);
            Some(next)
        })
    }

    /// Drops one cell's validation result. Returns `false` when there was none.
    pub fn clear_validation(
        &self,
        prompt_id: &str,
        version_id: &str,
        row_id: &str,
        model_id: &str,
    ) -> bool {
        self.replace_version(prompt_id, version_id, |_, v| {
            v.validations.get(row_id)?.get(model_id)?;
            let mut next = v.clone();
            if let Some(cells) = next.validations.get_mut(row_id) {
                cells.remove(model_id);
                if cells.is_empty() {
                    next.validations.remove(row_id);
                }
            }
            Some(next)
        })
    }
}

fn default_title(instruction: &str) -> String {
    const MAX: usize = 40;
    match instruction.lines().map(str::trim).find(|l| !l.is_empty()) {
        Some(line) if line.chars().count() > MAX => {
            let cut: String = line.chars().take(MAX).collect();
            format!("{}…", cut.trim_end())
        }
        Some(line) => line.to_string(),
        None => "Untitled prompt".to_string(),
    }
}
