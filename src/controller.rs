//! Step navigation and the "Next" transition.
//!
//! A transition is split in three so callers can release their locks while
//! the remote call is in flight:
//!
//! 1. [`StepController::prepare`] validates the step and builds the request
//!    without touching the state.
//! 2. [`StepController::execute`] performs the one remote call.
//! 3. [`StepController::commit`] applies the result to the state.
//!
//! [`StepController::next`] runs all three for callers that own the state.

use log::{info, warn};
use std::sync::Arc;

use crate::drive::{TemplateProvisioner, folder_id_from_url};
use crate::error::{Result, ValidationErrors, WizardError};
use crate::sheets::{Row, SheetWriter, WriteOutcome, WriteRequest};
use crate::state::WizardState;
use crate::steps::{StepDescriptor, StepKind, initial_fields};
use crate::value::{FieldValue, Fields, cell_of};

/// Remote work a prepared step still has to do
#[derive(Debug, Clone, PartialEq)]
pub enum PendingAction {
    /// Copy the template into `folder_id` as `output_name`
    Provision {
        output_name: String,
        folder_id: String,
    },
    /// Write rows into a tab of the session's spreadsheet
    Write {
        sheet_id: String,
        tab: &'static str,
        request: WriteRequest,
    },
    /// Nothing remote; only merge and advance
    Advance,
    /// Finish: start a new session
    Reset,
}

/// A validated "Next" waiting for its remote call
#[derive(Debug, Clone, PartialEq)]
pub struct PendingStep {
    pub step_index: usize,
    /// Values to merge into the store once the remote call succeeded
    pub values: Fields,
    pub action: PendingAction,
}

/// What the remote call produced
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    Provisioned { sheet_id: String },
    Written(WriteOutcome),
    None,
}

/// Where the pointer ended up after a transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: usize,
    pub to: usize,
    /// Row index recorded by this transition, if it was the tab's first write
    pub assigned_row: Option<u32>,
}

pub struct StepController {
    steps: Vec<StepDescriptor>,
    sheets: Arc<dyn SheetWriter>,
    provisioner: Arc<dyn TemplateProvisioner>,
}

impl StepController {
    pub fn new(
        steps: Vec<StepDescriptor>,
        sheets: Arc<dyn SheetWriter>,
        provisioner: Arc<dyn TemplateProvisioner>,
    ) -> Self {
        Self {
            steps,
            sheets,
            provisioner,
        }
    }

    pub fn steps(&self) -> &[StepDescriptor] {
        &self.steps
    }

    /// A fresh session sized for this controller's steps
    pub fn new_state(&self) -> WizardState {
        WizardState::new(initial_fields(&self.steps), self.steps.len())
    }

    /// Descriptor for the state's current step; `None` once completed
    pub fn current<'a>(&'a self, state: &WizardState) -> Option<&'a StepDescriptor> {
        self.steps.get(state.active_step())
    }

    /// Validates the current step against `input` layered over the stored
    /// fields and builds its remote action. Never mutates the state.
    pub fn prepare(&self, state: &WizardState, input: &Fields) -> Result<PendingStep> {
        let step_index = state.active_step();
        let Some(step) = self.current(state) else {
            return Ok(PendingStep {
                step_index,
                values: Fields::new(),
                action: PendingAction::Reset,
            });
        };

        let mut merged = state.fields().clone();
        merged.extend(input.iter().map(|(k, v)| (k.clone(), v.clone())));

        let mut errors = step.validate(&merged);
        let values = step_values(step, &merged);

        let action = match step.kind {
            StepKind::Provision => {
                let folder_url = merged
                    .get("folderUrl")
                    .map(FieldValue::to_text)
                    .unwrap_or_default();
                let folder_id = folder_id_from_url(&folder_url);
                if folder_id.is_none() && errors.message_for("folderUrl").is_none() {
                    errors.add("folderUrl", "Invalid Google Drive folder URL");
                }
                errors.into_result()?;
                if state.sheet_id().is_some() {
                    // the spreadsheet is created once per session
                    PendingAction::Advance
                } else {
                    PendingAction::Provision {
                        output_name: values
                            .get("outputName")
                            .map(FieldValue::to_text)
                            .unwrap_or_default()
                            .trim()
                            .to_string(),
                        folder_id: folder_id.unwrap_or_default(),
                    }
                }
            }
            StepKind::SingleRow { tab, columns } => {
                errors.into_result()?;
                let row: Row = columns.iter().map(|c| cell_of(&merged, c)).collect();
                let request = match state.row_index(tab) {
                    Some(index) => WriteRequest::UpdateAt { index, row },
                    None => WriteRequest::Append(row),
                };
                PendingAction::Write {
                    sheet_id: require_sheet(state)?,
                    tab,
                    request,
                }
            }
            StepKind::MultiRow { tab, list, columns } => {
                errors.into_result()?;
                let rows: Vec<Row> = merged
                    .get(list)
                    .and_then(FieldValue::as_entries)
                    .unwrap_or(&[])
                    .iter()
                    .map(|entry| columns.iter().map(|c| cell_of(entry, c)).collect())
                    .collect();
                PendingAction::Write {
                    sheet_id: require_sheet(state)?,
                    tab,
                    request: WriteRequest::ReplaceAll(rows),
                }
            }
            StepKind::Finish => PendingAction::Reset,
        };

        Ok(PendingStep {
            step_index,
            values,
            action,
        })
    }

    /// Performs the prepared step's remote call, if any.
    pub async fn execute(&self, pending: &PendingStep) -> Result<Effect> {
        match &pending.action {
            PendingAction::Provision {
                output_name,
                folder_id,
            } => {
                info!("provisioning '{}' in folder {}", output_name, folder_id);
                let sheet_id = self
                    .provisioner
                    .provision(output_name, folder_id)
                    .await
                    .inspect_err(|e| warn!("provisioning '{}' failed: {}", output_name, e))?;
                Ok(Effect::Provisioned { sheet_id })
            }
            PendingAction::Write {
                sheet_id,
                tab,
                request,
            } => {
                info!("{} into {} of {}", request.mode(), tab, sheet_id);
                let outcome = self
                    .sheets
                    .write(sheet_id, tab, request.clone())
                    .await
                    .inspect_err(|e| warn!("write to {} failed: {}", tab, e))?;
                Ok(Effect::Written(outcome))
            }
            PendingAction::Advance | PendingAction::Reset => Ok(Effect::None),
        }
    }

    /// Applies a successful remote call to the state and moves the pointer.
    pub fn commit(&self, state: &mut WizardState, pending: PendingStep, effect: Effect) -> Transition {
        let from = state.active_step();
        if let PendingAction::Reset = pending.action {
            state.reset();
            info!("wizard finished; session reset");
            return Transition {
                from,
                to: state.active_step(),
                assigned_row: None,
            };
        }

        let mut assigned_row = None;
        match (&pending.action, effect) {
            (PendingAction::Provision { folder_id, .. }, Effect::Provisioned { sheet_id }) => {
                state.set_sheet_id(sheet_id);
                state.update(Fields::from([(
                    "folderId".to_string(),
                    FieldValue::text(folder_id.clone()),
                )]));
            }
            (PendingAction::Write { tab, .. }, Effect::Written(outcome)) => {
                if let Some(index) = outcome.row_index {
                    if state.set_row_index(tab, index) {
                        assigned_row = Some(index);
                    }
                }
            }
            _ => {}
        }

        state.update(pending.values);
        let to = state.advance();
        info!("step {} -> {}", from, to);
        Transition {
            from,
            to,
            assigned_row,
        }
    }

    /// Validate, write and advance. On any error the state is untouched.
    pub async fn next(&self, state: &mut WizardState, input: &Fields) -> Result<Transition> {
        let pending = self.prepare(state, input)?;
        let effect = self.execute(&pending).await?;
        Ok(self.commit(state, pending, effect))
    }

    /// Keeps unsaved (and possibly invalid) edits to the current step's own
    /// fields, then steps back. Anything else in `input` is dropped.
    pub fn back(&self, state: &mut WizardState, input: Fields) -> usize {
        if let Some(step) = self.current(state) {
            let owned = step_values(step, &input);
            state.update(owned);
        }
        state.retreat()
    }

    /// Starts over regardless of the current step.
    pub fn restart(&self, state: &mut WizardState) {
        state.reset();
    }
}

/// The subset of `merged` owned by `step`
fn step_values(step: &StepDescriptor, merged: &Fields) -> Fields {
    step.field_names()
        .into_iter()
        .filter_map(|name| merged.get(name).map(|v| (name.to_string(), v.clone())))
        .collect()
}

fn require_sheet(state: &WizardState) -> Result<String> {
    state
        .sheet_id()
        .map(str::to_string)
        .ok_or(WizardError::NoSpreadsheet)
}

/// Messages for the failed fields of a validation error, empty otherwise
pub fn field_errors(error: &WizardError) -> ValidationErrors {
    error.validation().cloned().unwrap_or_default()
}
