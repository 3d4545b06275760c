// ============================================================================
// Precondition Engine
// ============================================================================
//
// Evaluates a command against the lock-scoped snapshot and expands it into
// the flat, ordered effect list that will be recorded and applied. This is
// the only place effects are derived; execution and roll-forward replay the
// list as persisted.
//
// ============================================================================

use super::change::Effect;
use super::locks::LockSet;
use super::manager::ChangeManager;
use super::snapshot::SnapshotView;
use crate::command::{AtomicCommand, Command, CommandKind, Intent};
use crate::core::{EngineError, Result, Revision};
use crate::storage::entity::EntityRecord;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    /// Non-empty, in application order.
    Effects(Vec<Effect>),
    NoChange,
    Failed(String),
}

enum StepOutcome {
    Effects(Vec<Effect>),
    NoChange,
    Failed(String),
}

impl ChangeManager {
    pub(crate) async fn check_preconditions(
        &self,
        revision: Revision,
        command: &Command,
        locks: &LockSet,
    ) -> Result<CheckOutcome> {
        let mut view = SnapshotView::new(self.records(), locks, revision);
        let outcome = match evaluate(&mut view, command).await {
            Ok(outcome) => outcome,
            // A writer that lost its change to a timeout may see entities
            // written after it; that is a stale owner, not a broken protocol.
            Err(EngineError::Invariant(reason)) => {
                let status = self.change_status(revision).await?;
                match status {
                    Some(status) if status.is_terminal() => {
                        CheckOutcome::Failed(format!("change is already {}: {}", status, reason))
                    }
                    _ => return Err(EngineError::Invariant(reason)),
                }
            }
            Err(err) => return Err(err),
        };
        debug!(revision, outcome = %outcome_label(&outcome), "preconditions checked");
        Ok(outcome)
    }
}

/// Evaluate `command` step by step, folding each step's effects into the
/// view before the next step runs.
pub async fn evaluate(view: &mut SnapshotView<'_>, command: &Command) -> Result<CheckOutcome> {
    let mut effects = Vec::new();
    for step in command.steps() {
        match evaluate_step(view, step).await? {
            StepOutcome::Effects(step_effects) => {
                for effect in &step_effects {
                    view.apply(effect);
                }
                effects.extend(step_effects);
            }
            StepOutcome::NoChange => {}
            StepOutcome::Failed(reason) => return Ok(CheckOutcome::Failed(reason)),
        }
    }
    if effects.is_empty() {
        Ok(CheckOutcome::NoChange)
    } else {
        Ok(CheckOutcome::Effects(effects))
    }
}

async fn evaluate_step(view: &SnapshotView<'_>, step: &AtomicCommand) -> Result<StepOutcome> {
    let current = view.get(&step.target).await?;
    match step.kind {
        CommandKind::Add => evaluate_add(view, step, current).await,
        CommandKind::Remove => evaluate_remove(view, step, current).await,
        CommandKind::Change => Ok(evaluate_change(step, current)),
    }
}

async fn evaluate_add(
    view: &SnapshotView<'_>,
    step: &AtomicCommand,
    current: Option<EntityRecord>,
) -> Result<StepOutcome> {
    if current.is_some() {
        return Ok(match step.intent {
            Intent::Forced => StepOutcome::NoChange,
            _ => StepOutcome::Failed(format!("{} already exists", step.target)),
        });
    }
    if let Some(parent) = step.target.parent()
        && !view.exists(&parent).await?
    {
        return Ok(StepOutcome::Failed(format!(
            "cannot add {}: parent {} does not exist",
            step.target, parent
        )));
    }
    Ok(StepOutcome::Effects(vec![Effect::Add {
        target: step.target.clone(),
        value: step.value.clone(),
    }]))
}

async fn evaluate_remove(
    view: &SnapshotView<'_>,
    step: &AtomicCommand,
    current: Option<EntityRecord>,
) -> Result<StepOutcome> {
    let Some(entity) = current else {
        return Ok(match step.intent {
            Intent::Forced => StepOutcome::NoChange,
            _ => StepOutcome::Failed(format!("{} does not exist", step.target)),
        });
    };
    if let Some(reason) = revision_mismatch(step, &entity) {
        return Ok(StepOutcome::Failed(reason));
    }

    // Deepest first, so no entity outlives its parent even mid-apply
    let mut effects: Vec<Effect> = view
        .descendants(&step.target)
        .await?
        .into_iter()
        .rev()
        .map(|child| Effect::Remove {
            target: child.address,
            old_revision: child.revision,
            implied: true,
        })
        .collect();
    effects.push(Effect::Remove {
        target: entity.address,
        old_revision: entity.revision,
        implied: false,
    });
    Ok(StepOutcome::Effects(effects))
}

fn evaluate_change(step: &AtomicCommand, current: Option<EntityRecord>) -> StepOutcome {
    let Some(entity) = current else {
        return StepOutcome::Failed(format!("{} does not exist", step.target));
    };
    if let Some(reason) = revision_mismatch(step, &entity) {
        return StepOutcome::Failed(reason);
    }
    if entity.value() == step.value.as_ref() {
        return StepOutcome::NoChange;
    }
    StepOutcome::Effects(vec![Effect::Change {
        target: entity.address.clone(),
        old_revision: entity.revision,
        old_value: entity.value().cloned(),
        new_value: step.value.clone(),
    }])
}

fn revision_mismatch(step: &AtomicCommand, entity: &EntityRecord) -> Option<String> {
    match step.intent {
        Intent::SafeAt(expected) if expected != entity.revision => Some(format!(
            "{} is at revision {}, expected {}",
            step.target, entity.revision, expected
        )),
        _ => None,
    }
}

fn outcome_label(outcome: &CheckOutcome) -> String {
    match outcome {
        CheckOutcome::Effects(effects) => format!("{} effects", effects.len()),
        CheckOutcome::NoChange => "no change".to_string(),
        CheckOutcome::Failed(reason) => format!("failed: {}", reason),
    }
}
