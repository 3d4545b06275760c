// ============================================================================
// Commands
// ============================================================================
//
// Structured add / change / remove requests against the model tree. A
// command says what the caller wants; the precondition stage turns it into
// the flat list of effects that actually get recorded and applied.
//
// ============================================================================

use crate::core::{Address, EntityKind, EngineError, Result, Revision, Value};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandKind {
    Add,
    Change,
    Remove,
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandKind::Add => write!(f, "ADD"),
            CommandKind::Change => write!(f, "CHANGE"),
            CommandKind::Remove => write!(f, "REMOVE"),
        }
    }
}

/// How strictly a command is checked against current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Intent {
    /// Succeed whenever the end state is reachable; a command that would not
    /// change anything is a no-op.
    Forced,
    /// Require the target to be in the expected existence state.
    Safe,
    /// Like `Safe`, and the target must currently be at this revision.
    SafeAt(Revision),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AtomicCommand {
    pub kind: CommandKind,
    pub target: Address,
    pub intent: Intent,
    /// New value for `Change`, initial value for adding a field.
    pub value: Option<Value>,
}

impl AtomicCommand {
    pub fn add(target: Address) -> Self {
        Self {
            kind: CommandKind::Add,
            target,
            intent: Intent::Safe,
            value: None,
        }
    }

    pub fn add_field(target: Address, value: impl Into<Value>) -> Self {
        Self {
            value: Some(value.into()),
            ..Self::add(target)
        }
    }

    pub fn change(target: Address, value: impl Into<Value>) -> Self {
        Self {
            kind: CommandKind::Change,
            target,
            intent: Intent::Forced,
            value: Some(value.into()),
        }
    }

    pub fn remove(target: Address) -> Self {
        Self {
            kind: CommandKind::Remove,
            target,
            intent: Intent::Safe,
            value: None,
        }
    }

    pub fn with_intent(mut self, intent: Intent) -> Self {
        self.intent = intent;
        self
    }

    /// The entity whose subtree this command may touch.
    pub fn changed_entity(&self) -> &Address {
        &self.target
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(Value::Float(f)) = &self.value
            && !f.is_finite()
        {
            return Err(EngineError::InvalidCommand(format!(
                "{} of {} carries non-finite float {}",
                self.kind, self.target, f
            )));
        }
        match (self.kind, self.target.kind()) {
            (CommandKind::Change, EntityKind::Field) => Ok(()),
            (CommandKind::Change, other) => Err(EngineError::InvalidCommand(format!(
                "CHANGE targets fields only, {} is a {}",
                self.target, other
            ))),
            (_, EntityKind::Field) => Ok(()),
            (_, _) if self.value.is_some() => Err(EngineError::InvalidCommand(format!(
                "{} of {} cannot carry a value",
                self.kind, self.target
            ))),
            _ => Ok(()),
        }
    }
}

impl fmt::Display for AtomicCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.target)?;
        if let Some(value) = &self.value {
            write!(f, " = {}", value)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    Atomic(AtomicCommand),
    /// Steps are evaluated in order, each against the state the earlier
    /// steps produced; one failing step fails the whole command.
    Transaction(Vec<AtomicCommand>),
}

impl Command {
    pub fn steps(&self) -> &[AtomicCommand] {
        match self {
            Command::Atomic(step) => std::slice::from_ref(step),
            Command::Transaction(steps) => steps,
        }
    }

    /// The model every step must belong to.
    pub fn model_address(&self) -> Result<Address> {
        let steps = self.steps();
        let first = steps
            .first()
            .ok_or_else(|| EngineError::InvalidCommand("empty transaction".to_string()))?;
        let model = first.target.model_address();
        if let Some(stray) = steps.iter().find(|s| s.target.model_id() != model.model_id()) {
            return Err(EngineError::InvalidCommand(format!(
                "cross-model transaction: {} is outside {}",
                stray.target, model
            )));
        }
        Ok(model)
    }

    pub fn validate(&self) -> Result<Address> {
        for step in self.steps() {
            step.validate()?;
        }
        self.model_address()
    }
}

impl From<AtomicCommand> for Command {
    fn from(step: AtomicCommand) -> Self {
        Command::Atomic(step)
    }
}
