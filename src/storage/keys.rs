// ============================================================================
// Address Space: resource paths <-> backing-store keys
// ============================================================================
//
//   c/{model}/{revision:020}                  change record
//   e/{model}/{revision:020}/{index:06}       event record
//   n/{model}[/{object}[/{field}]]            entity record
//
// Ids are percent-escaped for '/' and '%', so every key decodes back to the
// address or (model, revision) it was built from. Revisions are zero-padded
// so lexical key order equals numeric order.
//
// ============================================================================

use crate::core::{Address, EngineError, Result, Revision};
use std::fmt;

const CHANGE_TAG: &str = "c";
const EVENT_TAG: &str = "e";
const ENTITY_TAG: &str = "n";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RecordKey {
    Change { model: String, revision: Revision },
    Event { model: String, revision: Revision, index: u32 },
    Entity(Address),
}

impl RecordKey {
    pub fn change(model: &str, revision: Revision) -> Self {
        RecordKey::Change {
            model: model.to_string(),
            revision,
        }
    }

    /// Key of the `index`-th event belonging to a change record.
    pub fn event_of(change: &RecordKey, index: u32) -> Result<Self> {
        match change {
            RecordKey::Change { model, revision } => Ok(RecordKey::Event {
                model: model.clone(),
                revision: *revision,
                index,
            }),
            other => Err(EngineError::InvalidKey(format!(
                "'{}' is not a change key",
                other
            ))),
        }
    }

    pub fn entity(address: &Address) -> Self {
        RecordKey::Entity(address.clone())
    }

    /// Model id and revision for change and event keys.
    pub fn model_and_revision(&self) -> Option<(&str, Revision)> {
        match self {
            RecordKey::Change { model, revision } | RecordKey::Event { model, revision, .. } => {
                Some((model.as_str(), *revision))
            }
            RecordKey::Entity(_) => None,
        }
    }

    pub fn encode(&self) -> String {
        self.to_string()
    }

    pub fn decode(key: &str) -> Result<Self> {
        let invalid = || EngineError::InvalidKey(key.to_string());
        let parts: Vec<&str> = key.split('/').collect();
        match parts.as_slice() {
            [CHANGE_TAG, model, revision] => Ok(RecordKey::Change {
                model: unescape(model)?,
                revision: revision.parse().map_err(|_| invalid())?,
            }),
            [EVENT_TAG, model, revision, index] => Ok(RecordKey::Event {
                model: unescape(model)?,
                revision: revision.parse().map_err(|_| invalid())?,
                index: index.parse().map_err(|_| invalid())?,
            }),
            [ENTITY_TAG, model] => Ok(RecordKey::Entity(Address::model(unescape(model)?))),
            [ENTITY_TAG, model, object] => Ok(RecordKey::Entity(Address::object(
                unescape(model)?,
                unescape(object)?,
            ))),
            [ENTITY_TAG, model, object, field] => Ok(RecordKey::Entity(Address::field(
                unescape(model)?,
                unescape(object)?,
                unescape(field)?,
            ))),
            _ => Err(invalid()),
        }
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordKey::Change { model, revision } => {
                write!(f, "{}/{}/{:020}", CHANGE_TAG, escape(model), revision)
            }
            RecordKey::Event {
                model,
                revision,
                index,
            } => write!(
                f,
                "{}/{}/{:020}/{:06}",
                EVENT_TAG,
                escape(model),
                revision,
                index
            ),
            RecordKey::Entity(address) => write!(f, "{}", entity_path(address)),
        }
    }
}

/// Prefix under which every strict descendant of `address` is stored.
pub fn descendants_prefix(address: &Address) -> String {
    format!("{}/", entity_path(address))
}

fn entity_path(address: &Address) -> String {
    let mut path = format!("{}/{}", ENTITY_TAG, escape(address.model_id()));
    if let Some(object) = address.object_id() {
        path.push('/');
        path.push_str(&escape(object));
    }
    if let Some(field) = address.field_id() {
        path.push('/');
        path.push_str(&escape(field));
    }
    path
}

fn escape(id: &str) -> String {
    id.replace('%', "%25").replace('/', "%2F")
}

fn unescape(part: &str) -> Result<String> {
    let mut out = String::with_capacity(part.len());
    let mut rest = part;
    while let Some(pos) = rest.find('%') {
        out.push_str(&rest[..pos]);
        let code = rest.get(pos + 1..pos + 3);
        match code {
            Some("25") => out.push('%'),
            Some("2F") => out.push('/'),
            _ => {
                return Err(EngineError::InvalidKey(format!(
                    "bad escape in '{}'",
                    part
                )));
            }
        }
        rest = &rest[pos + 3..];
    }
    out.push_str(rest);
    Ok(out)
}
