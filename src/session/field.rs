use crate::models::EntityId;
use serde_json::Value;
use std::fmt;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum EntityRef {
    Profile,
    Link(EntityId),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, strum::Display, strum::AsRefStr)]
#[strum(serialize_all = "camelCase")]
pub enum FieldName {
    Name,
    Bio,
    Avatar,
    Design,
    SocialIcons,
    Title,
    Url,
    Create,
    Delete,
    Order,
}

/// Unit of write coalescing: one field of one entity.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct FieldKey {
    pub entity: EntityRef,
    pub field: FieldName,
}

impl FieldKey {
    pub fn profile(field: FieldName) -> Self {
        Self {
            entity: EntityRef::Profile,
            field,
        }
    }

    pub fn link(id: EntityId, field: FieldName) -> Self {
        Self {
            entity: EntityRef::Link(id),
            field,
        }
    }

    pub fn is_free_text(&self) -> bool {
        matches!(
            self.field,
            FieldName::Name | FieldName::Bio | FieldName::Title | FieldName::Url
        )
    }

    pub(crate) fn temp_link_id(&self) -> Option<&str> {
        match &self.entity {
            EntityRef::Link(EntityId::Temp(t)) => Some(t),
            _ => None,
        }
    }
}

impl fmt::Display for FieldKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.entity {
            EntityRef::Profile => write!(f, "profile.{}", self.field),
            EntityRef::Link(id) => write!(f, "link:{id}.{}", self.field),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub enum FieldState {
    /// Displayed value equals the last confirmed server value.
    #[default]
    Clean,
    /// Local value ahead of the server; a write is scheduled.
    Dirty(Value),
    /// A write for exactly this value is in flight.
    Committing(Value),
    /// Rejected locally; nothing was scheduled.
    Invalid { message: String },
    Error { last_good: Value, message: String },
}

impl FieldState {
    pub fn error_message(&self) -> Option<&str> {
        match self {
            FieldState::Invalid { message } | FieldState::Error { message, .. } => Some(message),
            _ => None,
        }
    }
}

/// Confirmed value plus the state machine for one field.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct FieldTrack {
    pub confirmed: Value,
    pub state: FieldState,
}

impl FieldTrack {
    pub fn new(confirmed: Value) -> Self {
        Self {
            confirmed,
            state: FieldState::Clean,
        }
    }

    pub fn failed(last_good: Value, message: impl Into<String>) -> Self {
        Self {
            confirmed: last_good.clone(),
            state: FieldState::Error {
                last_good,
                message: message.into(),
            },
        }
    }

    /// A new local value always supersedes whatever is committing.
    pub fn edit(&mut self, value: Value) {
        self.state = FieldState::Dirty(value);
    }

    pub fn dirty_value(&self) -> Option<&Value> {
        match &self.state {
            FieldState::Dirty(v) => Some(v),
            _ => None,
        }
    }

    pub fn begin_commit(&mut self, value: Value) {
        self.state = FieldState::Committing(value);
    }

    pub fn is_committing(&self, sent: &Value) -> bool {
        matches!(&self.state, FieldState::Committing(v) if v == sent)
    }

    /// Record the server's value. Returns true if `sent` was still the
    /// current value, i.e. the field is now clean.
    pub fn commit_succeeded(&mut self, sent: &Value, canonical: Value) -> bool {
        let current = self.is_committing(sent);
        self.confirmed = canonical;
        if current {
            self.state = FieldState::Clean;
        }
        current
    }

    /// Move to `Error` if `sent` is still current; returns the value to revert to.
    pub fn commit_failed(&mut self, sent: &Value, message: impl Into<String>) -> Option<Value> {
        if !self.is_committing(sent) {
            return None;
        }
        let last_good = self.confirmed.clone();
        self.state = FieldState::Error {
            last_good: last_good.clone(),
            message: message.into(),
        };
        Some(last_good)
    }

    pub fn invalid(&mut self, message: impl Into<String>) {
        self.state = FieldState::Invalid {
            message: message.into(),
        };
    }

    pub fn has_error(&self) -> bool {
        self.state.error_message().is_some()
    }
}
