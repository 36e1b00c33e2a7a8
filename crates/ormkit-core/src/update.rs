//! Tracked changes and the errors raised while persisting them

use thiserror::Error;

use crate::OrmError;

/// State of a tracked entity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityState {
    Added,
    Modified,
    Deleted,
}

/// A pending change to one entity
#[derive(Debug, Clone, PartialEq)]
pub struct EntityChange {
    pub entity_set: String,
    pub entity_type: String,
    pub key: String,
    pub state: EntityState,
    /// Serialized entity values; ignored for deletes
    pub values: serde_json::Value,
}

impl EntityChange {
    pub fn state_entry(&self) -> StateEntry {
        StateEntry::entity(self.entity_set.clone(), self.entity_type.clone())
    }
}

/// A state entry involved in a failed update
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateEntry {
    /// Entity type name, or `None` for stub and relationship entries
    pub entity: Option<String>,
    /// Entity set the entry belongs to
    pub entity_set: String,
}

impl StateEntry {
    pub fn entity(entity_set: impl Into<String>, entity: impl Into<String>) -> Self {
        Self {
            entity: Some(entity.into()),
            entity_set: entity_set.into(),
        }
    }

    pub fn relationship(entity_set: impl Into<String>) -> Self {
        Self {
            entity: None,
            entity_set: entity_set.into(),
        }
    }
}

/// Kind of failure reported by the persistence layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateErrorKind {
    General,
    OptimisticConcurrency,
}

/// Raw failure reported by the persistence layer
#[derive(Error, Debug, Clone)]
#[error("{message}")]
pub struct UpdateError {
    pub message: String,
    pub kind: UpdateErrorKind,
    pub state_entries: Vec<StateEntry>,
}

impl UpdateError {
    pub fn new(message: impl Into<String>, state_entries: Vec<StateEntry>) -> Self {
        Self {
            message: message.into(),
            kind: UpdateErrorKind::General,
            state_entries,
        }
    }

    pub fn concurrency(message: impl Into<String>, state_entries: Vec<StateEntry>) -> Self {
        Self {
            message: message.into(),
            kind: UpdateErrorKind::OptimisticConcurrency,
            state_entries,
        }
    }
}

/// Update failure as surfaced to context users
#[derive(Error, Debug, Clone)]
pub enum DbUpdateError {
    #[error("An error occurred while updating the entries: {source}")]
    Update {
        involves_independent_associations: bool,
        #[source]
        source: UpdateError,
    },

    #[error("Store update affected an unexpected number of rows: {source}")]
    Concurrency {
        #[source]
        source: UpdateError,
    },
}

impl DbUpdateError {
    /// Classifies a raw update failure.
    ///
    /// Entries without an entity are stubs or relationship entries, which means
    /// an independent association is involved; that takes precedence over
    /// concurrency classification.
    pub fn classify(error: UpdateError) -> Self {
        if error.state_entries.iter().any(|e| e.entity.is_none()) {
            return DbUpdateError::Update {
                involves_independent_associations: true,
                source: error,
            };
        }

        match error.kind {
            UpdateErrorKind::OptimisticConcurrency => DbUpdateError::Concurrency { source: error },
            UpdateErrorKind::General => DbUpdateError::Update {
                involves_independent_associations: false,
                source: error,
            },
        }
    }

    pub fn involves_independent_associations(&self) -> bool {
        matches!(
            self,
            DbUpdateError::Update {
                involves_independent_associations: true,
                ..
            }
        )
    }

    pub fn is_concurrency(&self) -> bool {
        matches!(self, DbUpdateError::Concurrency { .. })
    }

    pub fn state_entries(&self) -> &[StateEntry] {
        match self {
            DbUpdateError::Update { source, .. } | DbUpdateError::Concurrency { source } => {
                &source.state_entries
            }
        }
    }
}

/// Failure returned by a change processor: either a raw update failure that
/// still needs classifying, or any other error.
#[derive(Error, Debug)]
pub enum SaveError {
    #[error(transparent)]
    Update(UpdateError),

    #[error(transparent)]
    Other(#[from] OrmError),
}

impl From<SaveError> for OrmError {
    fn from(error: SaveError) -> Self {
        match error {
            SaveError::Update(update) => OrmError::Update(DbUpdateError::classify(update)),
            SaveError::Other(other) => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relationship_entry_marks_independent_association() {
        let error = UpdateError::concurrency(
            "0 rows affected",
            vec![
                StateEntry::entity("Posts", "Post"),
                StateEntry::relationship("Blog_Posts"),
            ],
        );

        let classified = DbUpdateError::classify(error);

        assert!(classified.involves_independent_associations());
        assert!(!classified.is_concurrency());
        assert_eq!(classified.state_entries().len(), 2);
    }

    #[test]
    fn test_concurrency_failure_with_entity_entries() {
        let error = UpdateError::concurrency("0 rows affected", vec![StateEntry::entity("Posts", "Post")]);

        let classified = DbUpdateError::classify(error);

        assert!(classified.is_concurrency());
        assert!(!classified.involves_independent_associations());
    }

    #[test]
    fn test_general_failure_with_entity_entries() {
        let error = UpdateError::new("constraint failed", vec![StateEntry::entity("Blogs", "Blog")]);

        let classified = DbUpdateError::classify(error);

        assert!(!classified.is_concurrency());
        assert!(!classified.involves_independent_associations());
        assert!(matches!(classified, DbUpdateError::Update { .. }));
    }

    #[test]
    fn test_save_error_converts_to_classified_orm_error() {
        let save = SaveError::Update(UpdateError::concurrency(
            "stale row",
            vec![StateEntry::entity("Blogs", "Blog")],
        ));

        let error: OrmError = save.into();

        assert!(matches!(error, OrmError::Update(DbUpdateError::Concurrency { .. })));
        assert!(error.is_data_error());
    }
}
