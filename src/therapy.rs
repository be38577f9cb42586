//! Therapy catalog.
//!
//! Therapies are owned by the surrounding simulation. Strategies only hold
//! shared, read-only handles ([`TherapyRef`]) resolved once at build time.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{StrategyResult, ValidationError};

/// Integer identifier of a therapy in the catalog.
pub type TherapyId = u32;

/// A concrete drug regimen that can be handed to a patient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Therapy {
    /// Catalog id.
    pub id: TherapyId,

    /// Human readable name, e.g. `"AL"` or `"DHA-PPQ"`.
    #[serde(default)]
    pub name: String,

    /// Drugs combined in this regimen.
    #[serde(default)]
    pub drug_ids: Vec<u32>,

    /// Number of days the regimen is taken.
    #[serde(default)]
    pub dosing_days: u32,
}

impl Therapy {
    /// Creates a therapy with only an id and a name.
    #[must_use]
    pub fn new(id: TherapyId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            drug_ids: Vec::new(),
            dosing_days: 0,
        }
    }
}

impl fmt::Display for Therapy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.name.is_empty() {
            write!(f, "{}", self.id)
        } else {
            write!(f, "{}-{}", self.id, self.name)
        }
    }
}

/// Non-owning handle to a catalog therapy.
///
/// Cloning is cheap; equality compares catalog ids only.
#[derive(Debug, Clone)]
pub struct TherapyRef(Arc<Therapy>);

impl TherapyRef {
    /// Wraps a shared therapy.
    #[must_use]
    pub fn new(therapy: Arc<Therapy>) -> Self {
        Self(therapy)
    }

    /// Catalog id of the referenced therapy.
    #[must_use]
    pub fn id(&self) -> TherapyId {
        self.0.id
    }

    /// Borrow the referenced therapy.
    #[must_use]
    pub fn therapy(&self) -> &Therapy {
        &self.0
    }
}

impl PartialEq for TherapyRef {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for TherapyRef {}

impl fmt::Display for TherapyRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id())
    }
}

/// Read-only therapy lookup used by the strategy builder.
pub trait TherapyCatalog {
    /// Look up a therapy by id.
    fn get(&self, id: TherapyId) -> Option<Arc<Therapy>>;

    /// Number of therapies in the catalog.
    fn len(&self) -> usize;

    /// Returns true when the catalog holds no therapy.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resolve `id` into a handle, failing when the therapy does not exist.
    fn resolve(&self, id: TherapyId) -> Result<TherapyRef, ValidationError> {
        self.get(id)
            .map(TherapyRef::new)
            .ok_or(ValidationError::UnknownTherapy { therapy_id: id })
    }
}

/// In-memory therapy catalog keyed by therapy id.
#[derive(Debug, Clone, Default)]
pub struct InMemoryTherapyCatalog {
    by_id: BTreeMap<TherapyId, Arc<Therapy>>,
}

impl InMemoryTherapyCatalog {
    /// Create a new empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a therapy. Returns an error if the id is already taken.
    pub fn insert(&mut self, therapy: Therapy) -> Result<(), ValidationError> {
        if self.by_id.contains_key(&therapy.id) {
            return Err(ValidationError::InvalidValue {
                field: "therapy_id".to_string(),
                reason: format!("duplicate therapy id {}", therapy.id),
            });
        }
        self.by_id.insert(therapy.id, Arc::new(therapy));
        Ok(())
    }

    /// Build a catalog from an iterator of therapies.
    pub fn from_therapies(
        therapies: impl IntoIterator<Item = Therapy>,
    ) -> Result<Self, ValidationError> {
        let mut catalog = Self::new();
        for therapy in therapies {
            catalog.insert(therapy)?;
        }
        Ok(catalog)
    }

    /// Build a catalog with placeholder therapies for the given ids.
    ///
    /// Handy for hosts and tests that only care about ids.
    #[must_use]
    pub fn with_ids(ids: impl IntoIterator<Item = TherapyId>) -> Self {
        let by_id = ids
            .into_iter()
            .map(|id| (id, Arc::new(Therapy::new(id, format!("therapy-{id}")))))
            .collect();
        Self { by_id }
    }

    /// Parse a JSON array of therapies.
    pub fn from_json_str(json: &str) -> StrategyResult<Self> {
        let therapies: Vec<Therapy> = serde_json::from_str(json)?;
        Ok(Self::from_therapies(therapies)?)
    }

    /// Read a JSON array of therapies from a file.
    pub fn from_path(path: impl AsRef<Path>) -> StrategyResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    /// All therapy ids, ascending.
    #[must_use]
    pub fn ids(&self) -> Vec<TherapyId> {
        self.by_id.keys().copied().collect()
    }
}

impl TherapyCatalog for InMemoryTherapyCatalog {
    fn get(&self, id: TherapyId) -> Option<Arc<Therapy>> {
        self.by_id.get(&id).cloned()
    }

    fn len(&self) -> usize {
        self.by_id.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Compile-time test: ensure the trait is object-safe
    fn _assert_catalog_object_safe(_: &dyn TherapyCatalog) {}

    #[test]
    fn resolve_known_and_unknown() {
        let catalog = InMemoryTherapyCatalog::with_ids([2, 5, 6, 12]);
        assert_eq!(catalog.len(), 4);
        assert_eq!(catalog.resolve(12).unwrap().id(), 12);
        assert!(matches!(
            catalog.resolve(7),
            Err(ValidationError::UnknownTherapy { therapy_id: 7 })
        ));
    }

    #[test]
    fn duplicate_ids_rejected() {
        let result = InMemoryTherapyCatalog::from_therapies([
            Therapy::new(1, "AL"),
            Therapy::new(1, "ASAQ"),
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn parse_from_json() {
        let catalog = InMemoryTherapyCatalog::from_json_str(
            r#"[
                {"id": 0, "name": "AL", "drug_ids": [0, 1], "dosing_days": 3},
                {"id": 1, "name": "DHA-PPQ", "drug_ids": [2, 3], "dosing_days": 3}
            ]"#,
        )
        .unwrap();
        assert_eq!(catalog.ids(), vec![0, 1]);
        assert_eq!(catalog.get(1).unwrap().name, "DHA-PPQ");
    }

    #[test]
    fn therapy_refs_compare_by_id() {
        let a = TherapyRef::new(Arc::new(Therapy::new(3, "A")));
        let b = TherapyRef::new(Arc::new(Therapy::new(3, "B")));
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "3");
    }
}
