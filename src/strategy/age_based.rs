use crate::error::ValidationError;
use crate::therapy::TherapyRef;

/// Deterministic therapy choice by age bracket.
///
/// With boundaries `[b0, b1, ...]` therapy 0 covers ages below `b0`,
/// therapy 1 covers `[b0, b1)`, and the last therapy covers everything from
/// the last boundary up.
#[derive(Debug, Clone, PartialEq)]
pub struct AgeBasedMftPolicy {
    therapies: Vec<TherapyRef>,
    age_boundaries: Vec<f64>,
}

impl AgeBasedMftPolicy {
    /// Creates the policy.
    ///
    /// # Errors
    /// - `therapies` is empty
    /// - boundary count is not `therapies.len() - 1`
    /// - boundaries are not finite and strictly ascending
    pub fn new(
        therapies: Vec<TherapyRef>,
        age_boundaries: Vec<f64>,
    ) -> Result<Self, ValidationError> {
        if therapies.is_empty() {
            return Err(ValidationError::missing("therapy_ids"));
        }
        if age_boundaries.len() != therapies.len() - 1 {
            return Err(ValidationError::InvalidAgeBoundaries {
                reason: format!(
                    "expected {} boundaries for {} therapies, got {}",
                    therapies.len() - 1,
                    therapies.len(),
                    age_boundaries.len()
                ),
            });
        }
        if let Some(b) = age_boundaries.iter().find(|b| !b.is_finite()) {
            return Err(ValidationError::InvalidAgeBoundaries {
                reason: format!("boundary {b} is not a finite number"),
            });
        }
        if let Some(pair) = age_boundaries.windows(2).find(|pair| pair[0] >= pair[1]) {
            return Err(ValidationError::InvalidAgeBoundaries {
                reason: format!(
                    "boundaries must be strictly ascending, found {} followed by {}",
                    pair[0], pair[1]
                ),
            });
        }
        Ok(Self {
            therapies,
            age_boundaries,
        })
    }

    /// Index of the bracket containing `age`.
    #[must_use]
    pub fn bracket_of(&self, age: f64) -> usize {
        self.age_boundaries.partition_point(|b| *b <= age)
    }

    /// Therapy for a person of the given age.
    #[must_use]
    pub fn select(&self, age: f64) -> &TherapyRef {
        &self.therapies[self.bracket_of(age)]
    }

    /// Therapies, youngest bracket first.
    #[must_use]
    pub fn therapies(&self) -> &[TherapyRef] {
        &self.therapies
    }

    /// Bracket boundaries in years.
    #[must_use]
    pub fn age_boundaries(&self) -> &[f64] {
        &self.age_boundaries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::therapy::{InMemoryTherapyCatalog, TherapyCatalog};

    fn therapies(ids: &[u32]) -> Vec<TherapyRef> {
        let catalog = InMemoryTherapyCatalog::with_ids(ids.iter().copied());
        ids.iter().map(|id| catalog.resolve(*id).unwrap()).collect()
    }

    #[test]
    fn brackets_are_half_open() {
        let p = AgeBasedMftPolicy::new(therapies(&[10, 11, 12]), vec![5.0, 15.0]).unwrap();
        assert_eq!(p.select(0.0).id(), 10);
        assert_eq!(p.select(4.99).id(), 10);
        assert_eq!(p.select(5.0).id(), 11);
        assert_eq!(p.select(14.9).id(), 11);
        assert_eq!(p.select(15.0).id(), 12);
        assert_eq!(p.select(80.0).id(), 12);
    }

    #[test]
    fn single_therapy_needs_no_boundaries() {
        let p = AgeBasedMftPolicy::new(therapies(&[3]), vec![]).unwrap();
        assert_eq!(p.select(42.0).id(), 3);
    }

    #[test]
    fn wrong_boundary_count_rejected() {
        let err = AgeBasedMftPolicy::new(therapies(&[1, 2, 3]), vec![5.0]).unwrap_err();
        assert!(matches!(err, ValidationError::InvalidAgeBoundaries { .. }));
    }

    #[test]
    fn unsorted_boundaries_rejected() {
        let err = AgeBasedMftPolicy::new(therapies(&[1, 2, 3]), vec![10.0, 5.0]).unwrap_err();
        assert!(matches!(err, ValidationError::InvalidAgeBoundaries { .. }));
        assert!(AgeBasedMftPolicy::new(therapies(&[1, 2, 3]), vec![5.0, 5.0]).is_err());
    }
}
