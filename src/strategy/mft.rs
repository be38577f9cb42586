use crate::distribution::Distribution;
use crate::error::ValidationError;
use crate::random::RandomSource;
use crate::therapy::TherapyRef;

/// Multiple first-line therapies deployed side by side with fixed weights.
#[derive(Debug, Clone, PartialEq)]
pub struct MftPolicy {
    therapies: Vec<TherapyRef>,
    distribution: Distribution,
}

impl MftPolicy {
    /// Creates the policy.
    ///
    /// # Errors
    /// Returns an error when the distribution length does not match the
    /// number of therapies.
    pub fn new(
        therapies: Vec<TherapyRef>,
        distribution: Distribution,
    ) -> Result<Self, ValidationError> {
        if therapies.len() != distribution.len() {
            return Err(ValidationError::LengthMismatch {
                field: "distribution".to_string(),
                expected: therapies.len(),
                actual: distribution.len(),
            });
        }
        Ok(Self {
            therapies,
            distribution,
        })
    }

    /// Draw a therapy according to the distribution.
    pub fn select(&self, rng: &mut dyn RandomSource) -> &TherapyRef {
        &self.therapies[self.distribution.draw(rng)]
    }

    /// Therapies, index-aligned with [`Self::distribution`].
    #[must_use]
    pub fn therapies(&self) -> &[TherapyRef] {
        &self.therapies
    }

    /// Selection weights.
    #[must_use]
    pub fn distribution(&self) -> &Distribution {
        &self.distribution
    }
}
