use crate::therapy::TherapyRef;

/// Single first-line therapy: everyone gets the same regimen.
#[derive(Debug, Clone, PartialEq)]
pub struct SftPolicy {
    therapy: TherapyRef,
}

impl SftPolicy {
    /// Creates the policy.
    #[must_use]
    pub fn new(therapy: TherapyRef) -> Self {
        Self { therapy }
    }

    /// The configured therapy.
    #[must_use]
    pub fn therapy(&self) -> &TherapyRef {
        &self.therapy
    }
}
