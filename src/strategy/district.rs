//! District-level MFT.
//!
//! Each district gets its own MFT sub-policy. Definitions are shared: one
//! definition may cover many districts, but every district in the known
//! range must be covered exactly once.

use std::collections::BTreeMap;

use crate::config::DistrictBoundary;
use crate::context::DistrictId;
use crate::distribution::Distribution;
use crate::error::{ExecutionError, ValidationError};
use crate::random::RandomSource;
use crate::therapy::TherapyRef;

/// Therapy list and weights used inside one or more districts.
#[derive(Debug, Clone, PartialEq)]
pub struct DistrictMft {
    therapies: Vec<TherapyRef>,
    distribution: Distribution,
}

impl DistrictMft {
    /// Creates a sub-policy.
    ///
    /// # Errors
    /// - therapy and weight counts differ
    /// - a weight is not in `(0, 1]` or the weights do not sum to 1
    pub fn new(therapies: Vec<TherapyRef>, weights: Vec<f64>) -> Result<Self, ValidationError> {
        if therapies.len() != weights.len() {
            return Err(ValidationError::LengthMismatch {
                field: "distribution".to_string(),
                expected: therapies.len(),
                actual: weights.len(),
            });
        }
        let distribution = Distribution::strictly_positive("distribution", weights)?;
        Ok(Self {
            therapies,
            distribution,
        })
    }

    /// Draw a therapy according to the weights.
    pub fn select(&self, rng: &mut dyn RandomSource) -> &TherapyRef {
        &self.therapies[self.distribution.draw(rng)]
    }

    /// Therapies, index-aligned with the weights.
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

/// Selects through the sub-policy of the person's district.
#[derive(Debug, Clone, PartialEq)]
pub struct DistrictMftPolicy {
    boundary: DistrictBoundary,
    definitions: Vec<DistrictMft>,
    assignments: BTreeMap<DistrictId, usize>,
}

impl DistrictMftPolicy {
    /// Starts a builder validating against `boundary`.
    #[must_use]
    pub fn builder(boundary: DistrictBoundary) -> DistrictMftBuilder {
        DistrictMftBuilder {
            boundary,
            definitions: Vec::new(),
        }
    }

    /// Sub-policy assigned to `district`.
    #[must_use]
    pub fn mft_for(&self, district: DistrictId) -> Option<&DistrictMft> {
        self.assignments
            .get(&district)
            .map(|index| &self.definitions[*index])
    }

    /// Draw a therapy for a person living in `district`.
    ///
    /// # Errors
    /// - the person has no district
    /// - the district has no sub-policy
    pub fn select(
        &self,
        district: Option<DistrictId>,
        rng: &mut dyn RandomSource,
    ) -> Result<&TherapyRef, ExecutionError> {
        let district = district.ok_or(ExecutionError::DistrictUnknown)?;
        let mft = self
            .mft_for(district)
            .ok_or(ExecutionError::DistrictNotAssigned { district })?;
        Ok(mft.select(rng))
    }

    /// All sub-policies in definition order.
    #[must_use]
    pub fn definitions(&self) -> &[DistrictMft] {
        &self.definitions
    }

    /// Number of districts with a sub-policy.
    #[must_use]
    pub fn assigned_districts(&self) -> usize {
        self.assignments.len()
    }

    /// District range this policy was validated against.
    #[must_use]
    pub const fn boundary(&self) -> DistrictBoundary {
        self.boundary
    }
}

/// Collects district definitions and validates coverage on [`Self::build`].
#[derive(Debug, Clone)]
pub struct DistrictMftBuilder {
    boundary: DistrictBoundary,
    definitions: Vec<(DistrictMft, Vec<DistrictId>)>,
}

impl DistrictMftBuilder {
    /// Assign `mft` to each of `district_ids`.
    #[must_use]
    pub fn definition(mut self, mft: DistrictMft, district_ids: Vec<DistrictId>) -> Self {
        self.definitions.push((mft, district_ids));
        self
    }

    /// Validate assignments and build the policy.
    ///
    /// # Errors
    /// - a district outside `[min_unit_id, max_unit_id]`
    /// - a district assigned twice
    /// - fewer assigned districts than `unit_count`
    pub fn build(self) -> Result<DistrictMftPolicy, ValidationError> {
        let DistrictBoundary {
            min_unit_id,
            max_unit_id,
            unit_count,
        } = self.boundary;

        let mut definitions = Vec::with_capacity(self.definitions.len());
        let mut assignments = BTreeMap::new();
        for (index, (mft, district_ids)) in self.definitions.into_iter().enumerate() {
            for district in district_ids {
                if district < min_unit_id || district > max_unit_id {
                    return Err(ValidationError::DistrictOutOfRange {
                        district,
                        min: min_unit_id,
                        max: max_unit_id,
                    });
                }
                if assignments.insert(district, index).is_some() {
                    return Err(ValidationError::DuplicateDistrict { district });
                }
            }
            definitions.push(mft);
        }

        if assignments.len() < unit_count {
            return Err(ValidationError::DistrictsUnassigned {
                assigned: assignments.len(),
                expected: unit_count,
            });
        }

        Ok(DistrictMftPolicy {
            boundary: self.boundary,
            definitions,
            assignments,
        })
    }
}
