//! Quorum-safe scaling policy.
//!
//! Tier 1 (Critical): Always enforced
//!
//! Delegates the arithmetic to the configured `QuorumPolicy`: the desired
//! replica count must be a positive odd number, and a scale-down may not
//! drop below the current cluster's quorum in a single admission.

use super::{ValidationContext, ValidationResult};
use crate::webhooks::quorum::QuorumPolicy;

/// Validate the desired replica count against the quorum policy
pub async fn validate(ctx: &ValidationContext<'_>, quorum: &dyn QuorumPolicy) -> ValidationResult {
    let current = ctx.old_resource.map(|old| old.spec.replicas);
    let desired = ctx.resource.spec.replicas;

    match quorum.validate_scale(current, desired).await {
        Ok(()) => ValidationResult::allowed(),
        Err(reason) => ValidationResult::denied("QuorumViolation", &reason),
    }
}
