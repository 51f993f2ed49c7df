//! Immutability validation policy.
//!
//! Tier 2 (Update): Only enforced on UPDATE operations
//!
//! Validates:
//! - spec.clusterName cannot be changed after creation; the control plane
//!   is bound to its workload cluster's kubeconfig Secret

use super::{ValidationContext, ValidationResult};

/// Validate immutability constraints on UPDATE operations
pub fn validate(ctx: &ValidationContext<'_>) -> ValidationResult {
    let old = match ctx.old_resource {
        Some(r) => r,
        None => return ValidationResult::allowed(), // Not an UPDATE
    };

    let new = ctx.resource;

    if old.spec.cluster_name != new.spec.cluster_name {
        return ValidationResult::denied(
            "ImmutableField",
            &format!(
                "spec.clusterName is immutable (was '{}', got '{}'). Delete and recreate the ControlPlane to rebind it.",
                old.spec.cluster_name, new.spec.cluster_name
            ),
        );
    }

    ValidationResult::allowed()
}
