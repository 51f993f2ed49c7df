//! Quorum arithmetic for control plane membership changes.
//!
//! An etcd cluster of n members needs floor(n/2)+1 of them alive to make
//! progress. Membership changes are assessed against the current size so a
//! single admission cannot push the cluster through a window where quorum
//! is unattainable.

use async_trait::async_trait;

/// Number of members required for an etcd cluster of `members` to commit.
pub fn quorum(members: i32) -> i32 {
    members / 2 + 1
}

/// Policy deciding whether a membership change is safe to admit.
///
/// Implementations answer `Ok(())` to admit and `Err(reason)` to deny.
/// The check may consult external state, so it is async and runs under
/// the webhook's validation deadline.
#[async_trait]
pub trait QuorumPolicy: Send + Sync {
    /// Assess a replica count change. `current` is `None` on CREATE.
    async fn validate_scale(
        &self,
        current: Option<i32>,
        desired: i32,
    ) -> std::result::Result<(), String>;
}

/// Stacked-etcd quorum rules: odd membership only, scale-down one step at
/// a time, never below the current cluster's quorum.
pub struct EtcdQuorumPolicy;

#[async_trait]
impl QuorumPolicy for EtcdQuorumPolicy {
    async fn validate_scale(
        &self,
        current: Option<i32>,
        desired: i32,
    ) -> std::result::Result<(), String> {
        if desired < 1 {
            return Err(format!(
                "replicas must be at least 1, got {desired}; scaling to zero would destroy the control plane"
            ));
        }
        if desired % 2 == 0 {
            return Err(format!(
                "replicas must be an odd number to preserve etcd quorum, got {desired}"
            ));
        }
        if let Some(current) = current
            && desired < current
        {
            if current - desired > 2 {
                return Err(format!(
                    "scaling from {current} to {desired} removes more than one member at a time; scale down in single steps"
                ));
            }
            let floor = quorum(current);
            if desired < floor {
                return Err(format!(
                    "scaling from {current} to {desired} replicas would drop below the quorum of {floor}"
                ));
            }
        }
        Ok(())
    }
}
