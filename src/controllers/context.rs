//! Shared context for the controllers.
//!
//! The Context struct holds shared state that is passed to the reconcilers,
//! including the Kubernetes client, the remote cluster tracker, and the
//! event recorder.

use std::sync::Arc;
use std::time::Duration;

use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::{Client, Resource};

use crate::crd::ControlPlane;
use crate::remote::{ClusterTracker, Connector};

/// Field manager name for the operator
pub const FIELD_MANAGER: &str = "controlplane-operator";

/// Shared context for the controllers
pub struct Context<C: Connector> {
    /// Kubernetes client for the management cluster
    pub client: Client,
    /// Connection cache for remote workload clusters
    pub tracker: Arc<ClusterTracker<C>>,
    /// Interval after which objects are re-reconciled without a watch event
    pub sync_period: Duration,
    /// Event reporter identity
    reporter: Reporter,
}

impl<C: Connector> Clone for Context<C> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            tracker: self.tracker.clone(),
            sync_period: self.sync_period,
            reporter: self.reporter.clone(),
        }
    }
}

impl<C: Connector> Context<C> {
    /// Create a new context
    pub fn new(client: Client, tracker: Arc<ClusterTracker<C>>, sync_period: Duration) -> Self {
        Self {
            client,
            tracker,
            sync_period,
            reporter: Reporter {
                controller: FIELD_MANAGER.into(),
                instance: std::env::var("POD_NAME").ok(),
            },
        }
    }

    fn recorder(&self) -> Recorder {
        Recorder::new(self.client.clone(), self.reporter.clone())
    }

    /// Publish a warning event for a ControlPlane
    pub async fn publish_warning_event(
        &self,
        resource: &ControlPlane,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        let recorder = self.recorder();
        let object_ref = resource.object_ref(&());
        if let Err(e) = recorder
            .publish(
                &Event {
                    type_: EventType::Warning,
                    reason: reason.into(),
                    note,
                    action: action.into(),
                    secondary: None,
                },
                &object_ref,
            )
            .await
        {
            tracing::warn!(reason = %reason, error = %e, "Failed to publish event");
        }
    }
}
