//! Status source and refresh trigger adapters.
//!
//! The convergence monitor only sees these two traits. The production
//! implementations reach the GitOps controller's Application custom resources
//! through the Kubernetes API as dynamic objects - this tool owns no wire
//! format of its own.

use async_trait::async_trait;
use kube::api::{Api, ApiResource, DynamicObject, GroupVersionKind, Patch, PatchParams};
use kube::{Client, ResourceExt};
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use crate::gitops::application::{Application, HealthStatus, RefreshMode, SyncStatus};
use crate::Error;

/// Annotation the GitOps controller watches for refresh requests.
///
/// Writing `soft`/`hard` here asks the controller to re-evaluate the
/// application immediately; the controller removes the annotation once the
/// refresh has been processed, so its presence means a refresh is pending.
pub const REFRESH_ANNOTATION: &str = "argocd.argoproj.io/refresh";

/// Read access to current per-application sync/health status
///
/// Implementations must return the full current set on each call; the monitor
/// re-fetches every tick and tolerates membership changes between fetches.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ApplicationStatusSource: Send + Sync {
    /// List all applications in the given namespace with current status
    async fn list_applications(&self, scope: &str) -> Result<Vec<Application>, Error>;
}

/// Write access for requesting a reconciliation refresh
///
/// Must be safe to call repeatedly for the same application; the monitor
/// guarantees at most one dispatch per stall episode but delivery is
/// at-least-once.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait RefreshTrigger: Send + Sync {
    /// Request a refresh of the named application
    async fn refresh(&self, scope: &str, name: &str, mode: RefreshMode) -> Result<(), Error>;
}

/// Build an Application snapshot from the controller's custom resource.
///
/// Status fields are free strings on the wire; anything missing or
/// unrecognized degrades to Unknown instead of failing the fetch. All
/// condition messages are aggregated so a stall reported on any condition of
/// THIS application is visible - other applications' conditions are never
/// consulted.
pub fn snapshot_from(obj: &DynamicObject) -> Application {
    let sync = obj
        .data
        .pointer("/status/sync/status")
        .and_then(|v| v.as_str())
        .map(SyncStatus::parse)
        .unwrap_or_default();

    let health = obj
        .data
        .pointer("/status/health/status")
        .and_then(|v| v.as_str())
        .map(HealthStatus::parse)
        .unwrap_or_default();

    let condition_message = obj
        .data
        .pointer("/status/conditions")
        .and_then(|v| v.as_array())
        .map(|conditions| {
            conditions
                .iter()
                .filter_map(|c| c.get("message").and_then(|m| m.as_str()))
                .collect::<Vec<_>>()
                .join("; ")
        })
        .unwrap_or_default();

    let refresh_annotation = obj.annotations().get(REFRESH_ANNOTATION).cloned();

    Application {
        name: obj.name_any(),
        sync,
        health,
        condition_message,
        refresh_annotation,
    }
}

/// Kubernetes-backed status source and refresh trigger
///
/// Speaks to the GitOps controller's `Application` resources
/// (`argoproj.io/v1alpha1`) via dynamic objects.
#[derive(Clone)]
pub struct GitopsApplications {
    client: Client,
    resource: ApiResource,
}

impl GitopsApplications {
    /// Create an adapter over the given Kubernetes client
    pub fn new(client: Client) -> Self {
        let gvk = GroupVersionKind {
            group: "argoproj.io".to_string(),
            version: "v1alpha1".to_string(),
            kind: "Application".to_string(),
        };
        Self {
            client,
            resource: ApiResource::from_gvk(&gvk),
        }
    }

    fn api(&self, scope: &str) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), scope, &self.resource)
    }
}

#[async_trait]
impl ApplicationStatusSource for GitopsApplications {
    async fn list_applications(&self, scope: &str) -> Result<Vec<Application>, Error> {
        let list = self.api(scope).list(&Default::default()).await?;
        Ok(list.items.iter().map(snapshot_from).collect())
    }
}

#[async_trait]
impl RefreshTrigger for GitopsApplications {
    async fn refresh(&self, scope: &str, name: &str, mode: RefreshMode) -> Result<(), Error> {
        debug!(application = %name, mode = %mode, "Requesting refresh");

        let patch = serde_json::json!({
            "metadata": {
                "annotations": {
                    REFRESH_ANNOTATION: mode.annotation_value(),
                }
            }
        });

        self.api(scope)
            .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::api::ObjectMeta;

    fn dynamic_app(name: &str, data: serde_json::Value) -> DynamicObject {
        DynamicObject {
            types: None,
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            data,
        }
    }

    #[test]
    fn snapshot_reads_sync_health_and_conditions() {
        let obj = dynamic_app(
            "build-service",
            serde_json::json!({
                "status": {
                    "sync": { "status": "OutOfSync" },
                    "health": { "status": "Progressing" },
                    "conditions": [
                        { "type": "ComparisonError", "message": "context deadline exceeded" },
                        { "type": "SyncError", "message": "manifest generation failed" }
                    ]
                }
            }),
        );

        let app = snapshot_from(&obj);
        assert_eq!(app.name, "build-service");
        assert_eq!(app.sync, SyncStatus::OutOfSync);
        assert_eq!(app.health, HealthStatus::Progressing);
        assert!(app.condition_message.contains("context deadline exceeded"));
        assert!(app.condition_message.contains("manifest generation failed"));
        assert_eq!(app.refresh_annotation, None);
    }

    #[test]
    fn snapshot_tolerates_missing_status() {
        let obj = dynamic_app("fresh-app", serde_json::json!({}));

        let app = snapshot_from(&obj);
        assert_eq!(app.sync, SyncStatus::Unknown);
        assert_eq!(app.health, HealthStatus::Unknown);
        assert!(app.condition_message.is_empty());
    }

    #[test]
    fn snapshot_carries_pending_refresh_annotation() {
        let mut obj = dynamic_app(
            "stuck-app",
            serde_json::json!({
                "status": {
                    "sync": { "status": "Synced" },
                    "health": { "status": "Healthy" }
                }
            }),
        );
        obj.metadata.annotations = Some(std::collections::BTreeMap::from([(
            REFRESH_ANNOTATION.to_string(),
            "soft".to_string(),
        )]));

        let app = snapshot_from(&obj);
        assert_eq!(app.refresh_annotation.as_deref(), Some("soft"));
    }
}
