//! Registry-credential secret seeding.
//!
//! Test suites running after installation pull images from an authenticated
//! registry. The credentials arrive as a base64-encoded dockerconfigjson in an
//! env var and are materialized once, into a well-known namespace, from where
//! suites copy them into their per-test namespaces.

use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use k8s_openapi::api::core::v1::{Namespace, Secret};
use k8s_openapi::ByteString;
use kube::api::{Api, ObjectMeta, Patch, PatchParams};
use kube::Client;
use tracing::info;

use crate::Error;

/// Field manager for server-side applies issued by this tool
const FIELD_MANAGER: &str = "gantry";

/// Decode the registry token from its env-var representation.
///
/// The token is a base64-encoded docker/config.json; anything that does not
/// decode is a configuration error caught before touching the cluster.
pub fn decode_registry_token(token_b64: &str) -> Result<Vec<u8>, Error> {
    STANDARD.decode(token_b64.trim()).map_err(|e| {
        Error::config(format!(
            "registry token is not valid base64 (expected encoded dockerconfigjson): {e}"
        ))
    })
}

/// Ensure the registry pull secret exists with the given credentials.
///
/// Creates the namespace and the `kubernetes.io/dockerconfigjson` secret via
/// server-side apply, so re-runs against a cluster that already has them are
/// clean updates rather than conflicts.
pub async fn ensure_registry_secret(
    client: &Client,
    namespace: &str,
    name: &str,
    token_b64: &str,
) -> Result<(), Error> {
    let dockerconfig = decode_registry_token(token_b64)?;
    let params = PatchParams::apply(FIELD_MANAGER).force();

    let namespaces: Api<Namespace> = Api::all(client.clone());
    let ns = serde_json::json!({
        "apiVersion": "v1",
        "kind": "Namespace",
        "metadata": { "name": namespace }
    });
    namespaces.patch(namespace, &params, &Patch::Apply(&ns)).await?;

    let secret = Secret {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        type_: Some("kubernetes.io/dockerconfigjson".to_string()),
        data: Some(BTreeMap::from([(
            ".dockerconfigjson".to_string(),
            ByteString(dockerconfig),
        )])),
        ..Default::default()
    };

    let secrets: Api<Secret> = Api::namespaced(client.clone(), namespace);
    secrets.patch(name, &params, &Patch::Apply(&secret)).await?;

    info!(namespace = %namespace, secret = %name, "Registry pull secret seeded");
    Ok(())
}
