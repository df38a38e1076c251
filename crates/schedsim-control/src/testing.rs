//! Stub API server plumbing for tests of the kube-backed controls.

use serde_json::{json, Value};
use wiremock::{MockServer, ResponseTemplate};

/// Client that talks plain HTTP to `server`.
pub(crate) fn client_for(server: &MockServer) -> kube::Client {
    let config = kube::Config::new(server.uri().parse().unwrap());
    kube::Client::try_from(config).unwrap()
}

/// Failure `Status` body the way the API server sends it.
pub(crate) fn status(code: u16, reason: &str) -> ResponseTemplate {
    ResponseTemplate::new(code).set_body_json(json!({
        "kind": "Status",
        "apiVersion": "v1",
        "metadata": {},
        "status": "Failure",
        "message": format!("request failed: {reason}"),
        "reason": reason,
        "code": code,
    }))
}

/// Successful list response of `kind` holding `items`.
pub(crate) fn list(kind: &str, items: Vec<Value>) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "apiVersion": "v1",
        "kind": kind,
        "metadata": { "resourceVersion": "1" },
        "items": items,
    }))
}

pub(crate) fn node_json(name: &str, resource_version: &str) -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "Node",
        "metadata": { "name": name, "resourceVersion": resource_version },
    })
}

pub(crate) fn pod_json(namespace: &str, name: &str) -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "Pod",
        "metadata": { "name": name, "namespace": namespace, "resourceVersion": "1" },
    })
}
