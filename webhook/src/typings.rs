//! Wire types of the `admission.k8s.io/v1` AdmissionReview envelope.
//!
//! Only the fields the webhook reads or writes are modelled. Unknown fields
//! in incoming requests are ignored.

use base64::Engine as _;
use std::fmt;

pub const ADMISSION_API_VERSION: &str = "admission.k8s.io/v1";
pub const ADMISSION_REVIEW_KIND: &str = "AdmissionReview";

/// Immutable registry of envelope types this webhook accepts.
///
/// Built once at startup and shared by reference with every request handler.
#[derive(Debug, Clone)]
pub struct Scheme {
    known: Vec<(&'static str, &'static str)>,
}

impl Scheme {
    pub fn new() -> Self {
        Scheme {
            known: vec![(ADMISSION_API_VERSION, ADMISSION_REVIEW_KIND)],
        }
    }

    pub fn recognizes(&self, api_version: &str, kind: &str) -> bool {
        self.known
            .iter()
            .any(|(v, k)| *v == api_version && *k == kind)
    }

    /// Decodes a request body into an AdmissionReview envelope.
    pub fn decode(&self, body: &[u8]) -> anyhow::Result<AdmissionReviewRequest> {
        let review: AdmissionReviewRequest = serde_json::from_slice(body)
            .map_err(|e| anyhow::anyhow!("request could not be decoded: {}", e))?;
        if !self.recognizes(&review.api_version, &review.kind) {
            anyhow::bail!(
                "unexpected envelope {}/{}, expected {}/{}",
                review.api_version,
                review.kind,
                ADMISSION_API_VERSION,
                ADMISSION_REVIEW_KIND
            );
        }
        Ok(review)
    }
}

impl Default for Scheme {
    fn default() -> Self {
        Scheme::new()
    }
}

#[derive(serde::Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionReviewRequest {
    pub api_version: String,
    pub kind: String,
    pub request: Request,
}

impl AdmissionReviewRequest {
    /// Wraps a response into an envelope of the same apiVersion/kind as the
    /// request, carrying over the request uid.
    pub fn respond(&self, decision: Decision) -> AdmissionReviewResponse {
        let (patch, status) = match decision {
            Decision::Allow { patch: None } => (None, None),
            Decision::Allow { patch: Some(bytes) } => (
                Some(Patch {
                    patch_type: "JSONPatch".to_string(),
                    patch: base64::engine::general_purpose::STANDARD.encode(bytes),
                }),
                None,
            ),
            Decision::Deny { code, message } => (None, Some(Status { code, message })),
        };
        let allowed = status.is_none();
        AdmissionReviewResponse {
            api_version: self.api_version.clone(),
            kind: self.kind.clone(),
            response: Response {
                uid: self.request.uid.clone(),
                allowed,
                status,
                patch,
            },
        }
    }
}

/// Outcome of a review before it is put into an envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// `patch` holds the serialized JSON Patch document, if any.
    Allow { patch: Option<Vec<u8>> },
    Deny { code: u16, message: String },
}

#[derive(serde::Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    pub uid: String,
    pub resource: GroupVersionResource,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub namespace: Option<String>,
    pub operation: Operation,
    #[serde(default)]
    pub object: Option<serde_json::Value>,
}

#[derive(serde::Deserialize, serde::Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum Operation {
    Create,
    Update,
    Delete,
    Connect,
}

#[derive(serde::Deserialize, serde::Serialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupVersionResource {
    #[serde(default)]
    pub group: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub resource: String,
}

impl GroupVersionResource {
    pub fn new(group: &str, version: &str, resource: &str) -> Self {
        GroupVersionResource {
            group: group.to_string(),
            version: version.to_string(),
            resource: resource.to_string(),
        }
    }

    pub fn pods() -> Self {
        GroupVersionResource::new("", "v1", "pods")
    }

    pub fn deployments() -> Self {
        GroupVersionResource::new("apps", "v1", "deployments")
    }
}

impl fmt::Display for GroupVersionResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let group = if self.group.is_empty() {
            "core"
        } else {
            self.group.as_str()
        };
        write!(f, "{{{} {} {}}}", self.resource, self.version, group)
    }
}

#[derive(serde::Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionReviewResponse {
    pub api_version: String,
    pub kind: String,
    pub response: Response,
}

#[derive(serde::Serialize, Debug, Clone)]
pub struct Response {
    pub uid: String,
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<Status>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(flatten)]
    pub patch: Option<Patch>,
}

#[derive(serde::Serialize, Debug, Clone)]
pub struct Status {
    pub code: u16,
    pub message: String,
}

#[derive(serde::Serialize, Debug, Clone)]
pub struct Patch {
    #[serde(rename = "patchType")]
    pub patch_type: String,
    pub patch: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn review_body(api_version: &str) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "apiVersion": api_version,
            "kind": "AdmissionReview",
            "request": {
                "uid": "705ab4f5-6393-11e8-b7cc-42010a800002",
                "kind": {"group": "", "version": "v1", "kind": "Pod"},
                "resource": {"group": "", "version": "v1", "resource": "pods"},
                "name": "web-0",
                "namespace": "shop",
                "operation": "CREATE",
                "object": {"metadata": {"name": "web-0"}},
                "userInfo": {"username": "admin"}
            }
        }))
        .unwrap()
    }

    #[test]
    fn scheme_accepts_v1_review() {
        let review = Scheme::new().decode(&review_body("admission.k8s.io/v1")).unwrap();
        assert_eq!(review.request.uid, "705ab4f5-6393-11e8-b7cc-42010a800002");
        assert_eq!(review.request.operation, Operation::Create);
        assert_eq!(review.request.resource, GroupVersionResource::pods());
        assert_eq!(review.request.namespace.as_deref(), Some("shop"));
        assert_eq!(review.request.name.as_deref(), Some("web-0"));
    }

    #[test]
    fn scheme_rejects_unregistered_version() {
        let err = Scheme::new()
            .decode(&review_body("admission.k8s.io/v1beta1"))
            .unwrap_err();
        assert!(err.to_string().contains("unexpected envelope"));
    }

    #[test]
    fn scheme_rejects_garbage() {
        let err = Scheme::new().decode(b"{not json").unwrap_err();
        assert!(err.to_string().starts_with("request could not be decoded"));
    }

    #[test]
    fn allow_with_patch_is_base64_json_patch() {
        let review = Scheme::new().decode(&review_body("admission.k8s.io/v1")).unwrap();
        let resp = review.respond(Decision::Allow {
            patch: Some(b"[]".to_vec()),
        });
        let v = serde_json::to_value(&resp).unwrap();
        assert_eq!(v["apiVersion"], "admission.k8s.io/v1");
        assert_eq!(v["kind"], "AdmissionReview");
        assert_eq!(v["response"]["uid"], "705ab4f5-6393-11e8-b7cc-42010a800002");
        assert_eq!(v["response"]["allowed"], true);
        assert_eq!(v["response"]["patchType"], "JSONPatch");
        assert_eq!(v["response"]["patch"], "W10=");
        assert!(v["response"].get("status").is_none());
    }

    #[test]
    fn deny_carries_message_and_no_patch() {
        let review = Scheme::new().decode(&review_body("admission.k8s.io/v1")).unwrap();
        let resp = review.respond(Decision::Deny {
            code: 400,
            message: "nope".to_string(),
        });
        let v = serde_json::to_value(&resp).unwrap();
        assert_eq!(v["response"]["allowed"], false);
        assert_eq!(v["response"]["status"]["message"], "nope");
        assert_eq!(v["response"]["status"]["code"], 400);
        assert!(v["response"].get("patch").is_none());
        assert!(v["response"].get("patchType").is_none());
    }

    #[test]
    fn resource_display_names_resource_first() {
        assert_eq!(GroupVersionResource::pods().to_string(), "{pods v1 core}");
        assert_eq!(
            GroupVersionResource::deployments().to_string(),
            "{deployments v1 apps}"
        );
    }
}
