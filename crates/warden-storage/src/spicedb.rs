//! SpiceDB relation adapter over the HTTP/JSON API.
//!
//! Unary calls map to one POST each. Streaming calls (`read`, `lookup*`)
//! return newline-delimited frames of the form `{"result": {...}}` or
//! `{"error": {...}}`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};
use warden_domain::model::normalize;
use warden_domain::schema::AuthorizationSchema;
use warden_domain::{
    DomainError, DomainResult, ObjectRef, RelationAdapter, RelationFilter, RelationTuple,
    SubjectRef,
};

const OPERATION_TOUCH: &str = "OPERATION_TOUCH";
const HAS_PERMISSION: &str = "PERMISSIONSHIP_HAS_PERMISSION";

/// Connection settings for a SpiceDB endpoint.
#[derive(Debug, Clone)]
pub struct SpiceDbConfig {
    /// Base URL of the HTTP gateway, e.g. `http://localhost:8443`.
    pub endpoint: String,
    pub preshared_key: String,
    pub timeout: Duration,
    /// Evaluate checks at the newest revision instead of minimizing latency.
    pub fully_consistent: bool,
}

impl Default for SpiceDbConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8443".to_string(),
            preshared_key: String::new(),
            timeout: Duration::from_secs(5),
            fully_consistent: false,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ObjectReference {
    object_type: String,
    object_id: String,
}

impl From<&ObjectRef> for ObjectReference {
    fn from(object: &ObjectRef) -> Self {
        Self {
            object_type: normalize(&object.namespace),
            object_id: object.id.clone(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubjectReference {
    object: ObjectReference,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    optional_relation: String,
}

impl From<&SubjectRef> for SubjectReference {
    fn from(subject: &SubjectRef) -> Self {
        Self {
            object: ObjectReference::from(&subject.object()),
            optional_relation: subject
                .relation
                .as_deref()
                .map(normalize)
                .unwrap_or_default(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Relationship {
    resource: ObjectReference,
    relation: String,
    subject: SubjectReference,
}

impl From<&RelationTuple> for Relationship {
    fn from(tuple: &RelationTuple) -> Self {
        Self {
            resource: ObjectReference::from(&tuple.object),
            relation: normalize(&tuple.relation),
            subject: SubjectReference::from(&tuple.subject),
        }
    }
}

impl From<Relationship> for RelationTuple {
    fn from(rel: Relationship) -> Self {
        let mut subject = SubjectRef::new(rel.subject.object.object_type, rel.subject.object.object_id);
        if !rel.subject.optional_relation.is_empty() {
            subject.relation = Some(rel.subject.optional_relation);
        }
        RelationTuple::new(
            ObjectRef::new(rel.resource.object_type, rel.resource.object_id),
            rel.relation,
            subject,
        )
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RelationshipUpdate {
    operation: &'static str,
    relationship: Relationship,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SubjectFilterJson {
    subject_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    optional_subject_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    optional_relation: Option<RelationFilterJson>,
}

#[derive(Debug, Serialize)]
struct RelationFilterJson {
    relation: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RelationshipFilter {
    resource_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    optional_resource_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    optional_relation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    optional_subject_filter: Option<SubjectFilterJson>,
}

impl From<&RelationFilter> for RelationshipFilter {
    fn from(filter: &RelationFilter) -> Self {
        let filter = filter.normalized();
        Self {
            resource_type: filter.namespace,
            optional_resource_id: filter.object_id,
            optional_relation: filter.relation,
            optional_subject_filter: filter.subject.map(|s| SubjectFilterJson {
                subject_type: s.namespace,
                optional_subject_id: s.id,
                optional_relation: s.relation.map(|relation| RelationFilterJson { relation }),
            }),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Consistency {
    #[serde(skip_serializing_if = "Option::is_none")]
    fully_consistent: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    minimize_latency: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct CheckPermissionResponse {
    #[serde(default)]
    permissionship: String,
}

#[derive(Debug, Deserialize)]
struct StreamFrame<T> {
    result: Option<T>,
    error: Option<GatewayError>,
}

#[derive(Debug, Default, Deserialize)]
struct GatewayError {
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct ReadRelationshipsResponse {
    relationship: Relationship,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LookupResourcesResponse {
    resource_object_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResolvedSubject {
    subject_object_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LookupSubjectsResponse {
    #[serde(default)]
    subject: Option<ResolvedSubject>,
    #[serde(default)]
    subject_object_id: Option<String>,
}

/// Relation adapter talking to SpiceDB.
pub struct SpiceDbClient {
    client: reqwest::Client,
    config: SpiceDbConfig,
}

impl SpiceDbClient {
    pub fn new(config: SpiceDbConfig) -> DomainResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| DomainError::internal(format!("failed to build http client: {e}")))?;
        Ok(Self { client, config })
    }

    fn consistency(&self) -> Consistency {
        if self.config.fully_consistent {
            Consistency {
                fully_consistent: Some(true),
                minimize_latency: None,
            }
        } else {
            Consistency {
                fully_consistent: None,
                minimize_latency: Some(true),
            }
        }
    }

    async fn post(&self, path: &str, body: serde_json::Value) -> DomainResult<String> {
        let url = format!("{}{}", self.config.endpoint.trim_end_matches('/'), path);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.preshared_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| DomainError::unavailable(format!("spicedb request failed: {e}")))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| DomainError::unavailable(format!("spicedb response failed: {e}")))?;
        if status.is_success() {
            Ok(text)
        } else {
            Err(classify(status, &text))
        }
    }

    async fn post_unary<T: DeserializeOwned>(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> DomainResult<T> {
        let text = self.post(path, body).await?;
        serde_json::from_str(&text)
            .map_err(|e| DomainError::internal(format!("invalid spicedb response: {e}")))
    }

    async fn post_stream<T: DeserializeOwned>(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> DomainResult<Vec<T>> {
        let text = self.post(path, body).await?;
        parse_stream(&text)
    }
}

fn classify(status: StatusCode, body: &str) -> DomainError {
    let message = serde_json::from_str::<GatewayError>(body)
        .map(|e| e.message)
        .unwrap_or_else(|_| body.to_string());
    match status {
        StatusCode::NOT_FOUND => DomainError::not_found("spicedb object", message),
        StatusCode::BAD_REQUEST | StatusCode::CONFLICT | StatusCode::PRECONDITION_FAILED => {
            DomainError::invalid_argument(message)
        }
        _ => DomainError::unavailable(format!("spicedb returned {status}: {message}")),
    }
}

fn parse_stream<T: DeserializeOwned>(text: &str) -> DomainResult<Vec<T>> {
    let mut results = Vec::new();
    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let frame: StreamFrame<T> = serde_json::from_str(line)
            .map_err(|e| DomainError::internal(format!("invalid spicedb stream frame: {e}")))?;
        if let Some(error) = frame.error {
            return Err(DomainError::unavailable(format!(
                "spicedb stream error: {}",
                error.message
            )));
        }
        if let Some(result) = frame.result {
            results.push(result);
        }
    }
    Ok(results)
}

fn to_json<T: Serialize>(value: &T) -> DomainResult<serde_json::Value> {
    serde_json::to_value(value).map_err(|e| DomainError::internal(e.to_string()))
}

#[async_trait]
impl RelationAdapter for SpiceDbClient {
    #[instrument(skip(self, schema))]
    async fn write_schema(&self, schema: &AuthorizationSchema) -> DomainResult<()> {
        let text = schema.to_string();
        self.post("/v1/schema/write", serde_json::json!({ "schema": text }))
            .await?;
        debug!(definitions = schema.len(), "published schema to spicedb");
        Ok(())
    }

    #[instrument(skip(self, tuple), fields(tuple = %tuple))]
    async fn write(&self, tuple: &RelationTuple) -> DomainResult<()> {
        let update = RelationshipUpdate {
            operation: OPERATION_TOUCH,
            relationship: Relationship::from(tuple),
        };
        self.post(
            "/v1/relationships/write",
            serde_json::json!({ "updates": [to_json(&update)?] }),
        )
        .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete(&self, filter: &RelationFilter) -> DomainResult<()> {
        let filter = to_json(&RelationshipFilter::from(filter))?;
        self.post(
            "/v1/relationships/delete",
            serde_json::json!({ "relationshipFilter": filter }),
        )
        .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn check(
        &self,
        subject: &SubjectRef,
        object: &ObjectRef,
        permission: &str,
    ) -> DomainResult<bool> {
        let body = serde_json::json!({
            "consistency": to_json(&self.consistency())?,
            "resource": to_json(&ObjectReference::from(object))?,
            "permission": normalize(permission),
            "subject": to_json(&SubjectReference::from(subject))?,
        });
        let response: CheckPermissionResponse =
            self.post_unary("/v1/permissions/check", body).await?;
        if response.permissionship.is_empty() {
            warn!("spicedb check response carried no permissionship");
        }
        Ok(response.permissionship == HAS_PERMISSION)
    }

    async fn list(&self, filter: &RelationFilter) -> DomainResult<Vec<RelationTuple>> {
        let body = serde_json::json!({
            "consistency": to_json(&self.consistency())?,
            "relationshipFilter": to_json(&RelationshipFilter::from(filter))?,
        });
        let frames: Vec<ReadRelationshipsResponse> =
            self.post_stream("/v1/relationships/read", body).await?;
        Ok(frames
            .into_iter()
            .map(|frame| RelationTuple::from(frame.relationship))
            .collect())
    }

    async fn lookup_subjects(
        &self,
        object: &ObjectRef,
        permission: &str,
        subject_namespace: &str,
    ) -> DomainResult<Vec<String>> {
        let body = serde_json::json!({
            "consistency": to_json(&self.consistency())?,
            "resource": to_json(&ObjectReference::from(object))?,
            "permission": normalize(permission),
            "subjectObjectType": normalize(subject_namespace),
        });
        let frames: Vec<LookupSubjectsResponse> =
            self.post_stream("/v1/permissions/subjects", body).await?;
        Ok(frames
            .into_iter()
            .filter_map(|frame| {
                frame
                    .subject
                    .map(|s| s.subject_object_id)
                    .or(frame.subject_object_id)
            })
            .collect())
    }

    async fn lookup_resources(
        &self,
        namespace: &str,
        permission: &str,
        subject: &SubjectRef,
    ) -> DomainResult<Vec<String>> {
        let body = serde_json::json!({
            "consistency": to_json(&self.consistency())?,
            "resourceObjectType": normalize(namespace),
            "permission": normalize(permission),
            "subject": to_json(&SubjectReference::from(subject))?,
        });
        let frames: Vec<LookupResourcesResponse> =
            self.post_stream("/v1/permissions/resources", body).await?;
        Ok(frames.into_iter().map(|f| f.resource_object_id).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_domain::{ErrorKind, SubjectFilter};

    #[test]
    fn test_relationship_filter_serialization() {
        let filter = RelationFilter::object(&ObjectRef::new("doc", "1")).with_subject(
            SubjectFilter {
                namespace: "user".to_string(),
                id: Some("alice".to_string()),
                relation: None,
            },
        );
        let json = serde_json::to_value(RelationshipFilter::from(&filter)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "resourceType": "doc",
                "optionalResourceId": "1",
                "optionalSubjectFilter": {
                    "subjectType": "user",
                    "optionalSubjectId": "alice"
                }
            })
        );
    }

    #[test]
    fn test_subject_relation_serialization() {
        let subject = SubjectRef::new("group", "eng").with_relation("member");
        let json = serde_json::to_value(SubjectReference::from(&subject)).unwrap();
        assert_eq!(json["optionalRelation"], "member");

        let plain = serde_json::to_value(SubjectReference::from(&SubjectRef::new("user", "a")))
            .unwrap();
        assert!(plain.get("optionalRelation").is_none());
    }

    #[test]
    fn test_hyphenated_names_are_normalized() {
        let tuple = RelationTuple::new(
            ObjectRef::new("data-store", "r-1"),
            "owner-role",
            SubjectRef::new("team-x", "core").with_relation("member-of"),
        );
        let json = serde_json::to_value(Relationship::from(&tuple)).unwrap();
        assert_eq!(json["resource"]["objectType"], "data_store");
        assert_eq!(json["resource"]["objectId"], "r-1");
        assert_eq!(json["relation"], "owner_role");
        assert_eq!(json["subject"]["object"]["objectType"], "team_x");
        assert_eq!(json["subject"]["optionalRelation"], "member_of");

        let filter = RelationFilter::namespace("data-store").with_relation("owner-role");
        let json = serde_json::to_value(RelationshipFilter::from(&filter)).unwrap();
        assert_eq!(json["resourceType"], "data_store");
        assert_eq!(json["optionalRelation"], "owner_role");
    }

    #[test]
    fn test_parse_stream_frames() {
        let text = concat!(
            r#"{"result":{"resourceObjectId":"a"}}"#,
            "\n",
            r#"{"result":{"resourceObjectId":"b"}}"#,
            "\n"
        );
        let parsed: Vec<LookupResourcesResponse> = parse_stream(text).unwrap();
        let ids: Vec<_> = parsed.into_iter().map(|r| r.resource_object_id).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn test_parse_stream_error_frame() {
        let text = r#"{"error":{"code":14,"message":"backend down"}}"#;
        let err = parse_stream::<LookupResourcesResponse>(text).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unavailable);
        assert!(err.to_string().contains("backend down"));
    }

    #[test]
    fn test_status_classification() {
        let body = r#"{"code":5,"message":"object definition `widget` not found"}"#;
        assert_eq!(classify(StatusCode::NOT_FOUND, body).kind(), ErrorKind::NotFound);
        assert_eq!(
            classify(StatusCode::BAD_REQUEST, body).kind(),
            ErrorKind::InvalidArgument
        );
        assert_eq!(
            classify(StatusCode::PRECONDITION_FAILED, body).kind(),
            ErrorKind::InvalidArgument
        );
        assert_eq!(
            classify(StatusCode::SERVICE_UNAVAILABLE, "oops").kind(),
            ErrorKind::Unavailable
        );
    }
}
