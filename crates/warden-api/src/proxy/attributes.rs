//! Declarative attribute extraction from requests and responses.

use std::collections::BTreeMap;

use axum::{
    extract::Query,
    http::{header::CONTENT_TYPE, HeaderMap, Uri},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use super::grpc::{self, GrpcError};

/// An extracted value: one string or several.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Scalar(String),
    List(Vec<String>),
}

impl AttributeValue {
    fn from_values(mut values: Vec<String>) -> Self {
        if values.len() == 1 {
            Self::Scalar(values.remove(0))
        } else {
            Self::List(values)
        }
    }

    /// All values, in extraction order.
    pub fn values(&self) -> Vec<&str> {
        match self {
            Self::Scalar(v) => vec![v.as_str()],
            Self::List(vs) => vs.iter().map(String::as_str).collect(),
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        Self::Scalar(value.to_string())
    }
}

pub type Attributes = BTreeMap<String, AttributeValue>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeType {
    #[serde(alias = "grpc-payload")]
    GrpcPayload,
    #[serde(alias = "json-payload")]
    JsonPayload,
    Header,
    Query,
    Constant,
    #[serde(other)]
    Unknown,
}

/// Whether an attribute is read from the request or the upstream response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeSource {
    #[default]
    Request,
    Response,
}

/// One entry of an `attributes:` map in rule config.
#[derive(Debug, Clone, Deserialize)]
pub struct AttributeSpec {
    #[serde(rename = "type")]
    pub kind: AttributeType,
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub index: Option<u32>,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub source: AttributeSource,
}

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("attribute '{name}': unsupported attribute type")]
    UnsupportedType { name: String },

    #[error("attribute '{name}': content type is not {expected}")]
    ContentTypeMismatch { name: String, expected: &'static str },

    #[error("attribute '{name}': {field} must not be empty")]
    EmptyField { name: String, field: &'static str },

    #[error("attribute '{name}': no value for '{key}'")]
    Missing { name: String, key: String },

    #[error("attribute '{name}': invalid payload: {message}")]
    InvalidPayload { name: String, message: String },

    #[error("attribute '{name}': {source}")]
    Grpc {
        name: String,
        #[source]
        source: GrpcError,
    },
}

/// The parts of a request or response attributes are read from.
/// `uri` is `None` for responses.
#[derive(Debug, Clone, Copy)]
pub struct Payload<'a> {
    pub headers: &'a HeaderMap,
    pub uri: Option<&'a Uri>,
    pub body: &'a [u8],
}

impl Payload<'_> {
    fn content_type(&self) -> &str {
        self.headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
    }
}

/// Extracts every attribute in `specs` declared for `source`.
pub fn extract_all(
    specs: &BTreeMap<String, AttributeSpec>,
    source: AttributeSource,
    payload: Payload<'_>,
) -> Result<Attributes, ExtractionError> {
    specs
        .iter()
        .filter(|(_, spec)| spec.source == source)
        .map(|(name, spec)| Ok((name.clone(), extract(name, spec, payload)?)))
        .collect()
}

pub fn extract(
    name: &str,
    spec: &AttributeSpec,
    payload: Payload<'_>,
) -> Result<AttributeValue, ExtractionError> {
    let require_key = |field: &'static str, value: &str| {
        if value.is_empty() {
            Err(ExtractionError::EmptyField {
                name: name.to_string(),
                field,
            })
        } else {
            Ok(())
        }
    };
    let missing = |key: &str| ExtractionError::Missing {
        name: name.to_string(),
        key: key.to_string(),
    };

    let values = match spec.kind {
        AttributeType::Constant => {
            require_key("value", &spec.value)?;
            vec![spec.value.clone()]
        }
        AttributeType::Header => {
            require_key("key", &spec.key)?;
            let values: Vec<String> = payload
                .headers
                .get_all(spec.key.as_str())
                .iter()
                .filter_map(|v| v.to_str().ok())
                .filter(|v| !v.is_empty())
                .map(str::to_string)
                .collect();
            values
        }
        AttributeType::Query => {
            require_key("key", &spec.key)?;
            let uri = payload.uri.ok_or_else(|| missing(&spec.key))?;
            let Query(pairs) = Query::<Vec<(String, String)>>::try_from_uri(uri).map_err(|e| {
                ExtractionError::InvalidPayload {
                    name: name.to_string(),
                    message: e.to_string(),
                }
            })?;
            pairs
                .into_iter()
                .filter(|(k, v)| k == &spec.key && !v.is_empty())
                .map(|(_, v)| v)
                .collect()
        }
        AttributeType::JsonPayload => {
            require_key("key", &spec.key)?;
            json_values(name, &spec.key, payload.body)?
        }
        AttributeType::GrpcPayload => {
            if !payload.content_type().starts_with("application/grpc") {
                return Err(ExtractionError::ContentTypeMismatch {
                    name: name.to_string(),
                    expected: "application/grpc",
                });
            }
            let index = spec.index.filter(|i| *i > 0).ok_or(ExtractionError::EmptyField {
                name: name.to_string(),
                field: "index",
            })?;
            let grpc_err = |source| ExtractionError::Grpc {
                name: name.to_string(),
                source,
            };
            let message = grpc::decode_frame(payload.body).map_err(grpc_err)?;
            grpc::string_fields(message, index).map_err(grpc_err)?
        }
        AttributeType::Unknown => {
            return Err(ExtractionError::UnsupportedType {
                name: name.to_string(),
            })
        }
    };

    if values.is_empty() {
        let key = match spec.kind {
            AttributeType::GrpcPayload => spec.index.unwrap_or_default().to_string(),
            _ => spec.key.clone(),
        };
        return Err(missing(&key));
    }
    Ok(AttributeValue::from_values(values))
}

/// Looks up a dotted key (`project.id`, `items.0`) in a JSON body.
fn json_values(name: &str, key: &str, body: &[u8]) -> Result<Vec<String>, ExtractionError> {
    let document: Value =
        serde_json::from_slice(body).map_err(|e| ExtractionError::InvalidPayload {
            name: name.to_string(),
            message: e.to_string(),
        })?;

    let mut current = &document;
    for segment in key.split('.') {
        let next = match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        };
        match next {
            Some(value) => current = value,
            None => return Ok(Vec::new()),
        }
    }

    let scalar = |value: &Value| match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    };
    match current {
        Value::Array(items) => items
            .iter()
            .map(|item| {
                scalar(item).ok_or_else(|| ExtractionError::InvalidPayload {
                    name: name.to_string(),
                    message: format!("'{key}' must hold scalar values"),
                })
            })
            .collect(),
        Value::Object(_) => Err(ExtractionError::InvalidPayload {
            name: name.to_string(),
            message: format!("'{key}' is an object"),
        }),
        value => Ok(scalar(value).into_iter().collect()),
    }
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    fn spec(yaml: &str) -> AttributeSpec {
        serde_yaml::from_str(yaml).unwrap()
    }

    fn json_payload<'a>(headers: &'a HeaderMap, body: &'a [u8]) -> Payload<'a> {
        Payload {
            headers,
            uri: None,
            body,
        }
    }

    #[test]
    fn test_json_payload_scalars_and_lists() {
        let headers = HeaderMap::new();
        let body = br#"{"project":"foo","meta":{"count":3,"tags":["a","b"]},"flag":true}"#;
        let payload = json_payload(&headers, body);

        let value = extract("project", &spec("type: json_payload\nkey: project"), payload).unwrap();
        assert_eq!(value, AttributeValue::from("foo"));

        let value = extract("count", &spec("type: json-payload\nkey: meta.count"), payload).unwrap();
        assert_eq!(value, AttributeValue::from("3"));

        let value = extract("tags", &spec("type: json_payload\nkey: meta.tags"), payload).unwrap();
        assert_eq!(
            value,
            AttributeValue::List(vec!["a".to_string(), "b".to_string()])
        );

        let value = extract("flag", &spec("type: json_payload\nkey: flag"), payload).unwrap();
        assert_eq!(value.values(), vec!["true"]);
    }

    #[test]
    fn test_json_payload_failures() {
        let headers = HeaderMap::new();
        let payload = json_payload(&headers, br#"{"project":""}"#);

        assert!(matches!(
            extract("p", &spec("type: json_payload\nkey: project"), payload),
            Err(ExtractionError::Missing { .. })
        ));
        assert!(matches!(
            extract("p", &spec("type: json_payload"), payload),
            Err(ExtractionError::EmptyField { field: "key", .. })
        ));
        assert!(matches!(
            extract("p", &spec("type: json_payload\nkey: x"), json_payload(&headers, b"not json")),
            Err(ExtractionError::InvalidPayload { .. })
        ));
    }

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let mut headers = HeaderMap::new();
        headers.insert("x-project", HeaderValue::from_static("foo"));
        headers.append("x-group", HeaderValue::from_static("a"));
        headers.append("x-group", HeaderValue::from_static("b"));
        let payload = json_payload(&headers, b"");

        let value = extract("p", &spec("type: header\nkey: X-Project"), payload).unwrap();
        assert_eq!(value, AttributeValue::from("foo"));

        let value = extract("g", &spec("type: header\nkey: x-group"), payload).unwrap();
        assert_eq!(value.values(), vec!["a", "b"]);

        assert!(extract("m", &spec("type: header\nkey: x-missing"), payload).is_err());
    }

    #[test]
    fn test_query_parameters() {
        let headers = HeaderMap::new();
        let uri: Uri = "/api/items?project=foo&tag=a&tag=b".parse().unwrap();
        let payload = Payload {
            headers: &headers,
            uri: Some(&uri),
            body: b"",
        };

        let value = extract("p", &spec("type: query\nkey: project"), payload).unwrap();
        assert_eq!(value, AttributeValue::from("foo"));
        let value = extract("t", &spec("type: query\nkey: tag"), payload).unwrap();
        assert_eq!(value.values(), vec!["a", "b"]);
        assert!(extract("x", &spec("type: query\nkey: nope"), payload).is_err());
    }

    #[test]
    fn test_constant_and_unknown_types() {
        let headers = HeaderMap::new();
        let payload = json_payload(&headers, b"");

        let value = extract("ns", &spec("type: constant\nvalue: firehose"), payload).unwrap();
        assert_eq!(value, AttributeValue::from("firehose"));
        assert!(matches!(
            extract("ns", &spec("type: constant"), payload),
            Err(ExtractionError::EmptyField { field: "value", .. })
        ));
        assert!(matches!(
            extract("x", &spec("type: cookie\nkey: sid"), payload),
            Err(ExtractionError::UnsupportedType { .. })
        ));
    }

    #[test]
    fn test_grpc_payload_requires_grpc_content_type() {
        let mut message = Vec::new();
        prost::encoding::string::encode(2, &"foo".to_string(), &mut message);
        let body = grpc::encode_frame(&message);

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let err = extract(
            "p",
            &spec("type: grpc_payload\nindex: 2"),
            json_payload(&headers, &body),
        )
        .unwrap_err();
        assert!(matches!(err, ExtractionError::ContentTypeMismatch { .. }));

        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/grpc+proto"));
        let value = extract(
            "p",
            &spec("type: grpc-payload\nindex: 2"),
            json_payload(&headers, &body),
        )
        .unwrap();
        assert_eq!(value, AttributeValue::from("foo"));
    }

    #[test]
    fn test_extract_all_filters_by_source() {
        let specs: BTreeMap<String, AttributeSpec> = serde_yaml::from_str(
            "project: {type: json_payload, key: project}\nresource: {type: json_payload, key: name, source: response}\n",
        )
        .unwrap();
        let headers = HeaderMap::new();
        let body = br#"{"project":"foo","name":"fh-1"}"#;

        let request = extract_all(&specs, AttributeSource::Request, json_payload(&headers, body)).unwrap();
        assert_eq!(request.len(), 1);
        assert!(request.contains_key("project"));

        let response = extract_all(&specs, AttributeSource::Response, json_payload(&headers, body)).unwrap();
        assert_eq!(response["resource"], AttributeValue::from("fh-1"));
    }
}
