//! Rule documents and path patterns.

use std::collections::BTreeMap;

use axum::http::Method;
use regex::Regex;
use serde::{de::DeserializeOwned, Deserialize};
use thiserror::Error;

/// Errors raised while loading rule documents.
#[derive(Debug, Error)]
pub enum RuleError {
    #[error("invalid path pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },

    #[error("invalid rule document '{key}': {message}")]
    InvalidDocument { key: String, message: String },

    #[error("rule store error: {0}")]
    Storage(#[from] warden_storage::StorageError),
}

/// A YAML rule document: `rules: [...]`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RuleDocument {
    #[serde(default)]
    pub rules: Vec<RuleConfig>,
}

impl RuleDocument {
    pub fn from_yaml(key: &str, bytes: &[u8]) -> Result<Self, RuleError> {
        serde_yaml::from_slice(bytes).map_err(|e| RuleError::InvalidDocument {
            key: key.to_string(),
            message: e.to_string(),
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RuleConfig {
    #[serde(default)]
    pub name: Option<String>,
    pub path: String,
    #[serde(default)]
    pub methods: Vec<String>,
    pub backend: Backend,
    #[serde(default)]
    pub middlewares: Vec<StageConfig>,
    #[serde(default)]
    pub hooks: Vec<StageConfig>,
}

/// Upstream target of a rule.
#[derive(Debug, Clone, Deserialize)]
pub struct Backend {
    /// Resource namespace owned by the backend, e.g. `entropy`.
    pub namespace: String,
    /// Path prefix stripped before forwarding.
    #[serde(default)]
    pub prefix: String,
    /// Base url, e.g. `http://entropy:8080`.
    pub upstream: String,
}

/// A named middleware or hook with its free-form options.
#[derive(Debug, Clone, Deserialize)]
pub struct StageConfig {
    pub name: String,
    #[serde(default)]
    pub config: serde_yaml::Value,
}

impl StageConfig {
    pub fn new(name: impl Into<String>, config: serde_yaml::Value) -> Self {
        Self {
            name: name.into(),
            config,
        }
    }

    /// Decodes the options into a typed config. Missing options decode as
    /// the default value.
    pub fn decode<T: DeserializeOwned + Default>(&self) -> Result<T, serde_yaml::Error> {
        if self.config.is_null() {
            return Ok(T::default());
        }
        serde_yaml::from_value(self.config.clone())
    }
}

/// Path parameters captured by `{name}` segments.
pub type PathParams = BTreeMap<String, String>;

/// A compiled path pattern.
///
/// Segments are literals, `{name}` (one segment, captured) or a trailing `*`
/// matching zero or more remaining segments.
#[derive(Debug, Clone)]
pub struct PathPattern {
    source: String,
    regex: Regex,
    params: Vec<String>,
    literal_prefix: usize,
    literal_segments: usize,
}

fn is_param_name(name: &str) -> bool {
    name.chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

impl PathPattern {
    pub fn parse(pattern: &str) -> Result<Self, RuleError> {
        let invalid = |message: &str| RuleError::InvalidPattern {
            pattern: pattern.to_string(),
            message: message.to_string(),
        };
        if !pattern.starts_with('/') {
            return Err(invalid("must start with '/'"));
        }

        let segments: Vec<&str> = pattern[1..].split('/').collect();
        let mut expr = String::from("^");
        let mut params = Vec::new();
        let mut literal_segments = 0;
        let mut literal_prefix = pattern.len();
        let mut offset = 1;

        for (i, segment) in segments.iter().enumerate() {
            let last = i + 1 == segments.len();
            if *segment == "*" {
                if !last {
                    return Err(invalid("'*' is only allowed as the last segment"));
                }
                literal_prefix = literal_prefix.min(offset);
                expr.push_str("(?:/.*)?");
            } else if let Some(name) = segment
                .strip_prefix('{')
                .and_then(|s| s.strip_suffix('}'))
            {
                if !is_param_name(name) {
                    return Err(invalid("parameter names must be identifiers"));
                }
                if params.iter().any(|p| p == name) {
                    return Err(invalid("duplicate parameter name"));
                }
                literal_prefix = literal_prefix.min(offset);
                expr.push_str(&format!("/(?P<{name}>[^/]+)"));
                params.push(name.to_string());
            } else if segment.contains(['{', '}', '*']) {
                return Err(invalid("wildcards must span a whole segment"));
            } else {
                if !segment.is_empty() {
                    literal_segments += 1;
                }
                expr.push('/');
                expr.push_str(&regex::escape(segment));
            }
            offset += segment.len() + 1;
        }
        expr.push('$');

        let regex = Regex::new(&expr).map_err(|e| invalid(&e.to_string()))?;
        Ok(Self {
            source: pattern.to_string(),
            regex,
            params,
            literal_prefix,
            literal_segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Matches a request path (without query string) and returns the captured
    /// parameters.
    pub fn matches(&self, path: &str) -> Option<PathParams> {
        let captures = self.regex.captures(path)?;
        Some(
            self.params
                .iter()
                .filter_map(|name| {
                    captures
                        .name(name)
                        .map(|m| (name.clone(), m.as_str().to_string()))
                })
                .collect(),
        )
    }

    /// Number of characters before the first wildcard.
    pub fn literal_prefix(&self) -> usize {
        self.literal_prefix
    }

    pub fn literal_segments(&self) -> usize {
        self.literal_segments
    }
}

/// A loaded rule.
#[derive(Debug, Clone)]
pub struct Rule {
    pub name: String,
    pub pattern: PathPattern,
    pub methods: Vec<Method>,
    pub backend: Backend,
    pub middlewares: Vec<StageConfig>,
    pub hooks: Vec<StageConfig>,
    /// Position in the rule set, used to break specificity ties.
    pub order: usize,
}

impl Rule {
    pub fn from_config(config: RuleConfig, order: usize) -> Result<Self, RuleError> {
        let pattern = PathPattern::parse(&config.path)?;
        let methods = config
            .methods
            .iter()
            .map(|m| {
                Method::from_bytes(m.to_ascii_uppercase().as_bytes()).map_err(|_| {
                    RuleError::InvalidPattern {
                        pattern: config.path.clone(),
                        message: format!("unknown method '{m}'"),
                    }
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        if config.backend.upstream.is_empty() {
            return Err(RuleError::InvalidPattern {
                pattern: config.path.clone(),
                message: "backend upstream is empty".to_string(),
            });
        }

        Ok(Self {
            name: config.name.unwrap_or_else(|| config.path.clone()),
            pattern,
            methods,
            backend: config.backend,
            middlewares: config.middlewares,
            hooks: config.hooks,
            order,
        })
    }

    pub fn matches(&self, method: &Method, path: &str) -> Option<PathParams> {
        if !self.methods.is_empty() && !self.methods.contains(method) {
            return None;
        }
        self.pattern.matches(path)
    }

    pub fn middleware(&self, name: &str) -> Option<&StageConfig> {
        self.middlewares.iter().find(|m| m.name == name)
    }

    pub fn hook(&self, name: &str) -> Option<&StageConfig> {
        self.hooks.iter().find(|h| h.name == name)
    }

    /// Specificity key; the greatest key wins.
    pub fn specificity(&self) -> (usize, usize, std::cmp::Reverse<usize>) {
        (
            self.pattern.literal_prefix(),
            self.pattern.literal_segments(),
            std::cmp::Reverse(self.order),
        )
    }
}
