/// Request builder
///
/// Turns an action definition plus a node's inputs into a concrete outbound HTTP
/// request. All work here is synchronous; nothing touches the network.

use crate::runtime::error::BuildError;
use crate::runtime::template::{build_request_body, resolve, resolve_value};
use crate::runtime::vault::SecretFields;
use crate::workflow::{ActionDefinition, Credential};
use reqwest::header::{HeaderName, HeaderValue};
use reqwest::{Method, Url};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// A fully resolved outbound call
///
/// Headers injected from a credential are tracked so that `Debug` output and
/// logs never show their values.
#[derive(Clone)]
pub struct OutboundRequest {
    pub method: Method,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub body: Value,
    /// Non-2xx responses fail the node when set
    pub fail_on_error_status: bool,
    sensitive_headers: BTreeSet<String>,
}

impl OutboundRequest {
    /// Whether a header value came from a credential
    pub fn is_sensitive(&self, header: &str) -> bool {
        self.sensitive_headers.contains(header)
    }

    /// Header names only, for logging
    pub fn header_names(&self) -> Vec<&str> {
        self.headers.keys().map(String::as_str).collect()
    }
}

impl fmt::Debug for OutboundRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let headers: BTreeMap<&str, &str> = self
            .headers
            .iter()
            .map(|(name, value)| {
                let shown = if self.is_sensitive(name) { "[REDACTED]" } else { value.as_str() };
                (name.as_str(), shown)
            })
            .collect();
        f.debug_struct("OutboundRequest")
            .field("method", &self.method)
            .field("url", &self.url)
            .field("headers", &headers)
            .field("body", &self.body)
            .field("fail_on_error_status", &self.fail_on_error_status)
            .finish()
    }
}

/// Pick the credential an action should use
///
/// Candidates are credentials scoped to the action (by id or category) and of
/// the required type, if the action names one. An active candidate wins. When
/// none is active and the action requires a credential, the node cannot be built.
pub fn select_credential<'a>(
    action: &ActionDefinition,
    credentials: &'a [Credential],
) -> Result<Option<&'a Credential>, BuildError> {
    let binding = action.api_config.credential.as_ref();
    let wanted_type = binding.and_then(|b| b.credential_type.as_deref());

    let mut candidates: Vec<&Credential> = credentials
        .iter()
        .filter(|c| c.applies_to(action))
        .filter(|c| wanted_type.is_none_or(|t| c.credential_type == t))
        .collect();
    candidates.sort_by(|a, b| a.id.cmp(&b.id));

    if let Some(active) = candidates.iter().find(|c| c.is_active) {
        return Ok(Some(*active));
    }

    if binding.is_some_and(|b| b.required) {
        return Err(match candidates.first() {
            Some(inactive) => BuildError::CredentialInactive(inactive.id.clone()),
            None => BuildError::CredentialMissing(action.id.clone()),
        });
    }

    Ok(None)
}

/// Build the outbound request for one node
///
/// - node inputs are resolved first, then merged over `user_inputs` (node wins)
/// - schema defaults fill absent keys; required fields must then be present
/// - URL, header values and the body template are resolved against the merged inputs
/// - credential fields are injected verbatim as headers, never into the body
pub fn build(
    action: &ActionDefinition,
    node_inputs: &Map<String, Value>,
    user_inputs: &Map<String, Value>,
    prior_results: &Map<String, Value>,
    credential: Option<&SecretFields>,
) -> Result<OutboundRequest, BuildError> {
    let api = &action.api_config;

    let method_name = api
        .method
        .as_deref()
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .ok_or_else(|| BuildError::MissingMethod(action.id.clone()))?;
    let method = Method::from_bytes(method_name.to_ascii_uppercase().as_bytes())
        .map_err(|_| BuildError::InvalidMethod(method_name.to_string()))?;

    let url_template = api
        .url
        .as_deref()
        .map(str::trim)
        .filter(|u| !u.is_empty())
        .ok_or_else(|| BuildError::MissingUrl(action.id.clone()))?;

    let inputs = merge_inputs(action, node_inputs, user_inputs, prior_results)?;

    let url = resolve(url_template, &inputs, prior_results);
    Url::parse(&url).map_err(|e| BuildError::InvalidUrl {
        url: url.clone(),
        reason: e.to_string(),
    })?;

    let mut headers = BTreeMap::new();
    for (name, template) in &api.headers {
        let value = resolve(template, &inputs, prior_results);
        validate_header(name, &value)?;
        headers.insert(name.clone(), value);
    }

    let mut sensitive_headers = BTreeSet::new();
    if let Some(secrets) = credential {
        let mapping = api
            .credential
            .as_ref()
            .map(|b| &b.headers)
            .filter(|m| !m.is_empty());

        for (field, value) in secrets.iter() {
            let header = match mapping {
                Some(mapping) => match mapping.get(field) {
                    Some(header) => header.clone(),
                    None => continue,
                },
                None => field.clone(),
            };
            let value = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            validate_header(&header, &value)?;
            headers.insert(header.clone(), value);
            sensitive_headers.insert(header);
        }
    }

    let body = build_request_body(&api.body, &inputs, prior_results);

    Ok(OutboundRequest {
        method,
        url,
        headers,
        body,
        fail_on_error_status: api.fail_on_error_status,
        sensitive_headers,
    })
}

/// Resolve node inputs, overlay them on the trigger inputs and apply the schema
fn merge_inputs(
    action: &ActionDefinition,
    node_inputs: &Map<String, Value>,
    user_inputs: &Map<String, Value>,
    prior_results: &Map<String, Value>,
) -> Result<Map<String, Value>, BuildError> {
    let mut merged = user_inputs.clone();
    for (key, raw) in node_inputs {
        merged.insert(key.clone(), resolve_value(raw, user_inputs, prior_results));
    }

    for field in &action.input_schema {
        if !merged.contains_key(&field.key) {
            if let Some(default) = &field.default {
                merged.insert(field.key.clone(), default.clone());
            }
        }
        if field.required {
            let missing = match merged.get(&field.key) {
                None | Some(Value::Null) => true,
                Some(Value::String(s)) => s.is_empty(),
                Some(_) => false,
            };
            if missing {
                return Err(BuildError::MissingInput(field.key.clone()));
            }
        }
    }

    Ok(merged)
}

fn validate_header(name: &str, value: &str) -> Result<(), BuildError> {
    HeaderName::from_bytes(name.as_bytes()).map_err(|_| BuildError::InvalidHeader(name.to_string()))?;
    HeaderValue::from_str(value).map_err(|_| BuildError::InvalidHeader(name.to_string()))?;
    Ok(())
}
