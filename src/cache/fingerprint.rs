//! Content-addressed cache keys for chat requests.

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::api_types::{ChatMessage, ChatRequest};

/// The cacheable portion of a request, serialized in a fixed field order so
/// the canonical form is stable across runs and languages. serde emits
/// struct fields in declaration order, which pins it.
#[derive(Serialize)]
struct CanonicalRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

/// Stable digest of the cacheable portion of a request:
/// `cache:` + 64 hex chars of SHA-256 over the canonical JSON.
///
/// Returns `None` only when the request cannot be canonicalized (e.g. a
/// non-finite temperature, which JSON cannot represent); callers treat
/// that as cache-ineligible.
pub fn request_fingerprint(request: &ChatRequest) -> Option<String> {
    let canonical = CanonicalRequest {
        model: &request.model,
        messages: &request.messages,
        temperature: request.temperature,
        max_tokens: request.max_tokens,
    };

    let json = serde_json::to_vec(&canonical).ok()?;
    let digest = Sha256::digest(&json);
    Some(format!("cache:{}", hex::encode(digest)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api_types::ChatMessage;

    fn request(model: &str, content: &str) -> ChatRequest {
        ChatRequest {
            model: model.to_string(),
            messages: vec![ChatMessage::user(content)],
            temperature: None,
            max_tokens: None,
            top_p: None,
            stop: None,
            stream: false,
        }
    }

    #[test]
    fn fingerprint_format() {
        let key = request_fingerprint(&request("gpt-4", "Hello")).unwrap();
        assert!(key.starts_with("cache:"));
        let digest = &key["cache:".len()..];
        assert_eq!(digest.len(), 64);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn equal_requests_share_a_key() {
        let a = request_fingerprint(&request("gpt-4", "Hello")).unwrap();
        let b = request_fingerprint(&request("gpt-4", "Hello")).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn field_order_in_source_json_is_irrelevant() {
        // Two bodies with the same content but different key order must
        // canonicalize identically.
        let a: ChatRequest = serde_json::from_str(
            r#"{"model":"gpt-4","messages":[{"role":"user","content":"Hi"}],"temperature":0.0}"#,
        )
        .unwrap();
        let b: ChatRequest = serde_json::from_str(
            r#"{"temperature":0.0,"messages":[{"content":"Hi","role":"user"}],"model":"gpt-4"}"#,
        )
        .unwrap();
        assert_eq!(request_fingerprint(&a), request_fingerprint(&b));
    }

    #[test]
    fn every_keyed_field_changes_the_key() {
        let base = request("gpt-4", "Hello");
        let base_key = request_fingerprint(&base).unwrap();

        let mut other_model = base.clone();
        other_model.model = "gpt-3.5-turbo".into();
        assert_ne!(request_fingerprint(&other_model).unwrap(), base_key);

        let mut other_message = base.clone();
        other_message.messages[0].content = "Hello!".into();
        assert_ne!(request_fingerprint(&other_message).unwrap(), base_key);

        let mut with_temperature = base.clone();
        with_temperature.temperature = Some(0.0);
        assert_ne!(request_fingerprint(&with_temperature).unwrap(), base_key);

        let mut with_max_tokens = base.clone();
        with_max_tokens.max_tokens = Some(256);
        assert_ne!(request_fingerprint(&with_max_tokens).unwrap(), base_key);
    }

    #[test]
    fn uncanonicalizable_temperature_yields_none() {
        let mut req = request("gpt-4", "Hello");
        req.temperature = Some(f64::NAN);
        assert!(request_fingerprint(&req).is_none());
    }

    #[test]
    fn fields_outside_the_key_do_not_change_it() {
        let base = request("gpt-4", "Hello");
        let base_key = request_fingerprint(&base).unwrap();

        let mut with_top_p = base.clone();
        with_top_p.top_p = Some(0.9);
        assert_eq!(request_fingerprint(&with_top_p).unwrap(), base_key);

        let mut streaming = base;
        streaming.stream = true;
        assert_eq!(request_fingerprint(&streaming).unwrap(), base_key);
    }
}
