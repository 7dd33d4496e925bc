//! Request value type and cache-key normalization.
//!
//! A [`Request`] is immutable once built. Its [`CacheKey`] is the hex
//! SHA-256 of a length-prefixed encoding of three canonical parts:
//!
//! - the operation kind (`"complete"`, `"vision"`, `"image_generation"`)
//! - the payload: text is whitespace-collapsed and trimmed, structured
//!   values are re-serialized with recursively sorted object keys, and
//!   binary data is reduced to the SHA-256 of its raw bytes
//! - the parameters, sorted by name, each value tagged with its type
//!
//! Binary payloads are hashed as delivered. Two encodings of the same image
//! produce different keys; normalizing image encodings is left upstream.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{HuginnError, Result};

/// Kind of work a request asks a provider to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// Text completion / chat.
    Complete,
    /// Question answering over one or more images.
    Vision,
    /// Text-to-image generation.
    ImageGeneration,
}

impl OperationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            OperationKind::Complete => "complete",
            OperationKind::Vision => "vision",
            OperationKind::ImageGeneration => "image_generation",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationKind {
    type Err = HuginnError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "complete" | "completion" | "text_completion" => Ok(OperationKind::Complete),
            "vision" => Ok(OperationKind::Vision),
            "image_generation" | "image" => Ok(OperationKind::ImageGeneration),
            other => Err(HuginnError::MalformedRequest(format!(
                "unknown operation kind '{other}'"
            ))),
        }
    }
}

/// Request body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Payload {
    /// Free text (prompt, question).
    Text(String),
    /// Structured value; key order and formatting are irrelevant.
    Structured(serde_json::Value),
    /// Raw bytes.
    Binary(#[serde(with = "super::base64_bytes")] Vec<u8>),
    /// A prompt with attached images (vision).
    TextWithImages {
        text: String,
        #[serde(with = "super::base64_bytes::list")]
        images: Vec<Vec<u8>>,
    },
}

impl Payload {
    /// The prompt text, if the payload carries one.
    pub fn text(&self) -> Option<&str> {
        match self {
            Payload::Text(text) | Payload::TextWithImages { text, .. } => Some(text),
            Payload::Structured(_) | Payload::Binary(_) => None,
        }
    }

    /// Attached images, empty for non-vision payloads.
    pub fn images(&self) -> &[Vec<u8>] {
        match self {
            Payload::TextWithImages { images, .. } => images,
            _ => &[],
        }
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Payload::Text(text.to_owned())
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Payload::Text(text)
    }
}

impl From<serde_json::Value> for Payload {
    fn from(value: serde_json::Value) -> Self {
        Payload::Structured(value)
    }
}

/// Scalar request parameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl Scalar {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Scalar::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Scalar::Int(i) => Some(*i as f64),
            Scalar::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Scalar::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Type-tagged canonical form, so `1`, `1.0`, `"1"` and `true` differ.
    fn canonical(&self) -> Result<String> {
        Ok(match self {
            Scalar::Bool(b) => format!("b:{b}"),
            Scalar::Int(i) => format!("i:{i}"),
            Scalar::Float(f) if f.is_finite() => format!("f:{f:?}"),
            Scalar::Float(f) => {
                return Err(HuginnError::MalformedRequest(format!(
                    "non-finite parameter value {f}"
                )));
            }
            Scalar::Text(s) => format!("s:{s}"),
        })
    }
}

impl From<bool> for Scalar {
    fn from(v: bool) -> Self {
        Scalar::Bool(v)
    }
}

impl From<i64> for Scalar {
    fn from(v: i64) -> Self {
        Scalar::Int(v)
    }
}

impl From<i32> for Scalar {
    fn from(v: i32) -> Self {
        Scalar::Int(i64::from(v))
    }
}

impl From<u32> for Scalar {
    fn from(v: u32) -> Self {
        Scalar::Int(i64::from(v))
    }
}

impl From<f64> for Scalar {
    fn from(v: f64) -> Self {
        Scalar::Float(v)
    }
}

impl From<&str> for Scalar {
    fn from(v: &str) -> Self {
        Scalar::Text(v.to_owned())
    }
}

impl From<String> for Scalar {
    fn from(v: String) -> Self {
        Scalar::Text(v)
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Bool(b) => write!(f, "{b}"),
            Scalar::Int(i) => write!(f, "{i}"),
            Scalar::Float(x) => write!(f, "{x}"),
            Scalar::Text(s) => f.write_str(s),
        }
    }
}

/// Stable memoization key derived from a normalized [`Request`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    /// Wrap an existing key string (e.g. one typed into the cache editor).
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the key is a plain lowercase hex digest, safe as a file name.
    pub fn is_well_formed(&self) -> bool {
        !self.0.is_empty()
            && self
                .0
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CacheKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

/// An immutable logical request.
///
/// ```rust
/// # use huginn::{OperationKind, Request};
/// let a = Request::text(OperationKind::Complete, "hello   world").param("temperature", 0);
/// let b = Request::text(OperationKind::Complete, " hello world ").param("temperature", 0);
/// assert_eq!(a.cache_key().unwrap(), b.cache_key().unwrap());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    operation: OperationKind,
    payload: Payload,
    #[serde(default)]
    parameters: BTreeMap<String, Scalar>,
}

impl Request {
    pub fn new(operation: OperationKind, payload: impl Into<Payload>) -> Self {
        Self {
            operation,
            payload: payload.into(),
            parameters: BTreeMap::new(),
        }
    }

    /// Shorthand for a text payload.
    pub fn text(operation: OperationKind, text: impl Into<String>) -> Self {
        Self::new(operation, Payload::Text(text.into()))
    }

    /// Add (or replace) a parameter. Surrounding whitespace in `name` is
    /// dropped.
    pub fn param(mut self, name: impl Into<String>, value: impl Into<Scalar>) -> Self {
        let name: String = name.into();
        let name = if name.trim().len() == name.len() {
            name
        } else {
            name.trim().to_string()
        };
        self.parameters.insert(name, value.into());
        self
    }

    pub fn operation(&self) -> OperationKind {
        self.operation
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn parameters(&self) -> &BTreeMap<String, Scalar> {
        &self.parameters
    }

    /// Look up a single parameter.
    pub fn parameter(&self, name: &str) -> Option<&Scalar> {
        self.parameters.get(name)
    }

    /// Prompt text with incidental whitespace collapsed, if any.
    pub fn normalized_text(&self) -> Option<String> {
        self.payload.text().map(collapse_whitespace)
    }

    /// Derive the cache key.
    ///
    /// Fails with [`HuginnError::MalformedRequest`] when the payload is empty
    /// or a parameter cannot be canonicalized.
    pub fn cache_key(&self) -> Result<CacheKey> {
        let payload = canonical_payload(&self.payload)?;

        let mut hasher = Sha256::new();
        write_part(&mut hasher, self.operation.as_str().as_bytes());
        write_part(&mut hasher, &payload);
        for (name, value) in &self.parameters {
            if name.is_empty() {
                return Err(HuginnError::MalformedRequest(
                    "parameter name must not be empty".into(),
                ));
            }
            // Deserialized requests bypass `param()`.
            if name.trim() != name.as_str() {
                return Err(HuginnError::MalformedRequest(format!(
                    "parameter name {name:?} has surrounding whitespace"
                )));
            }
            write_part(&mut hasher, name.as_bytes());
            write_part(&mut hasher, value.canonical()?.as_bytes());
        }
        Ok(CacheKey(hex::encode(hasher.finalize())))
    }
}

/// Length-prefix each part so concatenations cannot collide.
fn write_part(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn canonical_payload(payload: &Payload) -> Result<Vec<u8>> {
    match payload {
        Payload::Text(text) => {
            let text = collapse_whitespace(text);
            if text.is_empty() {
                return Err(HuginnError::MalformedRequest("empty text payload".into()));
            }
            Ok([b"t:".as_slice(), text.as_bytes()].concat())
        }
        Payload::Structured(value) => {
            if value.is_null() {
                return Err(HuginnError::MalformedRequest("null structured payload".into()));
            }
            let mut out = b"j:".to_vec();
            out.extend(canonical_json(value).into_bytes());
            Ok(out)
        }
        Payload::Binary(bytes) => {
            if bytes.is_empty() {
                return Err(HuginnError::MalformedRequest("empty binary payload".into()));
            }
            Ok([b"b:".as_slice(), Sha256::digest(bytes).as_slice()].concat())
        }
        Payload::TextWithImages { text, images } => {
            let text = collapse_whitespace(text);
            if text.is_empty() && images.is_empty() {
                return Err(HuginnError::MalformedRequest("empty vision payload".into()));
            }
            let mut out = b"v:".to_vec();
            out.extend((text.len() as u64).to_le_bytes());
            out.extend(text.as_bytes());
            for image in images {
                if image.is_empty() {
                    return Err(HuginnError::MalformedRequest("empty image attachment".into()));
                }
                out.extend(Sha256::digest(image));
            }
            Ok(out)
        }
    }
}

/// Compact JSON with object keys sorted at every depth.
fn canonical_json(value: &serde_json::Value) -> String {
    use serde_json::Value;
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<&String, &Value> = map.iter().collect();
            let fields: Vec<String> = sorted
                .into_iter()
                .map(|(k, v)| format!("{}:{}", Value::String(k.clone()), canonical_json(v)))
                .collect();
            format!("{{{}}}", fields.join(","))
        }
        Value::Array(items) => {
            let items: Vec<String> = items.iter().map(canonical_json).collect();
            format!("[{}]", items.join(","))
        }
        scalar => scalar.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn whitespace_is_incidental() {
        assert_eq!(collapse_whitespace("  hello \n\t world "), "hello world");
    }

    #[test]
    fn canonical_json_sorts_nested_keys() {
        let a = json!({"b": 1, "a": {"y": [1, 2], "x": null}});
        assert_eq!(canonical_json(&a), r#"{"a":{"x":null,"y":[1,2]},"b":1}"#);
    }

    #[test]
    fn canonical_json_keeps_array_order() {
        assert_ne!(canonical_json(&json!([1, 2])), canonical_json(&json!([2, 1])));
    }

    #[test]
    fn scalar_canonical_is_type_tagged() {
        let forms: Vec<String> = [
            Scalar::Int(1),
            Scalar::Float(1.0),
            Scalar::Text("1".into()),
            Scalar::Bool(true),
        ]
        .iter()
        .map(|s| s.canonical().unwrap())
        .collect();
        for (i, a) in forms.iter().enumerate() {
            for b in &forms[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn nan_parameter_is_malformed() {
        assert!(Scalar::Float(f64::NAN).canonical().is_err());
    }

    #[test]
    fn operation_kind_parses_aliases() {
        assert_eq!(
            "text-completion".parse::<OperationKind>().unwrap(),
            OperationKind::Complete
        );
        assert_eq!(
            "image-generation".parse::<OperationKind>().unwrap(),
            OperationKind::ImageGeneration
        );
        assert!("teleport".parse::<OperationKind>().is_err());
    }

    #[test]
    fn cache_key_is_hex_digest() {
        let key = Request::text(OperationKind::Complete, "hi")
            .cache_key()
            .unwrap();
        assert_eq!(key.as_str().len(), 64);
        assert!(key.is_well_formed());
    }
}
