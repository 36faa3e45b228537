//! Webhook verification configuration.

use serde::{Deserialize, Serialize};

use castellan_core::ValidationResult;

/// Default timestamp tolerance (5 minutes).
pub const DEFAULT_TOLERANCE_SECONDS: i64 = 300;

/// Default replay window (5 minutes).
pub const DEFAULT_REPLAY_TTL_SECONDS: i64 = 300;

/// Signature algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SignatureScheme {
    HmacSha256,
    HmacSha1,
    RsaSha256,
    Ed25519,
    /// Host-registered verifier; see `WebhookPlugin::with_custom_verifier`.
    Custom,
}

impl SignatureScheme {
    #[must_use]
    pub fn is_asymmetric(&self) -> bool {
        matches!(self, Self::RsaSha256 | Self::Ed25519)
    }
}

/// Encoding of the transmitted digest/signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignatureEncoding {
    Hex,
    Base64,
    Base64url,
}

/// How the canonical payload is constructed before hashing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadFormat {
    /// Raw body bytes.
    Raw,
    /// `{timestamp}.{body}`.
    TimestampDot,
    /// `v0:{timestamp}:{body}`.
    SlackV0,
}

/// Webhook plugin configuration as supplied by the caller.
///
/// Most fields are optional; a named `provider` preset fills the
/// gaps. `validate()` runs after the preset overlay, so a bare
/// `{"provider": "github", "secret": "..."}` is a complete config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// Named provider preset (`slack`, `stripe`, `github`).
    pub provider: Option<String>,

    /// Connection this config belongs to; scopes the secret cache.
    pub connection_id: Option<String>,

    pub scheme: Option<SignatureScheme>,

    /// Single verification key, or a reference (`backend:path#key`).
    pub secret: Option<String>,
    /// Rotation set; verification succeeds on the first key that
    /// matches.
    #[serde(default)]
    pub secrets: Vec<String>,

    /// Public key material for asymmetric schemes: PEM (SPKI or
    /// certificate) for RSA, raw 32-byte hex/base64 for Ed25519.
    #[serde(default)]
    pub public_keys: Vec<String>,

    pub signature_header: Option<String>,
    /// Prefix stripped before comparison, e.g. `sha256=`.
    pub signature_prefix: Option<String>,

    pub timestamp_header: Option<String>,
    /// Provider embeds `t=<unix>` in the signature header
    /// (Stripe-style `t=...,v1=...`).
    #[serde(default)]
    pub timestamp_in_signature_header: bool,
    /// Field carrying the signature in an embedded-style header.
    pub signature_field: Option<String>,

    pub timestamp_tolerance_seconds: Option<i64>,

    #[serde(default)]
    pub include_timestamp_in_signature: bool,
    pub payload_format: Option<PayloadFormat>,

    /// Ordered header names concatenated as `name:value` lines and
    /// prepended to the body before hashing.
    #[serde(default)]
    pub included_headers: Vec<String>,

    pub encoding: Option<SignatureEncoding>,

    #[serde(default)]
    pub prevent_replay: bool,
    pub replay_ttl_seconds: Option<i64>,
}

impl WebhookConfig {
    /// All configured signing keys, single `secret` first.
    #[must_use]
    pub fn key_material(&self) -> Vec<&str> {
        self.secret
            .iter()
            .map(String::as_str)
            .chain(self.secrets.iter().map(String::as_str))
            .collect()
    }

    /// Whether this config requires a timestamp on every request.
    #[must_use]
    pub fn requires_timestamp(&self) -> bool {
        self.timestamp_header.is_some() || self.timestamp_in_signature_header
    }

    #[must_use]
    pub fn tolerance_seconds(&self) -> i64 {
        self.timestamp_tolerance_seconds
            .unwrap_or(DEFAULT_TOLERANCE_SECONDS)
    }

    #[must_use]
    pub fn effective_encoding(&self) -> SignatureEncoding {
        self.encoding.unwrap_or(SignatureEncoding::Hex)
    }

    /// Canonical payload construction rule, after defaults.
    #[must_use]
    pub fn effective_payload_format(&self) -> PayloadFormat {
        self.payload_format.unwrap_or(if self.include_timestamp_in_signature {
            PayloadFormat::TimestampDot
        } else {
            PayloadFormat::Raw
        })
    }

    /// Check the config is complete enough to verify with. Run after
    /// the provider overlay.
    #[must_use]
    pub fn validate(&self) -> ValidationResult {
        let mut errors = Vec::new();

        let Some(scheme) = self.scheme else {
            errors.push("scheme is required (or supply a known provider preset)".to_string());
            return ValidationResult::failed(errors);
        };

        if self.signature_header.is_none() {
            errors.push("signature_header is required".to_string());
        }

        if scheme.is_asymmetric() {
            if self.public_keys.is_empty() {
                errors.push(format!(
                    "public_keys is required for {} verification",
                    match scheme {
                        SignatureScheme::RsaSha256 => "rsa-sha256",
                        _ => "ed25519",
                    }
                ));
            }
        } else if scheme != SignatureScheme::Custom && self.key_material().is_empty() {
            errors.push("secret or secrets[] is required".to_string());
        }

        if self.timestamp_in_signature_header && self.timestamp_header.is_some() {
            errors.push(
                "timestamp_header conflicts with timestamp_in_signature_header".to_string(),
            );
        }

        if matches!(
            self.effective_payload_format(),
            PayloadFormat::TimestampDot | PayloadFormat::SlackV0
        ) && !self.requires_timestamp()
        {
            errors.push(
                "timestamp-bound payload format requires a timestamp source".to_string(),
            );
        }

        if let Some(tolerance) = self.timestamp_tolerance_seconds {
            if tolerance < 0 {
                errors.push("timestamp_tolerance_seconds must not be negative".to_string());
            }
        }

        if errors.is_empty() {
            ValidationResult::ok()
        } else {
            ValidationResult::failed(errors)
        }
    }
}
