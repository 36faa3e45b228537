//! Named provider presets.
//!
//! A preset pre-populates header names, prefixes, payload rules, and
//! encodings for a known provider. Application is a pure overlay:
//! defaults first, explicit config wins, and the preset table itself
//! is never touched by a request.

use crate::config::{PayloadFormat, SignatureEncoding, SignatureScheme, WebhookConfig};

/// Pre-populated defaults for a known webhook provider.
#[derive(Debug, Clone, Copy)]
pub struct ProviderPreset {
    pub name: &'static str,
    pub scheme: SignatureScheme,
    pub signature_header: &'static str,
    pub signature_prefix: Option<&'static str>,
    pub timestamp_header: Option<&'static str>,
    pub timestamp_in_signature_header: bool,
    pub signature_field: Option<&'static str>,
    pub payload_format: PayloadFormat,
    pub encoding: SignatureEncoding,
}

/// Known providers.
pub const PRESETS: &[ProviderPreset] = &[
    // Slack: HMAC-SHA256 over `v0:{timestamp}:{body}`, hex digest
    // sent as `v0=<hex>` with the timestamp in its own header.
    ProviderPreset {
        name: "slack",
        scheme: SignatureScheme::HmacSha256,
        signature_header: "x-slack-signature",
        signature_prefix: Some("v0="),
        timestamp_header: Some("x-slack-request-timestamp"),
        timestamp_in_signature_header: false,
        signature_field: None,
        payload_format: PayloadFormat::SlackV0,
        encoding: SignatureEncoding::Hex,
    },
    // Stripe: HMAC-SHA256 over `{timestamp}.{body}`; the header
    // carries `t=<unix>,v1=<hex>[,v1=<hex>...]`.
    ProviderPreset {
        name: "stripe",
        scheme: SignatureScheme::HmacSha256,
        signature_header: "stripe-signature",
        signature_prefix: None,
        timestamp_header: None,
        timestamp_in_signature_header: true,
        signature_field: Some("v1"),
        payload_format: PayloadFormat::TimestampDot,
        encoding: SignatureEncoding::Hex,
    },
    // GitHub: HMAC-SHA256 over the raw body, `sha256=<hex>`.
    ProviderPreset {
        name: "github",
        scheme: SignatureScheme::HmacSha256,
        signature_header: "x-hub-signature-256",
        signature_prefix: Some("sha256="),
        timestamp_header: None,
        timestamp_in_signature_header: false,
        signature_field: None,
        payload_format: PayloadFormat::Raw,
        encoding: SignatureEncoding::Hex,
    },
];

/// Look up a preset by name (case-insensitive).
#[must_use]
pub fn find(name: &str) -> Option<&'static ProviderPreset> {
    PRESETS.iter().find(|p| p.name.eq_ignore_ascii_case(name))
}

/// Overlay a preset under explicit configuration.
///
/// Returns a new config; neither input is mutated. A field the
/// caller set explicitly always wins over the preset value.
#[must_use]
pub fn apply(preset: &ProviderPreset, config: &WebhookConfig) -> WebhookConfig {
    let mut merged = config.clone();
    merged.scheme = merged.scheme.or(Some(preset.scheme));
    merged.signature_header = merged
        .signature_header
        .or_else(|| Some(preset.signature_header.to_string()));
    merged.signature_prefix = merged
        .signature_prefix
        .or_else(|| preset.signature_prefix.map(str::to_string));
    merged.timestamp_header = merged
        .timestamp_header
        .or_else(|| preset.timestamp_header.map(str::to_string));
    if preset.timestamp_in_signature_header {
        merged.timestamp_in_signature_header = true;
    }
    merged.signature_field = merged
        .signature_field
        .or_else(|| preset.signature_field.map(str::to_string));
    merged.payload_format = merged.payload_format.or(Some(preset.payload_format));
    merged.encoding = merged.encoding.or(Some(preset.encoding));
    merged
}

/// Overlay the preset named in `config.provider`, when present and
/// known. An unknown provider name is a validation error raised by
/// the caller; this function just passes the config through.
#[must_use]
pub fn apply_named(config: &WebhookConfig) -> WebhookConfig {
    match config.provider.as_deref().and_then(find) {
        Some(preset) => apply(preset, config),
        None => config.clone(),
    }
}
