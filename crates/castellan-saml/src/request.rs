//! AuthnRequest issuance for the HTTP-Redirect binding.

use std::io::Write;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::Utc;

use crate::config::SamlConfig;

/// Build the AuthnRequest document for a request id.
///
/// IDs follow the xs:ID rules (must not start with a digit), so the
/// caller passes ids of the form `_<uuid>`.
#[must_use]
pub fn build_authn_request(config: &SamlConfig, request_id: &str, sso_url: &str) -> String {
    let issue_instant = Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string();
    let name_id_policy = config
        .name_id_format
        .as_deref()
        .map(|format| format!("\n    <samlp:NameIDPolicy Format=\"{format}\" AllowCreate=\"true\"/>"))
        .unwrap_or_default();

    format!(
        r#"<samlp:AuthnRequest xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol"
    xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion"
    ID="{request_id}"
    Version="2.0"
    IssueInstant="{issue_instant}"
    Destination="{sso_url}"
    ProtocolBinding="urn:oasis:names:tc:SAML:2.0:bindings:HTTP-POST"
    AssertionConsumerServiceURL="{acs_url}">
    <saml:Issuer>{entity_id}</saml:Issuer>{name_id_policy}
</samlp:AuthnRequest>"#,
        acs_url = config.acs_url,
        entity_id = config.sp_entity_id,
    )
}

/// Raw-deflate and base64 encode for the redirect binding.
pub fn deflate_and_encode(xml: &str) -> Result<String, String> {
    let mut encoder =
        flate2::write::DeflateEncoder::new(Vec::new(), flate2::Compression::default());
    encoder
        .write_all(xml.as_bytes())
        .map_err(|e| format!("deflate failed: {e}"))?;
    let compressed = encoder.finish().map_err(|e| format!("deflate failed: {e}"))?;
    Ok(BASE64.encode(compressed))
}

/// Assemble the redirect URL carrying the encoded request and relay
/// state. Respects an existing query string on the SSO endpoint.
#[must_use]
pub fn build_redirect_url(sso_url: &str, encoded_request: &str, relay_state: &str) -> String {
    let separator = if sso_url.contains('?') { '&' } else { '?' };
    format!(
        "{sso_url}{separator}SAMLRequest={}&RelayState={}",
        urlencoding::encode(encoded_request),
        urlencoding::encode(relay_state),
    )
}
