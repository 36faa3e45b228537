//! SAML service-provider configuration.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use castellan_core::ValidationResult;

/// Default lifetime of an issued AuthnRequest (10 minutes).
pub const DEFAULT_REQUEST_TTL_SECONDS: i64 = 600;

/// Default clock-skew tolerance for assertion validity windows.
pub const DEFAULT_CLOCK_SKEW_SECONDS: i64 = 30;

/// SP-side SAML configuration.
///
/// The IdP must be described one of three ways: a metadata URL, an
/// inline metadata document, or an explicit SSO URL plus signing
/// certificate. Once a flow starts the configuration is immutable.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SamlConfig {
    /// Connection this config belongs to; scopes correlation keys.
    pub connection_id: Option<String>,

    /// Our entity id; asserted audiences must match it.
    pub sp_entity_id: String,
    /// Assertion Consumer Service URL the IdP posts back to.
    pub acs_url: String,

    pub idp_metadata_url: Option<String>,
    pub idp_metadata_xml: Option<String>,
    pub idp_sso_url: Option<String>,
    /// IdP signing certificate (PEM or bare base64).
    pub idp_certificate: Option<String>,
    /// Additional certificates accepted during IdP key rotation.
    #[serde(default)]
    pub idp_certificates: Vec<String>,

    pub clock_skew_seconds: Option<i64>,
    pub request_ttl_seconds: Option<i64>,

    /// Assertion attribute name → claim name. Unmapped attributes
    /// pass through under their assertion name.
    #[serde(default)]
    pub attribute_mapping: HashMap<String, String>,

    /// PEM private key for decrypting `EncryptedAssertion`s.
    pub decryption_key: Option<String>,

    pub name_id_format: Option<String>,
}

impl SamlConfig {
    #[must_use]
    pub fn clock_skew_seconds(&self) -> i64 {
        self.clock_skew_seconds
            .unwrap_or(DEFAULT_CLOCK_SKEW_SECONDS)
    }

    #[must_use]
    pub fn request_ttl_seconds(&self) -> i64 {
        self.request_ttl_seconds
            .unwrap_or(DEFAULT_REQUEST_TTL_SECONDS)
    }

    /// Map an assertion attribute name through the configured table.
    #[must_use]
    pub fn claim_name<'a>(&'a self, attribute: &'a str) -> &'a str {
        self.attribute_mapping
            .get(attribute)
            .map_or(attribute, String::as_str)
    }

    /// Check the config describes a reachable IdP.
    #[must_use]
    pub fn validate(&self) -> ValidationResult {
        let mut errors = Vec::new();

        if self.sp_entity_id.is_empty() {
            errors.push("sp_entity_id is required".to_string());
        }
        if self.acs_url.is_empty() {
            errors.push("acs_url is required".to_string());
        }

        let has_metadata = self.idp_metadata_url.is_some() || self.idp_metadata_xml.is_some();
        let has_explicit = self.idp_sso_url.is_some()
            && (self.idp_certificate.is_some() || !self.idp_certificates.is_empty());
        if !has_metadata && !has_explicit {
            errors.push(
                "IdP is not described: supply idp_metadata_url, idp_metadata_xml, or \
                 idp_sso_url with idp_certificate"
                    .to_string(),
            );
        }

        if let Some(skew) = self.clock_skew_seconds {
            if skew < 0 {
                errors.push("clock_skew_seconds must not be negative".to_string());
            }
        }
        if let Some(ttl) = self.request_ttl_seconds {
            if ttl <= 0 {
                errors.push("request_ttl_seconds must be positive".to_string());
            }
        }

        if errors.is_empty() {
            ValidationResult::ok()
        } else {
            ValidationResult::failed(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn explicit_config() -> SamlConfig {
        SamlConfig {
            sp_entity_id: "https://sp.example.com".to_string(),
            acs_url: "https://sp.example.com/saml/acs".to_string(),
            idp_sso_url: Some("https://idp.example.com/sso".to_string()),
            idp_certificate: Some("MIIC...".to_string()),
            ..SamlConfig::default()
        }
    }

    #[test]
    fn test_explicit_idp_config_is_valid() {
        assert!(explicit_config().validate().valid);
    }

    #[test]
    fn test_inline_metadata_is_sufficient() {
        let config = SamlConfig {
            idp_sso_url: None,
            idp_certificate: None,
            idp_metadata_xml: Some("<EntityDescriptor/>".to_string()),
            ..explicit_config()
        };
        assert!(config.validate().valid);
    }

    #[test]
    fn test_sso_url_without_certificate_fails() {
        let config = SamlConfig {
            idp_certificate: None,
            ..explicit_config()
        };
        let result = config.validate();
        assert!(!result.valid);
        assert!(result.errors[0].contains("IdP is not described"));
    }

    #[test]
    fn test_missing_entity_id_fails() {
        let config = SamlConfig {
            sp_entity_id: String::new(),
            ..explicit_config()
        };
        assert!(!config.validate().valid);
    }

    #[test]
    fn test_negative_skew_fails() {
        let config = SamlConfig {
            clock_skew_seconds: Some(-1),
            ..explicit_config()
        };
        assert!(!config.validate().valid);
    }

    #[test]
    fn test_claim_name_mapping() {
        let mut config = explicit_config();
        config.attribute_mapping.insert(
            "http://schemas.xmlsoap.org/ws/2005/05/identity/claims/emailaddress".to_string(),
            "email".to_string(),
        );
        assert_eq!(
            config.claim_name("http://schemas.xmlsoap.org/ws/2005/05/identity/claims/emailaddress"),
            "email"
        );
        // Unmapped attributes pass through untouched.
        assert_eq!(config.claim_name("department"), "department");
    }

    #[test]
    fn test_defaults() {
        let config = explicit_config();
        assert_eq!(config.clock_skew_seconds(), DEFAULT_CLOCK_SKEW_SECONDS);
        assert_eq!(config.request_ttl_seconds(), DEFAULT_REQUEST_TTL_SECONDS);
    }
}
