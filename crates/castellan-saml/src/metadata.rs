//! SP metadata generation and IdP metadata parsing.

use quick_xml::events::Event;
use quick_xml::Reader;

use crate::config::SamlConfig;

const BINDING_REDIRECT: &str = "urn:oasis:names:tc:SAML:2.0:bindings:HTTP-Redirect";
const BINDING_POST: &str = "urn:oasis:names:tc:SAML:2.0:bindings:HTTP-POST";

/// IdP endpoints resolved from a metadata document.
#[derive(Debug, Default, Clone)]
pub struct IdpEndpoints {
    pub sso_url: Option<String>,
    pub certificates: Vec<String>,
}

/// Generate SP metadata for IdP administrators.
///
/// A pure data transform, not a protocol step: entity id, ACS URL,
/// and optionally the SP signing certificate.
#[must_use]
pub fn generate_sp_metadata(config: &SamlConfig, signing_certificate: Option<&str>) -> String {
    let key_descriptor = signing_certificate
        .map(|cert| {
            let body = cert
                .replace("-----BEGIN CERTIFICATE-----", "")
                .replace("-----END CERTIFICATE-----", "")
                .replace(['\n', '\r'], "");
            format!(
                r#"
    <md:KeyDescriptor use="signing">
      <ds:KeyInfo xmlns:ds="http://www.w3.org/2000/09/xmldsig#">
        <ds:X509Data><ds:X509Certificate>{body}</ds:X509Certificate></ds:X509Data>
      </ds:KeyInfo>
    </md:KeyDescriptor>"#
            )
        })
        .unwrap_or_default();

    let name_id_format = config
        .name_id_format
        .as_deref()
        .map(|format| format!("\n    <md:NameIDFormat>{format}</md:NameIDFormat>"))
        .unwrap_or_default();

    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<md:EntityDescriptor xmlns:md="urn:oasis:names:tc:SAML:2.0:metadata" entityID="{entity_id}">
  <md:SPSSODescriptor AuthnRequestsSigned="false" WantAssertionsSigned="true" protocolSupportEnumeration="urn:oasis:names:tc:SAML:2.0:protocol">{key_descriptor}{name_id_format}
    <md:AssertionConsumerService Binding="{BINDING_POST}" Location="{acs_url}" index="0" isDefault="true"/>
  </md:SPSSODescriptor>
</md:EntityDescriptor>"#,
        entity_id = config.sp_entity_id,
        acs_url = config.acs_url,
    )
}

/// Pull the redirect-binding SSO endpoint and signing certificates
/// out of an IdP metadata document.
pub fn parse_idp_metadata(xml: &str) -> Result<IdpEndpoints, String> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut endpoints = IdpEndpoints::default();
    let mut in_idp_descriptor = false;
    let mut in_certificate = false;
    let mut current_key_use: Option<String> = None;
    let mut certificate = String::new();
    let mut post_sso_url: Option<String> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) | Ok(Event::Empty(ref e)) => {
                let local = e.local_name();
                let name = std::str::from_utf8(local.as_ref()).unwrap_or("");
                match name {
                    "IDPSSODescriptor" => in_idp_descriptor = true,
                    "KeyDescriptor" if in_idp_descriptor => {
                        current_key_use = None;
                        for attr in e.attributes().flatten() {
                            if attr.key.as_ref() == b"use" {
                                current_key_use =
                                    Some(attr.unescape_value().unwrap_or_default().to_string());
                            }
                        }
                    }
                    "X509Certificate" if in_idp_descriptor => {
                        // Encryption-use keys are not signature keys.
                        if current_key_use.as_deref() != Some("encryption") {
                            in_certificate = true;
                            certificate.clear();
                        }
                    }
                    "SingleSignOnService" if in_idp_descriptor => {
                        let mut binding = String::new();
                        let mut location = String::new();
                        for attr in e.attributes().flatten() {
                            let key = std::str::from_utf8(attr.key.as_ref()).unwrap_or("");
                            let value = attr.unescape_value().unwrap_or_default().to_string();
                            match key {
                                "Binding" => binding = value,
                                "Location" => location = value,
                                _ => {}
                            }
                        }
                        if binding == BINDING_REDIRECT && endpoints.sso_url.is_none() {
                            endpoints.sso_url = Some(location);
                        } else if binding == BINDING_POST && post_sso_url.is_none() {
                            post_sso_url = Some(location);
                        }
                    }
                    _ => {}
                }
            }
            Ok(Event::Text(ref e)) if in_certificate => {
                certificate.push_str(&e.unescape().unwrap_or_default());
            }
            Ok(Event::End(ref e)) => {
                let local = e.local_name();
                let name = std::str::from_utf8(local.as_ref()).unwrap_or("");
                match name {
                    "IDPSSODescriptor" => in_idp_descriptor = false,
                    "X509Certificate" if in_certificate => {
                        in_certificate = false;
                        let body: String =
                            certificate.split_whitespace().collect::<Vec<_>>().join("");
                        if !body.is_empty() {
                            endpoints.certificates.push(body);
                        }
                    }
                    "KeyDescriptor" => current_key_use = None,
                    _ => {}
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(format!("XML parse error: {e}")),
            _ => {}
        }
    }

    // Fall back to the POST binding when the IdP offers no redirect
    // endpoint.
    if endpoints.sso_url.is_none() {
        endpoints.sso_url = post_sso_url;
    }

    if endpoints.sso_url.is_none() && endpoints.certificates.is_empty() {
        return Err("document is not IdP metadata".to_string());
    }
    Ok(endpoints)
}
