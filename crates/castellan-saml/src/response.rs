//! SAML Response parsing and assertion validation.
//!
//! The parser pulls the fields the SP flow needs out of the response
//! document; the validation helpers implement the ordered checks that
//! `complete_auth` runs after the XML signature has been verified.

use chrono::{DateTime, Duration, Utc};
use quick_xml::events::Event;
use quick_xml::Reader;

pub const STATUS_SUCCESS: &str = "urn:oasis:names:tc:SAML:2.0:status:Success";

/// Fields extracted from a Response document.
#[derive(Debug, Default, Clone)]
pub struct ParsedResponse {
    pub id: Option<String>,
    pub in_response_to: Option<String>,
    pub destination: Option<String>,
    pub issuer: Option<String>,
    pub status_code: Option<String>,
    pub assertion: Option<ParsedAssertion>,
}

/// Fields extracted from an Assertion.
#[derive(Debug, Default, Clone)]
pub struct ParsedAssertion {
    pub id: Option<String>,
    pub issuer: Option<String>,
    pub not_before: Option<DateTime<Utc>>,
    pub not_on_or_after: Option<DateTime<Utc>>,
    pub audiences: Vec<String>,
    pub name_id: Option<String>,
    pub name_id_format: Option<String>,
    pub subject_in_response_to: Option<String>,
    pub session_index: Option<String>,
    pub session_not_on_or_after: Option<DateTime<Utc>>,
    /// Attribute name → values, in document order.
    pub attributes: Vec<(String, Vec<String>)>,
}

fn parse_instant(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Parse a decoded Response document.
pub fn parse_response(xml: &str) -> Result<ParsedResponse, String> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut response = ParsedResponse::default();
    let mut assertion: Option<ParsedAssertion> = None;

    // Element the next text event belongs to.
    let mut text_target: Option<&'static str> = None;
    let mut current_attribute: Option<(String, Vec<String>)> = None;
    let mut in_signature = false;

    loop {
        let event = reader.read_event();
        match event {
            Ok(Event::Start(ref e)) | Ok(Event::Empty(ref e)) => {
                let is_empty = matches!(event, Ok(Event::Empty(_)));
                let local = e.local_name();
                let name = std::str::from_utf8(local.as_ref()).unwrap_or("").to_string();

                if in_signature {
                    continue;
                }

                match name.as_str() {
                    "Signature" if !is_empty => in_signature = true,
                    "Response" => {
                        for attr in e.attributes().flatten() {
                            let key = std::str::from_utf8(attr.key.as_ref()).unwrap_or("");
                            let value = attr.unescape_value().unwrap_or_default().to_string();
                            match key {
                                "ID" => response.id = Some(value),
                                "InResponseTo" => response.in_response_to = Some(value),
                                "Destination" => response.destination = Some(value),
                                _ => {}
                            }
                        }
                    }
                    "StatusCode" => {
                        for attr in e.attributes().flatten() {
                            if attr.key.as_ref() == b"Value" && response.status_code.is_none() {
                                response.status_code =
                                    Some(attr.unescape_value().unwrap_or_default().to_string());
                            }
                        }
                    }
                    "Assertion" => {
                        let mut parsed = ParsedAssertion::default();
                        for attr in e.attributes().flatten() {
                            if attr.key.as_ref() == b"ID" {
                                parsed.id =
                                    Some(attr.unescape_value().unwrap_or_default().to_string());
                            }
                        }
                        assertion = Some(parsed);
                    }
                    "Conditions" => {
                        if let Some(a) = assertion.as_mut() {
                            for attr in e.attributes().flatten() {
                                let key = std::str::from_utf8(attr.key.as_ref()).unwrap_or("");
                                let value = attr.unescape_value().unwrap_or_default();
                                match key {
                                    "NotBefore" => a.not_before = parse_instant(&value),
                                    "NotOnOrAfter" => a.not_on_or_after = parse_instant(&value),
                                    _ => {}
                                }
                            }
                        }
                    }
                    "SubjectConfirmationData" => {
                        if let Some(a) = assertion.as_mut() {
                            for attr in e.attributes().flatten() {
                                if attr.key.as_ref() == b"InResponseTo" {
                                    a.subject_in_response_to = Some(
                                        attr.unescape_value().unwrap_or_default().to_string(),
                                    );
                                }
                            }
                        }
                    }
                    "AuthnStatement" => {
                        if let Some(a) = assertion.as_mut() {
                            for attr in e.attributes().flatten() {
                                let key = std::str::from_utf8(attr.key.as_ref()).unwrap_or("");
                                let value = attr.unescape_value().unwrap_or_default();
                                match key {
                                    "SessionIndex" => {
                                        a.session_index = Some(value.to_string());
                                    }
                                    "SessionNotOnOrAfter" => {
                                        a.session_not_on_or_after = parse_instant(&value);
                                    }
                                    _ => {}
                                }
                            }
                        }
                    }
                    "Attribute" => {
                        for attr in e.attributes().flatten() {
                            if attr.key.as_ref() == b"Name" {
                                current_attribute = Some((
                                    attr.unescape_value().unwrap_or_default().to_string(),
                                    Vec::new(),
                                ));
                            }
                        }
                    }
                    "NameID" => {
                        if let Some(a) = assertion.as_mut() {
                            for attr in e.attributes().flatten() {
                                if attr.key.as_ref() == b"Format" {
                                    a.name_id_format = Some(
                                        attr.unescape_value().unwrap_or_default().to_string(),
                                    );
                                }
                            }
                        }
                        if !is_empty {
                            text_target = Some("NameID");
                        }
                    }
                    "Issuer" if !is_empty => text_target = Some("Issuer"),
                    "Audience" if !is_empty => text_target = Some("Audience"),
                    "AttributeValue" if !is_empty => text_target = Some("AttributeValue"),
                    _ => {}
                }
            }
            Ok(Event::Text(ref e)) => {
                let text = e.unescape().unwrap_or_default().to_string();
                match text_target {
                    Some("Issuer") => {
                        if let Some(a) = assertion.as_mut() {
                            a.issuer = Some(text);
                        } else if response.issuer.is_none() {
                            response.issuer = Some(text);
                        }
                    }
                    Some("NameID") => {
                        if let Some(a) = assertion.as_mut() {
                            a.name_id = Some(text);
                        }
                    }
                    Some("Audience") => {
                        if let Some(a) = assertion.as_mut() {
                            a.audiences.push(text);
                        }
                    }
                    Some("AttributeValue") => {
                        if let Some(attr) = current_attribute.as_mut() {
                            attr.1.push(text);
                        }
                    }
                    _ => {}
                }
            }
            Ok(Event::End(ref e)) => {
                let local = e.local_name();
                let name = std::str::from_utf8(local.as_ref()).unwrap_or("");
                match name {
                    "Signature" => in_signature = false,
                    "Attribute" => {
                        if let (Some(a), Some(attr)) =
                            (assertion.as_mut(), current_attribute.take())
                        {
                            a.attributes.push(attr);
                        }
                    }
                    _ => {}
                }
                text_target = None;
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(format!("XML parse error: {e}")),
            _ => {}
        }
    }

    if response.id.is_none() && assertion.is_none() {
        return Err("document is not a SAML Response".to_string());
    }
    response.assertion = assertion;
    Ok(response)
}

/// The response status must be Success.
pub fn validate_status(response: &ParsedResponse) -> Result<(), String> {
    match response.status_code.as_deref() {
        Some(STATUS_SUCCESS) => Ok(()),
        Some(other) => Err(format!("IdP reported failure status: {other}")),
        None => Err("response carries no StatusCode".to_string()),
    }
}

/// Validity window with clock-skew tolerance. A response presented
/// before `NotBefore` or at/after `NotOnOrAfter` fails regardless of
/// signature correctness.
pub fn validate_conditions(
    assertion: &ParsedAssertion,
    now: DateTime<Utc>,
    skew_seconds: i64,
) -> Result<(), String> {
    let skew = Duration::seconds(skew_seconds);
    if let Some(not_before) = assertion.not_before {
        if now < not_before - skew {
            return Err("assertion is not yet valid".to_string());
        }
    }
    if let Some(not_on_or_after) = assertion.not_on_or_after {
        if now >= not_on_or_after + skew {
            return Err("assertion has expired".to_string());
        }
    }
    Ok(())
}

/// The audience restriction must name our entity id.
pub fn validate_audience(assertion: &ParsedAssertion, sp_entity_id: &str) -> Result<(), String> {
    if assertion.audiences.is_empty() {
        // No restriction asserted.
        return Ok(());
    }
    if assertion.audiences.iter().any(|a| a == sp_entity_id) {
        Ok(())
    } else {
        Err(format!(
            "audience restriction does not include {sp_entity_id}"
        ))
    }
}

/// The correlation id the response answers: `InResponseTo` on the
/// Response, falling back to the subject confirmation.
#[must_use]
pub fn correlation_id(response: &ParsedResponse) -> Option<String> {
    response.in_response_to.clone().or_else(|| {
        response
            .assertion
            .as_ref()
            .and_then(|a| a.subject_in_response_to.clone())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_response(not_on_or_after: &str) -> String {
        format!(
            r#"<samlp:Response xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol"
    xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion"
    ID="_resp1" InResponseTo="_req1" Destination="https://sp.example.com/saml/acs">
  <saml:Issuer>https://idp.example.com</saml:Issuer>
  <samlp:Status><samlp:StatusCode Value="{STATUS_SUCCESS}"/></samlp:Status>
  <saml:Assertion ID="_a1" Version="2.0">
    <saml:Issuer>https://idp.example.com</saml:Issuer>
    <saml:Subject>
      <saml:NameID Format="urn:oasis:names:tc:SAML:1.1:nameid-format:emailAddress">user@example.com</saml:NameID>
      <saml:SubjectConfirmation Method="urn:oasis:names:tc:SAML:2.0:cm:bearer">
        <saml:SubjectConfirmationData InResponseTo="_req1" Recipient="https://sp.example.com/saml/acs"/>
      </saml:SubjectConfirmation>
    </saml:Subject>
    <saml:Conditions NotBefore="2020-01-01T00:00:00Z" NotOnOrAfter="{not_on_or_after}">
      <saml:AudienceRestriction>
        <saml:Audience>https://sp.example.com</saml:Audience>
      </saml:AudienceRestriction>
    </saml:Conditions>
    <saml:AuthnStatement AuthnInstant="2020-01-01T00:00:00Z" SessionIndex="_sess42"/>
    <saml:AttributeStatement>
      <saml:Attribute Name="email"><saml:AttributeValue>user@example.com</saml:AttributeValue></saml:Attribute>
      <saml:Attribute Name="groups">
        <saml:AttributeValue>admins</saml:AttributeValue>
        <saml:AttributeValue>ops</saml:AttributeValue>
      </saml:Attribute>
    </saml:AttributeStatement>
  </saml:Assertion>
</samlp:Response>"#
        )
    }

    #[test]
    fn test_parse_extracts_response_fields() {
        let parsed = parse_response(&sample_response("2099-01-01T00:00:00Z")).unwrap();
        assert_eq!(parsed.id.as_deref(), Some("_resp1"));
        assert_eq!(parsed.in_response_to.as_deref(), Some("_req1"));
        assert_eq!(parsed.issuer.as_deref(), Some("https://idp.example.com"));
        assert_eq!(parsed.status_code.as_deref(), Some(STATUS_SUCCESS));
    }

    #[test]
    fn test_parse_extracts_assertion_fields() {
        let parsed = parse_response(&sample_response("2099-01-01T00:00:00Z")).unwrap();
        let assertion = parsed.assertion.unwrap();
        assert_eq!(assertion.id.as_deref(), Some("_a1"));
        assert_eq!(assertion.name_id.as_deref(), Some("user@example.com"));
        assert!(assertion
            .name_id_format
            .as_deref()
            .unwrap()
            .contains("emailAddress"));
        assert_eq!(assertion.session_index.as_deref(), Some("_sess42"));
        assert_eq!(assertion.audiences, vec!["https://sp.example.com"]);
        assert_eq!(assertion.subject_in_response_to.as_deref(), Some("_req1"));
        assert_eq!(
            assertion.attributes,
            vec![
                ("email".to_string(), vec!["user@example.com".to_string()]),
                (
                    "groups".to_string(),
                    vec!["admins".to_string(), "ops".to_string()]
                ),
            ]
        );
    }

    #[test]
    fn test_parse_rejects_non_response() {
        assert!(parse_response("<not-saml/>").is_err());
    }

    #[test]
    fn test_status_failure_is_rejected() {
        let xml = sample_response("2099-01-01T00:00:00Z").replace(
            STATUS_SUCCESS,
            "urn:oasis:names:tc:SAML:2.0:status:Requester",
        );
        let parsed = parse_response(&xml).unwrap();
        let err = validate_status(&parsed).unwrap_err();
        assert!(err.contains("Requester"));
    }

    #[test]
    fn test_expired_window_fails() {
        let parsed = parse_response(&sample_response("2020-01-02T00:00:00Z")).unwrap();
        let assertion = parsed.assertion.unwrap();
        let err = validate_conditions(&assertion, Utc::now(), 30).unwrap_err();
        assert!(err.contains("expired"));
    }

    #[test]
    fn test_window_boundary_respects_skew() {
        let parsed = parse_response(&sample_response("2099-01-01T00:00:00Z")).unwrap();
        let assertion = parsed.assertion.unwrap();

        // Just inside the skew window after expiry still passes.
        let expiry = assertion.not_on_or_after.unwrap();
        assert!(validate_conditions(&assertion, expiry + Duration::seconds(29), 30).is_ok());
        // At expiry + skew it fails.
        assert!(validate_conditions(&assertion, expiry + Duration::seconds(30), 30).is_err());
    }

    #[test]
    fn test_not_yet_valid_fails() {
        let parsed = parse_response(&sample_response("2099-01-01T00:00:00Z")).unwrap();
        let assertion = parsed.assertion.unwrap();
        let before = assertion.not_before.unwrap() - Duration::seconds(31);
        let err = validate_conditions(&assertion, before, 30).unwrap_err();
        assert!(err.contains("not yet valid"));
    }

    #[test]
    fn test_audience_mismatch_fails() {
        let parsed = parse_response(&sample_response("2099-01-01T00:00:00Z")).unwrap();
        let assertion = parsed.assertion.unwrap();
        assert!(validate_audience(&assertion, "https://sp.example.com").is_ok());
        assert!(validate_audience(&assertion, "https://other-sp.example.com").is_err());
    }

    #[test]
    fn test_no_audience_restriction_passes() {
        let assertion = ParsedAssertion::default();
        assert!(validate_audience(&assertion, "https://sp.example.com").is_ok());
    }

    #[test]
    fn test_correlation_id_falls_back_to_subject_confirmation() {
        let xml = sample_response("2099-01-01T00:00:00Z").replace(" InResponseTo=\"_req1\" Destination", " Destination");
        let parsed = parse_response(&xml).unwrap();
        assert!(parsed.in_response_to.is_none());
        assert_eq!(correlation_id(&parsed).as_deref(), Some("_req1"));
    }
}
