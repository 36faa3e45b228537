//! XML signature verification for IdP-signed responses.
//!
//! Verifies the enveloped `ds:Signature` carried by a SAML Response
//! (or its Assertion): the reference digest is checked against the
//! signed element with the signature removed, then the canonicalized
//! `SignedInfo` is verified against the IdP's certificate. Several
//! certificates may be configured to ride out IdP key rotation; the
//! signature is accepted if any of them verifies it.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use openssl::hash::MessageDigest;
use openssl::sign::Verifier;
use openssl::x509::X509;
use quick_xml::events::Event;
use quick_xml::Reader;
use xml_canonicalization::Canonicalizer;

/// Signature components pulled out of the document.
struct SignatureInfo {
    signed_info: String,
    signature_value: String,
    signature_algorithm: String,
    digest_algorithm: String,
    reference_uri: String,
    digest_value: String,
}

/// Parse an X.509 certificate from PEM or a bare base64 body.
pub fn parse_certificate(material: &str) -> Result<X509, String> {
    let pem = if material.contains("-----BEGIN CERTIFICATE-----") {
        material.to_string()
    } else {
        format!(
            "-----BEGIN CERTIFICATE-----\n{}\n-----END CERTIFICATE-----",
            material.trim()
        )
    };
    X509::from_pem(pem.as_bytes()).map_err(|e| format!("invalid certificate: {e}"))
}

/// Verify the enveloped signature in `xml` against the candidate
/// certificates. Returns an error when the document carries no
/// signature, the reference digest does not match, or no certificate
/// verifies the signature value.
pub fn verify_enveloped_signature(xml: &str, certificates: &[String]) -> Result<(), String> {
    if certificates.is_empty() {
        return Err("no IdP certificate configured".to_string());
    }

    let info = extract_signature_info(xml)?;
    verify_reference_digest(xml, &info)?;

    let canonical = canonicalize(&info.signed_info)?;
    let signature_bytes = BASE64
        .decode(info.signature_value.replace(['\n', '\r', ' '], ""))
        .map_err(|e| format!("invalid signature encoding: {e}"))?;

    let digest = signature_digest(&info.signature_algorithm)?;

    let mut last_error = "signature does not verify".to_string();
    for material in certificates {
        let cert = match parse_certificate(material) {
            Ok(cert) => cert,
            Err(e) => {
                last_error = e;
                continue;
            }
        };
        let public_key = match cert.public_key() {
            Ok(key) => key,
            Err(e) => {
                last_error = format!("invalid certificate key: {e}");
                continue;
            }
        };
        let verified = Verifier::new(digest, &public_key)
            .and_then(|mut v| {
                v.update(canonical.as_bytes())?;
                v.verify(&signature_bytes)
            })
            .unwrap_or(false);
        if verified {
            return Ok(());
        }
    }
    Err(last_error)
}

fn signature_digest(algorithm: &str) -> Result<MessageDigest, String> {
    match algorithm {
        "http://www.w3.org/2001/04/xmldsig-more#rsa-sha256" | "" => Ok(MessageDigest::sha256()),
        "http://www.w3.org/2000/09/xmldsig#rsa-sha1" => Ok(MessageDigest::sha1()),
        "http://www.w3.org/2001/04/xmldsig-more#rsa-sha384" => Ok(MessageDigest::sha384()),
        "http://www.w3.org/2001/04/xmldsig-more#rsa-sha512" => Ok(MessageDigest::sha512()),
        other => Err(format!("unsupported signature algorithm: {other}")),
    }
}

fn reference_digest(algorithm: &str) -> Result<MessageDigest, String> {
    match algorithm {
        "http://www.w3.org/2001/04/xmlenc#sha256" | "" => Ok(MessageDigest::sha256()),
        "http://www.w3.org/2000/09/xmldsig#sha1" => Ok(MessageDigest::sha1()),
        "http://www.w3.org/2001/04/xmldsig-more#sha384" => Ok(MessageDigest::sha384()),
        "http://www.w3.org/2001/04/xmlenc#sha512" => Ok(MessageDigest::sha512()),
        other => Err(format!("unsupported digest algorithm: {other}")),
    }
}

/// Exclusive XML canonicalization without comments.
fn canonicalize(xml: &str) -> Result<String, String> {
    let mut output = Vec::new();
    Canonicalizer::read_from_str(xml)
        .write_to_writer(&mut output)
        .canonicalize(false)
        .map_err(|e| format!("canonicalization failed: {e}"))?;
    String::from_utf8(output).map_err(|e| format!("canonicalization produced invalid UTF-8: {e}"))
}

/// Walk the document collecting the first signature's components.
fn extract_signature_info(xml: &str) -> Result<SignatureInfo, String> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(false);

    let mut in_signed_info = false;
    let mut in_signature_value = false;
    let mut in_digest_value = false;
    let mut signed_info = String::new();
    let mut signature_value = String::new();
    let mut signature_algorithm = String::new();
    let mut digest_algorithm = String::new();
    let mut digest_value = String::new();
    let mut reference_uri = String::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let local = e.local_name();
                let name = std::str::from_utf8(local.as_ref()).unwrap_or("");

                if name == "SignedInfo" && signed_info.is_empty() {
                    in_signed_info = true;
                }
                // DigestValue lives inside SignedInfo; track it in
                // parallel so its text is captured for the reference
                // check as well as for SignedInfo reconstruction.
                if name == "DigestValue" && in_signed_info {
                    in_digest_value = true;
                }
                if in_signed_info {
                    let tag = std::str::from_utf8(&e).unwrap_or("");
                    signed_info.push('<');
                    signed_info.push_str(tag);
                    signed_info.push('>');
                } else if name == "SignatureValue" && signature_value.is_empty() {
                    in_signature_value = true;
                }
            }
            Ok(Event::Empty(e)) => {
                let local = e.local_name();
                let name = std::str::from_utf8(local.as_ref()).unwrap_or("");

                if in_signed_info {
                    let tag = std::str::from_utf8(&e).unwrap_or("");
                    signed_info.push('<');
                    signed_info.push_str(tag);
                    signed_info.push_str("/>");
                }
                if in_signed_info {
                    match name {
                        "SignatureMethod" | "DigestMethod" | "Reference" => {
                            for attr in e.attributes().flatten() {
                                let key = std::str::from_utf8(attr.key.as_ref()).unwrap_or("");
                                let value =
                                    attr.unescape_value().unwrap_or_default().to_string();
                                match (name, key) {
                                    ("SignatureMethod", "Algorithm") => {
                                        signature_algorithm = value;
                                    }
                                    ("DigestMethod", "Algorithm") => digest_algorithm = value,
                                    ("Reference", "URI") => reference_uri = value,
                                    _ => {}
                                }
                            }
                        }
                        _ => {}
                    }
                }
            }
            Ok(Event::End(e)) => {
                let local = e.local_name();
                let name = std::str::from_utf8(local.as_ref()).unwrap_or("");

                if in_signed_info {
                    signed_info.push_str("</");
                    signed_info.push_str(std::str::from_utf8(e.name().as_ref()).unwrap_or(""));
                    signed_info.push('>');
                    if name == "SignedInfo" {
                        in_signed_info = false;
                    }
                    if name == "DigestValue" {
                        in_digest_value = false;
                    }
                } else if name == "SignatureValue" {
                    in_signature_value = false;
                }
            }
            Ok(Event::Text(e)) => {
                let text = e.unescape().unwrap_or_default();
                if in_signed_info {
                    signed_info.push_str(&text);
                    if in_digest_value && digest_value.is_empty() {
                        digest_value.push_str(&text);
                    }
                } else if in_signature_value {
                    signature_value.push_str(&text);
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(format!("XML parse error: {e}")),
            _ => {}
        }
    }

    // Start-tag attributes (Reference URI etc. may be on Start events
    // rather than Empty ones); re-scan cheaply.
    if reference_uri.is_empty() || signature_algorithm.is_empty() || digest_algorithm.is_empty() {
        scan_start_attributes(
            xml,
            &mut signature_algorithm,
            &mut digest_algorithm,
            &mut reference_uri,
        )?;
    }

    if signed_info.is_empty() {
        return Err("document carries no SignedInfo element".to_string());
    }
    if signature_value.is_empty() {
        return Err("document carries no SignatureValue element".to_string());
    }

    Ok(SignatureInfo {
        signed_info,
        signature_value,
        signature_algorithm,
        digest_algorithm,
        reference_uri,
        digest_value,
    })
}

fn scan_start_attributes(
    xml: &str,
    signature_algorithm: &mut String,
    digest_algorithm: &mut String,
    reference_uri: &mut String,
) -> Result<(), String> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(false);
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                let local = e.local_name();
                let name = std::str::from_utf8(local.as_ref()).unwrap_or("");
                if matches!(name, "SignatureMethod" | "DigestMethod" | "Reference") {
                    for attr in e.attributes().flatten() {
                        let key = std::str::from_utf8(attr.key.as_ref()).unwrap_or("");
                        let value = attr.unescape_value().unwrap_or_default().to_string();
                        match (name, key) {
                            ("SignatureMethod", "Algorithm") if signature_algorithm.is_empty() => {
                                *signature_algorithm = value;
                            }
                            ("DigestMethod", "Algorithm") if digest_algorithm.is_empty() => {
                                *digest_algorithm = value;
                            }
                            ("Reference", "URI") if reference_uri.is_empty() => {
                                *reference_uri = value;
                            }
                            _ => {}
                        }
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(format!("XML parse error: {e}")),
            _ => {}
        }
    }
    Ok(())
}

/// Check the reference digest over the signed element with the
/// signature removed (enveloped-signature transform).
fn verify_reference_digest(xml: &str, info: &SignatureInfo) -> Result<(), String> {
    let element_id = info.reference_uri.trim_start_matches('#');

    let content = if element_id.is_empty() {
        xml.to_string()
    } else {
        extract_element_by_id(xml, element_id)?
    };
    let without_signature = remove_signature_element(&content);
    let canonical = canonicalize(&without_signature)?;

    let digest_kind = reference_digest(&info.digest_algorithm)?;
    let computed = openssl::hash::hash(digest_kind, canonical.as_bytes())
        .map_err(|e| format!("digest computation failed: {e}"))?;
    let computed_b64 = BASE64.encode(computed);

    let expected = info.digest_value.replace(['\n', '\r', ' '], "");
    if computed_b64 != expected {
        return Err("reference digest mismatch".to_string());
    }
    Ok(())
}

/// Slice out the element whose `ID` attribute matches.
fn extract_element_by_id(xml: &str, element_id: &str) -> Result<String, String> {
    let id_pattern = format!("ID=\"{element_id}\"");
    let id_position = xml
        .find(&id_pattern)
        .ok_or_else(|| format!("referenced element not found: {element_id}"))?;

    let open_tag_start = xml[..id_position].rfind('<').unwrap_or(0);
    let tag_name = xml[open_tag_start..]
        .trim_start_matches('<')
        .split([' ', '\n', '\t', '>'])
        .next()
        .unwrap_or("");

    let close_tag = format!("</{tag_name}");
    let close_position = xml[open_tag_start..]
        .find(&close_tag)
        .map(|p| open_tag_start + p)
        .ok_or_else(|| "signed element is not well-formed".to_string())?;
    let element_end = xml[close_position..]
        .find('>')
        .map(|p| close_position + p + 1)
        .ok_or_else(|| "signed element is not well-formed".to_string())?;

    Ok(xml[open_tag_start..element_end].to_string())
}

/// Drop the first `Signature` element (with or without a namespace
/// prefix) from the document.
fn remove_signature_element(xml: &str) -> String {
    for (open, close) in [
        ("<ds:Signature", "</ds:Signature>"),
        ("<Signature", "</Signature>"),
    ] {
        if let (Some(start), Some(end)) = (xml.find(open), xml.find(close)) {
            if start < end {
                let mut result = String::with_capacity(xml.len());
                result.push_str(&xml[..start]);
                result.push_str(&xml[end + close.len()..]);
                return result;
            }
        }
    }
    xml.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_CERT_BASE64: &str = "MIIC/zCCAeegAwIBAgIUeBumeIsMNakKlofC3AioissDusswDQYJKoZIhvcNAQELBQAwDzENMAsGA1UEAwwEdGVzdDAeFw0yNjAxMjMwMzQzMDRaFw0yNzAxMjMwMzQzMDRaMA8xDTALBgNVBAMMBHRlc3QwggEiMA0GCSqGSIb3DQEBAQUAA4IBDwAwggEKAoIBAQCk+cG6tSoKRZ0LxMcY3E0oMirafnj7qeSVhDv8LQLuocklq8tIzOvVN1HEb/ZZyuD7E0Xy03SOw9ZeTy0FWCqXcDWpGD2+RbdMZku8q6G35joLq+dW/95kK+dsvWu427ySPVT0AsxzH6VuhdiNQY8ncNc0jV82aMgLt74FGG61xWfwt3Su2NEJ4ZUj9M+0q/o1tmDCBIYF7hUsI5F3qLV9Ivm8UU2C/Uuqxnb3ZtsG5wvnCgi720cU2j+1C0hmt1wf1zUgr18Q1UZ92iQeXHW0FEg3XmULMh3/5GehrP6RyGhegRs4stOdaEZFojW93wQ/YGYQjQmIXW32dq4nyNQ9AgMBAAGjUzBRMB0GA1UdDgQWBBS/LUDCdZWGFd4Ra/rLdqUT2WKkWzAfBgNVHSMEGDAWgBS/LUDCdZWGFd4Ra/rLdqUT2WKkWzAPBgNVHRMBAf8EBTADAQH/MA0GCSqGSIb3DQEBCwUAA4IBAQBUAol6uvWDwrX1XZk7Fzi0zLo4vPslAPxzestYgla+wbmL/Aeo+H3zw5IDmVxq4EOACKHZmAJ7QzVY4XpHtq60zj4HpqGqCJELCh53rrIfJNweIGUxYzMPYueq8aeyFgnGzxIUtLDdJUrrc6kuVDv3g0vVY7loS28Zjps+E4/W7s2dPhsco73dc0VZJra77xGh2F7pYdIVw84Jf1/QEP7G+qT00T3iLtw8TueXFhkYskhQx24/F1+Giwq9Lki2Dgf8TLpXtkcy/aqfRguEFHZhsLOKh09hTj+7qXLoUp5iCz7fA5hrUKjvYxyeYGatyLExkqIG4E3nH5UrOWH+t6Rp";

    #[test]
    fn test_parse_certificate_without_headers() {
        assert!(parse_certificate(TEST_CERT_BASE64).is_ok());
    }

    #[test]
    fn test_parse_certificate_with_headers() {
        let pem = format!(
            "-----BEGIN CERTIFICATE-----\n{TEST_CERT_BASE64}\n-----END CERTIFICATE-----"
        );
        assert!(parse_certificate(&pem).is_ok());
    }

    #[test]
    fn test_parse_garbage_certificate_fails() {
        assert!(parse_certificate("not a certificate").is_err());
    }

    #[test]
    fn test_unsigned_document_is_rejected() {
        let xml = r#"<samlp:Response xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol" ID="_r1"><saml:Assertion xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion"/></samlp:Response>"#;
        let err =
            verify_enveloped_signature(xml, &[TEST_CERT_BASE64.to_string()]).unwrap_err();
        assert!(err.contains("SignedInfo"));
    }

    #[test]
    fn test_no_certificates_is_rejected() {
        let err = verify_enveloped_signature("<Response/>", &[]).unwrap_err();
        assert!(err.contains("no IdP certificate"));
    }

    #[test]
    fn test_remove_signature_element_with_prefix() {
        let xml = r#"<Response ID="r"><ds:Signature>sig</ds:Signature><Issuer>idp</Issuer></Response>"#;
        let stripped = remove_signature_element(xml);
        assert!(!stripped.contains("Signature"));
        assert!(stripped.contains("Issuer"));
    }

    #[test]
    fn test_remove_signature_element_without_prefix() {
        let xml = r#"<Response><Signature>sig</Signature><Issuer>idp</Issuer></Response>"#;
        let stripped = remove_signature_element(xml);
        assert!(!stripped.contains("Signature"));
    }

    #[test]
    fn test_extract_element_by_id() {
        let xml = r#"<Response ID="_outer"><Assertion ID="_a1" Version="2.0"><Subject>u</Subject></Assertion></Response>"#;
        let element = extract_element_by_id(xml, "_a1").unwrap();
        assert!(element.starts_with("<Assertion"));
        assert!(element.ends_with("</Assertion>"));
        assert!(element.contains("<Subject>u</Subject>"));
    }

    #[test]
    fn test_extract_unknown_id_fails() {
        assert!(extract_element_by_id("<Response ID=\"_r\"/>", "_missing").is_err());
    }

    #[test]
    fn test_signature_algorithm_mapping() {
        assert!(signature_digest("http://www.w3.org/2001/04/xmldsig-more#rsa-sha256").is_ok());
        assert!(signature_digest("http://www.w3.org/2000/09/xmldsig#rsa-sha1").is_ok());
        assert!(signature_digest("urn:example:unknown").is_err());
    }
}
