//! The signature verification engine.
//!
//! Verification is a fixed pipeline that short-circuits on the first
//! failure: extract → timestamp → canonical payload → digest →
//! constant-time compare. Key-mismatch failures all collapse into one
//! generic reason so the response never reveals which rotating key
//! was tried or where a comparison diverged.

use base64::engine::general_purpose::{STANDARD as BASE64, URL_SAFE_NO_PAD as BASE64URL};
use base64::Engine;
use chrono::Utc;
use ed25519_dalek::Verifier as _;
use hmac::{Hmac, Mac};
use openssl::hash::MessageDigest;
use openssl::pkey::{PKey, Public};
use openssl::sign::Verifier;
use openssl::x509::X509;
use sha1::Sha1;
use sha2::Sha256;
use subtle::ConstantTimeEq;

use castellan_core::CandidateCredentials;

use crate::config::{PayloadFormat, SignatureEncoding, SignatureScheme, WebhookConfig};

/// The one reason reported for any key-material mismatch, replay
/// included.
pub const GENERIC_FAILURE: &str = "signature verification failed";

/// Host-supplied verifier for the `custom` scheme: `(payload,
/// transmitted signature) -> accepted`.
pub type CustomVerifier = dyn Fn(&[u8], &str) -> bool + Send + Sync;

/// Signature material pulled out of the request headers.
#[derive(Debug)]
pub struct ExtractedSignature {
    /// Candidate signatures; embedded-style headers may carry several.
    pub candidates: Vec<String>,
    pub timestamp: Option<i64>,
}

/// A verification that passed, with the inputs the replay key is
/// derived from.
#[derive(Debug)]
pub struct VerifiedSignature {
    pub signature: String,
    pub timestamp: Option<i64>,
}

/// Step 1: pull the signature (and embedded timestamp) out of the
/// configured header.
pub fn extract_signature(
    config: &WebhookConfig,
    candidate: &CandidateCredentials,
) -> Result<ExtractedSignature, String> {
    let header_name = config
        .signature_header
        .as_deref()
        .ok_or_else(|| "signature_header is not configured".to_string())?;
    let raw = candidate
        .header(header_name)
        .ok_or_else(|| "missing signature header".to_string())?;

    if config.timestamp_in_signature_header {
        // Stripe-style `t=<unix>,v1=<sig>[,v1=<sig>...]`.
        let field = config.signature_field.as_deref().unwrap_or("v1");
        let mut candidates = Vec::new();
        let mut timestamp = None;
        for pair in raw.split(',') {
            let Some((k, v)) = pair.trim().split_once('=') else {
                continue;
            };
            if k == "t" {
                timestamp = v.parse::<i64>().ok();
            } else if k == field {
                candidates.push(v.to_string());
            }
        }
        if candidates.is_empty() {
            return Err("missing signature header".to_string());
        }
        return Ok(ExtractedSignature {
            candidates,
            timestamp,
        });
    }

    let signature = match config.signature_prefix.as_deref() {
        Some(prefix) => raw.strip_prefix(prefix).unwrap_or(raw),
        None => raw,
    };

    let timestamp = config
        .timestamp_header
        .as_deref()
        .and_then(|name| candidate.header(name))
        .and_then(|v| v.trim().parse::<i64>().ok());

    Ok(ExtractedSignature {
        candidates: vec![signature.to_string()],
        timestamp,
    })
}

/// Step 2: enforce the staleness bound. Age equal to the tolerance
/// passes; one second past it fails.
pub fn check_timestamp(
    config: &WebhookConfig,
    extracted: &ExtractedSignature,
    now_unix: i64,
) -> Result<Option<i64>, String> {
    if !config.requires_timestamp() {
        return Ok(extracted.timestamp);
    }
    let timestamp = extracted
        .timestamp
        .ok_or_else(|| "missing timestamp".to_string())?;
    let age = (now_unix - timestamp).abs();
    if age > config.tolerance_seconds() {
        return Err("timestamp outside tolerance".to_string());
    }
    Ok(Some(timestamp))
}

/// Step 3: canonical payload — timestamp prefix per the provider
/// rule, then the included-header block, then the raw body bytes.
pub fn build_payload(
    config: &WebhookConfig,
    candidate: &CandidateCredentials,
    timestamp: Option<i64>,
) -> Vec<u8> {
    let mut payload = Vec::with_capacity(candidate.body.len() + 64);

    match (config.effective_payload_format(), timestamp) {
        (PayloadFormat::SlackV0, Some(ts)) => {
            payload.extend_from_slice(format!("v0:{ts}:").as_bytes());
        }
        (PayloadFormat::TimestampDot, Some(ts)) => {
            payload.extend_from_slice(format!("{ts}.").as_bytes());
        }
        _ => {}
    }

    for name in &config.included_headers {
        let value = candidate.header(name).unwrap_or_default();
        payload.extend_from_slice(name.as_bytes());
        payload.push(b':');
        payload.extend_from_slice(value.as_bytes());
        payload.push(b'\n');
    }

    payload.extend_from_slice(&candidate.body);
    payload
}

fn encode_digest(encoding: SignatureEncoding, digest: &[u8]) -> String {
    match encoding {
        SignatureEncoding::Hex => hex::encode(digest),
        SignatureEncoding::Base64 => BASE64.encode(digest),
        SignatureEncoding::Base64url => BASE64URL.encode(digest),
    }
}

fn decode_signature(encoding: SignatureEncoding, signature: &str) -> Option<Vec<u8>> {
    match encoding {
        SignatureEncoding::Hex => hex::decode(signature).ok(),
        SignatureEncoding::Base64 => BASE64.decode(signature).ok(),
        SignatureEncoding::Base64url => BASE64URL.decode(signature).ok(),
    }
}

/// Length-checked constant-time comparison. A length mismatch fails
/// without touching the contents; equal-length inputs are compared
/// without early exit.
pub fn timing_safe_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}

fn compute_hmac(scheme: SignatureScheme, key: &[u8], payload: &[u8]) -> Vec<u8> {
    match scheme {
        SignatureScheme::HmacSha256 => {
            let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(key)
                .expect("HMAC accepts keys of any length");
            mac.update(payload);
            mac.finalize().into_bytes().to_vec()
        }
        SignatureScheme::HmacSha1 => {
            let mut mac = <Hmac<Sha1> as Mac>::new_from_slice(key)
                .expect("HMAC accepts keys of any length");
            mac.update(payload);
            mac.finalize().into_bytes().to_vec()
        }
        _ => unreachable!("compute_hmac called for non-HMAC scheme"),
    }
}

/// Parse RSA public key material: PEM SPKI, PEM certificate, or a
/// bare base64 certificate body.
fn rsa_public_key(material: &str) -> Option<PKey<Public>> {
    if material.contains("-----BEGIN PUBLIC KEY-----") {
        return PKey::public_key_from_pem(material.as_bytes()).ok();
    }
    let pem = if material.contains("-----BEGIN CERTIFICATE-----") {
        material.to_string()
    } else {
        format!(
            "-----BEGIN CERTIFICATE-----\n{}\n-----END CERTIFICATE-----",
            material.trim()
        )
    };
    X509::from_pem(pem.as_bytes()).ok()?.public_key().ok()
}

/// Parse a raw 32-byte Ed25519 public key from hex or base64.
fn ed25519_public_key(material: &str) -> Option<ed25519_dalek::VerifyingKey> {
    let bytes = hex::decode(material.trim())
        .ok()
        .or_else(|| BASE64.decode(material.trim()).ok())?;
    let bytes: [u8; 32] = bytes.try_into().ok()?;
    ed25519_dalek::VerifyingKey::from_bytes(&bytes).ok()
}

/// Steps 4–5: compute/verify against every configured key and compare
/// in constant time. Succeeds on the first key that matches.
pub fn verify_digest(
    config: &WebhookConfig,
    hmac_keys: &[Vec<u8>],
    payload: &[u8],
    extracted: &ExtractedSignature,
    custom: Option<&CustomVerifier>,
) -> Result<(), String> {
    let scheme = config
        .scheme
        .ok_or_else(|| "scheme is not configured".to_string())?;
    let encoding = config.effective_encoding();

    let matched = match scheme {
        SignatureScheme::HmacSha256 | SignatureScheme::HmacSha1 => {
            hmac_keys.iter().any(|key| {
                let expected = encode_digest(encoding, &compute_hmac(scheme, key, payload));
                extracted
                    .candidates
                    .iter()
                    .any(|sig| timing_safe_eq(sig.as_bytes(), expected.as_bytes()))
            })
        }
        SignatureScheme::RsaSha256 => config.public_keys.iter().any(|material| {
            let Some(pkey) = rsa_public_key(material) else {
                return false;
            };
            extracted.candidates.iter().any(|sig| {
                let Some(sig_bytes) = decode_signature(encoding, sig) else {
                    return false;
                };
                Verifier::new(MessageDigest::sha256(), &pkey)
                    .and_then(|mut v| {
                        v.update(payload)?;
                        v.verify(&sig_bytes)
                    })
                    .unwrap_or(false)
            })
        }),
        SignatureScheme::Ed25519 => config.public_keys.iter().any(|material| {
            let Some(key) = ed25519_public_key(material) else {
                return false;
            };
            extracted.candidates.iter().any(|sig| {
                let Some(sig_bytes) = decode_signature(encoding, sig) else {
                    return false;
                };
                let Ok(signature) = ed25519_dalek::Signature::from_slice(&sig_bytes) else {
                    return false;
                };
                key.verify(payload, &signature).is_ok()
            })
        }),
        SignatureScheme::Custom => match custom {
            Some(verifier) => extracted
                .candidates
                .iter()
                .any(|sig| verifier(payload, sig)),
            None => return Err("no custom verifier registered".to_string()),
        },
    };

    if matched {
        Ok(())
    } else {
        Err(GENERIC_FAILURE.to_string())
    }
}

/// Run the whole pipeline against a request.
pub fn verify(
    config: &WebhookConfig,
    hmac_keys: &[Vec<u8>],
    candidate: &CandidateCredentials,
    custom: Option<&CustomVerifier>,
) -> Result<VerifiedSignature, String> {
    let extracted = extract_signature(config, candidate)?;
    let timestamp = check_timestamp(config, &extracted, Utc::now().timestamp())?;
    let payload = build_payload(config, candidate, timestamp);
    verify_digest(config, hmac_keys, &payload, &extracted, custom)?;
    Ok(VerifiedSignature {
        signature: extracted.candidates[0].clone(),
        timestamp,
    })
}
