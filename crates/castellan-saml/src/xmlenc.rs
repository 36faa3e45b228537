//! EncryptedAssertion decryption.
//!
//! Supports the common SAML xmlenc profile: an `EncryptedKey`
//! transported with RSA-OAEP (or RSA-1.5) unwraps the data key, which
//! decrypts the assertion with AES-CBC or AES-GCM. Anything outside
//! that profile fails validation explicitly rather than being
//! silently skipped.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use openssl::pkey::PKey;
use openssl::rsa::Padding;
use openssl::symm::{decrypt_aead, Cipher, Crypter, Mode};
use quick_xml::events::Event;
use quick_xml::Reader;

const ALG_RSA_OAEP: &str = "http://www.w3.org/2001/04/xmlenc#rsa-oaep-mgf1p";
const ALG_RSA_15: &str = "http://www.w3.org/2001/04/xmlenc#rsa-1_5";

/// Pieces of one `EncryptedData` element.
#[derive(Debug, Default)]
struct EncryptedParts {
    data_algorithm: String,
    key_algorithm: String,
    encrypted_key: Option<Vec<u8>>,
    ciphertext: Option<Vec<u8>>,
}

/// Decrypt the first `EncryptedAssertion` in `xml` and return the
/// plaintext assertion XML.
pub fn decrypt_assertion(xml: &str, private_key_pem: &str) -> Result<String, String> {
    let parts = extract_encrypted_parts(xml)?;

    let encrypted_key = parts
        .encrypted_key
        .ok_or_else(|| "EncryptedAssertion carries no EncryptedKey".to_string())?;
    let ciphertext = parts
        .ciphertext
        .ok_or_else(|| "EncryptedAssertion carries no CipherValue".to_string())?;

    let data_key = unwrap_key(&encrypted_key, &parts.key_algorithm, private_key_pem)?;
    let plaintext = decrypt_data(&ciphertext, &data_key, &parts.data_algorithm)?;

    String::from_utf8(plaintext).map_err(|e| format!("decrypted assertion is not UTF-8: {e}"))
}

/// Whether a response document contains an encrypted assertion.
#[must_use]
pub fn has_encrypted_assertion(xml: &str) -> bool {
    xml.contains("EncryptedAssertion")
}

/// Replace the `EncryptedAssertion` element with the decrypted
/// assertion so the normal parse path sees plaintext.
pub fn splice_decrypted(xml: &str, private_key_pem: &str) -> Result<String, String> {
    let assertion = decrypt_assertion(xml, private_key_pem)?;

    let start = xml
        .find("<saml:EncryptedAssertion")
        .or_else(|| xml.find("<EncryptedAssertion"))
        .ok_or_else(|| "no EncryptedAssertion element".to_string())?;
    let close = ["</saml:EncryptedAssertion>", "</EncryptedAssertion>"]
        .iter()
        .find_map(|tag| xml.find(tag).map(|p| p + tag.len()))
        .ok_or_else(|| "EncryptedAssertion is not well-formed".to_string())?;

    let mut result = String::with_capacity(xml.len() + assertion.len());
    result.push_str(&xml[..start]);
    result.push_str(&assertion);
    result.push_str(&xml[close..]);
    Ok(result)
}

fn unwrap_key(
    encrypted_key: &[u8],
    algorithm: &str,
    private_key_pem: &str,
) -> Result<Vec<u8>, String> {
    let padding = match algorithm {
        ALG_RSA_OAEP | "" => Padding::PKCS1_OAEP,
        ALG_RSA_15 => Padding::PKCS1,
        other => return Err(format!("unsupported key transport algorithm: {other}")),
    };

    let pkey = PKey::private_key_from_pem(private_key_pem.as_bytes())
        .map_err(|e| format!("invalid decryption key: {e}"))?;
    let rsa = pkey
        .rsa()
        .map_err(|e| format!("decryption key is not RSA: {e}"))?;

    let mut buffer = vec![0u8; rsa.size() as usize];
    let length = rsa
        .private_decrypt(encrypted_key, &mut buffer, padding)
        .map_err(|e| format!("key unwrap failed: {e}"))?;
    buffer.truncate(length);
    Ok(buffer)
}

fn decrypt_data(ciphertext: &[u8], key: &[u8], algorithm: &str) -> Result<Vec<u8>, String> {
    match algorithm {
        "http://www.w3.org/2001/04/xmlenc#aes128-cbc" => {
            decrypt_cbc(ciphertext, key, Cipher::aes_128_cbc())
        }
        "http://www.w3.org/2001/04/xmlenc#aes256-cbc" => {
            decrypt_cbc(ciphertext, key, Cipher::aes_256_cbc())
        }
        "http://www.w3.org/2009/xmlenc11#aes128-gcm" => {
            decrypt_gcm(ciphertext, key, Cipher::aes_128_gcm())
        }
        "http://www.w3.org/2009/xmlenc11#aes256-gcm" => {
            decrypt_gcm(ciphertext, key, Cipher::aes_256_gcm())
        }
        other => Err(format!("unsupported data encryption algorithm: {other}")),
    }
}

/// XML-ENC CBC: IV-prefixed ciphertext with the pad length in the
/// last byte (pad content is arbitrary, so PKCS7 verification does
/// not apply).
fn decrypt_cbc(ciphertext: &[u8], key: &[u8], cipher: Cipher) -> Result<Vec<u8>, String> {
    let iv_len = cipher.iv_len().unwrap_or(16);
    if ciphertext.len() <= iv_len {
        return Err("ciphertext shorter than its IV".to_string());
    }
    let (iv, body) = ciphertext.split_at(iv_len);

    let mut crypter = Crypter::new(cipher, Mode::Decrypt, key, Some(iv))
        .map_err(|e| format!("decryption setup failed: {e}"))?;
    crypter.pad(false);

    let mut plaintext = vec![0u8; body.len() + cipher.block_size()];
    let mut count = crypter
        .update(body, &mut plaintext)
        .map_err(|e| format!("decryption failed: {e}"))?;
    count += crypter
        .finalize(&mut plaintext[count..])
        .map_err(|e| format!("decryption failed: {e}"))?;
    plaintext.truncate(count);

    let pad_len = *plaintext.last().ok_or_else(|| "empty plaintext".to_string())? as usize;
    if pad_len == 0 || pad_len > plaintext.len() {
        return Err("invalid padding".to_string());
    }
    plaintext.truncate(plaintext.len() - pad_len);
    Ok(plaintext)
}

/// XML-ENC GCM: 12-byte IV prefix, 16-byte tag suffix.
fn decrypt_gcm(ciphertext: &[u8], key: &[u8], cipher: Cipher) -> Result<Vec<u8>, String> {
    const IV_LEN: usize = 12;
    const TAG_LEN: usize = 16;
    if ciphertext.len() <= IV_LEN + TAG_LEN {
        return Err("ciphertext shorter than IV and tag".to_string());
    }
    let (iv, rest) = ciphertext.split_at(IV_LEN);
    let (body, tag) = rest.split_at(rest.len() - TAG_LEN);

    decrypt_aead(cipher, key, Some(iv), &[], body, tag)
        .map_err(|e| format!("decryption failed: {e}"))
}

fn extract_encrypted_parts(xml: &str) -> Result<EncryptedParts, String> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut parts = EncryptedParts::default();
    let mut in_encrypted_key = false;
    let mut in_cipher_value = false;
    let mut cipher_value = String::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                let local = e.local_name();
                let name = std::str::from_utf8(local.as_ref()).unwrap_or("");
                match name {
                    "EncryptedKey" => in_encrypted_key = true,
                    "EncryptionMethod" => {
                        for attr in e.attributes().flatten() {
                            if attr.key.as_ref() == b"Algorithm" {
                                let value =
                                    attr.unescape_value().unwrap_or_default().to_string();
                                if in_encrypted_key {
                                    parts.key_algorithm = value;
                                } else {
                                    parts.data_algorithm = value;
                                }
                            }
                        }
                    }
                    "CipherValue" => {
                        in_cipher_value = true;
                        cipher_value.clear();
                    }
                    _ => {}
                }
            }
            Ok(Event::Text(e)) if in_cipher_value => {
                cipher_value.push_str(&e.unescape().unwrap_or_default());
            }
            Ok(Event::End(e)) => {
                let local = e.local_name();
                let name = std::str::from_utf8(local.as_ref()).unwrap_or("");
                match name {
                    "EncryptedKey" => in_encrypted_key = false,
                    "CipherValue" => {
                        in_cipher_value = false;
                        let decoded = BASE64
                            .decode(cipher_value.replace(['\n', '\r', ' '], ""))
                            .map_err(|e| format!("invalid CipherValue encoding: {e}"))?;
                        if in_encrypted_key {
                            parts.encrypted_key = Some(decoded);
                        } else if parts.ciphertext.is_none() {
                            parts.ciphertext = Some(decoded);
                        }
                    }
                    _ => {}
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(format!("XML parse error: {e}")),
            _ => {}
        }
    }

    if parts.encrypted_key.is_none() && parts.ciphertext.is_none() {
        return Err("no EncryptedData found".to_string());
    }
    Ok(parts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use openssl::rsa::Rsa;
    use openssl::symm::encrypt_aead;

    const ASSERTION: &str = r#"<saml:Assertion xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion" ID="_enc1" Version="2.0"><saml:Issuer>https://idp.example.com</saml:Issuer></saml:Assertion>"#;

    fn rsa_keypair() -> (PKey<openssl::pkey::Private>, String) {
        let rsa = Rsa::generate(2048).unwrap();
        let pkey = PKey::from_rsa(rsa).unwrap();
        let pem = String::from_utf8(pkey.private_key_to_pem_pkcs8().unwrap()).unwrap();
        (pkey, pem)
    }

    /// Encrypt an assertion the way an IdP would: AES-128-CBC data
    /// cipher with XML-ENC padding, RSA-OAEP key transport.
    fn build_encrypted_assertion(pkey: &PKey<openssl::pkey::Private>) -> String {
        let data_key: [u8; 16] = [0x42; 16];
        let iv: [u8; 16] = [0x17; 16];

        // XML-ENC padding: fill to the block boundary, last byte is
        // the pad length.
        let mut padded = ASSERTION.as_bytes().to_vec();
        let pad_len = 16 - (padded.len() % 16);
        padded.extend(std::iter::repeat(0u8).take(pad_len - 1));
        padded.push(pad_len as u8);

        let mut crypter =
            Crypter::new(Cipher::aes_128_cbc(), Mode::Encrypt, &data_key, Some(&iv)).unwrap();
        crypter.pad(false);
        let mut ciphertext = vec![0u8; padded.len() + 16];
        let mut count = crypter.update(&padded, &mut ciphertext).unwrap();
        count += crypter.finalize(&mut ciphertext[count..]).unwrap();
        ciphertext.truncate(count);

        let mut iv_and_body = iv.to_vec();
        iv_and_body.extend_from_slice(&ciphertext);

        let rsa = pkey.rsa().unwrap();
        let mut wrapped = vec![0u8; rsa.size() as usize];
        let wrapped_len = rsa
            .public_encrypt(&data_key, &mut wrapped, Padding::PKCS1_OAEP)
            .unwrap();
        wrapped.truncate(wrapped_len);

        format!(
            r#"<saml:EncryptedAssertion xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion"><xenc:EncryptedData xmlns:xenc="http://www.w3.org/2001/04/xmlenc#"><xenc:EncryptionMethod Algorithm="http://www.w3.org/2001/04/xmlenc#aes128-cbc"/><ds:KeyInfo xmlns:ds="http://www.w3.org/2000/09/xmldsig#"><xenc:EncryptedKey><xenc:EncryptionMethod Algorithm="{ALG_RSA_OAEP}"/><xenc:CipherData><xenc:CipherValue>{}</xenc:CipherValue></xenc:CipherData></xenc:EncryptedKey></ds:KeyInfo><xenc:CipherData><xenc:CipherValue>{}</xenc:CipherValue></xenc:CipherData></xenc:EncryptedData></saml:EncryptedAssertion>"#,
            BASE64.encode(&wrapped),
            BASE64.encode(&iv_and_body),
        )
    }

    #[test]
    fn test_decrypt_round_trip() {
        let (pkey, pem) = rsa_keypair();
        let encrypted = build_encrypted_assertion(&pkey);
        let decrypted = decrypt_assertion(&encrypted, &pem).unwrap();
        assert_eq!(decrypted, ASSERTION);
    }

    #[test]
    fn test_splice_replaces_encrypted_element() {
        let (pkey, pem) = rsa_keypair();
        let encrypted = build_encrypted_assertion(&pkey);
        let response = format!(
            r#"<samlp:Response xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol">{encrypted}</samlp:Response>"#
        );
        let spliced = splice_decrypted(&response, &pem).unwrap();
        assert!(!spliced.contains("EncryptedAssertion"));
        assert!(spliced.contains("<saml:Assertion"));
        assert!(spliced.contains("https://idp.example.com"));
    }

    #[test]
    fn test_wrong_key_fails() {
        let (pkey, _) = rsa_keypair();
        let (_, other_pem) = rsa_keypair();
        let encrypted = build_encrypted_assertion(&pkey);
        assert!(decrypt_assertion(&encrypted, &other_pem).is_err());
    }

    #[test]
    fn test_unsupported_data_algorithm_fails() {
        let err = decrypt_data(&[0u8; 64], &[0u8; 16], "urn:example:des").unwrap_err();
        assert!(err.contains("unsupported data encryption"));
    }

    #[test]
    fn test_gcm_round_trip() {
        let key = [0x11u8; 16];
        let iv = [0x07u8; 12];
        let mut tag = [0u8; 16];
        let body =
            encrypt_aead(Cipher::aes_128_gcm(), &key, Some(&iv), &[], b"<x/>", &mut tag).unwrap();

        let mut ciphertext = iv.to_vec();
        ciphertext.extend_from_slice(&body);
        ciphertext.extend_from_slice(&tag);

        let plain = decrypt_data(
            &ciphertext,
            &key,
            "http://www.w3.org/2009/xmlenc11#aes128-gcm",
        )
        .unwrap();
        assert_eq!(plain, b"<x/>");
    }

    #[test]
    fn test_has_encrypted_assertion() {
        assert!(has_encrypted_assertion("<a><EncryptedAssertion/></a>"));
        assert!(!has_encrypted_assertion("<a><Assertion/></a>"));
    }
}
