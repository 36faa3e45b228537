//! The `backend:path#key` reference grammar.
//!
//! A reference identifies where a secret lives; it never contains the
//! secret. Parsing produces one variant per backend so call sites
//! match on the variant instead of re-splitting strings.

use std::fmt;
use std::str::FromStr;

use crate::SecretError;

/// A parsed secret reference.
///
/// Grammar: `backend:path[#key]`, where `backend` selects the
/// variant. The AWS form accepts an optional leading region segment:
/// `aws:eu-west-1:prod/app#key`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SecretReference {
    /// Environment variable, development only: `env:WEBHOOK_SECRET`.
    Env { var: String },
    /// Vault KV path: `vault:kv/data/webhooks#signing_key`.
    Vault { path: String, key: Option<String> },
    /// AWS Secrets Manager: `aws:[region:]secret-id#key`.
    Aws {
        secret_id: String,
        key: Option<String>,
        region: Option<String>,
    },
    /// Filesystem path: `file:/run/secrets/idp_cert#pem`.
    File { path: String, key: Option<String> },
}

impl SecretReference {
    /// The backend name this reference targets.
    #[must_use]
    pub fn backend(&self) -> &'static str {
        match self {
            Self::Env { .. } => "env",
            Self::Vault { .. } => "vault",
            Self::Aws { .. } => "aws",
            Self::File { .. } => "file",
        }
    }

    /// Whether a string looks like a reference rather than an inline
    /// value. Used by plugin configs that accept either.
    #[must_use]
    pub fn looks_like_reference(s: &str) -> bool {
        matches!(
            s.split_once(':').map(|(b, _)| b),
            Some("env" | "vault" | "aws" | "file")
        )
    }
}

impl FromStr for SecretReference {
    type Err = SecretError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let invalid = |detail: &str| SecretError::InvalidReference {
            input: input.to_string(),
            detail: detail.to_string(),
        };

        let (backend, rest) = input
            .split_once(':')
            .ok_or_else(|| invalid("expected 'backend:path' form"))?;
        if rest.is_empty() {
            return Err(invalid("empty path"));
        }

        let (path, key) = match rest.split_once('#') {
            Some((_, k)) if k.is_empty() => return Err(invalid("empty key after '#'")),
            Some((p, k)) => (p.to_string(), Some(k.to_string())),
            None => (rest.to_string(), None),
        };
        if path.is_empty() {
            return Err(invalid("empty path"));
        }

        match backend {
            "env" => {
                if key.is_some() {
                    return Err(invalid("env references do not take a '#key'"));
                }
                Ok(Self::Env { var: path })
            }
            "vault" => Ok(Self::Vault { path, key }),
            "aws" => {
                // Optional leading region: aws:eu-west-1:prod/app#key
                let (region, secret_id) = match path.split_once(':') {
                    Some((r, id)) if !id.is_empty() => (Some(r.to_string()), id.to_string()),
                    _ => (None, path),
                };
                Ok(Self::Aws {
                    secret_id,
                    key,
                    region,
                })
            }
            "file" => Ok(Self::File { path, key }),
            other => Err(invalid(&format!(
                "unknown backend '{other}' (expected env, vault, aws, or file)"
            ))),
        }
    }
}

impl fmt::Display for SecretReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Env { var } => write!(f, "env:{var}"),
            Self::Vault { path, key } => {
                write!(f, "vault:{path}")?;
                if let Some(k) = key {
                    write!(f, "#{k}")?;
                }
                Ok(())
            }
            Self::Aws {
                secret_id,
                key,
                region,
            } => {
                write!(f, "aws:")?;
                if let Some(r) = region {
                    write!(f, "{r}:")?;
                }
                write!(f, "{secret_id}")?;
                if let Some(k) = key {
                    write!(f, "#{k}")?;
                }
                Ok(())
            }
            Self::File { path, key } => {
                write!(f, "file:{path}")?;
                if let Some(k) = key {
                    write!(f, "#{k}")?;
                }
                Ok(())
            }
        }
    }
}
