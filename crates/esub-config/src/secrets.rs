//! Runtime secret resolution.
//!
//! # Contract
//! - Config stores only env var NAMES (see [`CredentialEnvNames`]).
//! - Callers invoke [`resolve_secrets`] once at startup and pass the result
//!   into constructors; nothing else reads these env vars.
//! - `Debug` redacts every value; errors name the variable, never the value.
//!
//! The app client id and secret are required. The access token is optional:
//! without it the daemon still boots, but registration waits on the
//! external authorization flow.

use anyhow::{bail, Result};

use crate::settings::CredentialEnvNames;

#[derive(Clone)]
pub struct ResolvedSecrets {
    pub client_id: String,
    pub client_secret: String,
    pub access_token: Option<String>,
}

impl std::fmt::Debug for ResolvedSecrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedSecrets")
            .field("client_id", &"<REDACTED>")
            .field("client_secret", &"<REDACTED>")
            .field(
                "access_token",
                &self.access_token.as_ref().map(|_| "<REDACTED>"),
            )
            .finish()
    }
}

/// Resolve a named environment variable.
/// Returns `None` if the variable is unset or blank.
fn resolve_env(var_name: &str) -> Option<String> {
    match std::env::var(var_name) {
        Ok(v) if !v.trim().is_empty() => Some(v.trim().to_string()),
        _ => None,
    }
}

pub fn resolve_secrets(names: &CredentialEnvNames) -> Result<ResolvedSecrets> {
    let Some(client_id) = resolve_env(&names.client_id_env) else {
        bail!(
            "SECRETS_MISSING: required env var '{}' (client id) is not set or empty",
            names.client_id_env
        );
    };
    let Some(client_secret) = resolve_env(&names.client_secret_env) else {
        bail!(
            "SECRETS_MISSING: required env var '{}' (client secret) is not set or empty",
            names.client_secret_env
        );
    };

    Ok(ResolvedSecrets {
        client_id,
        client_secret,
        access_token: resolve_env(&names.access_token_env),
    })
}
