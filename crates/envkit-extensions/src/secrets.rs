//! Secret resolution contract
//!
//! The engine only ever asks a [`SecretsProvider`] for a value and hands it
//! to the install subprocess as an environment variable. Values are never
//! logged, and [`SecretValue`]'s `Debug` output is redacted.

use std::collections::HashMap;
use std::fmt;

use envkit_catalog::{ExtensionDefinition, SecretRef};

use crate::error::ExecutionError;

/// A resolved secret.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretValue(String);

impl SecretValue {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The raw value. Only for handing to a subprocess.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretValue(<redacted>)")
    }
}

/// Source of secret values. `None` means not found.
pub trait SecretsProvider: Send + Sync {
    fn resolve(&self, secret: &SecretRef) -> Option<SecretValue>;
}

/// Reads secrets from the engine's own environment.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvSecretsProvider;

impl SecretsProvider for EnvSecretsProvider {
    fn resolve(&self, secret: &SecretRef) -> Option<SecretValue> {
        std::env::var(secret.lookup_key())
            .ok()
            .filter(|v| !v.is_empty())
            .map(SecretValue)
    }
}

/// Fixed in-memory secrets.
#[derive(Debug, Default, Clone)]
pub struct StaticSecretsProvider {
    values: HashMap<String, SecretValue>,
}

impl StaticSecretsProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: &str) -> Self {
        self.values.insert(key.to_string(), SecretValue::new(value));
        self
    }
}

impl SecretsProvider for StaticSecretsProvider {
    fn resolve(&self, secret: &SecretRef) -> Option<SecretValue> {
        self.values.get(secret.lookup_key()).cloned()
    }
}

/// Resolve every secret `def` declares, as `(env var name, value)` pairs.
///
/// A missing required secret fails the whole step; a missing optional one
/// is left out.
pub fn resolve_secrets(
    provider: &dyn SecretsProvider,
    def: &ExtensionDefinition,
) -> Result<Vec<(String, SecretValue)>, ExecutionError> {
    let mut resolved = Vec::with_capacity(def.secrets.len());
    for secret in &def.secrets {
        match provider.resolve(secret) {
            Some(value) => resolved.push((secret.name.clone(), value)),
            None if secret.required => {
                return Err(ExecutionError::SecretUnavailable {
                    extension: def.id.clone(),
                    secret: secret.name.clone(),
                });
            }
            None => {
                tracing::debug!(extension = %def.id, secret = %secret.name, "Optional secret not provided");
            }
        }
    }
    Ok(resolved)
}
