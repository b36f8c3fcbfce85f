use crate::secrets::string::SecretString;
use crate::secrets::{SecretManager, SERVICE_NAME};
use sdk::errors::EngineError;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Memoises secret lookups so the keychain is hit once per key.
#[derive(Clone)]
pub struct SecretCache {
    manager: Arc<SecretManager>,
    cache: Arc<RwLock<HashMap<String, SecretString>>>,
}

impl SecretCache {
    pub fn new(manager: Arc<SecretManager>) -> Self {
        Self {
            manager,
            cache: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Cache pre-filled with a fixed value, bypassing env and keychain.
    pub fn with_static(key: &str, value: impl Into<SecretString>) -> Self {
        let cache = Self::new(Arc::new(SecretManager::new(SERVICE_NAME)));
        cache.insert(key, value.into());
        cache
    }

    /// Returns the cached secret, falling back to the manager on a miss.
    pub fn get_secret(&self, key: &str) -> Result<SecretString, EngineError> {
        {
            let cache = self.cache.read().unwrap_or_else(|e| e.into_inner());
            if let Some(secret) = cache.get(key) {
                return Ok(secret.clone());
            }
        }

        let secret = SecretString::new(self.manager.get_secret(key)?);
        self.insert(key, secret.clone());
        Ok(secret)
    }

    fn insert(&self, key: &str, secret: SecretString) {
        let mut cache = self.cache.write().unwrap_or_else(|e| e.into_inner());
        cache.insert(key.to_string(), secret);
    }

    /// Resolve keys up front so a missing credential fails at start-up.
    pub fn preload(&self, keys: &[&str]) -> Result<(), EngineError> {
        for key in keys {
            self.get_secret(key)?;
        }
        Ok(())
    }
}
