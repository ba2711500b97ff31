use crate::infrastructure::error::InfraError;
use std::sync::Mutex;

pub const LOG_STORE_SERVICE: &str = "studyroom.logstore";

/// Secret storage for the remote log store's API key.
pub trait CredentialStore: Send + Sync {
    fn save_api_key(&self, api_key: &str) -> Result<(), InfraError>;
    fn load_api_key(&self) -> Result<Option<String>, InfraError>;
    fn delete_api_key(&self) -> Result<(), InfraError>;
}

fn normalized_key(api_key: &str) -> Result<&str, InfraError> {
    let api_key = api_key.trim();
    if api_key.is_empty() {
        return Err(InfraError::Credential("api key must not be empty".to_string()));
    }
    Ok(api_key)
}

#[derive(Debug, Clone)]
pub struct KeyringCredentialStore {
    service_name: String,
    account_name: String,
}

impl KeyringCredentialStore {
    pub fn new(service_name: impl Into<String>, account_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            account_name: account_name.into(),
        }
    }

    fn entry(&self) -> Result<keyring::Entry, InfraError> {
        keyring::Entry::new(&self.service_name, &self.account_name)
            .map_err(|error| InfraError::Credential(error.to_string()))
    }
}

impl Default for KeyringCredentialStore {
    fn default() -> Self {
        Self::new(LOG_STORE_SERVICE, "default")
    }
}

impl CredentialStore for KeyringCredentialStore {
    fn save_api_key(&self, api_key: &str) -> Result<(), InfraError> {
        let api_key = normalized_key(api_key)?;
        self.entry()?
            .set_password(api_key)
            .map_err(|error| InfraError::Credential(error.to_string()))
    }

    fn load_api_key(&self) -> Result<Option<String>, InfraError> {
        match self.entry()?.get_password() {
            Ok(value) if value.trim().is_empty() => Ok(None),
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(error) => Err(InfraError::Credential(error.to_string())),
        }
    }

    fn delete_api_key(&self) -> Result<(), InfraError> {
        match self.entry()?.delete_credential() {
            Ok(_) => Ok(()),
            Err(keyring::Error::NoEntry) => Ok(()),
            Err(error) => Err(InfraError::Credential(error.to_string())),
        }
    }
}

#[derive(Debug, Default)]
pub struct InMemoryCredentialStore {
    api_key: Mutex<Option<String>>,
}

impl InMemoryCredentialStore {
    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Option<String>>, InfraError> {
        self.api_key
            .lock()
            .map_err(|error| InfraError::Credential(format!("in-memory lock poisoned: {error}")))
    }
}

impl CredentialStore for InMemoryCredentialStore {
    fn save_api_key(&self, api_key: &str) -> Result<(), InfraError> {
        let api_key = normalized_key(api_key)?;
        *self.lock()? = Some(api_key.to_string());
        Ok(())
    }

    fn load_api_key(&self) -> Result<Option<String>, InfraError> {
        Ok(self.lock()?.clone())
    }

    fn delete_api_key(&self) -> Result<(), InfraError> {
        *self.lock()? = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_store_saves_trimmed_key() {
        let store = InMemoryCredentialStore::default();
        assert_eq!(store.load_api_key().expect("load"), None);
        store.save_api_key("  anon-key \n").expect("save");
        assert_eq!(store.load_api_key().expect("load").as_deref(), Some("anon-key"));
        store.delete_api_key().expect("delete");
        assert_eq!(store.load_api_key().expect("load"), None);
    }

    #[test]
    fn blank_keys_are_rejected() {
        let store = InMemoryCredentialStore::default();
        assert!(matches!(store.save_api_key("   "), Err(InfraError::Credential(_))));
    }
}
