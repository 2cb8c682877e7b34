use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use acme_lib::{
    Error as LibError,
    persist::{Persist, PersistKey, PersistKind},
};

/// In-memory store handed to acme-lib. The only thing seeded is the account
/// key read from `account/account.key`; whatever the library writes back
/// (issued certificates, keys) is dropped with the client.
#[derive(Clone, Default)]
pub struct AccountPersist {
    inner: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl AccountPersist {
    pub fn seeded(realm: &str, account_key_pem: &str) -> acme_lib::Result<Self> {
        let persist = Self::default();
        persist.put(&account_key(realm), account_key_pem.as_bytes())?;
        Ok(persist)
    }
}

fn account_key(realm: &str) -> PersistKey<'_> {
    PersistKey::new(realm, PersistKind::AccountPrivateKey, "acme_account")
}

impl Persist for AccountPersist {
    fn put(&self, key: &PersistKey, value: &[u8]) -> acme_lib::Result<()> {
        let mut entries = self
            .inner
            .lock()
            .map_err(|e| LibError::Other(e.to_string()))?;
        entries.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn get(&self, key: &PersistKey) -> acme_lib::Result<Option<Vec<u8>>> {
        let entries = self
            .inner
            .lock()
            .map_err(|e| LibError::Other(e.to_string()))?;
        Ok(entries.get(&key.to_string()).cloned())
    }
}
