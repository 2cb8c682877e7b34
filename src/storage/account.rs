use std::path::{Path, PathBuf};

use log::info;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{create_private_dir, read_file, write_secure_file};
use crate::{
    error::{Error, StateError, StorageError},
    issuance::keys::{check_account_key, generate_account_key},
};

const KEY_FILE: &str = "account.key";
const META_FILE: &str = "account.json";

/// The ACME account used for every order. The key lives in `account.key`
/// and never appears in `account.json`.
pub struct Account {
    email: String,
    registration: Option<Value>,
    private_key_pem: String,
    storage_dir: PathBuf,
}

#[derive(Serialize, Deserialize)]
struct AccountFile {
    email: String,
    #[serde(default)]
    registration: Option<Value>,
}

impl std::fmt::Debug for Account {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Account")
            .field("email", &self.email)
            .field("registered", &self.registration.is_some())
            .field("storage_dir", &self.storage_dir)
            .finish_non_exhaustive()
    }
}

pub fn account_dir(root_storage_dir: &Path) -> PathBuf {
    root_storage_dir.join("account")
}

impl Account {
    /// New unregistered account with a fresh key. Nothing is written until
    /// [`Account::save`]; an existing account on disk is never replaced.
    pub fn create(email: &str, root_storage_dir: &Path) -> Result<Self, Error> {
        let email = email.trim();
        if email.is_empty() {
            return Err(Error::RequiredParam("mail"));
        }
        let storage_dir = account_dir(root_storage_dir);
        for name in [KEY_FILE, META_FILE] {
            let path = storage_dir.join(name);
            if path.exists() {
                return Err(StorageError::AlreadyExists(path).into());
            }
        }
        create_private_dir(&storage_dir)?;
        Ok(Self {
            email: email.to_string(),
            registration: None,
            private_key_pem: generate_account_key()?,
            storage_dir,
        })
    }

    pub fn load(root_storage_dir: &Path) -> Result<Self, Error> {
        let storage_dir = account_dir(root_storage_dir);
        let key_path = storage_dir.join(KEY_FILE);
        let meta_path = storage_dir.join(META_FILE);

        let raw_meta = read_file(&meta_path)?;
        let file: AccountFile =
            serde_json::from_slice(&raw_meta).map_err(|source| StateError::Metadata {
                path: meta_path.clone(),
                source,
            })?;
        let private_key_pem =
            String::from_utf8(read_file(&key_path)?).map_err(|_| StateError::PrivateKey {
                path: key_path.clone(),
                reason: "file is not valid UTF-8 PEM".to_string(),
            })?;
        check_account_key(&private_key_pem, &key_path)?;

        Ok(Self {
            email: file.email,
            registration: file.registration,
            private_key_pem,
            storage_dir,
        })
    }

    pub fn save(&self) -> Result<(), Error> {
        create_private_dir(&self.storage_dir)?;
        let key_path = self.key_path();
        match write_secure_file(&key_path, self.private_key_pem.as_bytes(), true) {
            Ok(()) => {}
            // Re-saving a loaded account keeps the key that is already there.
            Err(StorageError::AlreadyExists(_))
                if read_file(&key_path)? == self.private_key_pem.as_bytes() => {}
            Err(err) => return Err(err.into()),
        }

        let meta_path = self.storage_dir.join(META_FILE);
        let file = AccountFile {
            email: self.email.clone(),
            registration: self.registration.clone(),
        };
        let json = serde_json::to_vec_pretty(&file).map_err(|source| StorageError::Encode {
            path: meta_path.clone(),
            source,
        })?;
        write_secure_file(&meta_path, &json, false)?;
        info!("[account] saved account for {} in {}", self.email, self.storage_dir.display());
        Ok(())
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    pub fn registration(&self) -> Option<&Value> {
        self.registration.as_ref()
    }

    pub fn set_registration(&mut self, registration: Value) {
        self.registration = Some(registration);
    }

    pub fn private_key_pem(&self) -> &str {
        &self.private_key_pem
    }

    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }

    pub fn key_path(&self) -> PathBuf {
        self.storage_dir.join(KEY_FILE)
    }
}
