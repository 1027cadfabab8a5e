//! Vault identity and its persisted record.

use serde::{Deserialize, Serialize};

use veilvault_common::{AccountId, Error, Result, SensitiveString, VaultId};
use veilvault_crypto::{is_obscured, CipherEngine};

/// How file and folder names are encrypted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilenameEncryption {
    /// rclone "standard": EME + base32hex per path segment.
    #[default]
    Standard,
}

/// One encrypted root within a remote account, with passwords revealed.
///
/// The mount path is a coordinate in the provider's own namespace and is
/// never encrypted.
#[derive(Debug, Clone)]
pub struct Vault {
    pub id: VaultId,
    pub account_id: AccountId,
    pub name: String,
    pub mount_path: Vec<String>,
    pub password: SensitiveString,
    pub password2: Option<SensitiveString>,
    pub filename_encryption: FilenameEncryption,
}

impl Vault {
    /// Create a vault.
    ///
    /// # Errors
    /// - Password empty
    /// - A mount path segment is empty or contains a separator
    pub fn new(
        id: VaultId,
        account_id: AccountId,
        mount_path: Vec<String>,
        password: SensitiveString,
    ) -> Result<Self> {
        if password.is_empty() {
            return Err(Error::InvalidInput("Vault password cannot be empty".to_string()));
        }
        for segment in &mount_path {
            if segment.is_empty() || segment.contains('/') {
                return Err(Error::InvalidInput(format!(
                    "Invalid mount path segment: {:?}",
                    segment
                )));
            }
        }
        Ok(Self {
            id,
            name: String::new(),
            account_id,
            mount_path,
            password,
            password2: None,
            filename_encryption: FilenameEncryption::Standard,
        })
    }

    /// Set the secondary password (salt). An empty value clears it.
    pub fn with_salt(mut self, password2: SensitiveString) -> Self {
        self.password2 = (!password2.is_empty()).then_some(password2);
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn salt(&self) -> Option<&SensitiveString> {
        self.password2.as_ref()
    }
}

/// Persisted form of a [`Vault`]. Passwords are stored obscured.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultRecord {
    pub id: VaultId,
    pub account_id: AccountId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub mount_path: Vec<String>,
    pub password: String,
    #[serde(default)]
    pub password2: Option<String>,
    #[serde(default)]
    pub filename_encryption: FilenameEncryption,
    /// Whether the passwords are obscured. Absent in records written before
    /// the flag existed; those are classified by shape.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub obscured: Option<bool>,
}

impl VaultRecord {
    /// Build the record for `vault`, obscuring its passwords.
    pub async fn seal(vault: &Vault, engine: &CipherEngine) -> Result<Self> {
        let password = engine.obscure_password(&vault.password).await?;
        let password2 = match &vault.password2 {
            Some(salt) => Some(engine.obscure_password(salt).await?),
            None => None,
        };
        Ok(Self {
            id: vault.id.clone(),
            account_id: vault.account_id.clone(),
            name: vault.name.clone(),
            mount_path: vault.mount_path.clone(),
            password,
            password2,
            filename_encryption: vault.filename_encryption,
            obscured: Some(true),
        })
    }

    fn is_stored_obscured(&self, value: &str) -> bool {
        self.obscured.unwrap_or_else(|| is_obscured(value))
    }

    async fn reveal(&self, engine: &CipherEngine, value: &str) -> Result<SensitiveString> {
        if self.is_stored_obscured(value) {
            engine.reveal_password(value).await
        } else {
            Ok(SensitiveString::new(value))
        }
    }

    /// Reveal the stored passwords and rebuild the vault.
    ///
    /// # Errors
    /// - A stored password cannot be revealed
    /// - The revealed password is empty
    pub async fn open(&self, engine: &CipherEngine) -> Result<Vault> {
        let password = self.reveal(engine, &self.password).await?;
        let mut vault = Vault::new(
            self.id.clone(),
            self.account_id.clone(),
            self.mount_path.clone(),
            password,
        )?
        .with_name(self.name.clone());
        vault.filename_encryption = self.filename_encryption;

        if let Some(stored) = self.password2.as_deref().filter(|s| !s.is_empty()) {
            vault = vault.with_salt(self.reveal(engine, stored).await?);
        }
        Ok(vault)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::Serialization(e.to_string()))
    }
}
