//! Credential store
//!
//! # Lookup
//!
//! There is no index. A lookup derives the field key from the biometric key
//! and tries it against every record's sealed marker in storage order; the
//! first record that opens is the match. Cost is linear in the number of
//! records. A failed decryption is the normal "not this record" outcome and
//! never surfaces as an error.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use lynx_core::{BiometricKey, Credentials, EncryptedRecord, FieldKey};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Result, VaultError};

/// On-disk document
#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreDocument {
    records: Vec<EncryptedRecord>,
}

/// Append-only store of encrypted credential records
pub struct CredentialVault {
    path: PathBuf,
    records: Vec<EncryptedRecord>,
}

impl CredentialVault {
    /// Open the store at `path`
    ///
    /// A missing file is an empty store; it is created on the first write.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let records = if path.exists() {
            let content = fs::read_to_string(&path)?;
            if content.trim().is_empty() {
                Vec::new()
            } else {
                serde_json::from_str::<StoreDocument>(&content)?.records
            }
        } else {
            Vec::new()
        };

        debug!("Opened credential store at {:?} ({} records)", path, records.len());
        Ok(Self { path, records })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Seal `credentials` under `key` and append the record
    pub fn add_credentials(&mut self, credentials: &Credentials, key: &BiometricKey) -> Result<()> {
        let field_key = FieldKey::derive(key);
        let record = EncryptedRecord::seal(credentials, &field_key)?;

        self.records.push(record);
        if let Err(e) = self.persist() {
            self.records.pop();
            return Err(e);
        }

        info!("Stored credentials record #{}", self.records.len());
        Ok(())
    }

    /// Find the first record that opens under `key`
    pub fn get_credentials(&self, key: &BiometricKey) -> Result<Option<Credentials>> {
        let field_key = FieldKey::derive(key);

        for (index, record) in self.records.iter().enumerate() {
            if !record.matches(&field_key) {
                continue;
            }
            debug!("Biometric key opened record #{}", index + 1);
            return record
                .open(&field_key)
                .map(Some)
                .map_err(|e| VaultError::Corrupt(format!("record #{}: {}", index + 1, e)));
        }

        debug!("No record opened under the given key ({} scanned)", self.records.len());
        Ok(None)
    }

    /// Drop every record
    pub fn erase_everything(&mut self) -> Result<()> {
        let previous = std::mem::take(&mut self.records);
        if let Err(e) = self.persist() {
            self.records = previous;
            return Err(e);
        }
        info!("Erased {} credential records", previous.len());
        Ok(())
    }

    /// Rewrite the whole document
    fn persist(&self) -> Result<()> {
        let document = StoreDocument {
            records: self.records.clone(),
        };
        let content = serde_json::to_string_pretty(&document)?;

        // Write to temp file first, then rename for atomicity
        let temp_path = self.path.with_extension("json.tmp");
        match fs::remove_file(&temp_path) {
            Ok(()) => debug!("Removed stale temp file {:?}", temp_path),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let mut options = OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }

        let mut file = options.open(&temp_path)?;
        file.write_all(content.as_bytes())?;
        file.sync_all()?;
        drop(file);

        fs::rename(&temp_path, &self.path)?;

        Ok(())
    }
}
