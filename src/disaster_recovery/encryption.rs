//! Encryption of sensitive records
//!
//! This module provides:
//! - A device-bound master key, generated once and kept in the protected store
//! - Per-record PBKDF2-HMAC-SHA256 key derivation with a fresh salt
//! - AES-256-GCM with a fresh 128-bit nonce per call and the category as
//!   associated data
//! - Identifier hashing and secure random tokens

use super::*;
use aes_gcm::aead::consts::U16;
use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::aes::Aes256;
use aes_gcm::{AesGcm, Nonce};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};

/// Lowest accepted PBKDF2 iteration count
pub const MIN_KDF_ITERATIONS: u32 = 10_000;
pub const DEFAULT_KDF_ITERATIONS: u32 = 10_000;

pub const ENCRYPTION_ALGORITHM: &str = "AES-256-GCM";

/// Protected slot holding the hex master key
pub const MASTER_KEY_SLOT: &str = "master_key";
/// Slot holding the generated device identifier
pub const DEVICE_ID_SLOT: &str = "device_id";

const KEY_SIZE: usize = 32; // 256 bits for AES-256
const SALT_SIZE: usize = 16;
const IV_SIZE: usize = 16;

/// AES-256-GCM with a 128-bit nonce
type Aes256Gcm16 = AesGcm<Aes256, U16>;

/// Encryption engine for sensitive records and snapshot blobs
pub struct EncryptionEngine {
    store: Arc<dyn KeyValueStore>,
    iterations: u32,
    master_key: parking_lot::RwLock<Option<[u8; KEY_SIZE]>>,
    init_lock: tokio::sync::Mutex<()>,
}

impl EncryptionEngine {
    /// Create new encryption engine
    pub fn new(store: Arc<dyn KeyValueStore>, iterations: u32) -> BackupResult<Self> {
        if iterations < MIN_KDF_ITERATIONS {
            return Err(BackupError::Configuration {
                message: format!(
                    "Key derivation iterations must be at least {}",
                    MIN_KDF_ITERATIONS
                ),
            });
        }

        Ok(Self {
            store,
            iterations,
            master_key: parking_lot::RwLock::new(None),
            init_lock: tokio::sync::Mutex::new(()),
        })
    }

    /// Load or create the master key ahead of the first operation
    pub async fn initialize(&self) -> BackupResult<()> {
        self.master_key().await?;
        log::info!("Encryption engine initialized");
        Ok(())
    }

    /// Device identifier, generated and persisted on first use
    pub async fn device_id(&self) -> BackupResult<String> {
        if let Some(existing) = self.store.get(DEVICE_ID_SLOT).await? {
            return Ok(existing);
        }

        let material = format!(
            "{}_{}_{}",
            std::env::consts::OS,
            Utc::now().timestamp_millis(),
            random_hex(16)
        );
        let device_id = sha256_hex(material.as_bytes());
        self.store.set(DEVICE_ID_SLOT, &device_id).await?;
        log::info!("Generated new device identifier");
        Ok(device_id)
    }

    async fn master_key(&self) -> BackupResult<[u8; KEY_SIZE]> {
        if let Some(key) = *self.master_key.read() {
            return Ok(key);
        }

        // Serialize first-time generation so concurrent callers agree on one key
        let _guard = self.init_lock.lock().await;
        if let Some(key) = *self.master_key.read() {
            return Ok(key);
        }

        let key = match self.store.get(MASTER_KEY_SLOT).await? {
            Some(stored) => decode_key(&stored)?,
            None => {
                let device_id = self.device_id().await?;
                let material = format!(
                    "{}_{}_{}",
                    device_id,
                    Utc::now().timestamp_millis(),
                    random_hex(32)
                );

                let mut key = [0u8; KEY_SIZE];
                key.copy_from_slice(&Sha256::digest(material.as_bytes()));
                self.store.set(MASTER_KEY_SLOT, &hex::encode(key)).await?;
                log::info!("Generated new master key");
                key
            }
        };

        *self.master_key.write() = Some(key);
        Ok(key)
    }

    fn derive_key(&self, master_key: &[u8], salt: &[u8], iterations: u32) -> [u8; KEY_SIZE] {
        let mut derived = [0u8; KEY_SIZE];
        pbkdf2::pbkdf2_hmac::<Sha256>(master_key, salt, iterations, &mut derived);
        derived
    }

    /// Encrypt bytes under `category`
    pub async fn encrypt_bytes(&self, plaintext: &[u8], category: &str) -> BackupResult<EncryptedRecord> {
        let master_key = self.master_key().await?;

        let mut salt = [0u8; SALT_SIZE];
        let mut iv = [0u8; IV_SIZE];
        OsRng.fill_bytes(&mut salt);
        OsRng.fill_bytes(&mut iv);

        let mut derived = self.derive_key(&master_key, &salt, self.iterations);
        let cipher = Aes256Gcm16::new_from_slice(&derived).map_err(|e| BackupError::Encryption {
            message: format!("Failed to initialize cipher: {}", e),
        });
        derived.fill(0);
        let cipher = cipher?;

        let ciphertext = cipher
            .encrypt(
                Nonce::<U16>::from_slice(&iv),
                Payload {
                    msg: plaintext,
                    aad: category.as_bytes(),
                },
            )
            .map_err(|e| BackupError::Encryption {
                message: format!("Failed to encrypt {} data: {}", category, e),
            })?;

        Ok(EncryptedRecord {
            ciphertext: BASE64.encode(ciphertext),
            salt: hex::encode(salt),
            iv: hex::encode(iv),
            algorithm: ENCRYPTION_ALGORITHM.to_string(),
            iterations: self.iterations,
        })
    }

    /// Decrypt a record produced by [`encrypt_bytes`](Self::encrypt_bytes)
    pub async fn decrypt_bytes(&self, record: &EncryptedRecord, category: &str) -> BackupResult<Vec<u8>> {
        if record.algorithm != ENCRYPTION_ALGORITHM {
            return Err(BackupError::Decryption {
                message: format!("Unsupported algorithm: {}", record.algorithm),
            });
        }
        if record.iterations < MIN_KDF_ITERATIONS {
            return Err(BackupError::Decryption {
                message: format!("Record uses too few iterations: {}", record.iterations),
            });
        }

        let salt = decode_fixed(&record.salt, SALT_SIZE, "salt")?;
        let iv = decode_fixed(&record.iv, IV_SIZE, "iv")?;
        let ciphertext = BASE64
            .decode(record.ciphertext.as_bytes())
            .map_err(|e| BackupError::Decryption {
                message: format!("Invalid base64 ciphertext: {}", e),
            })?;

        let master_key = self.master_key().await?;
        let mut derived = self.derive_key(&master_key, &salt, record.iterations);
        let cipher = Aes256Gcm16::new_from_slice(&derived).map_err(|e| BackupError::Decryption {
            message: format!("Failed to initialize cipher: {}", e),
        });
        derived.fill(0);

        cipher?
            .decrypt(
                Nonce::<U16>::from_slice(&iv),
                Payload {
                    msg: &ciphertext,
                    aad: category.as_bytes(),
                },
            )
            .map_err(|_| BackupError::Decryption {
                message: format!("Authentication failed for {} data", category),
            })
    }

    /// Encrypt a UTF-8 string under `category`
    pub async fn encrypt(&self, data: &str, category: &str) -> BackupResult<EncryptedRecord> {
        self.encrypt_bytes(data.as_bytes(), category).await
    }

    /// Decrypt a record back into a UTF-8 string
    pub async fn decrypt(&self, record: &EncryptedRecord, category: &str) -> BackupResult<String> {
        let plaintext = self.decrypt_bytes(record, category).await?;
        String::from_utf8(plaintext).map_err(|e| BackupError::Decryption {
            message: format!("Invalid UTF-8 in decrypted data: {}", e),
        })
    }

    /// One-way hash of an identifier (user ids in logs and audit trails)
    pub fn hash_identifier(&self, value: &str, salt: Option<&str>) -> String {
        let mut hasher = Sha256::new();
        hasher.update(value.as_bytes());
        hasher.update(salt.unwrap_or_default().as_bytes());
        hex::encode(hasher.finalize())
    }

    /// `length` random bytes, hex encoded
    pub fn random_token(&self, length: usize) -> String {
        random_hex(length)
    }

    /// Zero and drop the cached master key
    ///
    /// The next operation reloads it from the protected store.
    pub fn clear_sensitive_data(&self) {
        let mut cached = self.master_key.write();
        if let Some(key) = cached.as_mut() {
            key.fill(0);
        }
        *cached = None;
        log::debug!("Cleared cached key material");
    }

    pub fn iterations(&self) -> u32 {
        self.iterations
    }
}

impl Drop for EncryptionEngine {
    fn drop(&mut self) {
        self.clear_sensitive_data();
    }
}

fn random_hex(length: usize) -> String {
    let mut bytes = vec![0u8; length];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

fn decode_key(stored: &str) -> BackupResult<[u8; KEY_SIZE]> {
    let bytes = hex::decode(stored.trim()).map_err(|e| BackupError::Encryption {
        message: format!("Stored master key is not valid hex: {}", e),
    })?;

    if bytes.len() != KEY_SIZE {
        return Err(BackupError::Encryption {
            message: "Invalid master key size".to_string(),
        });
    }

    let mut key = [0u8; KEY_SIZE];
    key.copy_from_slice(&bytes);
    Ok(key)
}

fn decode_fixed(value: &str, expected: usize, field: &str) -> BackupResult<Vec<u8>> {
    let bytes = hex::decode(value).map_err(|e| BackupError::Decryption {
        message: format!("Invalid hex {}: {}", field, e),
    })?;

    if bytes.len() != expected {
        return Err(BackupError::Decryption {
            message: format!("Invalid {} length: {} bytes", field, bytes.len()),
        });
    }

    Ok(bytes)
}
