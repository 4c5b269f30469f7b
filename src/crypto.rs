//! Crypto primitives: password-at-rest AEAD encryption, the master
//! key file, key rotation, token generation, password hashing, and JWTs.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use aes_gcm::aead::{Aead, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Key, KeyInit, Nonce};
use data_encoding::BASE64;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{GatewayError, Result};

/// Prefix prepended to every ciphertext so decrypt can reject plaintext.
const ENC_PREFIX: &str = "ENC$";
const ENC_V1_PREFIX: &str = "ENC$v1$";

const MASTER_KEY_FILE: &str = "master.key";

/// Encrypts/decrypts the `password_ciphertext` field of catalog
/// connections. Ciphertext record is `nonce ‖ ciphertext ‖ tag`,
/// base64-encoded behind the `ENC$v1$` envelope.
#[derive(Clone)]
pub struct FieldEncryptor {
    key_bytes: [u8; 32],
}

impl FieldEncryptor {
    /// Load the master key from `<data_dir>/master.key`, generating one on
    /// first run. The file is written with mode 0600.
    pub fn ensure_key(data_dir: &Path) -> Result<Arc<Self>> {
        let path = Self::key_path(data_dir);

        let key_bytes: [u8; 32] = if path.exists() {
            let hex = std::fs::read_to_string(&path)?;
            let hex = hex.trim();
            let mut buf = [0u8; 32];
            hex_decode(hex, &mut buf)?;
            info!("loaded master key from {}", path.display());
            buf
        } else {
            let key = Aes256Gcm::generate_key(OsRng);
            let mut buf = [0u8; 32];
            buf.copy_from_slice(&key);
            Self::write_key_file(&path, &buf)?;
            info!("generated new master key at {}", path.display());
            buf
        };

        Ok(Arc::new(Self { key_bytes }))
    }

    /// Generate and persist a fresh master key, replacing the current file.
    /// Callers must re-encrypt every stored password with `re_encrypt`
    /// before the old `FieldEncryptor` is dropped.
    pub fn rotate(data_dir: &Path) -> Result<Arc<Self>> {
        let key = Aes256Gcm::generate_key(OsRng);
        let mut buf = [0u8; 32];
        buf.copy_from_slice(&key);

        let path = Self::key_path(data_dir);
        let tmp = path.with_extension("key.new");
        Self::write_key_file(&tmp, &buf)?;
        std::fs::rename(&tmp, &path)?;

        info!("master key rotated");
        Ok(Arc::new(Self { key_bytes: buf }))
    }

    fn key_path(data_dir: &Path) -> PathBuf {
        data_dir.join(MASTER_KEY_FILE)
    }

    fn write_key_file(path: &Path, key: &[u8; 32]) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, format!("{}\n", hex_encode(key)))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }
        Ok(())
    }

    /// Encrypt a plaintext string. Empty and already-encrypted strings pass
    /// through unchanged.
    pub fn encrypt(&self, plaintext: &str) -> String {
        if plaintext.is_empty() || plaintext.starts_with(ENC_PREFIX) {
            return plaintext.to_string();
        }

        let key = Key::<Aes256Gcm>::from_slice(&self.key_bytes);
        let cipher = Aes256Gcm::new(key);
        let nonce = Aes256Gcm::generate_nonce(OsRng);

        let ciphertext = cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .expect("AES-GCM encryption should not fail");

        let mut combined = Vec::with_capacity(12 + ciphertext.len());
        combined.extend_from_slice(&nonce);
        combined.extend_from_slice(&ciphertext);

        format!("{ENC_V1_PREFIX}{}", BASE64.encode(&combined))
    }

    /// Decrypt a value produced by [`encrypt`]. Fails with
    /// `GatewayError::CryptoTamper` on AEAD verification failure.
    pub fn decrypt(&self, stored: &str) -> Result<String> {
        if stored.is_empty() {
            return Ok(String::new());
        }

        let encoded = stored
            .strip_prefix(ENC_V1_PREFIX)
            .or_else(|| stored.strip_prefix(ENC_PREFIX))
            .ok_or_else(|| GatewayError::Internal("value is not an encrypted field".into()))?;

        let combined = BASE64
            .decode(encoded.as_bytes())
            .map_err(|_| GatewayError::CryptoTamper)?;
        if combined.len() < 12 {
            return Err(GatewayError::CryptoTamper);
        }

        let (nonce_bytes, ciphertext) = combined.split_at(12);
        let nonce = Nonce::from_slice(nonce_bytes);

        let key = Key::<Aes256Gcm>::from_slice(&self.key_bytes);
        let cipher = Aes256Gcm::new(key);

        let plaintext = cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| GatewayError::CryptoTamper)?;

        String::from_utf8(plaintext).map_err(|_| GatewayError::CryptoTamper)
    }

    /// Re-encrypt a value under a new key: decrypt with `self`, encrypt
    /// with `new`. Used by catalog-level key rotation.
    pub fn re_encrypt(&self, stored: &str, new: &FieldEncryptor) -> Result<String> {
        if stored.is_empty() {
            return Ok(String::new());
        }
        let plaintext = self.decrypt(stored)?;
        Ok(new.encrypt(&plaintext))
    }
}

// ---------------------------------------------------------------------------
// Token generation
// ---------------------------------------------------------------------------

/// Generate a cryptographically random, URL-safe token of at least 256 bits
/// of entropy (32 raw bytes).
pub fn generate_token() -> String {
    use rand::RngCore;
    let mut buf = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut buf);
    data_encoding::BASE64URL_NOPAD.encode(&buf)
}

/// Non-invertible preview of a secret for display (`first8…last8`).
pub fn preview(secret: &str) -> String {
    if secret.len() <= 16 {
        return "…".repeat(1);
    }
    format!("{}…{}", &secret[..8], &secret[secret.len() - 8..])
}

// ---------------------------------------------------------------------------
// Password hashing (Argon2id, memory-hard: >=64 MiB, >=3 iterations)
// ---------------------------------------------------------------------------

pub fn hash_password(plaintext: &str) -> Result<String> {
    use argon2::password_hash::SaltString;
    use argon2::{Argon2, PasswordHasher};

    let params = argon2::Params::new(65536, 3, 1, None)
        .map_err(|e| GatewayError::Internal(format!("argon2 params: {e}")))?;
    let argon2 = Argon2::new(argon2::Algorithm::Argon2id, argon2::Version::V0x13, params);
    let salt = SaltString::generate(OsRng);
    let hash = argon2
        .hash_password(plaintext.as_bytes(), &salt)
        .map_err(|e| GatewayError::Internal(format!("argon2 hash: {e}")))?;
    Ok(hash.to_string())
}

pub fn verify_password(plaintext: &str, hash: &str) -> Result<bool> {
    use argon2::password_hash::PasswordHash;
    use argon2::{Argon2, PasswordVerifier};

    let parsed = PasswordHash::new(hash)
        .map_err(|e| GatewayError::Internal(format!("argon2 parse hash: {e}")))?;
    Ok(Argon2::default().verify_password(plaintext.as_bytes(), &parsed).is_ok())
}

// ---------------------------------------------------------------------------
// JWT (HS256)
// ---------------------------------------------------------------------------

/// Payload of a gateway-issued session JWT:
/// `{userId, username, iat, exp}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayClaims {
    #[serde(rename = "userId")]
    pub user_id: String,
    pub username: String,
    pub iat: i64,
    pub exp: i64,
}

pub fn mint_jwt(user_id: &str, username: &str, secret: &[u8], ttl: std::time::Duration) -> Result<String> {
    use jsonwebtoken::{encode, EncodingKey, Header};

    let now = chrono::Utc::now().timestamp();
    let claims = GatewayClaims {
        user_id: user_id.to_string(),
        username: username.to_string(),
        iat: now,
        exp: now + ttl.as_secs() as i64,
    };
    encode(&Header::default(), &claims, &EncodingKey::from_secret(secret)).map_err(Into::into)
}

/// Verify a JWT and return its claims. Expired/invalid tokens return
/// `Err(GatewayError::TokenInvalid)` rather than any identity.
pub fn verify_jwt(token: &str, secret: &[u8]) -> Result<GatewayClaims> {
    use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};

    let validation = Validation::new(Algorithm::HS256);
    decode::<GatewayClaims>(token, &DecodingKey::from_secret(secret), &validation)
        .map(|data| data.claims)
        .map_err(|e| GatewayError::TokenInvalid(e.to_string()))
}

// ---------------------------------------------------------------------------
// Hex helpers (master key file encoding; no extra dependency)
// ---------------------------------------------------------------------------

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn hex_decode(hex: &str, out: &mut [u8]) -> Result<()> {
    if hex.len() != out.len() * 2 {
        return Err(GatewayError::Internal("master key file corrupt: wrong length".into()));
    }
    for (i, chunk) in hex.as_bytes().chunks(2).enumerate() {
        let hi = hex_nibble(chunk[0])?;
        let lo = hex_nibble(chunk[1])?;
        out[i] = (hi << 4) | lo;
    }
    Ok(())
}

fn hex_nibble(c: u8) -> Result<u8> {
    match c {
        b'0'..=b'9' => Ok(c - b'0'),
        b'a'..=b'f' => Ok(c - b'a' + 10),
        b'A'..=b'F' => Ok(c - b'A' + 10),
        _ => Err(GatewayError::Internal(format!("invalid hex char: {c}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_encryptor() -> FieldEncryptor {
        FieldEncryptor { key_bytes: [0x42u8; 32] }
    }

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let enc = test_encryptor();
        let original = "hunter2";
        let encrypted = enc.encrypt(original);
        assert!(encrypted.starts_with(ENC_PREFIX));
        assert_ne!(encrypted, original);
        assert_eq!(enc.decrypt(&encrypted).unwrap(), original);
    }

    #[test]
    fn encrypt_empty_is_noop() {
        let enc = test_encryptor();
        assert_eq!(enc.encrypt(""), "");
        assert_eq!(enc.decrypt("").unwrap(), "");
    }

    #[test]
    fn encrypt_idempotent() {
        let enc = test_encryptor();
        let encrypted = enc.encrypt("secret");
        assert_eq!(enc.encrypt(&encrypted), encrypted);
    }

    #[test]
    fn decrypt_wrong_key_fails_with_tamper() {
        let enc1 = test_encryptor();
        let encrypted = enc1.encrypt("secret data");
        let enc2 = FieldEncryptor { key_bytes: [0x99u8; 32] };
        assert!(matches!(enc2.decrypt(&encrypted), Err(GatewayError::CryptoTamper)));
    }

    #[test]
    fn re_encrypt_with_new_key() {
        let enc1 = test_encryptor();
        let enc2 = FieldEncryptor { key_bytes: [0x99u8; 32] };
        let ct1 = enc1.encrypt("secret");
        let ct2 = enc1.re_encrypt(&ct1, &enc2).unwrap();
        assert_eq!(enc2.decrypt(&ct2).unwrap(), "secret");
        assert!(enc1.decrypt(&ct2).is_err());
    }

    #[test]
    fn ensure_key_creates_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let dir = dir.path();

        let enc1 = FieldEncryptor::ensure_key(dir).unwrap();
        assert!(dir.join(MASTER_KEY_FILE).exists());
        let enc2 = FieldEncryptor::ensure_key(dir).unwrap();

        let ct = enc1.encrypt("test");
        assert_eq!(enc2.decrypt(&ct).unwrap(), "test");
    }

    #[test]
    fn rotate_replaces_key_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let dir = dir.path();

        let old = FieldEncryptor::ensure_key(dir).unwrap();
        let ct_old = old.encrypt("rotating-secret");

        let new = FieldEncryptor::rotate(&dir).unwrap();
        let ct_new = old.re_encrypt(&ct_old, &new).unwrap();
        assert_eq!(new.decrypt(&ct_new).unwrap(), "rotating-secret");

        // reload from disk picks up the rotated key
        let reloaded = FieldEncryptor::ensure_key(dir).unwrap();
        assert_eq!(reloaded.decrypt(&ct_new).unwrap(), "rotating-secret");
    }

    #[test]
    fn token_generation_is_url_safe_and_long_enough() {
        let t = generate_token();
        assert!(t.len() >= 40);
        assert!(t.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
        assert_ne!(generate_token(), generate_token());
    }

    #[test]
    fn preview_shows_first_and_last_eight() {
        let t = "abcdefghijklmnopqrstuvwxyz012345";
        let p = preview(t);
        assert_eq!(p, "abcdefgh…yz012345");
    }

    #[test]
    fn argon2_hash_and_verify() {
        let hash = hash_password("my-secret-pw").unwrap();
        assert!(hash.starts_with("$argon2id$"));
        assert!(verify_password("my-secret-pw", &hash).unwrap());
        assert!(!verify_password("wrong-pw", &hash).unwrap());
    }

    #[test]
    fn jwt_roundtrip() {
        let secret = b"0123456789abcdef0123456789abcdef";
        let token = mint_jwt("u1", "alice", secret, std::time::Duration::from_secs(3600)).unwrap();
        let claims = verify_jwt(&token, secret).unwrap();
        assert_eq!(claims.user_id, "u1");
        assert_eq!(claims.username, "alice");
    }

    #[test]
    fn jwt_expired_is_invalid() {
        let secret = b"0123456789abcdef0123456789abcdef";
        let token = mint_jwt("u1", "alice", secret, std::time::Duration::from_secs(0)).unwrap();
        std::thread::sleep(std::time::Duration::from_secs(1));
        assert!(verify_jwt(&token, secret).is_err());
    }

    #[test]
    fn jwt_wrong_secret_is_invalid() {
        let token = mint_jwt("u1", "alice", b"0123456789abcdef0123456789abcdef", std::time::Duration::from_secs(60)).unwrap();
        assert!(verify_jwt(&token, b"ffffffffffffffffffffffffffffffff").is_err());
    }

    #[test]
    fn hex_roundtrip() {
        let bytes = [0xDE, 0xAD, 0xBE, 0xEF];
        let hex = hex_encode(&bytes);
        assert_eq!(hex, "deadbeef");
        let mut decoded = [0u8; 4];
        hex_decode(&hex, &mut decoded).unwrap();
        assert_eq!(decoded, bytes);
    }
}
