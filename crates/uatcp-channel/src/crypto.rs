//! Security policies, key derivation, and symmetric chunk protection.
//!
//! The channel core performs the symmetric cryptography itself: P-SHA key
//! derivation from the exchanged nonces, HMAC signatures, and AES-CBC
//! encryption, selected by [`SecurityPolicy`]. Asymmetric operations (RSA
//! signing/encryption with the peers' certificates, used to protect `OPN`
//! chunks under policies other than `None`) are a service this core invokes
//! through the [`AsymmetricSecurity`] trait.

use aes::cipher::{block_padding::NoPadding, BlockModeDecrypt, BlockModeEncrypt, KeyIvInit};
use hmac::{digest::KeyInit, Hmac, Mac};
use sha1::Sha1;
use sha2::Sha256;

use crate::error::ChannelError;

type HmacSha1 = Hmac<Sha1>;
type HmacSha256 = Hmac<Sha256>;

/// Security policy of a secure channel.
///
/// The policy fixes the algorithm suite; the message security mode decides
/// which of its protections (signing, encryption) are applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SecurityPolicy {
    /// No security; empty nonces, plaintext chunks
    None,
    /// RSA-1.5 key transport, AES-128-CBC, HMAC-SHA1, P-SHA1
    Basic128Rsa15,
    /// RSA-OAEP key transport, AES-256-CBC, HMAC-SHA1, P-SHA1
    Basic256,
    /// RSA-OAEP key transport, AES-256-CBC, HMAC-SHA256, P-SHA256
    Basic256Sha256,
}

impl SecurityPolicy {
    /// Canonical URI of this policy, as carried in the asymmetric security
    /// header.
    #[must_use]
    pub const fn uri(self) -> &'static str {
        match self {
            Self::None => "http://opcfoundation.org/UA/SecurityPolicy#None",
            Self::Basic128Rsa15 => "http://opcfoundation.org/UA/SecurityPolicy#Basic128Rsa15",
            Self::Basic256 => "http://opcfoundation.org/UA/SecurityPolicy#Basic256",
            Self::Basic256Sha256 => "http://opcfoundation.org/UA/SecurityPolicy#Basic256Sha256",
        }
    }

    /// Parse a policy from its URI.
    #[must_use]
    pub fn from_uri(uri: &str) -> Option<Self> {
        match uri {
            "http://opcfoundation.org/UA/SecurityPolicy#None" => Some(Self::None),
            "http://opcfoundation.org/UA/SecurityPolicy#Basic128Rsa15" => Some(Self::Basic128Rsa15),
            "http://opcfoundation.org/UA/SecurityPolicy#Basic256" => Some(Self::Basic256),
            "http://opcfoundation.org/UA/SecurityPolicy#Basic256Sha256" => {
                Some(Self::Basic256Sha256)
            },
            _ => None,
        }
    }

    /// Size of a symmetric signature in bytes.
    #[must_use]
    pub const fn symmetric_signature_size(self) -> usize {
        match self {
            Self::None => 0,
            Self::Basic128Rsa15 | Self::Basic256 => 20,
            Self::Basic256Sha256 => 32,
        }
    }

    /// Length of the derived symmetric signing key in bytes.
    ///
    /// Distinct from the signature size: HMAC-SHA1 signatures are 20 bytes
    /// regardless of the key length the profile derives.
    #[must_use]
    pub const fn symmetric_signature_key_length(self) -> usize {
        match self {
            Self::None => 0,
            Self::Basic128Rsa15 => 16,
            Self::Basic256 => 24,
            Self::Basic256Sha256 => 32,
        }
    }

    /// Length of a symmetric signing or encryption key in bytes.
    #[must_use]
    pub const fn symmetric_key_length(self) -> usize {
        match self {
            Self::None => 0,
            Self::Basic128Rsa15 => 16,
            Self::Basic256 | Self::Basic256Sha256 => 32,
        }
    }

    /// Block size of the symmetric cipher in bytes.
    #[must_use]
    pub const fn symmetric_block_size(self) -> usize {
        match self {
            Self::None => 0,
            _ => 16,
        }
    }

    /// Length of the nonce each peer contributes.
    #[must_use]
    pub const fn nonce_length(self) -> usize {
        match self {
            Self::None => 0,
            Self::Basic128Rsa15 => 16,
            Self::Basic256 | Self::Basic256Sha256 => 32,
        }
    }
}

/// One direction's worth of derived symmetric key material.
#[derive(Clone, PartialEq, Eq)]
pub struct SymmetricKeys {
    /// HMAC key for chunk signatures
    pub signing_key: Vec<u8>,
    /// AES key for chunk encryption
    pub encryption_key: Vec<u8>,
    /// CBC initialization vector
    pub initialization_vector: Vec<u8>,
}

// Key material must not end up in logs.
impl std::fmt::Debug for SymmetricKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SymmetricKeys")
            .field("signing_key", &format!("<redacted {} bytes>", self.signing_key.len()))
            .field("encryption_key", &format!("<redacted {} bytes>", self.encryption_key.len()))
            .field(
                "initialization_vector",
                &format!("<redacted {} bytes>", self.initialization_vector.len()),
            )
            .finish()
    }
}

/// Both directions of derived key material for one security token.
///
/// `local` protects what we send (the server verifies/decrypts with it);
/// `remote` verifies and decrypts what the server sends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymmetricKeyPair {
    /// Keys protecting client → server traffic
    pub local: SymmetricKeys,
    /// Keys protecting server → client traffic
    pub remote: SymmetricKeys,
}

/// Derive both key sets from the exchanged nonces.
///
/// Client keys are `PRF(secret = server nonce, seed = client nonce)`, server
/// keys the reverse, with the PRF fixed by the policy (P-SHA1 or P-SHA256).
///
/// # Errors
///
/// Returns [`ChannelError::Crypto`] for policy `None` (no keys exist) or if
/// either nonce is empty.
pub fn derive_key_pair(
    policy: SecurityPolicy,
    local_nonce: &[u8],
    remote_nonce: &[u8],
) -> Result<SymmetricKeyPair, ChannelError> {
    if policy == SecurityPolicy::None {
        return Err(ChannelError::Crypto("policy None has no symmetric keys".to_string()));
    }
    if local_nonce.is_empty() || remote_nonce.is_empty() {
        return Err(ChannelError::Crypto("key derivation requires both nonces".to_string()));
    }

    let local = derive_keys(policy, remote_nonce, local_nonce);
    let remote = derive_keys(policy, local_nonce, remote_nonce);
    Ok(SymmetricKeyPair { local, remote })
}

fn derive_keys(policy: SecurityPolicy, secret: &[u8], seed: &[u8]) -> SymmetricKeys {
    let signing_key_len = policy.symmetric_signature_key_length();
    let key_len = policy.symmetric_key_length();
    let block_len = policy.symmetric_block_size();

    let material = match policy {
        SecurityPolicy::Basic256Sha256 => {
            p_hash::<HmacSha256>(secret, seed, signing_key_len + key_len + block_len)
        },
        _ => p_hash::<HmacSha1>(secret, seed, signing_key_len + key_len + block_len),
    };

    SymmetricKeys {
        signing_key: material[..signing_key_len].to_vec(),
        encryption_key: material[signing_key_len..signing_key_len + key_len].to_vec(),
        initialization_vector: material[signing_key_len + key_len..].to_vec(),
    }
}

/// TLS-style P_hash pseudo-random function.
///
/// `A(0) = seed; A(i) = HMAC(secret, A(i-1));`
/// `output = HMAC(secret, A(1) || seed) || HMAC(secret, A(2) || seed) || …`
fn p_hash<M: Mac + KeyInit>(secret: &[u8], seed: &[u8], length: usize) -> Vec<u8> {
    fn hmac<M: Mac + KeyInit>(key: &[u8], parts: &[&[u8]]) -> Vec<u8> {
        let mut mac = <M as Mac>::new_from_slice(key).expect("HMAC accepts keys of any length");
        for part in parts {
            mac.update(part);
        }
        mac.finalize().into_bytes().to_vec()
    }

    let mut output = Vec::with_capacity(length);
    let mut a = hmac::<M>(secret, &[seed]);

    while output.len() < length {
        output.extend_from_slice(&hmac::<M>(secret, &[&a, seed]));
        a = hmac::<M>(secret, &[&a]);
    }

    output.truncate(length);
    output
}

/// Compute the symmetric signature over `data`.
///
/// # Errors
///
/// Returns [`ChannelError::Crypto`] for policy `None`.
pub fn symmetric_sign(
    policy: SecurityPolicy,
    key: &[u8],
    data: &[u8],
) -> Result<Vec<u8>, ChannelError> {
    match policy {
        SecurityPolicy::None => {
            Err(ChannelError::Crypto("policy None does not sign".to_string()))
        },
        SecurityPolicy::Basic128Rsa15 | SecurityPolicy::Basic256 => {
            let mut mac = <HmacSha1 as Mac>::new_from_slice(key)
                .expect("HMAC accepts keys of any length");
            mac.update(data);
            Ok(mac.finalize().into_bytes().to_vec())
        },
        SecurityPolicy::Basic256Sha256 => {
            let mut mac = <HmacSha256 as Mac>::new_from_slice(key)
                .expect("HMAC accepts keys of any length");
            mac.update(data);
            Ok(mac.finalize().into_bytes().to_vec())
        },
    }
}

/// Verify the symmetric signature over `data` in constant time.
///
/// # Errors
///
/// Returns [`ChannelError::SecurityChecksFailed`] on mismatch.
pub fn symmetric_verify(
    policy: SecurityPolicy,
    key: &[u8],
    data: &[u8],
    signature: &[u8],
) -> Result<(), ChannelError> {
    let verified = match policy {
        SecurityPolicy::None => {
            return Err(ChannelError::Crypto("policy None does not sign".to_string()));
        },
        SecurityPolicy::Basic128Rsa15 | SecurityPolicy::Basic256 => {
            let mut mac = <HmacSha1 as Mac>::new_from_slice(key)
                .expect("HMAC accepts keys of any length");
            mac.update(data);
            mac.verify_slice(signature).is_ok()
        },
        SecurityPolicy::Basic256Sha256 => {
            let mut mac = <HmacSha256 as Mac>::new_from_slice(key)
                .expect("HMAC accepts keys of any length");
            mac.update(data);
            mac.verify_slice(signature).is_ok()
        },
    };

    if verified {
        Ok(())
    } else {
        Err(ChannelError::SecurityChecksFailed {
            reason: "symmetric signature verification failed".to_string(),
        })
    }
}

/// Encrypt `data` in place with the policy's cipher.
///
/// `data` must already be padded to a multiple of the cipher block size.
///
/// # Errors
///
/// Returns [`ChannelError::Crypto`] if the policy has no cipher, the key or
/// IV length is wrong, or the data is not block-aligned.
pub fn symmetric_encrypt(
    policy: SecurityPolicy,
    keys: &SymmetricKeys,
    data: &mut [u8],
) -> Result<(), ChannelError> {
    let len = data.len();
    match policy {
        SecurityPolicy::None => Err(ChannelError::Crypto("policy None does not encrypt".to_string())),
        SecurityPolicy::Basic128Rsa15 => {
            cbc::Encryptor::<aes::Aes128>::new_from_slices(
                &keys.encryption_key,
                &keys.initialization_vector,
            )
            .map_err(|e| ChannelError::Crypto(e.to_string()))?
            .encrypt_padded::<NoPadding>(data, len)
            .map_err(|e| ChannelError::Crypto(e.to_string()))?;
            Ok(())
        },
        SecurityPolicy::Basic256 | SecurityPolicy::Basic256Sha256 => {
            cbc::Encryptor::<aes::Aes256>::new_from_slices(
                &keys.encryption_key,
                &keys.initialization_vector,
            )
            .map_err(|e| ChannelError::Crypto(e.to_string()))?
            .encrypt_padded::<NoPadding>(data, len)
            .map_err(|e| ChannelError::Crypto(e.to_string()))?;
            Ok(())
        },
    }
}

/// Decrypt `data` in place with the policy's cipher.
///
/// # Errors
///
/// Returns [`ChannelError::Crypto`] if the policy has no cipher, the key or
/// IV length is wrong, or the data is not block-aligned.
pub fn symmetric_decrypt(
    policy: SecurityPolicy,
    keys: &SymmetricKeys,
    data: &mut [u8],
) -> Result<(), ChannelError> {
    match policy {
        SecurityPolicy::None => Err(ChannelError::Crypto("policy None does not encrypt".to_string())),
        SecurityPolicy::Basic128Rsa15 => {
            cbc::Decryptor::<aes::Aes128>::new_from_slices(
                &keys.encryption_key,
                &keys.initialization_vector,
            )
            .map_err(|e| ChannelError::Crypto(e.to_string()))?
            .decrypt_padded::<NoPadding>(data)
            .map_err(|e| ChannelError::Crypto(e.to_string()))?;
            Ok(())
        },
        SecurityPolicy::Basic256 | SecurityPolicy::Basic256Sha256 => {
            cbc::Decryptor::<aes::Aes256>::new_from_slices(
                &keys.encryption_key,
                &keys.initialization_vector,
            )
            .map_err(|e| ChannelError::Crypto(e.to_string()))?
            .decrypt_padded::<NoPadding>(data)
            .map_err(|e| ChannelError::Crypto(e.to_string()))?;
            Ok(())
        },
    }
}

/// Asymmetric operations needed to protect `OPN` chunks under policies other
/// than `None`.
///
/// These are certificate-bound RSA operations and live outside the channel
/// core; an implementation wraps the application's key store. With policy
/// `None` no provider is needed.
pub trait AsymmetricSecurity: Send + Sync + 'static {
    /// Size of an asymmetric signature produced with the local private key.
    fn signature_size(&self) -> usize;

    /// Plaintext block size for encryption with the remote public key.
    fn plain_text_block_size(&self) -> usize;

    /// Ciphertext block size for encryption with the remote public key.
    fn cipher_text_block_size(&self) -> usize;

    /// Sign `data` with the local private key.
    ///
    /// # Errors
    ///
    /// Implementations fail with [`ChannelError::Crypto`] on key store errors.
    fn sign(&self, data: &[u8]) -> Result<Vec<u8>, ChannelError>;

    /// Verify `signature` over `data` against the remote certificate.
    ///
    /// # Errors
    ///
    /// Implementations fail with [`ChannelError::SecurityChecksFailed`] on
    /// mismatch.
    fn verify(&self, data: &[u8], signature: &[u8]) -> Result<(), ChannelError>;

    /// Encrypt `data` with the remote public key.
    ///
    /// # Errors
    ///
    /// Implementations fail with [`ChannelError::Crypto`] on key store errors.
    fn encrypt(&self, data: &[u8]) -> Result<Vec<u8>, ChannelError>;

    /// Decrypt `data` with the local private key.
    ///
    /// # Errors
    ///
    /// Implementations fail with [`ChannelError::Crypto`] on key store errors.
    fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>, ChannelError>;
}
