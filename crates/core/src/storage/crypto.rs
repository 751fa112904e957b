//! Key material of the replicated store.
//!
//! Item keys travel sealed for a node key: an ephemeral X25519 exchange with the
//! recipient's public key, HKDF-SHA256 to derive a ChaCha20-Poly1305 key.
//! Update authenticators are sealed directly under the item key.
use chacha20poly1305::aead::Aead;
use chacha20poly1305::aead::KeyInit;
use chacha20poly1305::ChaCha20Poly1305;
use chacha20poly1305::Nonce;
use hkdf::Hkdf;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::Deserialize;
use serde::Serialize;
use sha2::Sha256;
use x25519_dalek::EphemeralSecret;
use x25519_dalek::PublicKey;
use x25519_dalek::StaticSecret;

use crate::consts::ITEM_KEY_LEN;
use crate::error::Error;
use crate::error::Result;

const SEAL_SALT: &[u8] = b"chordnet-item-key-v1";

/// A payload sealed for the holder of an X25519 secret.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct SealedBox {
    /// Ephemeral public key of the sender.
    pub ephemeral: [u8; 32],
    /// ChaCha20-Poly1305 nonce.
    pub nonce: [u8; 12],
    /// Ciphertext and tag.
    pub ciphertext: Vec<u8>,
}

/// A payload sealed under a symmetric key.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Sealed {
    /// ChaCha20-Poly1305 nonce.
    pub nonce: [u8; 12],
    /// Ciphertext and tag.
    pub ciphertext: Vec<u8>,
}

/// Static X25519 key pair of a node.
pub struct NodeKey {
    secret: StaticSecret,
    public: PublicKey,
}

impl NodeKey {
    /// Generate a key pair.
    pub fn random() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    /// Restore a key pair from its secret half.
    pub fn from_bytes(secret: [u8; 32]) -> Self {
        let secret = StaticSecret::from(secret);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    /// Secret half, for persisting the key.
    pub fn to_bytes(&self) -> [u8; 32] {
        self.secret.to_bytes()
    }

    /// Public half, shared with whoever seals for this node.
    pub fn public_key(&self) -> [u8; 32] {
        self.public.to_bytes()
    }

    /// Open a box sealed with [seal_for] for this node.
    pub fn open(&self, sealed: &SealedBox) -> Result<Vec<u8>> {
        let ephemeral = PublicKey::from(sealed.ephemeral);
        let shared = self.secret.diffie_hellman(&ephemeral);
        let key = derive_key(shared.as_bytes(), &sealed.ephemeral, &self.public_key())?;
        decrypt(&key, &sealed.nonce, &sealed.ciphertext)
    }
}

impl std::fmt::Debug for NodeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "NodeKey({})", hex::encode(self.public_key()))
    }
}

fn derive_key(shared: &[u8], ephemeral: &[u8; 32], recipient: &[u8; 32]) -> Result<[u8; 32]> {
    let hkdf = Hkdf::<Sha256>::new(Some(SEAL_SALT), shared);
    let mut info = Vec::with_capacity(64);
    info.extend_from_slice(ephemeral);
    info.extend_from_slice(recipient);
    let mut out = [0u8; 32];
    hkdf.expand(&info, &mut out)
        .map_err(|e| Error::Crypto(format!("hkdf expand: {e}")))?;
    Ok(out)
}

fn encrypt(key: &[u8], plaintext: &[u8]) -> Result<([u8; 12], Vec<u8>)> {
    let cipher = ChaCha20Poly1305::new_from_slice(key)
        .map_err(|e| Error::Crypto(format!("invalid key: {e}")))?;
    let mut nonce = [0u8; 12];
    OsRng.fill_bytes(&mut nonce);
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|e| Error::Crypto(format!("encrypt failed: {e}")))?;
    Ok((nonce, ciphertext))
}

fn decrypt(key: &[u8], nonce: &[u8; 12], ciphertext: &[u8]) -> Result<Vec<u8>> {
    let cipher = ChaCha20Poly1305::new_from_slice(key)
        .map_err(|e| Error::Crypto(format!("invalid key: {e}")))?;
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|e| Error::Crypto(format!("decrypt failed: {e}")))
}

/// Seal `plaintext` for the owner of `recipient`.
pub fn seal_for(recipient: &[u8; 32], plaintext: &[u8]) -> Result<SealedBox> {
    let ephemeral_secret = EphemeralSecret::random_from_rng(OsRng);
    let ephemeral = PublicKey::from(&ephemeral_secret).to_bytes();
    let shared = ephemeral_secret.diffie_hellman(&PublicKey::from(*recipient));
    let key = derive_key(shared.as_bytes(), &ephemeral, recipient)?;
    let (nonce, ciphertext) = encrypt(&key, plaintext)?;
    Ok(SealedBox {
        ephemeral,
        nonce,
        ciphertext,
    })
}

/// Seal `plaintext` under a symmetric item key.
pub fn seal_with_key(key: &[u8], plaintext: &[u8]) -> Result<Sealed> {
    let (nonce, ciphertext) = encrypt(key, plaintext)?;
    Ok(Sealed { nonce, ciphertext })
}

/// Open a payload sealed with [seal_with_key].
pub fn open_with_key(key: &[u8], sealed: &Sealed) -> Result<Vec<u8>> {
    decrypt(key, &sealed.nonce, &sealed.ciphertext)
}

/// A fresh random item key.
pub fn random_item_key() -> Vec<u8> {
    let mut key = vec![0u8; ITEM_KEY_LEN];
    OsRng.fill_bytes(&mut key);
    key
}
