//! Device identity key management
//!
//! Each *device install* owns exactly two long-term P-256 key pairs:
//!   - a signing key pair (ECDSA), published with `use: "sig"`;
//!   - a key-agreement key pair (ECDH), used to derive conversation keys.
//!
//! Key material only leaves this module as JWK. Private JWKs are wrapped
//! under a PIN-derived key before they touch storage (see `e2ee_client`).
//!
//! There is no in-place key rotation: a device keeps its key pairs for the
//! lifetime of the install and only the wrapping changes.

use p256::ecdsa::signature::{Signer, Verifier};
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use p256::{PublicKey, SecretKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::{
    error::CryptoError,
    jwk::{EcJwk, USE_SIG},
};

// ── JWK bundles ───────────────────────────────────────────────────────────────

/// Public halves as published to the key directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicJwks {
    pub sign_pub_jwk: EcJwk,
    pub dh_pub_jwk: EcJwk,
}

/// Private halves. Only ever serialised into the wrapped identity payload.
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(rename_all = "camelCase")]
pub struct PrivateJwks {
    pub sign_priv_jwk: EcJwk,
    pub dh_priv_jwk: EcJwk,
}

// ── Signing key pair ──────────────────────────────────────────────────────────

/// ECDSA P-256 signing key pair. `SecretKey` clears itself on drop.
#[derive(Clone)]
pub struct SigningKeyPair {
    secret: SecretKey,
}

impl SigningKeyPair {
    pub fn generate() -> Self {
        Self { secret: SecretKey::random(&mut OsRng) }
    }

    pub fn public_key(&self) -> PublicKey {
        self.secret.public_key()
    }

    /// Sign arbitrary bytes; returns the 64-byte `r || s` encoding WebCrypto uses.
    pub fn sign(&self, msg: &[u8]) -> Vec<u8> {
        let signature: Signature = SigningKey::from(&self.secret).sign(msg);
        signature.to_bytes().to_vec()
    }

    /// Verify a signature made by any P-256 signing key.
    pub fn verify(public: &PublicKey, msg: &[u8], sig_bytes: &[u8]) -> Result<(), CryptoError> {
        let vk = VerifyingKey::from_affine(*public.as_affine())
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        let sig = Signature::from_slice(sig_bytes)
            .map_err(|_| CryptoError::InvalidKey("Bad signature encoding".into()))?;
        vk.verify(msg, &sig).map_err(|_| CryptoError::SignatureVerification)
    }
}

// ── Key-agreement key pair ────────────────────────────────────────────────────

/// ECDH P-256 key pair.
#[derive(Clone)]
pub struct DhKeyPair {
    secret: SecretKey,
}

impl DhKeyPair {
    pub fn generate() -> Self {
        Self { secret: SecretKey::random(&mut OsRng) }
    }

    pub fn public_key(&self) -> PublicKey {
        self.secret.public_key()
    }

    /// Raw 256-bit ECDH output (the shared point's x-coordinate).
    pub fn diffie_hellman(&self, their_public: &PublicKey) -> Zeroizing<[u8; 32]> {
        let shared =
            p256::ecdh::diffie_hellman(self.secret.to_nonzero_scalar(), their_public.as_affine());
        let mut out = Zeroizing::new([0u8; 32]);
        out.copy_from_slice(shared.raw_secret_bytes());
        out
    }
}

// ── Device keys ───────────────────────────────────────────────────────────────

/// Both key pairs of one device install.
#[derive(Clone)]
pub struct DeviceKeys {
    pub sign: SigningKeyPair,
    pub dh: DhKeyPair,
}

impl DeviceKeys {
    pub fn generate() -> Self {
        Self { sign: SigningKeyPair::generate(), dh: DhKeyPair::generate() }
    }

    /// Re-import both key pairs from their exported private JWKs.
    pub fn from_private_jwks(jwks: &PrivateJwks) -> Result<Self, CryptoError> {
        let sign = SigningKeyPair { secret: jwks.sign_priv_jwk.to_secret_key()? };
        let dh = DhKeyPair { secret: jwks.dh_priv_jwk.to_secret_key()? };
        Ok(Self { sign, dh })
    }

    pub fn to_private_jwks(&self) -> PrivateJwks {
        PrivateJwks {
            sign_priv_jwk: EcJwk::from_secret_key(&self.sign.secret, None),
            dh_priv_jwk: EcJwk::from_secret_key(&self.dh.secret, None),
        }
    }

    pub fn public_jwks(&self) -> PublicJwks {
        PublicJwks {
            sign_pub_jwk: EcJwk::from_public_key(&self.sign.public_key(), Some(USE_SIG)),
            dh_pub_jwk: EcJwk::from_public_key(&self.dh.public_key(), None),
        }
    }

    /// True when `jwks` names exactly this device's public keys.
    pub fn matches_public(&self, jwks: &PublicJwks) -> bool {
        let ours = self.public_jwks();
        ours.sign_pub_jwk.x == jwks.sign_pub_jwk.x
            && ours.sign_pub_jwk.y == jwks.sign_pub_jwk.y
            && ours.dh_pub_jwk.x == jwks.dh_pub_jwk.x
            && ours.dh_pub_jwk.y == jwks.dh_pub_jwk.y
    }
}
