//! EC JSON Web Keys on P-256.
//!
//! Keys cross the wire in the same shape a WebCrypto peer exports them:
//! `{kty:"EC", crv:"P-256", x, y[, d][, use]}` with base64url (unpadded)
//! big-endian coordinates. Public JWKs MUST NOT carry `d`.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use p256::elliptic_curve::sec1::{FromEncodedPoint, ToEncodedPoint};
use p256::{EncodedPoint, FieldBytes, PublicKey, SecretKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, Zeroizing};

use crate::error::CryptoError;

pub const KTY_EC: &str = "EC";
pub const CRV_P256: &str = "P-256";
pub const USE_SIG: &str = "sig";

const COORD_LEN: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize)]
pub struct EcJwk {
    pub kty: String,
    pub crv: String,
    pub x: String,
    pub y: String,
    /// Private scalar. Present only inside the wrapped identity payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub d: Option<String>,
    #[serde(rename = "use", default, skip_serializing_if = "Option::is_none")]
    pub key_use: Option<String>,
}

impl EcJwk {
    pub fn from_public_key(public: &PublicKey, key_use: Option<&str>) -> Self {
        let point = public.to_encoded_point(false);
        // Uncompressed SEC1 points of a valid public key always carry both coordinates.
        let x = point.x().map(|x| URL_SAFE_NO_PAD.encode(x)).unwrap_or_default();
        let y = point.y().map(|y| URL_SAFE_NO_PAD.encode(y)).unwrap_or_default();
        Self {
            kty: KTY_EC.to_string(),
            crv: CRV_P256.to_string(),
            x,
            y,
            d: None,
            key_use: key_use.map(str::to_string),
        }
    }

    pub fn from_secret_key(secret: &SecretKey, key_use: Option<&str>) -> Self {
        let mut jwk = Self::from_public_key(&secret.public_key(), key_use);
        let mut d = secret.to_bytes();
        jwk.d = Some(URL_SAFE_NO_PAD.encode(d.as_slice()));
        d.as_mut_slice().zeroize();
        jwk
    }

    pub fn is_private(&self) -> bool {
        self.d.is_some()
    }

    /// Decode the public point, checking it lies on P-256.
    pub fn to_public_key(&self) -> Result<PublicKey, CryptoError> {
        self.check_curve()?;
        let x = decode_coordinate(&self.x, "x")?;
        let y = decode_coordinate(&self.y, "y")?;
        let point = EncodedPoint::from_affine_coordinates(
            FieldBytes::from_slice(&x),
            FieldBytes::from_slice(&y),
            false,
        );
        Option::<PublicKey>::from(PublicKey::from_encoded_point(&point))
            .ok_or_else(|| CryptoError::InvalidKey("JWK point is not on P-256".into()))
    }

    /// Decode the private scalar and check it matches the declared public point.
    pub fn to_secret_key(&self) -> Result<SecretKey, CryptoError> {
        let d_b64 = self
            .d
            .as_deref()
            .ok_or_else(|| CryptoError::InvalidKey("JWK has no private component".into()))?;
        let d = Zeroizing::new(URL_SAFE_NO_PAD.decode(d_b64)?);
        if d.len() != COORD_LEN {
            return Err(CryptoError::InvalidKey(format!(
                "JWK d must be {COORD_LEN} bytes, got {}",
                d.len()
            )));
        }
        let secret = SecretKey::from_slice(&d)
            .map_err(|_| CryptoError::InvalidKey("JWK d is not a valid P-256 scalar".into()))?;
        if secret.public_key() != self.to_public_key()? {
            return Err(CryptoError::InvalidKey(
                "JWK private scalar does not match its public point".into(),
            ));
        }
        Ok(secret)
    }

    /// SHA-256 over the canonical public members, hex in groups of 4.
    ///
    /// Example: "a1b2 c3d4 e5f6 7890 abcd ef01 2345 6789"
    pub fn fingerprint(&self) -> String {
        let canonical = format!(
            r#"{{"crv":"{}","kty":"{}","x":"{}","y":"{}"}}"#,
            self.crv, self.kty, self.x, self.y
        );
        let digest = Sha256::digest(canonical.as_bytes());
        let hex = hex::encode(&digest[..16]);
        hex.as_bytes()
            .chunks(4)
            .map(|c| String::from_utf8_lossy(c).into_owned())
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn check_curve(&self) -> Result<(), CryptoError> {
        if self.kty != KTY_EC {
            return Err(CryptoError::InvalidKey(format!("JWK kty must be '{KTY_EC}'")));
        }
        if self.crv != CRV_P256 {
            return Err(CryptoError::InvalidKey(format!("JWK crv must be '{CRV_P256}'")));
        }
        Ok(())
    }
}

/// Directory-side validation of a published public JWK.
///
/// Returns a human-readable reason on rejection, mirroring the `detail`
/// field the directory reports.
pub fn validate_public_p256(jwk: &EcJwk, expected_use: Option<&str>) -> Result<(), String> {
    if jwk.kty != KTY_EC {
        return Err(format!("JWK kty must be '{KTY_EC}'"));
    }
    if jwk.crv != CRV_P256 {
        return Err(format!("JWK crv must be '{CRV_P256}'"));
    }
    if jwk.x.is_empty() || jwk.y.is_empty() {
        return Err("JWK must include x and y".into());
    }
    if jwk.d.is_some() {
        return Err("Public JWK must not include 'd'".into());
    }
    if let (Some(expected), Some(actual)) = (expected_use, jwk.key_use.as_deref()) {
        if expected != actual {
            return Err(format!("JWK use must be '{expected}' if present"));
        }
    }
    jwk.to_public_key().map(|_| ()).map_err(|e| e.to_string())
}

fn decode_coordinate(b64: &str, name: &str) -> Result<Vec<u8>, CryptoError> {
    let bytes = URL_SAFE_NO_PAD.decode(b64)?;
    if bytes.len() != COORD_LEN {
        return Err(CryptoError::InvalidKey(format!(
            "JWK {name} must be {COORD_LEN} bytes, got {}",
            bytes.len()
        )));
    }
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    #[test]
    fn private_jwk_round_trips() {
        let secret = SecretKey::random(&mut OsRng);
        let jwk = EcJwk::from_secret_key(&secret, None);
        assert!(jwk.is_private());
        assert_eq!(jwk.to_secret_key().unwrap().to_bytes(), secret.to_bytes());

        assert_eq!(jwk.to_public_key().unwrap(), secret.public_key());
    }

    #[test]
    fn mismatched_private_scalar_is_rejected() {
        let a = EcJwk::from_secret_key(&SecretKey::random(&mut OsRng), None);
        let b = EcJwk::from_secret_key(&SecretKey::random(&mut OsRng), None);
        let franken = EcJwk { d: b.d.clone(), ..a };
        assert!(matches!(franken.to_secret_key(), Err(CryptoError::InvalidKey(_))));
    }

    #[test]
    fn directory_validation_rules() {
        let secret = SecretKey::random(&mut OsRng);
        let sig_pub = EcJwk::from_public_key(&secret.public_key(), Some(USE_SIG));
        assert!(validate_public_p256(&sig_pub, Some(USE_SIG)).is_ok());

        let no_use = EcJwk { key_use: None, ..sig_pub.clone() };
        assert!(validate_public_p256(&no_use, Some(USE_SIG)).is_ok());

        let wrong_use = EcJwk { key_use: Some("enc".into()), ..sig_pub.clone() };
        assert!(validate_public_p256(&wrong_use, Some(USE_SIG)).is_err());

        let leaked = EcJwk::from_secret_key(&secret, None);
        let err = validate_public_p256(&leaked, None).unwrap_err();
        assert!(err.contains("'d'"));

        let other_curve = EcJwk { crv: "P-384".into(), ..sig_pub };
        assert!(validate_public_p256(&other_curve, None).is_err());
    }

    #[test]
    fn off_curve_point_is_rejected() {
        let secret = SecretKey::random(&mut OsRng);
        let mut jwk = EcJwk::from_public_key(&secret.public_key(), None);
        jwk.y = jwk.x.clone();
        assert!(jwk.to_public_key().is_err());
    }

    #[test]
    fn fingerprint_ignores_use_and_private_part() {
        let secret = SecretKey::random(&mut OsRng);
        let private = EcJwk::from_secret_key(&secret, Some(USE_SIG));
        let public = EcJwk::from_public_key(&secret.public_key(), None);
        assert_eq!(private.fingerprint(), public.fingerprint());
        assert_eq!(public.fingerprint().split(' ').count(), 8);
    }
}
