//! In-process key directory, used as the test double for the chat server.
//!
//! Implements the server contract: upsert by (user, device), both-or-neither
//! backups, backup preserved on updates that omit it, peer lookups newest
//! first and never carrying the backup. One shared table; each
//! [`MemoryKeyDirectory::as_user`] handle acts as one authenticated caller.
//!
//! `set_unavailable` and `row_count` exist for tests only: the first makes
//! every call fail with a 503, the second exposes the table size.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;

use e2ee_crypto::jwk::{validate_public_p256, USE_SIG};
use e2ee_crypto::EcJwk;
use e2ee_proto::api::{
    codes, ChangePinRequest, ChangePinResponse, OwnKeysResponse, PeerKeyBundle, RegisterRequest,
    RegisterResponse,
};
use e2ee_proto::{CipherDescriptor, KdfDescriptor};

use super::{is_canonical_user_id, normalize_device_id, KeyDirectory};
use crate::error::E2eeError;

#[derive(Clone)]
struct Row {
    sign_pub_jwk: EcJwk,
    dh_pub_jwk: EcJwk,
    kdf: Option<KdfDescriptor>,
    wrapped_priv: Option<CipherDescriptor>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Default)]
struct Table {
    rows: HashMap<(String, String), Row>,
    last_write: Option<DateTime<Utc>>,
    unavailable: bool,
}

impl Table {
    /// Strictly increasing write timestamps, so "newest" is never a tie.
    fn tick(&mut self) -> DateTime<Utc> {
        let mut now = Utc::now();
        if let Some(last) = self.last_write {
            if now <= last {
                now = last + Duration::milliseconds(1);
            }
        }
        self.last_write = Some(now);
        now
    }
}

#[derive(Clone, Default)]
pub struct MemoryKeyDirectory {
    table: Arc<Mutex<Table>>,
    caller: Option<String>,
}

impl MemoryKeyDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// A handle on the same table, authenticated as `user_id`.
    pub fn as_user(&self, user_id: &str) -> Self {
        Self { table: Arc::clone(&self.table), caller: Some(user_id.to_string()) }
    }

    /// While set, every call fails as the server being down would.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.table.lock().unavailable = unavailable;
    }

    /// Number of (user, device) rows.
    pub fn row_count(&self) -> usize {
        self.table.lock().rows.len()
    }

    fn caller(&self) -> Result<&str, E2eeError> {
        self.caller
            .as_deref()
            .ok_or_else(|| E2eeError::rejected(401, codes::UNAUTHORIZED, None))
    }

    fn check_available(table: &Table) -> Result<(), E2eeError> {
        if table.unavailable {
            return Err(E2eeError::rejected(503, codes::SERVER, Some("directory unavailable".into())));
        }
        Ok(())
    }
}

fn device_id_or_400(device_id: &str) -> Result<String, E2eeError> {
    normalize_device_id(device_id)
        .map_err(|_| E2eeError::rejected(400, codes::INVALID_DEVICE_ID, None))
}

#[async_trait]
impl KeyDirectory for MemoryKeyDirectory {
    async fn register(&self, req: &RegisterRequest) -> Result<RegisterResponse, E2eeError> {
        let user_id = self.caller()?.to_string();
        let device_id = device_id_or_400(&req.device_id)?;

        validate_public_p256(&req.sign_pub_jwk, Some(USE_SIG))
            .map_err(|d| E2eeError::rejected(400, codes::INVALID_SIGN_PUB_JWK, Some(d)))?;
        validate_public_p256(&req.dh_pub_jwk, None)
            .map_err(|d| E2eeError::rejected(400, codes::INVALID_DH_PUB_JWK, Some(d)))?;
        if req.kdf.is_some() != req.wrapped_priv.is_some() {
            return Err(E2eeError::rejected(
                400,
                codes::INVALID_BACKUP,
                Some("kdf and wrappedPriv must be sent together".into()),
            ));
        }

        let mut table = self.table.lock();
        Self::check_available(&table)?;
        let now = table.tick();
        let key = (user_id.clone(), device_id.clone());

        let created = match table.rows.get_mut(&key) {
            Some(row) => {
                row.sign_pub_jwk = req.sign_pub_jwk.clone();
                row.dh_pub_jwk = req.dh_pub_jwk.clone();
                if req.kdf.is_some() {
                    row.kdf = req.kdf.clone();
                    row.wrapped_priv = req.wrapped_priv.clone();
                }
                row.updated_at = now;
                false
            }
            None => {
                table.rows.insert(
                    key,
                    Row {
                        sign_pub_jwk: req.sign_pub_jwk.clone(),
                        dh_pub_jwk: req.dh_pub_jwk.clone(),
                        kdf: req.kdf.clone(),
                        wrapped_priv: req.wrapped_priv.clone(),
                        created_at: now,
                        updated_at: now,
                    },
                );
                true
            }
        };

        Ok(RegisterResponse { ok: true, created, user_id, device_id, updated_at: now })
    }

    async fn fetch_own(&self, device_id: &str) -> Result<Option<OwnKeysResponse>, E2eeError> {
        let user_id = self.caller()?.to_string();
        let device_id = device_id_or_400(device_id)?;

        let table = self.table.lock();
        Self::check_available(&table)?;
        Ok(table.rows.get(&(user_id, device_id.clone())).map(|row| OwnKeysResponse {
            device_id,
            sign_pub_jwk: row.sign_pub_jwk.clone(),
            dh_pub_jwk: row.dh_pub_jwk.clone(),
            kdf: row.kdf.clone(),
            wrapped_priv: row.wrapped_priv.clone(),
            created_at: Some(row.created_at),
            updated_at: row.updated_at,
        }))
    }

    async fn fetch_peer(
        &self,
        user_id: &str,
        device_id: Option<&str>,
    ) -> Result<Vec<PeerKeyBundle>, E2eeError> {
        if !is_canonical_user_id(user_id) {
            return Err(E2eeError::rejected(400, codes::INVALID_USER_ID, None));
        }

        let table = self.table.lock();
        Self::check_available(&table)?;
        let mut keys: Vec<PeerKeyBundle> = table
            .rows
            .iter()
            .filter(|((uid, did), _)| uid == user_id && device_id.map_or(true, |d| d == did))
            .map(|((uid, did), row)| PeerKeyBundle {
                user_id: uid.clone(),
                device_id: did.clone(),
                sign_pub_jwk: row.sign_pub_jwk.clone(),
                dh_pub_jwk: row.dh_pub_jwk.clone(),
                updated_at: row.updated_at,
            })
            .collect();

        if keys.is_empty() {
            return Err(E2eeError::NotFound(format!("no keys published for user {user_id}")));
        }
        keys.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(keys)
    }

    async fn change_pin(&self, req: &ChangePinRequest) -> Result<ChangePinResponse, E2eeError> {
        let user_id = self.caller()?.to_string();
        let device_id = device_id_or_400(&req.device_id)?;

        let mut table = self.table.lock();
        Self::check_available(&table)?;
        let now = table.tick();
        let row = table.rows.get_mut(&(user_id, device_id.clone())).ok_or_else(|| {
            E2eeError::NotFound(format!("device {device_id} is not registered"))
        })?;
        row.kdf = Some(req.kdf.clone());
        row.wrapped_priv = Some(req.wrapped_priv.clone());
        row.updated_at = now;

        Ok(ChangePinResponse { ok: true, updated_at: now })
    }
}
