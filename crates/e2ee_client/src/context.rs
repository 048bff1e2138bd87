//! Per-session E2EE context.
//!
//! Owns the unlocked identity, the peer bundle cache and the conversation
//! key cache. Everything is scoped to one authenticated user on one device;
//! dropping the context drops every in-memory key.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use e2ee_crypto::kdf::MAX_PBKDF2_ITERATIONS;
use e2ee_crypto::session::derive_conversation_key;
use e2ee_crypto::ConversationKey;
use e2ee_proto::api::PeerKeyBundle;
use e2ee_proto::packet::{decrypt_message, encrypt_message};
use e2ee_proto::{DecryptedBody, EncryptedMessagePacket, MessageMeta};
use e2ee_store::{IdentityStore, SqliteIdentityStore};

use crate::cache::EpochCache;
use crate::config::ClientConfig;
use crate::directory::{HttpKeyDirectory, KeyDirectory};
use crate::error::E2eeError;
use crate::identity::{DeviceIdentity, IdentityManager};
use crate::peer_cache::PeerKeyCache;

/// Cached key plus the peer it was derived for.
#[derive(Clone)]
struct CachedKey {
    peer_user_id: String,
    key: Arc<ConversationKey>,
}

pub struct E2eeContext {
    pub(crate) user_id: String,
    pub(crate) device_id: String,
    pub(crate) identities: IdentityManager,
    pub(crate) directory: Arc<dyn KeyDirectory>,
    identity: RwLock<Option<Arc<DeviceIdentity>>>,
    pub(crate) peers: PeerKeyCache,
    conversation_keys: EpochCache<CachedKey>,
}

impl E2eeContext {
    pub fn new(
        config: &ClientConfig,
        store: Arc<dyn IdentityStore>,
        directory: Arc<dyn KeyDirectory>,
    ) -> Result<Self, E2eeError> {
        let user_id = config
            .user_id
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .ok_or_else(|| E2eeError::InvalidArgument("user id is required".into()))?
            .to_string();
        if config.kdf_iterations == 0 || config.kdf_iterations > MAX_PBKDF2_ITERATIONS {
            return Err(E2eeError::InvalidArgument(format!(
                "kdf iterations must be 1-{MAX_PBKDF2_ITERATIONS}"
            )));
        }

        Ok(Self {
            user_id,
            device_id: config.device_id.clone(),
            identities: IdentityManager::new(store, config.kdf_iterations),
            directory,
            identity: RwLock::new(None),
            peers: PeerKeyCache::new(),
            conversation_keys: EpochCache::new(),
        })
    }

    /// SQLite store at `config.db_path` and the HTTP directory at `config.api_url`.
    pub async fn open(config: &ClientConfig) -> Result<Self, E2eeError> {
        let store = SqliteIdentityStore::open(&config.db_path).await?;
        let directory = HttpKeyDirectory::new(config)?;
        Self::new(config, Arc::new(store), Arc::new(directory))
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Device id this session was configured for.
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    // ── Identity slot ────────────────────────────────────────────────────────

    /// Unlock (or create) the identity for `device_id` and make it current.
    pub async fn unlock(&self, pin: &str, device_id: &str) -> Result<Arc<DeviceIdentity>, E2eeError> {
        let identity = Arc::new(self.identities.obtain_identity(pin, device_id).await?);
        self.install_identity(Arc::clone(&identity)).await;
        Ok(identity)
    }

    /// The current identity. `NotFound` while locked.
    pub async fn identity(&self) -> Result<Arc<DeviceIdentity>, E2eeError> {
        self.identity
            .read()
            .await
            .clone()
            .ok_or_else(|| E2eeError::NotFound("identity is locked".into()))
    }

    /// Drop the in-memory identity and every derived key.
    pub async fn lock(&self) {
        *self.identity.write().await = None;
        self.clear_caches();
        info!("[e2ee] session locked");
    }

    /// Wipe the stored record and lock. Irreversible without a directory backup.
    pub async fn forget_identity(&self) -> Result<(), E2eeError> {
        self.identities.forget_identity().await?;
        self.lock().await;
        Ok(())
    }

    pub(crate) async fn install_identity(&self, identity: Arc<DeviceIdentity>) {
        let mut slot = self.identity.write().await;
        *slot = Some(identity);
        self.clear_caches();
    }

    pub fn clear_caches(&self) {
        self.conversation_keys.clear();
        self.peers.clear();
        debug!("[e2ee] key caches cleared");
    }

    pub fn cached_conversation_keys(&self) -> usize {
        self.conversation_keys.len()
    }

    pub fn cached_peers(&self) -> usize {
        self.peers.len()
    }

    // ── Keys ─────────────────────────────────────────────────────────────────

    pub async fn peer_bundle(&self, peer_user_id: &str) -> Result<PeerKeyBundle, E2eeError> {
        self.peers.get_or_fetch(self.directory.as_ref(), peer_user_id).await
    }

    /// Conversation key shared with `peer_user_id`, derived on first use.
    pub async fn conversation_key(
        &self,
        conversation_id: &str,
        peer_user_id: &str,
    ) -> Result<Arc<ConversationKey>, E2eeError> {
        if conversation_id.is_empty() || peer_user_id.trim().is_empty() {
            return Err(E2eeError::InvalidArgument(
                "conversation id and peer user id are required".into(),
            ));
        }
        let epoch = self.conversation_keys.epoch();
        if let Some(cached) = self.conversation_keys.get(conversation_id) {
            if cached.peer_user_id == peer_user_id {
                return Ok(cached.key);
            }
        }

        let identity = self.identity().await?;
        let peer = self.peer_bundle(peer_user_id).await?;
        let their_dh = peer.dh_pub_jwk.to_public_key()?;
        let key = Arc::new(derive_conversation_key(
            &identity.keys.dh,
            &their_dh,
            conversation_id,
            &self.user_id,
            peer_user_id,
        )?);

        let stored = self.conversation_keys.insert_if_current(
            epoch,
            conversation_id,
            CachedKey { peer_user_id: peer_user_id.to_string(), key: Arc::clone(&key) },
        );
        debug!(
            conversation_id = %conversation_id,
            peer_device = %peer.device_id,
            cached = stored,
            "[e2ee] conversation key derived"
        );
        Ok(key)
    }

    // ── Messages ─────────────────────────────────────────────────────────────

    pub async fn encrypt_for_peer(
        &self,
        conversation_id: &str,
        message_id: &str,
        peer_user_id: &str,
        plaintext: &str,
    ) -> Result<EncryptedMessagePacket, E2eeError> {
        let key = self.conversation_key(conversation_id, peer_user_id).await?;
        let meta = MessageMeta::new(conversation_id, message_id, &self.user_id, peer_user_id, Utc::now());
        Ok(encrypt_message(&key, &meta, plaintext)?)
    }

    /// Decrypt a packet addressed to or sent by this user, resolving the peer
    /// from the packet's own sender/receiver.
    pub async fn decrypt_incoming(&self, packet: &EncryptedMessagePacket) -> Result<String, E2eeError> {
        let conversation_id = packet.conversation_id.as_deref().ok_or_else(|| {
            E2eeError::InvalidArgument("packet has no conversation id; use decrypt_in_conversation".into())
        })?;
        let peer = packet.counterpart(&self.user_id).ok_or_else(|| {
            E2eeError::InvalidArgument("packet is not addressed to or from this user".into())
        })?;
        self.decrypt_in_conversation(conversation_id, peer, packet).await
    }

    /// Decrypt with explicit conversation context. Needed for legacy packets
    /// that carry no metadata.
    pub async fn decrypt_in_conversation(
        &self,
        conversation_id: &str,
        peer_user_id: &str,
        packet: &EncryptedMessagePacket,
    ) -> Result<String, E2eeError> {
        let key = self.conversation_key(conversation_id, peer_user_id).await?;
        match decrypt_message(&key, packet) {
            Ok(text) => Ok(text),
            Err(e) => {
                let local_dh = match self.identity().await {
                    Ok(identity) => identity.dh_fingerprint(),
                    Err(_) => "-".to_string(),
                };
                warn!(
                    conversation_id = %conversation_id,
                    message_id = packet.message_id.as_deref().unwrap_or("-"),
                    local_dh_fp = %local_dh,
                    error = %e,
                    "[e2ee] decrypt failed"
                );
                Err(e.into())
            }
        }
    }

    /// Like `decrypt_incoming`, but never fails: undecryptable messages
    /// become a placeholder body.
    pub async fn display_incoming(&self, packet: &EncryptedMessagePacket) -> DecryptedBody {
        match self.decrypt_incoming(packet).await {
            Ok(text) => DecryptedBody::Plaintext(text),
            Err(e) => {
                debug!(error = %e, "[e2ee] showing undecryptable placeholder");
                DecryptedBody::Undecryptable
            }
        }
    }
}
