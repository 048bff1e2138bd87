//! End-to-end behaviour of identity, registration, restore, rotation and
//! messaging against the in-memory key directory.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use e2ee_client::{
    ClientConfig, E2eeContext, E2eeError, KeyDirectory, MemoryKeyDirectory, PublishOutcome,
};
use e2ee_crypto::DeviceKeys;
use e2ee_proto::api::{
    ChangePinRequest, ChangePinResponse, OwnKeysResponse, PeerKeyBundle, RegisterRequest,
    RegisterResponse,
};
use e2ee_proto::{CipherDescriptor, DecryptedBody, EncryptedMessagePacket, KdfDescriptor};
use e2ee_store::{IdentityStore, MemoryIdentityStore, SqliteIdentityStore};

const ALICE: &str = "0b7c6f3e-1d2a-4a51-9b0e-5e2f1c3d4a01";
const BOB: &str = "9f1e2d3c-4b5a-4c6d-8e7f-0a1b2c3d4e02";
const PIN: &str = "123456";

fn config(user_id: &str) -> ClientConfig {
    ClientConfig::default().with_user_id(user_id).with_kdf_iterations(1_000)
}

fn context_with_store(
    dir: &MemoryKeyDirectory,
    user_id: &str,
    store: Arc<dyn IdentityStore>,
) -> E2eeContext {
    E2eeContext::new(&config(user_id), store, Arc::new(dir.as_user(user_id))).unwrap()
}

fn context(dir: &MemoryKeyDirectory, user_id: &str) -> (E2eeContext, MemoryIdentityStore) {
    let store = MemoryIdentityStore::new();
    let ctx = context_with_store(dir, user_id, Arc::new(store.clone()));
    (ctx, store)
}

/// Unlock and register a device, returning its context.
async fn online(dir: &MemoryKeyDirectory, user_id: &str, device_id: &str) -> (E2eeContext, MemoryIdentityStore) {
    let (ctx, store) = context(dir, user_id);
    let identity = ctx.unlock(PIN, device_id).await.unwrap();
    ctx.register_public_bundle(&identity).await.unwrap();
    (ctx, store)
}

/// Directory that can hold one peer lookup open until released.
struct PausingDirectory {
    inner: MemoryKeyDirectory,
    armed: AtomicBool,
    entered: Notify,
    release: Notify,
}

impl PausingDirectory {
    fn new(inner: MemoryKeyDirectory) -> Self {
        Self { inner, armed: AtomicBool::new(false), entered: Notify::new(), release: Notify::new() }
    }
}

#[async_trait]
impl KeyDirectory for PausingDirectory {
    async fn register(&self, req: &RegisterRequest) -> Result<RegisterResponse, E2eeError> {
        self.inner.register(req).await
    }

    async fn fetch_own(&self, device_id: &str) -> Result<Option<OwnKeysResponse>, E2eeError> {
        self.inner.fetch_own(device_id).await
    }

    async fn fetch_peer(
        &self,
        user_id: &str,
        device_id: Option<&str>,
    ) -> Result<Vec<PeerKeyBundle>, E2eeError> {
        if self.armed.swap(false, Ordering::SeqCst) {
            self.entered.notify_one();
            self.release.notified().await;
        }
        self.inner.fetch_peer(user_id, device_id).await
    }

    async fn change_pin(&self, req: &ChangePinRequest) -> Result<ChangePinResponse, E2eeError> {
        self.inner.change_pin(req).await
    }
}

// ── Identity ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn identity_persists_across_sqlite_reopen() {
    let dir = MemoryKeyDirectory::new();
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("e2ee.db");

    let first = {
        let store = SqliteIdentityStore::open(&path).await.unwrap();
        let ctx = context_with_store(&dir, ALICE, Arc::new(store));
        ctx.unlock(PIN, "web-1").await.unwrap()
    };
    assert!(first.is_new);

    let store = SqliteIdentityStore::open(&path).await.unwrap();
    let ctx = context_with_store(&dir, ALICE, Arc::new(store));
    let second = ctx.unlock(PIN, "web-1").await.unwrap();
    assert!(!second.is_new);
    assert_eq!(first.public_jwks(), second.public_jwks());
}

#[tokio::test]
async fn wrong_pin_keeps_the_record_until_forgotten() {
    let dir = MemoryKeyDirectory::new();
    let (ctx, store) = context(&dir, ALICE);
    let original = ctx.unlock(PIN, "web-1").await.unwrap();
    let before = store.load().await.unwrap();

    assert!(matches!(ctx.unlock("000000", "web-1").await, Err(E2eeError::AuthenticationFailure)));
    assert_eq!(store.load().await.unwrap(), before);

    ctx.forget_identity().await.unwrap();
    assert!(store.load().await.unwrap().is_none());
    assert!(matches!(ctx.identity().await, Err(E2eeError::NotFound(_))));

    let fresh = ctx.unlock("000000", "web-1").await.unwrap();
    assert!(fresh.is_new);
    assert_ne!(fresh.public_jwks(), original.public_jwks());
}

// ── Registration ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn register_creates_then_updates() {
    let dir = MemoryKeyDirectory::new();
    let (ctx, _) = context(&dir, ALICE);
    let identity = ctx.unlock(PIN, "web-1").await.unwrap();

    let first = ctx.register_public_bundle(&identity).await.unwrap();
    assert!(first.ok);
    assert!(first.created);
    assert_eq!(first.user_id, ALICE);
    assert_eq!(first.device_id, "web-1");

    let second = ctx.register_public_bundle(&identity).await.unwrap();
    assert!(!second.created);
    assert!(second.updated_at > first.updated_at);

    let own = dir.as_user(ALICE).fetch_own("web-1").await.unwrap().unwrap();
    assert!(own.kdf.is_some());
    assert!(own.wrapped_priv.is_some());
    assert!(own.sign_pub_jwk.d.is_none());
}

#[tokio::test]
async fn peer_lookup_never_returns_backups_or_bad_ids() {
    let dir = MemoryKeyDirectory::new();
    online(&dir, BOB, "web-1").await;

    let keys = dir.fetch_peer(BOB, None).await.unwrap();
    assert_eq!(keys.len(), 1);
    let json = serde_json::to_value(&keys[0]).unwrap();
    assert!(json.get("wrappedPriv").is_none());
    assert!(json.get("kdf").is_none());

    assert!(matches!(
        dir.fetch_peer("bob", None).await,
        Err(E2eeError::RemoteRejected { status: 400, .. })
    ));
    assert!(matches!(dir.fetch_peer(ALICE, None).await, Err(E2eeError::NotFound(_))));
}

// ── Restore ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn restore_against_empty_directory_is_not_found() {
    let dir = MemoryKeyDirectory::new();
    let (ctx, store) = context(&dir, ALICE);
    assert!(matches!(ctx.restore_from_backup("web-1", PIN).await, Err(E2eeError::NotFound(_))));
    assert!(store.load().await.unwrap().is_none());
}

#[tokio::test]
async fn restore_on_new_install_recovers_the_same_keys() {
    let dir = MemoryKeyDirectory::new();
    let (original, _) = online(&dir, ALICE, "web-1").await;
    let original_keys = original.identity().await.unwrap().public_jwks();

    let (replacement, store) = context(&dir, ALICE);
    let restored = replacement.restore_from_backup("web-1", PIN).await.unwrap();
    assert!(!restored.is_new);
    assert_eq!(restored.public_jwks(), original_keys);
    assert_eq!(store.load().await.unwrap().unwrap().device_id, "web-1");

    // The restored record is a normal local record from now on.
    let again = replacement.unlock(PIN, "web-1").await.unwrap();
    assert_eq!(again.public_jwks(), original_keys);
}

#[tokio::test]
async fn restore_with_wrong_pin_rolls_back() {
    let dir = MemoryKeyDirectory::new();
    online(&dir, ALICE, "web-1").await;

    let (empty, empty_store) = context(&dir, ALICE);
    assert!(matches!(
        empty.restore_from_backup("web-1", "999999").await,
        Err(E2eeError::AuthenticationFailure)
    ));
    assert!(empty_store.load().await.unwrap().is_none());

    // A device with its own record keeps it after a failed restore.
    let (other, other_store) = context(&dir, ALICE);
    other.unlock("4321", "web-1").await.unwrap();
    let before = other_store.load().await.unwrap();
    assert!(other.restore_from_backup("web-1", "4321").await.is_err());
    assert_eq!(other_store.load().await.unwrap(), before);
}

#[tokio::test]
async fn restore_refuses_an_oversized_kdf_cost_without_deriving() {
    let dir = MemoryKeyDirectory::new();
    let jwks = DeviceKeys::generate().public_jwks();
    dir.as_user(ALICE)
        .register(&RegisterRequest {
            device_id: "web-1".into(),
            sign_pub_jwk: jwks.sign_pub_jwk,
            dh_pub_jwk: jwks.dh_pub_jwk,
            kdf: Some(KdfDescriptor::pbkdf2_sha256(&[7u8; 16], u32::MAX)),
            wrapped_priv: Some(CipherDescriptor::aes_gcm(&[1u8; 12], &[2u8; 48])),
        })
        .await
        .unwrap();

    let (ctx, store) = context(&dir, ALICE);
    let result = tokio::time::timeout(Duration::from_secs(5), ctx.restore_from_backup("web-1", PIN))
        .await
        .expect("restore must fail fast");
    assert!(matches!(result, Err(E2eeError::CorruptRecord(_))));
    assert!(store.load().await.unwrap().is_none());
}

#[tokio::test]
async fn restore_never_silently_replaces_another_device() {
    let dir = MemoryKeyDirectory::new();
    let (laptop, _) = online(&dir, ALICE, "laptop").await;
    let laptop_keys = laptop.identity().await.unwrap().public_jwks();

    let (phone, phone_store) = context(&dir, ALICE);
    phone.unlock(PIN, "phone").await.unwrap();

    match phone.restore_from_backup("laptop", PIN).await {
        Err(E2eeError::DeviceMismatch { stored, requested }) => {
            assert_eq!(stored, "phone");
            assert_eq!(requested, "laptop");
        }
        other => panic!("expected DeviceMismatch, got {other:?}"),
    }
    assert_eq!(phone_store.load().await.unwrap().unwrap().device_id, "phone");

    let restored = phone.restore_from_backup_replacing("laptop", PIN).await.unwrap();
    assert_eq!(restored.public_jwks(), laptop_keys);
    assert_eq!(phone_store.load().await.unwrap().unwrap().device_id, "laptop");
}

// ── Messaging ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn messages_round_trip_between_users() {
    let dir = MemoryKeyDirectory::new();
    let (alice, _) = online(&dir, ALICE, "web-1").await;
    let (bob, _) = online(&dir, BOB, "web-1").await;

    let packet = alice.encrypt_for_peer("conv-1", "msg-1", BOB, "merhaba Bob").await.unwrap();
    assert_eq!(packet.sender_id.as_deref(), Some(ALICE));
    assert_eq!(packet.receiver_id.as_deref(), Some(BOB));

    let wire = serde_json::to_string(&packet).unwrap();
    let received: EncryptedMessagePacket = serde_json::from_str(&wire).unwrap();
    assert_eq!(bob.decrypt_incoming(&received).await.unwrap(), "merhaba Bob");

    // The sender can read its own message back.
    assert_eq!(alice.decrypt_incoming(&packet).await.unwrap(), "merhaba Bob");

    let a_key = alice.conversation_key("conv-1", BOB).await.unwrap();
    let b_key = bob.conversation_key("conv-1", ALICE).await.unwrap();
    assert_eq!(a_key.as_bytes(), b_key.as_bytes());
}

#[tokio::test]
async fn tampered_metadata_is_an_authentication_failure() {
    let dir = MemoryKeyDirectory::new();
    let (alice, _) = online(&dir, ALICE, "web-1").await;
    let (bob, _) = online(&dir, BOB, "web-1").await;

    let packet = alice.encrypt_for_peer("conv-1", "msg-1", BOB, "10 TL gönder").await.unwrap();

    let mut relabelled = packet.clone();
    relabelled.message_id = Some("msg-2".into());
    assert!(matches!(bob.decrypt_incoming(&relabelled).await, Err(E2eeError::AuthenticationFailure)));

    let mut redated = packet.clone();
    redated.sent_at = Some("2000-01-01T00:00:00.000Z".into());
    assert!(matches!(bob.decrypt_incoming(&redated).await, Err(E2eeError::AuthenticationFailure)));
    assert_eq!(bob.display_incoming(&redated).await, DecryptedBody::Undecryptable);

    let mut stripped = packet.clone();
    stripped.receiver_id = None;
    assert!(matches!(
        bob.decrypt_in_conversation("conv-1", ALICE, &stripped).await,
        Err(E2eeError::InvalidArgument(_))
    ));
}

#[tokio::test]
async fn peer_cache_uses_the_most_recent_device() {
    let dir = MemoryKeyDirectory::new();
    let (alice, _) = online(&dir, ALICE, "web-1").await;
    let (_old_phone, _) = online(&dir, BOB, "phone").await;
    let (bob_laptop, _) = online(&dir, BOB, "laptop").await;

    let bundle = alice.peer_bundle(BOB).await.unwrap();
    assert_eq!(bundle.device_id, "laptop");
    assert_eq!(alice.cached_peers(), 1);

    let packet = alice.encrypt_for_peer("conv-9", "m-1", BOB, "hi laptop").await.unwrap();
    assert_eq!(bob_laptop.decrypt_incoming(&packet).await.unwrap(), "hi laptop");
}

// ── Rotation ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn rotation_changes_the_pin_but_not_the_keys() {
    let dir = MemoryKeyDirectory::new();
    let (ctx, store) = online(&dir, ALICE, "web-1").await;
    let keys = ctx.identity().await.unwrap().public_jwks();
    let before = store.load().await.unwrap().unwrap();

    let result = ctx.rotate_pin("web-1", PIN, "654321").await.unwrap();
    assert!(!result.skipped);
    assert!(result.is_published());

    let after = store.load().await.unwrap().unwrap();
    assert_eq!(after.created_at, before.created_at);
    assert!(after.updated_at >= before.updated_at);
    assert_eq!(after.kdf.iterations, before.kdf.iterations);
    assert_ne!(after.kdf.salt_b64, before.kdf.salt_b64);

    assert!(matches!(ctx.unlock(PIN, "web-1").await, Err(E2eeError::AuthenticationFailure)));
    assert_eq!(ctx.unlock("654321", "web-1").await.unwrap().public_jwks(), keys);

    // The directory backup follows the new PIN too.
    let (fresh, _) = context(&dir, ALICE);
    assert!(fresh.restore_from_backup("web-1", PIN).await.is_err());
    assert_eq!(fresh.restore_from_backup("web-1", "654321").await.unwrap().public_jwks(), keys);
}

#[tokio::test]
async fn rotating_to_the_same_pin_is_skipped() {
    let dir = MemoryKeyDirectory::new();
    let (ctx, store) = online(&dir, ALICE, "web-1").await;
    let before = store.load().await.unwrap();

    // Fullwidth digits normalise to the same PIN.
    let result = ctx.rotate_pin("web-1", PIN, "\u{FF11}\u{FF12}\u{FF13}\u{FF14}\u{FF15}\u{FF16}").await.unwrap();
    assert!(result.skipped);
    assert!(matches!(result.publish, PublishOutcome::NotNeeded));
    assert_eq!(store.load().await.unwrap(), before);
}

#[tokio::test]
async fn wrong_old_pin_leaves_everything_untouched() {
    let dir = MemoryKeyDirectory::new();
    let (ctx, store) = online(&dir, ALICE, "web-1").await;
    let before = store.load().await.unwrap();

    assert!(matches!(ctx.rotate_pin("web-1", "111111", "222222").await, Err(E2eeError::OldPinInvalid)));
    assert_eq!(store.load().await.unwrap(), before);
    assert!(matches!(ctx.rotate_pin("web-2", PIN, "222222").await, Err(E2eeError::DeviceMismatch { .. })));
    assert!(matches!(ctx.rotate_pin("web-1", "", "222222").await, Err(E2eeError::InvalidArgument(_))));
}

#[tokio::test]
async fn rotation_without_local_record_is_not_found() {
    let dir = MemoryKeyDirectory::new();
    let (ctx, _) = context(&dir, ALICE);
    assert!(matches!(ctx.rotate_pin("web-1", "1", "2").await, Err(E2eeError::NotFound(_))));
}

#[tokio::test]
async fn failed_publish_keeps_local_rotation_and_can_be_retried() {
    let dir = MemoryKeyDirectory::new();
    let (ctx, store) = online(&dir, ALICE, "web-1").await;

    dir.set_unavailable(true);
    let result = ctx.rotate_pin("web-1", PIN, "777777").await.unwrap();
    assert!(matches!(result.publish, PublishOutcome::Failed(E2eeError::RemoteRejected { status: 503, .. })));
    assert_eq!(store.load().await.unwrap().unwrap().updated_at, result.updated_at.unwrap());
    assert!(ctx.unlock("777777", "web-1").await.is_ok());

    dir.set_unavailable(false);
    ctx.republish_pin_change("web-1").await.unwrap();

    let (fresh, _) = context(&dir, ALICE);
    assert!(fresh.restore_from_backup("web-1", "777777").await.is_ok());
}

#[tokio::test]
async fn rotation_clears_cached_keys() {
    let dir = MemoryKeyDirectory::new();
    let (alice, _) = online(&dir, ALICE, "web-1").await;
    online(&dir, BOB, "web-1").await;

    alice.conversation_key("conv-1", BOB).await.unwrap();
    assert_eq!(alice.cached_conversation_keys(), 1);
    assert_eq!(alice.cached_peers(), 1);

    alice.rotate_pin("web-1", PIN, "8888").await.unwrap();
    assert_eq!(alice.cached_conversation_keys(), 0);
    assert_eq!(alice.cached_peers(), 0);
}

#[tokio::test]
async fn key_derived_across_a_rotation_is_not_cached() {
    let dir = MemoryKeyDirectory::new();
    online(&dir, BOB, "web-1").await;

    let pausing = Arc::new(PausingDirectory::new(dir.as_user(ALICE)));
    let store = MemoryIdentityStore::new();
    let alice = E2eeContext::new(&config(ALICE), Arc::new(store), pausing.clone()).unwrap();
    let identity = alice.unlock(PIN, "web-1").await.unwrap();
    alice.register_public_bundle(&identity).await.unwrap();

    pausing.armed.store(true, Ordering::SeqCst);
    let derive = alice.conversation_key("conv-1", BOB);
    let rotate = async {
        pausing.entered.notified().await;
        let result = alice.rotate_pin("web-1", PIN, "8888").await.unwrap();
        pausing.release.notify_one();
        result
    };
    let (key, rotation) = tokio::join!(derive, rotate);

    assert!(key.is_ok());
    assert!(rotation.is_published());
    assert_eq!(alice.cached_conversation_keys(), 0);
    assert_eq!(alice.cached_peers(), 0);

    // The next lookup derives and caches normally.
    alice.conversation_key("conv-1", BOB).await.unwrap();
    assert_eq!(alice.cached_conversation_keys(), 1);
}

#[tokio::test]
async fn key_derived_across_a_lock_and_unlock_is_not_cached() {
    let dir = MemoryKeyDirectory::new();
    online(&dir, BOB, "web-1").await;

    let pausing = Arc::new(PausingDirectory::new(dir.as_user(ALICE)));
    let alice =
        E2eeContext::new(&config(ALICE), Arc::new(MemoryIdentityStore::new()), pausing.clone()).unwrap();
    alice.unlock(PIN, "web-1").await.unwrap();

    pausing.armed.store(true, Ordering::SeqCst);
    let derive = alice.conversation_key("conv-1", BOB);
    let swap = async {
        pausing.entered.notified().await;
        alice.lock().await;
        alice.unlock(PIN, "web-1").await.unwrap();
        pausing.release.notify_one();
    };
    let (key, ()) = tokio::join!(derive, swap);

    assert!(key.is_ok());
    assert_eq!(alice.cached_conversation_keys(), 0);
}

#[tokio::test]
async fn republish_for_unregistered_device_is_not_found() {
    let dir = MemoryKeyDirectory::new();
    let (ctx, _) = context(&dir, ALICE);
    ctx.unlock(PIN, "web-1").await.unwrap();
    assert!(matches!(ctx.republish_pin_change("web-1").await, Err(E2eeError::NotFound(_))));
    assert_eq!(dir.row_count(), 0);
}
