use chrono::Utc;
use e2ee_crypto::identity::DhKeyPair;
use e2ee_crypto::session::derive_conversation_key;
use e2ee_crypto::DeviceKeys;
use e2ee_proto::api::{PeerKeysResponse, RegisterRequest};
use e2ee_proto::packet::{decrypt_message, encrypt_message};
use e2ee_proto::{EncryptedMessagePacket, MessageMeta, PacketError};
use uuid::Uuid;

#[test]
fn packet_survives_json_transport() {
    let alice = Uuid::new_v4().to_string();
    let bob = Uuid::new_v4().to_string();
    let a = DhKeyPair::generate();
    let b = DhKeyPair::generate();
    let k_alice = derive_conversation_key(&a, &b.public_key(), "conv-42", &alice, &bob).unwrap();
    let k_bob = derive_conversation_key(&b, &a.public_key(), "conv-42", &bob, &alice).unwrap();

    let meta = MessageMeta::new("conv-42", Uuid::new_v4().to_string(), &alice, &bob, Utc::now());
    let packet = encrypt_message(&k_alice, &meta, "selam 👋").unwrap();

    let json = serde_json::to_string(&packet).unwrap();
    let value: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(value["alg"], "AES-256-GCM");
    assert_eq!(value["senderId"], alice.as_str());
    assert!(value["iv_b64"].is_string());

    let received: EncryptedMessagePacket = serde_json::from_str(&json).unwrap();
    assert_eq!(decrypt_message(&k_bob, &received).unwrap(), "selam 👋");
}

#[test]
fn relayed_packet_with_swapped_participants_fails() {
    let a = DhKeyPair::generate();
    let b = DhKeyPair::generate();
    let key = derive_conversation_key(&a, &b.public_key(), "conv-1", "alice", "bob").unwrap();
    let meta = MessageMeta::new("conv-1", "m-1", "alice", "bob", Utc::now());
    let mut packet = encrypt_message(&key, &meta, "pay 10").unwrap();
    std::mem::swap(&mut packet.sender_id, &mut packet.receiver_id);
    assert!(matches!(decrypt_message(&key, &packet), Err(PacketError::AuthenticationFailure)));
}

#[test]
fn register_request_matches_directory_body() {
    let keys = DeviceKeys::generate();
    let jwks = keys.public_jwks();
    let req = RegisterRequest {
        device_id: "web-1".into(),
        sign_pub_jwk: jwks.sign_pub_jwk,
        dh_pub_jwk: jwks.dh_pub_jwk,
        kdf: None,
        wrapped_priv: None,
    };
    let value = serde_json::to_value(&req).unwrap();
    assert_eq!(value["deviceId"], "web-1");
    assert_eq!(value["signPubJwk"]["use"], "sig");
    assert_eq!(value["signPubJwk"]["crv"], "P-256");
    assert!(value["signPubJwk"].get("d").is_none());
    assert!(value.get("kdf").is_none());
    assert!(value.get("wrappedPriv").is_none());
}

#[test]
fn peer_keys_response_parses() {
    let body = r#"{
        "ok": true,
        "keys": [
            {
                "userId": "2f6c1d4e-8a3b-4c5d-9e0f-112233445566",
                "deviceId": "web-2",
                "signPubJwk": {"kty":"EC","crv":"P-256","x":"AA","y":"BB","use":"sig"},
                "dhPubJwk": {"kty":"EC","crv":"P-256","x":"CC","y":"DD"},
                "updatedAt": "2024-05-01T12:00:00.123Z"
            }
        ]
    }"#;
    let resp: PeerKeysResponse = serde_json::from_str(body).unwrap();
    assert_eq!(resp.keys.len(), 1);
    assert_eq!(resp.keys[0].device_id, "web-2");
    assert_eq!(resp.keys[0].sign_pub_jwk.key_use.as_deref(), Some("sig"));
    assert_eq!(resp.keys[0].dh_pub_jwk.key_use, None);
}
