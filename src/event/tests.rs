use super::*;
use secp256k1::{KeyPair, Message, Secp256k1, SecretKey};
use serde_json::{json, Value};

fn unsigned_event(content: &str) -> Value {
    let pubkey = "a".repeat(64);
    let created_at = 1_700_000_000;
    let id = compute_event_id(&pubkey, created_at, 1, &[], content);
    json!({
        "id": id,
        "pubkey": pubkey,
        "created_at": created_at,
        "kind": 1,
        "tags": [],
        "content": content,
        "sig": "b".repeat(128),
    })
}

fn signed_event(secret: [u8; 32], content: &str) -> Value {
    let secp = Secp256k1::new();
    let sk = SecretKey::from_slice(&secret).unwrap();
    let keypair = KeyPair::from_secret_key(&secp, &sk);
    let (xonly, _parity) = keypair.x_only_public_key();
    let pubkey = hex::encode(xonly.serialize());
    let tags = vec![vec!["t".to_string(), "rust".to_string()]];
    let id = compute_event_id(&pubkey, 1_700_000_000, 1, &tags, content);
    let message = Message::from_slice(&hex::decode(&id).unwrap()).unwrap();
    let sig = secp.sign_schnorr_no_aux_rand(&message, &keypair);
    json!({
        "id": id,
        "pubkey": pubkey,
        "created_at": 1_700_000_000,
        "kind": 1,
        "tags": tags,
        "content": content,
        "sig": sig.to_string(),
    })
}

#[test]
fn test_canonical_id_matches_known_serialization() {
    // sha256 of the literal compact JSON the id commits to
    let pubkey = "a".repeat(64);
    let serialized = format!(r#"[0,"{}",1700000000,1,[],"hi"]"#, pubkey);
    let expected = hex::encode(Sha256::digest(serialized.as_bytes()));

    assert_eq!(compute_event_id(&pubkey, 1_700_000_000, 1, &[], "hi"), expected);
}

#[test]
fn test_canonical_id_escapes_content() {
    let pubkey = "a".repeat(64);
    let serialized = format!(r#"[0,"{}",1,1,[["t","x"]],"line\n\"quoted\""]"#, pubkey);
    let expected = hex::encode(Sha256::digest(serialized.as_bytes()));
    let tags = vec![vec!["t".to_string(), "x".to_string()]];

    assert_eq!(
        compute_event_id(&pubkey, 1, 1, &tags, "line\n\"quoted\""),
        expected
    );
}

#[test]
fn test_valid_event_passes_without_signature_check() {
    let value = unsigned_event("hello");
    let event = validate(&value, None).unwrap();

    assert_eq!(event.content, "hello");
    assert_eq!(event.kind, 1);
    assert_eq!(event.id, value["id"].as_str().unwrap());
}

#[test]
fn test_changing_any_field_invalidates_id() {
    let base = unsigned_event("hello");
    let mutations: Vec<(&str, Value)> = vec![
        ("pubkey", json!("c".repeat(64))),
        ("created_at", json!(1_700_000_001)),
        ("kind", json!(2)),
        ("tags", json!([["t", "x"]])),
        ("content", json!("hello!")),
    ];

    for (field, new_value) in mutations {
        let mut value = base.clone();
        value[field] = new_value;
        assert_eq!(
            validate(&value, None).unwrap_err(),
            ValidationError::HashMismatch,
            "mutating {} should break the id",
            field
        );
    }
}

#[test]
fn test_not_an_object_fails() {
    for value in [json!(null), json!("event"), json!([1, 2]), json!(42)] {
        assert_eq!(
            validate(&value, None).unwrap_err(),
            ValidationError::Schema("not an object")
        );
    }
}

#[test]
fn test_schema_checks_run_in_order() {
    // Both pubkey and kind are wrong; pubkey is reported first
    let mut value = unsigned_event("hello");
    value["pubkey"] = json!(7);
    value["kind"] = json!("one");
    assert_eq!(
        validate(&value, None).unwrap_err(),
        ValidationError::Schema("pubkey must be a string")
    );

    let mut value = unsigned_event("hello");
    value.as_object_mut().unwrap().remove("sig");
    assert_eq!(
        validate(&value, None).unwrap_err(),
        ValidationError::Schema("sig must be a string")
    );

    let mut value = unsigned_event("hello");
    value["created_at"] = json!(1.5);
    assert_eq!(
        validate(&value, None).unwrap_err(),
        ValidationError::Schema("created_at must be an integer")
    );

    let mut value = unsigned_event("hello");
    value["tags"] = json!({});
    assert_eq!(
        validate(&value, None).unwrap_err(),
        ValidationError::Schema("tags must be an array")
    );
}

#[test]
fn test_schnorr_signed_event_passes() {
    let value = signed_event([0x11; 32], "signed");
    let verifier = SchnorrVerifier::new();

    let event = validate(&value, Some(&verifier)).unwrap();
    assert_eq!(event.tag_value("t"), Some("rust"));
}

#[test]
fn test_signature_from_other_key_fails() {
    let mut value = signed_event([0x11; 32], "signed");
    let other = signed_event([0x22; 32], "signed");
    // Keep the id/pubkey consistent but swap in a signature by another key
    value["sig"] = other["sig"].clone();

    let verifier = SchnorrVerifier::new();
    match validate(&value, Some(&verifier)).unwrap_err() {
        ValidationError::Signature(_) => {}
        other => panic!("Expected Signature error, got {:?}", other),
    }
}

#[test]
fn test_garbage_signature_fails_when_checking_enabled() {
    let value = unsigned_event("hello");
    let verifier = SchnorrVerifier::new();

    match validate(&value, Some(&verifier)).unwrap_err() {
        ValidationError::Signature(_) => {}
        other => panic!("Expected Signature error, got {:?}", other),
    }
    // Same event is accepted once checking is disabled
    assert!(validate(&value, None).is_ok());
}

#[test]
fn test_event_serializes_in_wire_field_order() {
    let event = validate(&unsigned_event("x"), None).unwrap();
    let text = serde_json::to_string(&event).unwrap();

    assert!(text.starts_with(r#"{"id":"#));
    assert!(text.ends_with(&format!(r#""sig":"{}"}}"#, "b".repeat(128))));
}
