//! Integration tests for field/object encryption and the storage hooks.

use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Mutex};

use ledgerseal::crypto::Argon2Params;
use ledgerseal::{
    CryptoEngine, Envelope, FieldPolicy, Interceptor, InterceptorHost, KeyManager, MemoryKeyStore,
    Record, SealError, TransparentHooks,
};
use serde_json::{json, Value};

fn fast_params() -> Argon2Params {
    Argon2Params {
        memory_kib: 8_192,
        iterations: 1,
        parallelism: 1,
    }
}

async fn engine() -> CryptoEngine {
    let policy = Arc::new(FieldPolicy::new([
        ("clients", vec!["email", "phone", "address", "siret", "notes"]),
        ("suppliers", vec!["email"]),
        ("invoices", vec!["amount", "total", "notes", "lines"]),
    ]));
    let keys = Arc::new(KeyManager::new(
        Arc::new(MemoryKeyStore::new()),
        fast_params(),
        &policy,
    ));
    keys.initialize("s3cr3t-pass").await.unwrap();
    CryptoEngine::new(keys, policy)
}

fn record(value: Value) -> Record {
    value.as_object().expect("object literal").clone()
}

/// Log sink that keeps formatted events for assertions.
#[derive(Clone, Default)]
struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    fn lines(&self) -> Vec<String> {
        let bytes = self.0.lock().unwrap().clone();
        String::from_utf8(bytes)
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }
}

impl io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Single fields
// ---------------------------------------------------------------------------

#[tokio::test]
async fn decimal_amount_roundtrip() {
    let engine = engine().await;

    let envelope = engine.encrypt_field(&json!(1234.56), "invoices").await.unwrap();
    assert_eq!(envelope.algorithm, "AES-GCM");

    let plain = engine.decrypt_field(&envelope.to_value(), "invoices").await.unwrap();
    assert_eq!(plain, json!(1234.56));
    assert_eq!(plain.to_string(), "1234.56");
}

#[tokio::test]
async fn every_value_type_roundtrips_in_every_collection() {
    let engine = engine().await;
    let values = [
        json!(0),
        json!(-17),
        json!(9_007_199_254_740_993u64),
        json!(0.1),
        json!(19.99),
        json!("a@b.com"),
        json!("Société Générale — 12 € TTC"),
        json!(true),
        json!(false),
        json!(["line 1", 2, {"qty": 3.5}]),
        json!({"street": "12 rue de la Paix", "zip": "75002", "geo": {"lat": 48.8698, "lon": 2.3311}}),
    ];

    for collection in ["clients", "suppliers", "invoices"] {
        for value in &values {
            let envelope = engine.encrypt_field(value, collection).await.unwrap();
            let back = engine.decrypt_envelope(&envelope, collection).await.unwrap();
            assert_eq!(&back, value, "{collection}: {value}");
        }
    }
}

#[tokio::test]
async fn identical_plaintexts_get_fresh_nonce_and_ciphertext() {
    let engine = engine().await;
    let a = engine.encrypt_field(&json!("a@b.com"), "clients").await.unwrap();
    let b = engine.encrypt_field(&json!("a@b.com"), "clients").await.unwrap();
    assert_ne!(a.iv, b.iv);
    assert_ne!(a.value, b.value);
}

#[tokio::test]
async fn concurrent_encryptions_never_share_a_nonce() {
    let engine = engine().await;
    let mut tasks = Vec::new();
    for _ in 0..32 {
        let engine = engine.clone();
        tasks.push(tokio::spawn(async move {
            engine.encrypt_field(&json!(42), "invoices").await.unwrap().iv
        }));
    }

    let mut nonces = Vec::new();
    for task in tasks {
        nonces.push(task.await.unwrap());
    }
    nonces.sort();
    nonces.dedup();
    assert_eq!(nonces.len(), 32);
}

#[tokio::test]
async fn envelope_from_one_collection_fails_in_another() {
    let engine = engine().await;
    let envelope = engine.encrypt_field(&json!("a@b.com"), "clients").await.unwrap();

    let err = engine
        .decrypt_field(&envelope.to_value(), "suppliers")
        .await
        .unwrap_err();
    assert!(matches!(err, SealError::Decryption { .. }));
}

#[tokio::test]
async fn corrupted_ciphertext_is_a_decryption_error() {
    let engine = engine().await;
    let mut envelope = engine.encrypt_field(&json!("a@b.com"), "clients").await.unwrap();
    envelope.value[0] ^= 0x01;

    let err = engine
        .decrypt_field(&envelope.to_value(), "clients")
        .await
        .unwrap_err();
    assert!(matches!(err, SealError::Decryption { .. }));
}

#[tokio::test]
async fn incomplete_envelope_is_malformed() {
    let engine = engine().await;
    let err = engine
        .decrypt_field(&json!({"encrypted": true, "algorithm": "AES-GCM", "keyVersion": 1}), "clients")
        .await
        .unwrap_err();
    assert!(matches!(err, SealError::MalformedEnvelope(_)));

    let err = engine.decrypt_field(&json!("plain"), "clients").await.unwrap_err();
    assert!(matches!(err, SealError::MalformedEnvelope(_)));
}

#[tokio::test]
async fn old_versions_decrypt_after_rotation() {
    let engine = engine().await;
    let before = engine.encrypt_field(&json!(1234.56), "invoices").await.unwrap();
    assert_eq!(before.key_version, 1);

    engine.key_manager().rotate_collection_key("invoices").await.unwrap();

    let after = engine.encrypt_field(&json!(99), "invoices").await.unwrap();
    assert_eq!(after.key_version, 2);

    assert_eq!(engine.decrypt_envelope(&before, "invoices").await.unwrap(), json!(1234.56));
    assert_eq!(engine.decrypt_envelope(&after, "invoices").await.unwrap(), json!(99));
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

#[tokio::test]
async fn only_policy_fields_are_encrypted() {
    let engine = engine().await;
    let policy = FieldPolicy::new([("clients", vec!["email"])]);
    let engine = CryptoEngine::new(Arc::clone(engine.key_manager()), Arc::new(policy));

    let out = engine
        .encrypt_object(record(json!({"id": "c1", "email": "a@b.com", "status": "active"})), "clients")
        .await
        .unwrap();

    assert_eq!(out["id"], "c1");
    assert_eq!(out["status"], "active");
    let envelope = Envelope::from_value(&out["email"]).unwrap();
    assert_eq!(envelope.key_version, 1);
}

#[tokio::test]
async fn non_policy_fields_keep_their_shape_even_if_envelope_like() {
    let engine = engine().await;
    let lookalike = json!({"encrypted": true, "note": "not ours"});
    let input = record(json!({"id": "c1", "meta": lookalike, "email": "a@b.com"}));

    let out = engine.encrypt_object(input.clone(), "clients").await.unwrap();
    assert_eq!(out["meta"], input["meta"]);

    let back = engine.decrypt_object(out, "clients").await;
    assert_eq!(back, input);
}

#[tokio::test]
async fn decrypting_plaintext_record_is_noop() {
    let engine = engine().await;
    let input = record(json!({"id": "c1", "email": "a@b.com", "phone": "0102030405"}));
    assert_eq!(engine.decrypt_object(input.clone(), "clients").await, input);
}

#[tokio::test]
async fn one_corrupted_field_does_not_fail_the_record() {
    let engine = engine().await;
    let logs = CapturedLogs::default();
    let sink = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || sink.clone())
        .with_ansi(false)
        .with_max_level(tracing_subscriber::filter::LevelFilter::WARN)
        .finish();
    let _log_guard = tracing::subscriber::set_default(subscriber);

    let input = record(json!({
        "id": "c1",
        "email": "a@b.com",
        "phone": "+33 1 23 45 67 89",
        "address": {"street": "12 rue de la Paix", "city": "Paris"},
        "siret": "732 829 320 00074",
        "notes": "pays late",
    }));
    let mut stored = engine.encrypt_object(input.clone(), "clients").await.unwrap();

    // Flip one byte of the phone ciphertext.
    let mut envelope = Envelope::from_value(&stored["phone"]).unwrap();
    envelope.value[5] ^= 0xFF;
    let corrupted = envelope.to_value();
    stored.insert("phone".into(), corrupted.clone());

    let out = engine.decrypt_object(stored, "clients").await;
    assert_eq!(out["phone"], corrupted);
    for field in ["id", "email", "address", "siret", "notes"] {
        assert_eq!(out[field], input[field], "{field}");
    }

    let warnings: Vec<String> = logs
        .lines()
        .into_iter()
        .filter(|line| line.contains("WARN"))
        .collect();
    assert_eq!(warnings.len(), 1, "{warnings:?}");
    assert!(warnings[0].contains("field=phone"), "{}", warnings[0]);
}

#[tokio::test]
async fn nested_value_with_encrypted_key_roundtrips() {
    let engine = engine().await;
    let note = json!({"encrypted": true, "note": "user data"});
    let input = record(json!({"id": "c1", "email": note.clone()}));

    let stored = engine.encrypt_object(input.clone(), "clients").await.unwrap();
    let envelope = Envelope::from_value(&stored["email"]).unwrap();
    assert_eq!(envelope.key_version, 1);

    assert_eq!(engine.decrypt_object(stored, "clients").await, input);
}

#[tokio::test]
async fn write_rejects_envelope_from_another_collection() {
    let engine = engine().await;
    let foreign = engine.encrypt_field(&json!("a@b.com"), "clients").await.unwrap();

    let err = engine
        .encrypt_object(record(json!({"id": "s1", "email": foreign.to_value()})), "suppliers")
        .await
        .unwrap_err();
    assert!(matches!(err, SealError::Decryption { .. }));
}

#[tokio::test]
async fn write_rejects_tampered_current_envelope() {
    let engine = engine().await;
    let mut envelope = engine.encrypt_field(&json!("a@b.com"), "clients").await.unwrap();
    envelope.value[0] ^= 0x01;

    let err = engine
        .encrypt_object(record(json!({"id": "c1", "email": envelope.to_value()})), "clients")
        .await
        .unwrap_err();
    assert!(matches!(err, SealError::Decryption { .. }));
}

// ---------------------------------------------------------------------------
// Hooks against a toy record table
// ---------------------------------------------------------------------------

/// Minimal host storage engine: per-collection rows plus interceptors.
#[derive(Default)]
struct RecordTable {
    hooks: HashMap<String, Arc<dyn Interceptor>>,
    rows: HashMap<(String, String), Record>,
}

impl InterceptorHost for RecordTable {
    fn register_interceptor(&mut self, collection: &str, interceptor: Arc<dyn Interceptor>) {
        self.hooks.insert(collection.to_string(), interceptor);
    }
}

impl RecordTable {
    async fn insert(&mut self, collection: &str, record: Record) -> ledgerseal::Result<()> {
        let id = record["id"].as_str().unwrap_or_default().to_string();
        let record = match self.hooks.get(collection) {
            Some(hooks) => hooks.on_creating(record).await?,
            None => record,
        };
        self.rows.insert((collection.to_string(), id), record);
        Ok(())
    }

    async fn update(&mut self, collection: &str, id: &str, changes: Record) -> ledgerseal::Result<()> {
        let changes = match self.hooks.get(collection) {
            Some(hooks) => hooks.on_updating(changes).await?,
            None => changes,
        };
        if let Some(row) = self.rows.get_mut(&(collection.to_string(), id.to_string())) {
            row.extend(changes);
        }
        Ok(())
    }

    async fn get(&self, collection: &str, id: &str) -> Option<Record> {
        let row = self.rows.get(&(collection.to_string(), id.to_string()))?.clone();
        Some(match self.hooks.get(collection) {
            Some(hooks) => hooks.on_reading(row).await,
            None => row,
        })
    }

    fn raw(&self, collection: &str, id: &str) -> &Record {
        &self.rows[&(collection.to_string(), id.to_string())]
    }
}

#[tokio::test]
async fn table_never_stores_plaintext_and_reads_back_plaintext() {
    let engine = engine().await;
    let mut table = RecordTable::default();
    TransparentHooks::attach_all(&engine, &mut table);

    let invoice = record(json!({
        "id": "F-2024-001",
        "status": "sent",
        "amount": 1000.00,
        "total": 1200.00,
        "lines": [{"label": "Conseil", "qty": 2, "unit": 500.00}],
    }));
    table.insert("invoices", invoice.clone()).await.unwrap();

    let raw = table.raw("invoices", "F-2024-001");
    assert!(Envelope::has_envelope_shape(&raw["amount"]));
    assert!(Envelope::has_envelope_shape(&raw["lines"]));
    assert_eq!(raw["status"], "sent");

    assert_eq!(table.get("invoices", "F-2024-001").await.unwrap(), invoice);
}

#[tokio::test]
async fn partial_update_encrypts_only_the_change() {
    let engine = engine().await;
    let mut table = RecordTable::default();
    TransparentHooks::attach_all(&engine, &mut table);

    table
        .insert("clients", record(json!({"id": "c1", "email": "a@b.com", "phone": "01"})))
        .await
        .unwrap();
    let email_before = table.raw("clients", "c1")["email"].clone();

    table
        .update("clients", "c1", record(json!({"phone": "02", "status": "vip"})))
        .await
        .unwrap();

    let raw = table.raw("clients", "c1");
    assert_eq!(raw["email"], email_before, "untouched field keeps its envelope");
    assert!(Envelope::has_envelope_shape(&raw["phone"]));
    assert_eq!(raw["status"], "vip");

    let read = table.get("clients", "c1").await.unwrap();
    assert_eq!(read["phone"], "02");
    assert_eq!(read["email"], "a@b.com");
}

#[tokio::test]
async fn write_fails_closed_when_keys_are_gone() {
    let engine = engine().await;
    let mut table = RecordTable::default();
    TransparentHooks::attach_all(&engine, &mut table);

    engine.key_manager().close().await;

    let err = table
        .insert("clients", record(json!({"id": "c2", "email": "x@y.z"})))
        .await
        .unwrap_err();
    assert!(matches!(err, SealError::KeyNotFound { .. }));
    assert!(table.rows.is_empty(), "nothing may be persisted unencrypted");
}

#[tokio::test]
async fn lazy_reencryption_after_rotation() {
    let engine = engine().await;
    let mut table = RecordTable::default();
    TransparentHooks::attach_all(&engine, &mut table);

    table
        .insert("suppliers", record(json!({"id": "s1", "email": "old@vendor.fr"})))
        .await
        .unwrap();
    engine.key_manager().rotate_collection_key("suppliers").await.unwrap();

    // Stored data is untouched by rotation and still readable.
    assert_eq!(table.raw("suppliers", "s1")["email"]["keyVersion"], 1);
    assert_eq!(table.get("suppliers", "s1").await.unwrap()["email"], "old@vendor.fr");

    // The next write of the field uses the new version.
    table
        .update("suppliers", "s1", record(json!({"email": "new@vendor.fr"})))
        .await
        .unwrap();
    assert_eq!(table.raw("suppliers", "s1")["email"]["keyVersion"], 2);
    assert_eq!(table.get("suppliers", "s1").await.unwrap()["email"], "new@vendor.fr");
}
