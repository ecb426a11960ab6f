//! End-to-end encrypt/decrypt through configured backends.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

use filecrypt_common::{AccessDescriptor, Error, FileRef, Result};
use filecrypt_crypto::{CipherSpec, Key};
use filecrypt_storage::{
    create_default_registry, BackendKind, BoxedReader, BoxedWriter, CapabilityHandle,
    LocalBackend, MemoryObjectBackend, StorageBackend,
};
use filecrypt_transform::{
    BackendResolver, CryptConfig, FileCrypt, Mode, Operation, SourceDisposition,
};

fn id(s: &str) -> FileRef {
    FileRef::new(s).unwrap()
}

fn local_crypt(temp: &TempDir) -> FileCrypt {
    let config = CryptConfig::default_local(temp.path());
    FileCrypt::from_config(&config, &create_default_registry()).unwrap()
}

/// Local backend whose preparation always fails and which counts stream opens.
struct LockedBackend {
    opens: AtomicUsize,
}

#[async_trait]
impl StorageBackend for LockedBackend {
    fn name(&self) -> &str {
        "locked"
    }

    fn kind(&self) -> BackendKind {
        BackendKind::RemoteObject
    }

    fn resolve(&self, id: &FileRef) -> Result<AccessDescriptor> {
        Ok(AccessDescriptor::Remote(filecrypt_common::RemoteObject::new(
            "locked", "vault", id.as_str(),
        )))
    }

    async fn prepare(&self) -> Result<CapabilityHandle> {
        Err(Error::Resolution("credentials unavailable".to_string()))
    }

    async fn open_read(&self, _id: &FileRef) -> Result<BoxedReader> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        Err(Error::Storage("unreachable".to_string()))
    }

    async fn open_write(&self, _id: &FileRef) -> Result<BoxedWriter> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        Err(Error::Storage("unreachable".to_string()))
    }

    async fn exists(&self, _id: &FileRef) -> Result<bool> {
        Ok(false)
    }

    async fn delete(&self, _id: &FileRef) -> Result<()> {
        Ok(())
    }
}

/// Local backend that refuses to delete anything.
struct UndeletableBackend {
    inner: LocalBackend,
}

#[async_trait]
impl StorageBackend for UndeletableBackend {
    fn name(&self) -> &str {
        "undeletable"
    }

    fn kind(&self) -> BackendKind {
        self.inner.kind()
    }

    fn resolve(&self, id: &FileRef) -> Result<AccessDescriptor> {
        self.inner.resolve(id)
    }

    async fn prepare(&self) -> Result<CapabilityHandle> {
        self.inner.prepare().await
    }

    async fn exists(&self, id: &FileRef) -> Result<bool> {
        self.inner.exists(id).await
    }

    async fn delete(&self, _id: &FileRef) -> Result<()> {
        Err(Error::Storage("permission denied".to_string()))
    }
}

#[tokio::test]
async fn test_local_encrypt_decrypt_with_default_names() {
    let temp = TempDir::new().unwrap();
    let content = b"quarterly numbers, strictly confidential".to_vec();
    std::fs::write(temp.path().join("report.pdf"), &content).unwrap();

    let crypt = local_crypt(&temp);
    let key = crypt.generate_key();

    let encrypted = crypt
        .encrypt("local", &id("report.pdf"), None, &key, true)
        .await
        .unwrap();
    assert!(encrypted.source_deleted());
    assert!(!temp.path().join("report.pdf").exists());
    let ciphertext = std::fs::read(temp.path().join("report.pdf.enc")).unwrap();
    assert_ne!(&ciphertext[16..], &content[..]);

    let decrypted = crypt
        .decrypt("local", &id("report.pdf.enc"), None, &key, true)
        .await
        .unwrap();
    assert_eq!(decrypted.mode, Mode::Decrypt);
    assert!(!temp.path().join("report.pdf.enc").exists());
    assert_eq!(std::fs::read(temp.path().join("report.pdf")).unwrap(), content);
}

#[tokio::test]
async fn test_aes128_output_length() {
    let temp = TempDir::new().unwrap();
    std::fs::write(temp.path().join("data.bin"), vec![7u8; 10_000]).unwrap();

    let crypt = local_crypt(&temp).with_cipher(CipherSpec::Aes128Cbc);
    let key = crypt.generate_key();
    assert_eq!(key.len(), 16);

    let report = crypt
        .encrypt_copy("local", &id("data.bin"), None, &key)
        .await
        .unwrap();
    assert_eq!(report.stats.bytes_written, 10_032);
    let size = std::fs::metadata(temp.path().join("data.bin.enc")).unwrap().len();
    assert_eq!(size, 10_032);
}

#[tokio::test]
async fn test_copy_variants_keep_source() {
    let temp = TempDir::new().unwrap();
    std::fs::write(temp.path().join("notes.txt"), b"keep me").unwrap();

    let crypt = local_crypt(&temp);
    let key = crypt.generate_key();

    let report = crypt
        .encrypt_copy("local", &id("notes.txt"), None, &key)
        .await
        .unwrap();
    assert!(matches!(report.source_disposition, SourceDisposition::Kept));
    assert!(temp.path().join("notes.txt").exists());

    // No `.enc` suffix on the source, so the fallback suffix is used.
    crypt
        .encrypt_copy("local", &id("notes.txt"), Some(&id("sealed")), &key)
        .await
        .unwrap();
    let report = crypt
        .decrypt_copy("local", &id("sealed"), None, &key)
        .await
        .unwrap();
    assert!(!report.source_deleted());
    assert!(temp.path().join("sealed").exists());
    assert_eq!(std::fs::read(temp.path().join("sealed.dec")).unwrap(), b"keep me");
}

#[tokio::test]
async fn test_memory_backend_roundtrip_from_config() {
    let config = CryptConfig::from_json(
        r#"{
            "cipher": "aes-192-cbc",
            "default_backend": "objects",
            "chunk_size": 1024,
            "backends": {
                "objects": { "type": "memory", "container": "transform-roundtrip" }
            }
        }"#,
    )
    .unwrap();
    let crypt = FileCrypt::from_config(&config, &create_default_registry()).unwrap();
    let key = crypt.generate_key();
    assert_eq!(key.len(), 24);

    // Seed the source through the registered stream handler.
    crypt.resolver().prepare_backend("objects").await.unwrap();
    let backend = crypt.resolver().backend("objects").unwrap();
    let data: Vec<u8> = (0..50_000u32).map(|i| (i % 251) as u8).collect();
    {
        use tokio::io::AsyncWriteExt;
        let mut writer = backend.open_write(&id("blob")).await.unwrap();
        writer.write_all(&data).await.unwrap();
        writer.shutdown().await.unwrap();
    }

    let report = crypt
        .encrypt("objects", &id("blob"), None, &key, true)
        .await
        .unwrap();
    assert!(report.destination.is_remote());
    assert_eq!(
        report.destination.to_string(),
        "mem://transform-roundtrip/blob.enc"
    );
    assert!(!backend.exists(&id("blob")).await.unwrap());

    let mut plaintext = Vec::new();
    let stats = crypt
        .decrypt_to_writer("objects", &id("blob.enc"), &key, &mut plaintext)
        .await
        .unwrap();
    assert_eq!(stats.bytes_written, data.len() as u64);
    assert_eq!(plaintext, data);
}

#[tokio::test]
async fn test_unknown_backend_is_configuration_error() {
    let temp = TempDir::new().unwrap();
    std::fs::write(temp.path().join("file"), b"data").unwrap();
    let crypt = local_crypt(&temp);
    let key = crypt.generate_key();

    let result = crypt
        .encrypt("nowhere", &id("file"), None, &key, false)
        .await;
    assert!(matches!(result, Err(Error::Configuration(_))));
    assert!(!temp.path().join("file.enc").exists());
}

#[tokio::test]
async fn test_failed_prepare_opens_no_streams() {
    let locked = Arc::new(LockedBackend {
        opens: AtomicUsize::new(0),
    });
    let resolver = BackendResolver::new("locked")
        .with_backend(locked.clone())
        .unwrap();
    let crypt = FileCrypt::new(resolver);
    let key = crypt.generate_key();

    let result = crypt
        .encrypt("locked", &id("secret"), None, &key, true)
        .await;
    let error = result.unwrap_err();
    assert!(matches!(error, Error::Resolution(_)));
    assert!(error.is_preflight());
    assert_eq!(locked.opens.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_missing_credentials_fail_before_streams() {
    let config = CryptConfig::from_json(
        r#"{
            "default_backend": "archive",
            "backends": {
                "archive": {
                    "type": "s3",
                    "endpoint": "http://127.0.0.1:9",
                    "bucket": "transform-locked",
                    "access_token_env": "FILECRYPT_TEST_TOKEN_NEVER_SET",
                    "require_credentials": true
                }
            }
        }"#,
    )
    .unwrap();
    let crypt = FileCrypt::from_config(&config, &create_default_registry()).unwrap();
    let key = crypt.generate_key();

    let result = crypt
        .decrypt("archive", &id("report.pdf.enc"), None, &key, false)
        .await;
    assert!(matches!(result, Err(Error::Resolution(_))));
}

#[tokio::test]
async fn test_delete_failure_is_post_condition() {
    let temp = TempDir::new().unwrap();
    std::fs::write(temp.path().join("stuck.txt"), b"still here").unwrap();

    let backend = UndeletableBackend {
        inner: LocalBackend::new("inner", temp.path()).unwrap(),
    };
    let resolver = BackendResolver::new("undeletable")
        .with_backend(Arc::new(backend))
        .unwrap();
    let crypt = FileCrypt::new(resolver);
    let key = crypt.generate_key();

    let report = crypt
        .encrypt("undeletable", &id("stuck.txt"), None, &key, true)
        .await
        .unwrap();
    assert!(matches!(
        report.post_condition_error(),
        Some(Error::PostCondition(_))
    ));
    assert!(temp.path().join("stuck.txt").exists());

    let restored = crypt
        .decrypt("undeletable", &id("stuck.txt.enc"), Some(&id("restored.txt")), &key, false)
        .await
        .unwrap();
    assert!(matches!(restored.source_disposition, SourceDisposition::Kept));
    assert_eq!(
        std::fs::read(temp.path().join("restored.txt")).unwrap(),
        b"still here"
    );
}

#[tokio::test]
async fn test_truncated_ciphertext_is_crypto_error() {
    let temp = TempDir::new().unwrap();
    std::fs::write(temp.path().join("short.enc"), [0u8; 10]).unwrap();
    let crypt = local_crypt(&temp);
    let key = crypt.generate_key();

    let result = crypt
        .decrypt("local", &id("short.enc"), None, &key, true)
        .await;
    assert!(matches!(result, Err(Error::Crypto(_))));
    // The source is never deleted after a failure.
    assert!(temp.path().join("short.enc").exists());
    // Partial output stays unless removal was requested.
    assert!(temp.path().join("short").exists());
}

#[tokio::test]
async fn test_partial_output_removed_on_request() {
    let temp = TempDir::new().unwrap();
    // IV plus one unaligned byte.
    std::fs::write(temp.path().join("broken.enc"), [1u8; 17]).unwrap();
    let crypt = local_crypt(&temp);
    let key = crypt.generate_key();

    let operation = Operation::new(
        Mode::Decrypt,
        "local",
        id("broken.enc"),
        id("broken"),
        &key,
        CipherSpec::Aes256Cbc,
    )
    .remove_partial(true);
    let result = crypt.transform(operation).await;

    assert!(matches!(result, Err(Error::Crypto(_))));
    assert!(!temp.path().join("broken").exists());
}

#[tokio::test]
async fn test_failed_remote_transform_keeps_existing_destination() {
    let config = CryptConfig::from_json(
        r#"{
            "default_backend": "objects",
            "backends": {
                "objects": { "type": "memory", "container": "transform-existing-destination" }
            }
        }"#,
    )
    .unwrap();
    let crypt = FileCrypt::from_config(&config, &create_default_registry()).unwrap();
    let key = crypt.generate_key();

    crypt.resolver().prepare_backend("objects").await.unwrap();
    let backend = crypt.resolver().backend("objects").unwrap();
    {
        use tokio::io::AsyncWriteExt;
        for (name, content) in [
            ("broken.enc", &[1u8; 17][..]),
            ("precious", &b"unrelated existing data"[..]),
        ] {
            let mut writer = backend.open_write(&id(name)).await.unwrap();
            writer.write_all(content).await.unwrap();
            writer.shutdown().await.unwrap();
        }
    }

    let operation = Operation::new(
        Mode::Decrypt,
        "objects",
        id("broken.enc"),
        id("precious"),
        &key,
        crypt.cipher(),
    )
    .remove_partial(true);
    let result = crypt.transform(operation).await;
    assert!(matches!(result, Err(Error::Crypto(_))));

    // The aborted upload never replaced the object, so it must survive.
    assert!(backend.exists(&id("precious")).await.unwrap());
    let mut reader = backend.open_read(&id("precious")).await.unwrap();
    let mut content = Vec::new();
    tokio::io::AsyncReadExt::read_to_end(&mut reader, &mut content)
        .await
        .unwrap();
    assert_eq!(content, b"unrelated existing data");
}

#[tokio::test]
async fn test_wrong_key_is_rejected() {
    let temp = TempDir::new().unwrap();
    std::fs::write(temp.path().join("msg"), b"attack at dawn").unwrap();
    let crypt = local_crypt(&temp);
    let key = crypt.generate_key();

    crypt
        .encrypt_copy("local", &id("msg"), None, &key)
        .await
        .unwrap();

    // A wrong key yields valid padding about once in 256 tries; with
    // sixteen keys the odds of every one slipping through are negligible.
    let mut rejected = 0;
    for i in 0..16 {
        let wrong = crypt.generate_key();
        let destination = id(&format!("msg.{}", i));
        match crypt
            .decrypt_copy("local", &id("msg.enc"), Some(&destination), &wrong)
            .await
        {
            Err(Error::Crypto(_)) => rejected += 1,
            Ok(_) => {
                let restored = std::fs::read(temp.path().join(destination.as_str())).unwrap();
                assert_ne!(restored, b"attack at dawn");
            }
            Err(other) => panic!("unexpected error: {}", other),
        }
    }
    assert!(rejected >= 12);
}

#[tokio::test]
async fn test_concurrent_independent_operations() {
    let temp = TempDir::new().unwrap();
    std::fs::write(temp.path().join("a"), vec![1u8; 70_000]).unwrap();
    std::fs::write(temp.path().join("b"), vec![2u8; 3]).unwrap();
    let crypt = local_crypt(&temp);
    let key = Key::generate(crypt.cipher());

    let (id_a, id_b) = (id("a"), id("b"));
    let (a, b) = tokio::join!(
        crypt.encrypt_copy("local", &id_a, None, &key),
        crypt.encrypt_copy("local", &id_b, None, &key),
    );
    assert_eq!(a.unwrap().stats.bytes_written, 16 + 70_016);
    assert_eq!(b.unwrap().stats.bytes_written, 32);
}
