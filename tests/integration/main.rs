//! Integration tests for cai-loader

mod support {
    use aes_gcm::aead::{Aead, KeyInit};
    use aes_gcm::{Aes256Gcm, Nonce};
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;

    pub const COMMIT: &str = "89ab01cd89ab01cd89ab01cd89ab01cd89ab01cd";
    pub const MODEL_ID: &str = "acme/llm";
    pub const MODEL_DIR: &str = "models--acme--llm";

    pub fn raw_key() -> Vec<u8> {
        (0..32u8).rev().collect()
    }

    /// nonce || ciphertext || tag
    pub fn seal(plaintext: &[u8], nonce: u8) -> Vec<u8> {
        let cipher = Aes256Gcm::new_from_slice(&raw_key()).unwrap();
        let nonce = [nonce; 12];
        let mut sealed = nonce.to_vec();
        sealed.extend(cipher.encrypt(Nonce::from_slice(&nonce), plaintext).unwrap());
        sealed
    }

    /// A hub-layout source cache plus an empty destination
    pub struct HubFixture {
        pub source: TempDir,
        pub dest: TempDir,
        pub state: TempDir,
    }

    impl HubFixture {
        pub fn new() -> Self {
            let source = TempDir::new().unwrap();
            let model = source.path().join(MODEL_DIR);
            std::fs::create_dir_all(model.join("refs")).unwrap();
            std::fs::write(model.join("refs").join("main"), COMMIT).unwrap();
            std::fs::create_dir_all(model.join("snapshots").join(COMMIT)).unwrap();
            Self {
                source,
                dest: TempDir::new().unwrap(),
                state: TempDir::new().unwrap(),
            }
        }

        pub fn snapshot(&self) -> PathBuf {
            self.source
                .path()
                .join(MODEL_DIR)
                .join("snapshots")
                .join(COMMIT)
        }

        pub fn dest_snapshot(&self) -> PathBuf {
            self.dest
                .path()
                .join(MODEL_DIR)
                .join("snapshots")
                .join(COMMIT)
        }

        pub fn encrypt(&self, name: &str, plaintext: &[u8], nonce: u8) -> PathBuf {
            let path = self.snapshot().join(name);
            std::fs::write(&path, seal(plaintext, nonce)).unwrap();
            path
        }

        pub fn manifest(&self, kind: &str, files: &[&str]) {
            let manifest = serde_json::json!({
                "broker_kind": kind,
                "broker_endpoint": "https://kbs.example",
                "key_id": "k1",
                "files": files,
            });
            std::fs::write(
                self.snapshot().join("encryption-config.json"),
                manifest.to_string(),
            )
            .unwrap();
        }

        /// Config file keeping the audit log inside the fixture
        pub fn config_file(&self) -> PathBuf {
            let path = self.state.path().join("config.toml");
            let audit = self.state.path().join("audit.log");
            std::fs::write(
                &path,
                format!(
                    "[general]\naudit_log_path = {:?}\n",
                    audit.display().to_string()
                ),
            )
            .unwrap();
            path
        }

        pub fn dest_is_empty(&self) -> bool {
            is_empty_dir(self.dest.path())
        }
    }

    pub fn is_empty_dir(path: &Path) -> bool {
        std::fs::read_dir(path).unwrap().next().is_none()
    }
}

mod cli_tests {
    use super::support::*;
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use predicates::prelude::*;

    fn loader(fx: &HubFixture) -> Command {
        let mut cmd = cargo_bin_cmd!("cai-loader");
        cmd.env_remove("MODEL_ID")
            .env_remove("MODEL_HUB")
            .env_remove("HF_HUB_CACHE")
            .env_remove("RUST_LOG")
            .env("CAI_LOADER_CONFIG", fx.config_file())
            .arg("--source-cache")
            .arg(fx.source.path());
        cmd
    }

    #[test]
    fn help_displays() {
        cargo_bin_cmd!("cai-loader")
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("confidential inference"));
    }

    #[test]
    fn version_displays() {
        cargo_bin_cmd!("cai-loader")
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("cai-loader"));
    }

    #[test]
    fn config_path_follows_flag() {
        let fx = HubFixture::new();
        loader(&fx)
            .args(["config", "path"])
            .assert()
            .success()
            .stdout(predicate::str::contains("config.toml"));
    }

    #[test]
    fn config_show_lists_sections() {
        let fx = HubFixture::new();
        loader(&fx)
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("[broker]"))
            .stdout(predicate::str::contains("timeout_secs = 30"));
    }

    #[test]
    fn config_init_creates_file() {
        let fx = HubFixture::new();
        let path = fx.state.path().join("fresh").join("config.toml");
        cargo_bin_cmd!("cai-loader")
            .args(["config", "init"])
            .arg("--config")
            .arg(&path)
            .assert()
            .success();
        assert!(path.is_file());
    }

    #[test]
    fn prepare_missing_model_id_fails() {
        let fx = HubFixture::new();
        loader(&fx)
            .args(["prepare", "--hub"])
            .arg(fx.dest.path())
            .assert()
            .failure()
            .stderr(predicate::str::contains("--model-id"));
    }

    #[test]
    fn prepare_unencrypted_model_leaves_destination_alone() {
        let fx = HubFixture::new();
        std::fs::write(fx.snapshot().join("config.json"), "{}").unwrap();

        loader(&fx)
            .args(["prepare", "--model-id", MODEL_ID, "--hub"])
            .arg(fx.dest.path())
            .assert()
            .success()
            .stdout(predicate::str::contains("not encrypted"));

        assert!(fx.dest_is_empty());
    }

    #[test]
    fn prepare_reads_model_from_env() {
        let fx = HubFixture::new();
        loader(&fx)
            .env("MODEL_ID", "plain-model")
            .env("MODEL_HUB", fx.dest.path())
            .arg("prepare")
            .assert()
            .success();
        assert!(fx.dest_is_empty());
    }

    #[test]
    fn prepare_unknown_broker_fails_without_writes() {
        let fx = HubFixture::new();
        fx.encrypt("model.bin.aes", b"weights", 1);
        fx.manifest("UNKNOWN", &["model.bin.aes"]);

        loader(&fx)
            .args(["prepare", "--model-id", MODEL_ID, "--hub"])
            .arg(fx.dest.path())
            .assert()
            .failure()
            .stderr(predicate::str::contains("Unsupported key broker: UNKNOWN"))
            .stderr(predicate::str::contains("ITA_KBS"));

        assert!(fx.dest_is_empty());
    }

    #[test]
    fn prepare_without_attestation_helper_fails_closed() {
        let fx = HubFixture::new();
        fx.encrypt("model.bin.aes", b"weights", 1);
        fx.manifest("ITA_KBS", &["model.bin.aes"]);

        loader(&fx)
            .args(["prepare", "--model-id", MODEL_ID, "--hub"])
            .arg(fx.dest.path())
            .assert()
            .failure()
            .stderr(predicate::str::contains("attestation helper"));

        assert!(fx.dest_is_empty());
    }

    #[test]
    fn inspect_prints_manifest() {
        let fx = HubFixture::new();
        fx.manifest("ITA_KBS", &["model.bin.aes", "config.json.aes"]);

        loader(&fx)
            .args(["inspect", "--model-id", MODEL_ID])
            .assert()
            .success()
            .stdout(predicate::str::contains("ITA_KBS (supported)"))
            .stdout(predicate::str::contains("k1"))
            .stdout(predicate::str::contains("config.json.aes"));
    }

    #[test]
    fn inspect_json_for_unencrypted_model() {
        let fx = HubFixture::new();
        let output = loader(&fx)
            .args(["inspect", "--json", "--model-id", "plain-model"])
            .output()
            .unwrap();

        assert!(output.status.success());
        let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
        assert_eq!(value["encrypted"], false);
    }

    #[cfg(unix)]
    #[test]
    fn run_exports_hub_environment() {
        let fx = HubFixture::new();
        let source = fx.source.path().display().to_string();

        loader(&fx)
            .args(["run", "--model-id", "plain-model", "--hub"])
            .arg(fx.dest.path())
            .args([
                "--",
                "sh",
                "-c",
                r#"test "$HF_HUB_OFFLINE" = 1 && test "$OPENBLAS_L2_SIZE" = 134217728 && test "$HF_HUB_CACHE" = "$0""#,
                source.as_str(),
            ])
            .assert()
            .success();
    }

    #[cfg(unix)]
    #[test]
    fn run_propagates_exit_code() {
        let fx = HubFixture::new();
        loader(&fx)
            .args(["run", "--model-id", "plain-model", "--hub"])
            .arg(fx.dest.path())
            .args(["--", "sh", "-c", "exit 3"])
            .assert()
            .code(3);
    }
}

mod pipeline_tests {
    use super::support::*;
    use async_trait::async_trait;
    use cai_loader::audit::AuditLog;
    use cai_loader::config::schema::DecryptConfig;
    use cai_loader::crypto::DecryptionKey;
    use cai_loader::decrypt::BulkDecryptor;
    use cai_loader::hub::ManifestLocator;
    use cai_loader::keybroker::{BrokerRegistry, KeyBrokerClient};
    use cai_loader::manifest::BrokerKind;
    use cai_loader::{HubLoader, LoaderError, LoaderResult, ModelLoader, PrepareOutcome};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use url::Url;

    struct FakeBroker {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl KeyBrokerClient for FakeBroker {
        async fn get_key(&self, endpoint: &Url, key_id: &str) -> LoaderResult<DecryptionKey> {
            assert_eq!(endpoint.as_str(), "https://kbs.example/");
            assert_eq!(key_id, "k1");
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(DecryptionKey::new(raw_key()))
        }

        fn broker_name(&self) -> &'static str {
            "fake"
        }
    }

    fn loader(fx: &HubFixture, calls: &Arc<AtomicUsize>) -> HubLoader {
        let mut registry = BrokerRegistry::new();
        let calls = Arc::clone(calls);
        registry.register(BrokerKind::ITA_KBS, move || {
            Ok(Box::new(FakeBroker {
                calls: Arc::clone(&calls),
            }) as Box<dyn KeyBrokerClient>)
        });

        HubLoader::new(
            ManifestLocator::new(fx.source.path(), "main"),
            registry,
            BulkDecryptor::new(&DecryptConfig::default()),
        )
        .with_audit(AuditLog::at(fx.state.path().join("audit.log")))
    }

    #[tokio::test]
    async fn scenario_a_two_files_decrypted() {
        let fx = HubFixture::new();
        fx.encrypt("model.bin.aes", &[7u8; 8192], 1);
        fx.encrypt("config.json.aes", br#"{"arch": "llama"}"#, 2);
        fx.manifest("ITA_KBS", &["model.bin.aes", "config.json.aes"]);
        let calls = Arc::new(AtomicUsize::new(0));

        let outcome = loader(&fx, &calls)
            .prepare(MODEL_ID, fx.dest.path())
            .await
            .unwrap();

        assert!(outcome.is_decrypted());
        let out = fx.dest_snapshot();
        assert_eq!(std::fs::read(out.join("model.bin")).unwrap(), vec![7u8; 8192]);
        assert_eq!(
            std::fs::read(out.join("config.json")).unwrap(),
            br#"{"arch": "llama"}"#
        );
        let mut names: Vec<String> = std::fs::read_dir(&out)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names, ["config.json", "model.bin"]);
        assert!(fx
            .dest
            .path()
            .join(MODEL_DIR)
            .join("refs")
            .join("main")
            .is_file());
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let audit = std::fs::read_to_string(fx.state.path().join("audit.log")).unwrap();
        assert!(!audit.contains(&format!("{:?}", raw_key())));
    }

    #[tokio::test]
    async fn scenario_a_is_repeatable() {
        let fx = HubFixture::new();
        fx.encrypt("model.bin.aes", b"weights", 1);
        fx.manifest("ITA_KBS", &["model.bin.aes"]);
        let calls = Arc::new(AtomicUsize::new(0));
        let loader = loader(&fx, &calls);

        loader.prepare(MODEL_ID, fx.dest.path()).await.unwrap();
        let first = std::fs::read(fx.dest_snapshot().join("model.bin")).unwrap();
        loader.prepare(MODEL_ID, fx.dest.path()).await.unwrap();
        let second = std::fs::read(fx.dest_snapshot().join("model.bin")).unwrap();

        assert_eq!(first, second);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn scenario_b_plain_model() {
        let fx = HubFixture::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let outcome = loader(&fx, &calls)
            .prepare("plain-model", fx.dest.path())
            .await
            .unwrap();

        assert!(matches!(outcome, PrepareOutcome::Unencrypted { .. }));
        assert!(fx.dest_is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn scenario_c_unknown_broker() {
        let fx = HubFixture::new();
        fx.encrypt("model.bin.aes", b"weights", 1);
        fx.manifest("UNKNOWN", &["model.bin.aes"]);
        let calls = Arc::new(AtomicUsize::new(0));

        let err = loader(&fx, &calls)
            .prepare(MODEL_ID, fx.dest.path())
            .await
            .unwrap_err();

        assert!(matches!(err, LoaderError::UnsupportedBroker(ref kind) if kind == "UNKNOWN"));
        assert!(fx.dest_is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn scenario_d_one_corrupted_file() {
        let fx = HubFixture::new();
        fx.encrypt("model.bin.aes", b"weights", 1);
        let corrupt = fx.encrypt("config.json.aes", b"{}", 2);
        let mut bytes = std::fs::read(&corrupt).unwrap();
        bytes[14] ^= 0xFF;
        std::fs::write(&corrupt, bytes).unwrap();
        fx.manifest("ITA_KBS", &["model.bin.aes", "config.json.aes"]);
        let calls = Arc::new(AtomicUsize::new(0));

        let err = loader(&fx, &calls)
            .prepare(MODEL_ID, fx.dest.path())
            .await
            .unwrap_err();

        match err {
            LoaderError::Decryption(failures) => {
                assert_eq!(failures.paths(), vec![&corrupt]);
                assert!(failures.to_string().contains("config.json.aes"));
            }
            other => panic!("expected decryption failure, got {other}"),
        }
        assert_eq!(
            std::fs::read(fx.dest_snapshot().join("model.bin")).unwrap(),
            b"weights"
        );
    }
}

mod ita_tests {
    use async_trait::async_trait;
    use base64::{engine::general_purpose::STANDARD, Engine};
    use cai_loader::crypto::DecryptionKey;
    use cai_loader::keybroker::{Attester, ItaKeyBrokerClient, KeyBrokerClient, WrappedKey};
    use cai_loader::{LoaderError, LoaderResult};
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::sync::Arc;
    use std::thread::JoinHandle;
    use std::time::Duration;
    use url::Url;

    /// Hands out a fixed token; "unwrapping" is a plain base64 decode
    struct FakeAttester;

    #[async_trait]
    impl Attester for FakeAttester {
        async fn attestation_token(&self, key_id: &str) -> LoaderResult<String> {
            Ok(format!("token-for-{key_id}"))
        }

        async fn unwrap_key(&self, wrapped: &WrappedKey) -> LoaderResult<DecryptionKey> {
            let key = STANDARD
                .decode(&wrapped.wrapped_key)
                .map_err(|e| LoaderError::Attestation(e.to_string()))?;
            Ok(DecryptionKey::new(key))
        }
    }

    /// Serves exactly one HTTP response and returns the raw request it saw
    fn one_shot_server(status: &str, body: &str) -> (Url, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = Url::parse(&format!("http://{}", listener.local_addr().unwrap())).unwrap();
        let response = format!(
            "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        );

        let handle = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            loop {
                let n = stream.read(&mut buf).unwrap();
                request.extend_from_slice(&buf[..n]);
                if n == 0 || request_complete(&request) {
                    break;
                }
            }
            stream.write_all(response.as_bytes()).unwrap();
            stream.flush().unwrap();
            String::from_utf8_lossy(&request).into_owned()
        });

        (url, handle)
    }

    fn request_complete(request: &[u8]) -> bool {
        let text = String::from_utf8_lossy(request);
        let Some(split) = text.find("\r\n\r\n") else {
            return false;
        };
        let length = text[..split]
            .lines()
            .find_map(|line| {
                let (name, value) = line.split_once(':')?;
                name.eq_ignore_ascii_case("content-length")
                    .then(|| value.trim().parse::<usize>().ok())
                    .flatten()
            })
            .unwrap_or(0);
        request.len() >= split + 4 + length
    }

    fn client() -> ItaKeyBrokerClient {
        ItaKeyBrokerClient::new(Arc::new(FakeAttester), Duration::from_secs(5))
    }

    #[tokio::test]
    async fn transfer_releases_key() {
        let wrapped = STANDARD.encode([9u8; 32]);
        let body = format!(r#"{{"wrapped_key": "{wrapped}", "wrapped_swk": "c3dr"}}"#);
        let (url, server) = one_shot_server("200 OK", &body);

        let key = client().get_key(&url, "k1").await.unwrap();
        assert_eq!(key.len(), 32);

        let request = server.join().unwrap();
        let lower = request.to_ascii_lowercase();
        assert!(request.starts_with("POST /kbs/v1/keys/k1/transfer "), "{request}");
        assert!(lower.contains("attestation-type: tdx"));
        assert!(lower.contains("content-type: application/json"));
        assert!(request.contains(r#""attestation_token":"token-for-k1""#));
    }

    #[tokio::test]
    async fn forbidden_is_rejection() {
        let (url, server) = one_shot_server("403 Forbidden", "{}");

        let err = client().get_key(&url, "k1").await.unwrap_err();
        server.join().unwrap();

        assert!(matches!(err, LoaderError::KeyBrokerRejected { .. }));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn unknown_key_is_not_found() {
        let (url, server) = one_shot_server("404 Not Found", "{}");

        let err = client().get_key(&url, "missing").await.unwrap_err();
        server.join().unwrap();

        assert!(matches!(err, LoaderError::KeyNotFound { ref key_id, .. } if key_id == "missing"));
    }

    #[tokio::test]
    async fn malformed_body_is_rejection() {
        let (url, server) = one_shot_server("200 OK", r#"{"unexpected": true}"#);

        let err = client().get_key(&url, "k1").await.unwrap_err();
        server.join().unwrap();

        assert!(err.to_string().contains("unexpected response"));
    }

    #[tokio::test]
    async fn unreachable_broker_is_retryable() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = Url::parse(&format!("http://{}", listener.local_addr().unwrap())).unwrap();
        drop(listener);

        let err = client().get_key(&url, "k1").await.unwrap_err();
        assert!(err.is_retryable());
    }
}
