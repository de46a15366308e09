//! Oracle-backed protocol discovery and parser repair.
//!
//! Both operations share one pipeline: build the prompt, call the oracle
//! (with retry), pick the authoritative signature from the raw reply,
//! sanitize it into contract-conformant source, register the parser and
//! commit the binding to the manifest. A per-signature single-flight gate
//! guarantees that K concurrent misses for the same signature produce
//! exactly one oracle request.

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::broadcast;

use framegate_providers::{OracleClient, OracleError};
use framegate_types::{ProtocolId, Signature};

use crate::dispatcher::Dispatcher;
use crate::manager::{Manager, ManagerError};
use crate::sanitize::{extract_signature, sanitize_source};

/// What happens when a discovery is requested for a signature that already
/// has one in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlightPolicy {
    /// Wait for the in-flight operation and share its result.
    Block,
    /// Report [`DiscoveryError::Busy`]; the caller drops the frame.
    Drop,
}

#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// Total oracle attempts per operation (at least 1).
    pub max_retries: u32,
    /// Initial backoff delay, doubled after every failed attempt.
    pub retry_delay: Duration,
    /// Location of the oracle system prompt.
    pub prompt_path: PathBuf,
    pub policy: FlightPolicy,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::from_secs(2),
            prompt_path: PathBuf::from("agents/system_prompt.md"),
            policy: FlightPolicy::Block,
        }
    }
}

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("failed to load system prompt {path}: {source}")]
    PromptUnavailable { path: PathBuf, source: io::Error },

    #[error("all oracle attempts failed: {0}")]
    OracleExhausted(#[source] OracleError),

    #[error("no signature found in oracle response and none provided")]
    MissingSignature,

    #[error("discovery already in flight for signature {0}")]
    Busy(String),

    #[error("joined discovery for signature {signature} failed: {message}")]
    FlightFailed { signature: String, message: String },

    #[error(transparent)]
    Register(#[from] ManagerError),
}

type FlightResult = Result<ProtocolId, String>;
type FlightMap = Mutex<HashMap<String, broadcast::Sender<FlightResult>>>;

/// Removes the in-flight entry even if the owning future is dropped
/// mid-pipeline, so waiters observe an abort instead of hanging.
struct FlightGuard {
    map: Arc<FlightMap>,
    key: String,
    done: bool,
}

impl FlightGuard {
    fn complete(mut self, outcome: &Result<ProtocolId, DiscoveryError>) {
        self.done = true;
        let sender = lock(&self.map).remove(&self.key);
        if let Some(sender) = sender {
            let shared = match outcome {
                Ok(protocol) => Ok(protocol.clone()),
                Err(e) => Err(e.to_string()),
            };
            // no receivers is fine: nobody joined this flight
            let _ = sender.send(shared);
        }
    }
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        if !self.done {
            lock(&self.map).remove(&self.key);
        }
    }
}

fn lock(map: &FlightMap) -> std::sync::MutexGuard<'_, HashMap<String, broadcast::Sender<FlightResult>>> {
    map.lock().unwrap_or_else(|e| e.into_inner())
}

/// Down-jitter factor for retry backoff: each pause is shortened by a
/// random amount up to 25%.
const RETRY_JITTER: f64 = 0.25;

fn jittered(delay: Duration) -> Duration {
    delay.mul_f64(1.0 - rand::random::<f64>() * RETRY_JITTER)
}

/// Mediates between ingestion failures and the oracle.
pub struct Discovery {
    dispatcher: Arc<Dispatcher>,
    manager: Arc<Manager>,
    oracle: OracleClient,
    config: DiscoveryConfig,
    in_flight: Arc<FlightMap>,
}

impl Discovery {
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        manager: Arc<Manager>,
        oracle: OracleClient,
        config: DiscoveryConfig,
    ) -> Self {
        Self {
            dispatcher,
            manager,
            oracle,
            config,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    #[must_use]
    pub fn policy(&self) -> FlightPolicy {
        self.config.policy
    }

    /// Synthesize a parser for a previously unknown signature.
    ///
    /// `signature` defaults to the frame's first byte when not supplied; a
    /// `// Signature:` declaration in the generated source overrides both.
    pub async fn discover_new_protocol(
        &self,
        frame: &[u8],
        signature: Option<&Signature>,
        hint: &str,
    ) -> Result<ProtocolId, DiscoveryError> {
        let fallback = self.fallback_signature(frame, signature)?;
        tracing::info!(
            provider = %self.oracle.kind(),
            signature = %fallback,
            "discovery: analyzing unknown signature"
        );
        let system = self.load_system_prompt()?;
        let prompt = format!(
            "{system}\n\nINPUT:\nHex Sample: {}\nProtocol Hints: {hint}",
            hex::encode_upper(frame)
        );
        self.single_flight(fallback, prompt, None).await
    }

    /// Regenerate a parser that has started failing. The protocol id is
    /// preserved; on failure the existing (broken) binding stays in place so
    /// later frames retry repair instead of falling back to discovery.
    pub async fn repair_parser(
        &self,
        protocol: &ProtocolId,
        faulty_source: &str,
        error_text: &str,
        frame: &[u8],
        signature: Option<&Signature>,
    ) -> Result<ProtocolId, DiscoveryError> {
        let fallback = self.fallback_signature(frame, signature)?;
        tracing::info!(
            provider = %self.oracle.kind(),
            protocol = %protocol,
            "repair: regenerating failing parser"
        );
        let system = self.load_system_prompt()?;
        let prompt = format!(
            "{system}\n\n### ERROR TO FIX\nYou previously generated code that failed.\n\n\
             FAULTY CODE:\n```\n{faulty_source}\n```\n\nERROR MESSAGE:\n{error_text}\n\n\
             INPUT DATA (Hex): {}\n\nPlease fix the code and return only the corrected parser.",
            hex::encode_upper(frame)
        );
        self.single_flight(fallback, prompt, Some(protocol.clone()))
            .await
    }

    fn fallback_signature(
        &self,
        frame: &[u8],
        explicit: Option<&Signature>,
    ) -> Result<Signature, DiscoveryError> {
        if let Some(signature) = explicit {
            return Ok(signature.clone());
        }
        let first = frame.first().ok_or(DiscoveryError::MissingSignature)?;
        Signature::new(vec![*first]).map_err(|_| DiscoveryError::MissingSignature)
    }

    fn load_system_prompt(&self) -> Result<String, DiscoveryError> {
        std::fs::read_to_string(&self.config.prompt_path).map_err(|source| {
            DiscoveryError::PromptUnavailable {
                path: self.config.prompt_path.clone(),
                source,
            }
        })
    }

    async fn single_flight(
        &self,
        signature: Signature,
        prompt: String,
        fixed: Option<ProtocolId>,
    ) -> Result<ProtocolId, DiscoveryError> {
        let key = signature.to_hex();
        let joined = {
            let mut map = lock(&self.in_flight);
            match map.get(&key) {
                Some(sender) => match self.config.policy {
                    FlightPolicy::Drop => return Err(DiscoveryError::Busy(key)),
                    FlightPolicy::Block => Some(sender.subscribe()),
                },
                None => {
                    let (sender, _) = broadcast::channel(1);
                    map.insert(key.clone(), sender);
                    None
                }
            }
        };

        if let Some(mut receiver) = joined {
            tracing::debug!(signature = %key, "joining in-flight discovery");
            return match receiver.recv().await {
                Ok(Ok(protocol)) => Ok(protocol),
                Ok(Err(message)) => Err(DiscoveryError::FlightFailed {
                    signature: key,
                    message,
                }),
                Err(_) => Err(DiscoveryError::FlightFailed {
                    signature: key,
                    message: "in-flight discovery aborted".to_string(),
                }),
            };
        }

        let guard = FlightGuard {
            map: Arc::clone(&self.in_flight),
            key,
            done: false,
        };
        let outcome = self.run_pipeline(prompt, signature, fixed).await;
        guard.complete(&outcome);
        outcome
    }

    async fn run_pipeline(
        &self,
        prompt: String,
        fallback: Signature,
        fixed: Option<ProtocolId>,
    ) -> Result<ProtocolId, DiscoveryError> {
        let raw = self.call_oracle_with_retry(&prompt).await?;

        // the signature declared in the reply is authoritative; it must be
        // read from the raw text, before sanitization trims anything ahead
        // of the package clause
        let signature = extract_signature(&raw).unwrap_or(fallback);
        let source = sanitize_source(&raw);
        let protocol = fixed.unwrap_or_else(|| ProtocolId::auto(&signature));

        self.manager.register_parser(&protocol, &source)?;
        self.dispatcher.bind(&signature, protocol.clone());
        self.manager.save_manifest(&self.dispatcher.bindings())?;

        tracing::info!(
            protocol = %protocol,
            signature = %signature,
            "parser registered and binding persisted"
        );
        Ok(protocol)
    }

    async fn call_oracle_with_retry(&self, prompt: &str) -> Result<String, DiscoveryError> {
        let max_attempts = self.config.max_retries.max(1);
        let mut delay = self.config.retry_delay;
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.oracle.generate(prompt).await {
                Ok(text) => return Ok(text),
                Err(e) => {
                    if attempt >= max_attempts || !e.is_retryable() {
                        return Err(DiscoveryError::OracleExhausted(e));
                    }
                    let pause = jittered(delay);
                    tracing::warn!(
                        attempt,
                        max_attempts,
                        delay_ms = pause.as_millis() as u64,
                        "oracle request failed, retrying: {e}"
                    );
                    tokio::time::sleep(pause).await;
                    delay = delay.saturating_mul(2);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::IngestError;
    use framegate_engine::Engine;
    use framegate_providers::ProviderKind;
    use framegate_types::FieldValue;
    use wiremock::matchers::{body_string_contains, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct Fixture {
        dispatcher: Arc<Dispatcher>,
        manager: Arc<Manager>,
        _dir: tempfile::TempDir,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().expect("tempdir");
        let engine = Arc::new(Engine::new());
        let manager = Arc::new(
            Manager::new(engine, dir.path().join("storage"), None).expect("manager"),
        );
        let dispatcher = Arc::new(Dispatcher::new(Arc::clone(&manager)));
        Fixture {
            dispatcher,
            manager,
            _dir: dir,
        }
    }

    fn write_prompt(fixture: &Fixture) -> PathBuf {
        let path = fixture._dir.path().join("system_prompt.md");
        std::fs::write(&path, "You generate binary parsers.").expect("write prompt");
        path
    }

    fn config(fixture: &Fixture) -> DiscoveryConfig {
        DiscoveryConfig {
            max_retries: 1,
            retry_delay: Duration::from_millis(10),
            prompt_path: write_prompt(fixture),
            policy: FlightPolicy::Block,
        }
    }

    fn local_oracle(server: &MockServer) -> OracleClient {
        OracleClient::new(ProviderKind::Local, "llama3", server.uri())
    }

    fn ok_response(code: &str) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(serde_json::json!({ "response": code }))
    }

    const VOLTAGE_CODE: &str = r#"// Signature: 55AA
package dynamic

import "encoding/binary"

func Parse(data []byte) map[string]interface{} {
	if len(data) < 4 {
		return nil
	}
	return map[string]interface{}{"value": int(binary.BigEndian.Uint16(data[2:4]))}
}"#;

    #[tokio::test]
    async fn discovery_registers_binds_and_persists() {
        let f = fixture();
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_string_contains("Hex Sample: 55AA03E8"))
            .and(body_string_contains("Protocol Hints: voltage sensor"))
            .respond_with(ok_response(VOLTAGE_CODE))
            .expect(1)
            .mount(&server)
            .await;

        let discovery = Discovery::new(
            Arc::clone(&f.dispatcher),
            Arc::clone(&f.manager),
            local_oracle(&server),
            config(&f),
        );

        let frame = [0x55, 0xAA, 0x03, 0xE8];
        // nothing bound yet: the frame routes to discovery
        assert!(matches!(
            f.dispatcher.ingest(&frame),
            Err(IngestError::UnknownSignature { .. })
        ));

        let protocol = discovery
            .discover_new_protocol(&frame, None, "voltage sensor")
            .await
            .unwrap();
        assert_eq!(protocol.as_str(), "auto_proto_0x55AA");

        // parser persisted to storage
        assert!(
            f.manager
                .storage_dir()
                .join("auto_proto_0x55AA.dyn")
                .exists()
        );
        // binding persisted to the manifest
        let manifest = f.manager.load_manifest().unwrap();
        assert_eq!(manifest.get("55AA"), Some(&protocol));

        // and the frame now takes the fast path
        let (record, matched) = f.dispatcher.ingest(&frame).unwrap();
        assert_eq!(matched, protocol);
        assert_eq!(record.get("value"), Some(&FieldValue::Int(1000)));
    }

    #[tokio::test]
    async fn signature_is_read_from_raw_reply_before_sanitization() {
        let f = fixture();
        let server = MockServer::start().await;
        // the declaration sits ahead of the package clause; sanitization
        // strips that region, so extraction has to happen on the raw reply
        let reply = "// Signature: 0BEE\npackage dynamic\nfunc Parse(data []byte) map[string]interface{} { return nil }";
        Mock::given(method("POST"))
            .respond_with(ok_response(reply))
            .mount(&server)
            .await;

        let discovery = Discovery::new(
            Arc::clone(&f.dispatcher),
            Arc::clone(&f.manager),
            local_oracle(&server),
            config(&f),
        );

        let protocol = discovery
            .discover_new_protocol(&[0x0B, 0xEE, 0x01], None, "")
            .await
            .unwrap();
        assert_eq!(protocol.as_str(), "auto_proto_0x0BEE");
        assert!(f.dispatcher.bindings().contains_key("0BEE"));

        // the stored source is the sanitized text, without the comment
        let stored = f.manager.get_parser_code(&protocol).unwrap();
        assert!(stored.starts_with("package dynamic"));
        assert!(!stored.contains("Signature"));
    }

    #[test]
    fn jittered_delay_stays_within_bounds() {
        let base = Duration::from_millis(100);
        for _ in 0..100 {
            let d = jittered(base);
            assert!(d >= Duration::from_millis(75), "got {d:?}");
            assert!(d <= base, "got {d:?}");
        }
    }

    #[tokio::test]
    async fn signature_comment_overrides_caller_signature() {
        let f = fixture();
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ok_response(VOLTAGE_CODE))
            .mount(&server)
            .await;

        let discovery = Discovery::new(
            Arc::clone(&f.dispatcher),
            Arc::clone(&f.manager),
            local_oracle(&server),
            config(&f),
        );

        // caller claims a single-byte signature; the generated source says 55AA
        let caller_sig = Signature::new(vec![0x55]).unwrap();
        let protocol = discovery
            .discover_new_protocol(&[0x55, 0xAA, 0x00, 0x01], Some(&caller_sig), "")
            .await
            .unwrap();
        assert_eq!(protocol.as_str(), "auto_proto_0x55AA");
        assert!(f.dispatcher.bindings().contains_key("55AA"));
        assert!(!f.dispatcher.bindings().contains_key("55"));
    }

    #[tokio::test]
    async fn chatty_oracle_output_is_sanitized_before_storage() {
        let f = fixture();
        let server = MockServer::start().await;
        let chatty = "Here is the code:\n\npackage dynamic\nfunc ParseXYZ(d []byte) map[string]interface{} { return map[string]interface{}{} }\n```";
        Mock::given(method("POST"))
            .respond_with(ok_response(chatty))
            .mount(&server)
            .await;

        let discovery = Discovery::new(
            Arc::clone(&f.dispatcher),
            Arc::clone(&f.manager),
            local_oracle(&server),
            config(&f),
        );

        let frame = [0x7E, 0x01];
        let protocol = discovery
            .discover_new_protocol(&frame, None, "")
            .await
            .unwrap();
        assert_eq!(protocol.as_str(), "auto_proto_0x7E");

        let stored = f.manager.get_parser_code(&protocol).unwrap();
        assert!(stored.starts_with("package dynamic"), "stored: {stored}");
        assert!(stored.contains("func Parse("));
        assert!(!stored.contains("Here is the code"));

        // the sanitized source actually compiles and runs
        let (record, _) = f.dispatcher.ingest(&frame).unwrap();
        assert!(record.is_empty());
    }

    #[tokio::test]
    async fn repair_keeps_protocol_id_and_heals_parser() {
        let f = fixture();
        let server = MockServer::start().await;
        let fixed_code = r#"// Signature: 42
package dynamic

func Parse(data []byte) map[string]interface{} {
	if len(data) < 2 {
		return nil
	}
	return map[string]interface{}{"v": int(data[1])}
}"#;
        Mock::given(method("POST"))
            .and(body_string_contains("ERROR TO FIX"))
            .and(body_string_contains("index out of range"))
            .respond_with(ok_response(fixed_code))
            .expect(1)
            .mount(&server)
            .await;

        let discovery = Discovery::new(
            Arc::clone(&f.dispatcher),
            Arc::clone(&f.manager),
            local_oracle(&server),
            config(&f),
        );

        let protocol = ProtocolId::new("sensor_42").unwrap();
        let broken = r#"package dynamic
func Parse(data []byte) map[string]interface{} {
	return map[string]interface{}{"v": int(data[5])}
}"#;
        f.manager.register_parser(&protocol, broken).unwrap();
        f.dispatcher
            .bind(&Signature::new(vec![0x42]).unwrap(), protocol.clone());

        let frame = [0x42, 0xFF];
        let err = f.dispatcher.ingest(&frame).unwrap_err();
        let IngestError::ParseFailed { protocol: failed, source } = &err else {
            panic!("expected ParseFailed, got {err:?}");
        };
        assert_eq!(failed, &protocol);

        let faulty = f.manager.get_parser_code(&protocol).unwrap();
        let repaired = discovery
            .repair_parser(&protocol, &faulty, &source.to_string(), &frame, None)
            .await
            .unwrap();
        assert_eq!(repaired, protocol, "repair must keep the protocol id");

        let (record, _) = f.dispatcher.ingest(&frame).unwrap();
        assert_eq!(record.get("v"), Some(&FieldValue::Int(0xFF)));
    }

    #[tokio::test]
    async fn failed_repair_leaves_broken_binding_in_place() {
        let f = fixture();
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let discovery = Discovery::new(
            Arc::clone(&f.dispatcher),
            Arc::clone(&f.manager),
            local_oracle(&server),
            config(&f),
        );

        let protocol = ProtocolId::new("sensor_42").unwrap();
        let broken = r#"package dynamic
func Parse(data []byte) map[string]interface{} {
	return map[string]interface{}{"v": int(data[9])}
}"#;
        f.manager.register_parser(&protocol, broken).unwrap();
        f.dispatcher
            .bind(&Signature::new(vec![0x42]).unwrap(), protocol.clone());

        let result = discovery
            .repair_parser(&protocol, broken, "index out of range", &[0x42, 0x00], None)
            .await;
        assert!(matches!(result, Err(DiscoveryError::OracleExhausted(_))));

        // the broken binding is still routed, so the next frame retries
        // repair rather than discovery
        assert!(matches!(
            f.dispatcher.ingest(&[0x42, 0x00]),
            Err(IngestError::ParseFailed { .. })
        ));
    }

    #[tokio::test]
    async fn retries_with_backoff_until_success() {
        use std::sync::atomic::{AtomicU32, Ordering};

        let f = fixture();
        let server = MockServer::start().await;
        let attempts = AtomicU32::new(0);
        Mock::given(method("POST"))
            .respond_with(move |_: &wiremock::Request| {
                let n = attempts.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    ResponseTemplate::new(500).set_body_string("transient error")
                } else {
                    ok_response(
                        "// Signature: 03CC\npackage dynamic\nfunc Parse(data []byte) map[string]interface{} {\n\treturn map[string]interface{}{\"status\": \"retry_ok\"}\n}",
                    )
                }
            })
            .expect(3)
            .mount(&server)
            .await;

        let mut cfg = config(&f);
        cfg.max_retries = 3;
        cfg.retry_delay = Duration::from_millis(10);
        let discovery = Discovery::new(
            Arc::clone(&f.dispatcher),
            Arc::clone(&f.manager),
            local_oracle(&server),
            cfg,
        );

        let protocol = discovery
            .discover_new_protocol(&[0x03, 0xCC, 0x01], None, "test retry")
            .await
            .unwrap();
        assert_eq!(protocol.as_str(), "auto_proto_0x03CC");
    }

    #[tokio::test]
    async fn exhausted_retries_surface_oracle_error() {
        let f = fixture();
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .expect(2)
            .mount(&server)
            .await;

        let mut cfg = config(&f);
        cfg.max_retries = 2;
        cfg.retry_delay = Duration::from_millis(5);
        let discovery = Discovery::new(
            Arc::clone(&f.dispatcher),
            Arc::clone(&f.manager),
            local_oracle(&server),
            cfg,
        );

        assert!(matches!(
            discovery.discover_new_protocol(&[0x09], None, "").await,
            Err(DiscoveryError::OracleExhausted(_))
        ));
    }

    #[tokio::test]
    async fn concurrent_misses_issue_exactly_one_oracle_request() {
        let f = fixture();
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ok_response(VOLTAGE_CODE).set_delay(Duration::from_millis(300)),
            )
            .expect(1)
            .mount(&server)
            .await;

        let discovery = Arc::new(Discovery::new(
            Arc::clone(&f.dispatcher),
            Arc::clone(&f.manager),
            local_oracle(&server),
            config(&f),
        ));

        let mut tasks = Vec::new();
        for _ in 0..6 {
            let discovery = Arc::clone(&discovery);
            tasks.push(tokio::spawn(async move {
                discovery
                    .discover_new_protocol(&[0x55, 0xAA, 0x03, 0xE8], None, "")
                    .await
            }));
        }
        for task in tasks {
            let protocol = task.await.expect("task").expect("discovery");
            assert_eq!(protocol.as_str(), "auto_proto_0x55AA");
        }
        // server verifies expect(1) on drop
    }

    #[tokio::test]
    async fn drop_policy_rejects_second_flight() {
        let f = fixture();
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ok_response(VOLTAGE_CODE).set_delay(Duration::from_millis(300)),
            )
            .expect(1)
            .mount(&server)
            .await;

        let mut cfg = config(&f);
        cfg.policy = FlightPolicy::Drop;
        let discovery = Arc::new(Discovery::new(
            Arc::clone(&f.dispatcher),
            Arc::clone(&f.manager),
            local_oracle(&server),
            cfg,
        ));

        let leader = {
            let discovery = Arc::clone(&discovery);
            tokio::spawn(async move {
                discovery
                    .discover_new_protocol(&[0x55, 0xAA, 0x03, 0xE8], None, "")
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;

        let second = discovery
            .discover_new_protocol(&[0x55, 0xAA, 0x03, 0xE8], None, "")
            .await;
        assert!(matches!(second, Err(DiscoveryError::Busy(_))));

        assert!(leader.await.expect("task").is_ok());
    }

    #[tokio::test]
    async fn empty_frame_without_signature_is_missing_signature() {
        let f = fixture();
        let server = MockServer::start().await;
        // expect(0): the oracle must never be consulted
        Mock::given(method("POST"))
            .respond_with(ok_response(VOLTAGE_CODE))
            .expect(0)
            .mount(&server)
            .await;

        let discovery = Discovery::new(
            Arc::clone(&f.dispatcher),
            Arc::clone(&f.manager),
            local_oracle(&server),
            config(&f),
        );

        assert!(matches!(
            discovery.discover_new_protocol(&[], None, "").await,
            Err(DiscoveryError::MissingSignature)
        ));
    }

    #[tokio::test]
    async fn missing_prompt_file_fails_before_oracle() {
        let f = fixture();
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ok_response(VOLTAGE_CODE))
            .expect(0)
            .mount(&server)
            .await;

        let mut cfg = config(&f);
        cfg.prompt_path = f._dir.path().join("does_not_exist.md");
        let discovery = Discovery::new(
            Arc::clone(&f.dispatcher),
            Arc::clone(&f.manager),
            local_oracle(&server),
            cfg,
        );

        assert!(matches!(
            discovery.discover_new_protocol(&[0x01], None, "").await,
            Err(DiscoveryError::PromptUnavailable { .. })
        ));
    }
}
