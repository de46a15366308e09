//! TCP frame receiver.
//!
//! One task per connection; every read is treated as one logical frame
//! (framing beyond that is out of scope). Each frame runs the full
//! ingest -> repair-on-failure -> discover-on-miss loop and the outcome is
//! reported back to the peer as a single text line.

use std::io;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use framegate_types::{ProtocolId, Record};

use crate::discovery::Discovery;
use crate::dispatcher::{Dispatcher, IngestError};

const READ_BUFFER_SIZE: usize = 1024;

/// Result of pushing one frame through the gateway.
#[derive(Debug)]
pub enum FrameOutcome {
    Parsed {
        protocol: ProtocolId,
        record: Record,
        /// The parser was broken and got repaired on the way.
        healed: bool,
        /// The protocol was unknown and got discovered on the way.
        learned: bool,
    },
    Failed {
        error: String,
    },
}

/// Run `frame` through ingest, attempting repair for a failing known parser
/// and discovery for an unknown signature. This is the frame receiver's
/// whole decision procedure; the simulator reuses it verbatim.
pub async fn handle_frame(
    dispatcher: &Arc<Dispatcher>,
    discovery: &Discovery,
    frame: &[u8],
) -> FrameOutcome {
    match ingest(dispatcher, frame).await {
        Ok((record, protocol)) => FrameOutcome::Parsed {
            protocol,
            record,
            healed: false,
            learned: false,
        },
        // SELF-HEALING: a known protocol failed, hand it to repair
        Err(err) if err.protocol().is_some() => {
            let Some(protocol) = err.protocol().cloned() else {
                return FrameOutcome::Failed {
                    error: err.to_string(),
                };
            };
            tracing::warn!(protocol = %protocol, "parser failed, attempting repair: {err}");

            let Some(faulty) = dispatcher.manager().get_parser_code(&protocol) else {
                return FrameOutcome::Failed {
                    error: format!("no source available to repair {protocol}"),
                };
            };
            let signature = dispatcher.signature_for(&protocol);
            match discovery
                .repair_parser(&protocol, &faulty, &err.to_string(), frame, signature.as_ref())
                .await
            {
                Ok(_) => match ingest(dispatcher, frame).await {
                    Ok((record, protocol)) => {
                        tracing::info!(protocol = %protocol, "parser repaired");
                        FrameOutcome::Parsed {
                            protocol,
                            record,
                            healed: true,
                            learned: false,
                        }
                    }
                    Err(err) => FrameOutcome::Failed {
                        error: format!("still failing after repair: {err}"),
                    },
                },
                Err(repair_err) => FrameOutcome::Failed {
                    error: format!("repair failed: {repair_err}"),
                },
            }
        }
        // DISCOVERY: nothing matches this signature yet
        Err(IngestError::UnknownSignature { .. }) => {
            tracing::info!(
                prefix = %hex::encode_upper(&frame[..frame.len().min(4)]),
                "unknown signature, consulting oracle"
            );
            let hint = "Remote incoming binary data stream.";
            match discovery.discover_new_protocol(frame, None, hint).await {
                Ok(learned_id) => match ingest(dispatcher, frame).await {
                    Ok((record, protocol)) => {
                        tracing::info!(protocol = %learned_id, "new protocol learned and persisted");
                        FrameOutcome::Parsed {
                            protocol,
                            record,
                            healed: false,
                            learned: true,
                        }
                    }
                    Err(err) => FrameOutcome::Failed {
                        error: format!("still failing after discovery: {err}"),
                    },
                },
                Err(disc_err) => FrameOutcome::Failed {
                    error: format!("discovery failed: {disc_err}"),
                },
            }
        }
        Err(err) => FrameOutcome::Failed {
            error: err.to_string(),
        },
    }
}

/// Parsing is CPU-bound (bounded by the engine deadline); keep it off the
/// accept path.
async fn ingest(
    dispatcher: &Arc<Dispatcher>,
    frame: &[u8],
) -> Result<(Record, ProtocolId), IngestError> {
    let dispatcher = Arc::clone(dispatcher);
    let frame = frame.to_vec();
    match tokio::task::spawn_blocking(move || dispatcher.ingest(&frame)).await {
        Ok(result) => result,
        Err(join_err) => {
            tracing::error!("ingest task failed: {join_err}");
            Err(IngestError::EmptyFrame)
        }
    }
}

/// Listens for inbound binary streams and feeds them through the gateway.
pub struct TcpServer {
    dispatcher: Arc<Dispatcher>,
    discovery: Arc<Discovery>,
}

impl TcpServer {
    pub fn new(dispatcher: Arc<Dispatcher>, discovery: Arc<Discovery>) -> Self {
        Self {
            dispatcher,
            discovery,
        }
    }

    /// Bind `addr` and serve until the process exits.
    pub async fn listen_and_serve(self, addr: &str) -> io::Result<()> {
        let listener = TcpListener::bind(addr).await?;
        tracing::info!(addr = %addr, "TCP server listening");
        self.serve(listener).await
    }

    /// Serve connections from an already-bound listener.
    pub async fn serve(self, listener: TcpListener) -> io::Result<()> {
        loop {
            let (conn, peer) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    tracing::error!("accept error: {e}");
                    continue;
                }
            };
            tracing::info!(peer = %peer, "new connection");
            let dispatcher = Arc::clone(&self.dispatcher);
            let discovery = Arc::clone(&self.discovery);
            tokio::spawn(async move {
                if let Err(e) = handle_connection(dispatcher, discovery, conn).await {
                    tracing::debug!(peer = %peer, "connection closed with error: {e}");
                }
                tracing::info!(peer = %peer, "connection closed");
            });
        }
    }
}

async fn handle_connection(
    dispatcher: Arc<Dispatcher>,
    discovery: Arc<Discovery>,
    mut conn: TcpStream,
) -> io::Result<()> {
    let mut buf = [0u8; READ_BUFFER_SIZE];
    loop {
        let n = conn.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        let frame = &buf[..n];
        tracing::debug!(frame = %hex::encode_upper(frame), "received frame");

        let reply = match handle_frame(&dispatcher, &discovery, frame).await {
            FrameOutcome::Parsed {
                protocol, record, ..
            } => {
                let json = serde_json::to_string(&record).unwrap_or_else(|_| "{}".to_string());
                format!("Parsed ({protocol}): {json}\n")
            }
            FrameOutcome::Failed { error } => format!("Error: {error}\n"),
        };
        conn.write_all(reply.as_bytes()).await?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::{DiscoveryConfig, FlightPolicy};
    use crate::manager::Manager;
    use framegate_engine::Engine;
    use framegate_providers::{OracleClient, ProviderKind};
    use framegate_types::Signature;
    use std::time::Duration;
    use tokio::io::BufReader;

    const RPM_SOURCE: &str = r#"package dynamic
func Parse(data []byte) map[string]interface{} {
	if len(data) < 2 {
		return nil
	}
	return map[string]interface{}{"rpm": int(data[1]) * 100}
}"#;

    async fn start_server(
        oracle_endpoint: &str,
        prompt_path: std::path::PathBuf,
    ) -> (std::net::SocketAddr, Arc<Dispatcher>, tempfile::TempDir) {
        let dir = tempfile::tempdir().expect("tempdir");
        let engine = Arc::new(Engine::new());
        let manager = Arc::new(
            Manager::new(engine, dir.path().join("storage"), None).expect("manager"),
        );
        let dispatcher = Arc::new(Dispatcher::new(Arc::clone(&manager)));

        let protocol = ProtocolId::new("Engine").unwrap();
        manager.register_parser(&protocol, RPM_SOURCE).unwrap();
        dispatcher.bind(&Signature::new(vec![0x01]).unwrap(), protocol);

        let oracle = OracleClient::new(ProviderKind::Local, "llama3", oracle_endpoint);
        let discovery = Arc::new(Discovery::new(
            Arc::clone(&dispatcher),
            Arc::clone(&manager),
            oracle,
            DiscoveryConfig {
                max_retries: 1,
                retry_delay: Duration::from_millis(10),
                prompt_path,
                policy: FlightPolicy::Block,
            },
        ));

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        let server = TcpServer::new(Arc::clone(&dispatcher), discovery);
        tokio::spawn(async move {
            let _ = server.serve(listener).await;
        });
        (addr, dispatcher, dir)
    }

    #[tokio::test]
    async fn serves_fast_path_over_tcp() {
        use tokio::io::AsyncBufReadExt;

        let dir = tempfile::tempdir().expect("tempdir");
        let prompt = dir.path().join("system_prompt.md");
        std::fs::write(&prompt, "prompt").unwrap();

        // oracle endpoint is never used on the fast path
        let (addr, _dispatcher, _dir) = start_server("http://127.0.0.1:9", prompt).await;

        let conn = TcpStream::connect(addr).await.expect("connect");
        let (read_half, mut write_half) = conn.into_split();
        let mut lines = BufReader::new(read_half).lines();

        write_half.write_all(&[0x01, 0x1E]).await.expect("write");
        let line = lines
            .next_line()
            .await
            .expect("read")
            .expect("line present");
        assert!(line.starts_with("Parsed (Engine):"), "line: {line}");
        assert!(line.contains("\"rpm\":3000"), "line: {line}");

        // frames keep flowing on the same connection
        write_half.write_all(&[0x01, 0x64]).await.expect("write");
        let line = lines
            .next_line()
            .await
            .expect("read")
            .expect("line present");
        assert!(line.contains("\"rpm\":10000"), "line: {line}");
    }

    #[tokio::test]
    async fn discovery_over_tcp_learns_new_protocol() {
        use tokio::io::AsyncBufReadExt;
        use wiremock::matchers::method;
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let oracle = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "response": "// Signature: 55AA\npackage dynamic\nimport \"encoding/binary\"\nfunc Parse(data []byte) map[string]interface{} {\n\tif len(data) < 4 { return nil }\n\treturn map[string]interface{}{\"value\": int(binary.BigEndian.Uint16(data[2:4]))}\n}"
            })))
            .expect(1)
            .mount(&oracle)
            .await;

        let dir = tempfile::tempdir().expect("tempdir");
        let prompt = dir.path().join("system_prompt.md");
        std::fs::write(&prompt, "prompt").unwrap();

        let (addr, dispatcher, _dir) = start_server(&oracle.uri(), prompt).await;

        let conn = TcpStream::connect(addr).await.expect("connect");
        let (read_half, mut write_half) = conn.into_split();
        let mut lines = BufReader::new(read_half).lines();

        write_half
            .write_all(&[0x55, 0xAA, 0x03, 0xE8])
            .await
            .expect("write");
        let line = lines
            .next_line()
            .await
            .expect("read")
            .expect("line present");
        assert!(
            line.starts_with("Parsed (auto_proto_0x55AA):"),
            "line: {line}"
        );
        assert!(line.contains("\"value\":1000"), "line: {line}");
        assert!(dispatcher.bindings().contains_key("55AA"));
    }
}
