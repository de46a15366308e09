//! Longest-prefix signature routing.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use thiserror::Error;

use framegate_engine::ExecError;
use framegate_types::{ProtocolId, Record, Signature};

use crate::manager::{Manager, ManagerError};

/// Ingestion failures. The shape of the error is load-bearing: an
/// [`IngestError::UnknownSignature`] routes the frame to discovery, while
/// [`IngestError::ParseFailed`] carries the protocol id and routes to
/// repair.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("empty frame")]
    EmptyFrame,

    #[error("unknown protocol signature 0x{prefix}")]
    UnknownSignature { prefix: String },

    /// A binding exists but the manager has no source for it. Implies the
    /// storage directory and manifest disagree.
    #[error("no parser registered for {protocol}")]
    UnknownParser { protocol: ProtocolId },

    #[error("parser {protocol} failed: {source}")]
    ParseFailed {
        protocol: ProtocolId,
        source: ExecError,
    },
}

impl IngestError {
    /// The protocol id a repair attempt should target, when one is known.
    #[must_use]
    pub fn protocol(&self) -> Option<&ProtocolId> {
        match self {
            IngestError::ParseFailed { protocol, .. } | IngestError::UnknownParser { protocol } => {
                Some(protocol)
            }
            _ => None,
        }
    }
}

/// One trie level, fanning out on the next frame byte.
struct Node {
    children: [Option<Box<Node>>; 256],
    binding: Option<ProtocolId>,
}

impl Node {
    fn new() -> Self {
        Self {
            children: std::array::from_fn(|_| None),
            binding: None,
        }
    }
}

/// Trie plus the flat view kept for snapshots and reverse lookups.
struct Routes {
    root: Node,
    by_hex: BTreeMap<String, ProtocolId>,
}

/// Routes frames to protocol ids by longest signature prefix and hands the
/// match to the [`Manager`] for parsing.
///
/// Reads vastly outnumber writes: matching walks the trie under a read lock
/// and allocates nothing until the final id clone (which is an `Arc` bump).
pub struct Dispatcher {
    manager: Arc<Manager>,
    routes: RwLock<Routes>,
}

impl Dispatcher {
    pub fn new(manager: Arc<Manager>) -> Self {
        Self {
            manager,
            routes: RwLock::new(Routes {
                root: Node::new(),
                by_hex: BTreeMap::new(),
            }),
        }
    }

    #[must_use]
    pub fn manager(&self) -> &Arc<Manager> {
        &self.manager
    }

    /// Bind `signature` to `protocol`, overwriting any previous binding for
    /// the exact same byte sequence. Visible to all readers once this
    /// returns.
    pub fn bind(&self, signature: &Signature, protocol: ProtocolId) {
        let mut routes = self.write_routes();
        let mut node = &mut routes.root;
        for byte in signature.as_bytes() {
            node =
                &mut **node.children[usize::from(*byte)].get_or_insert_with(|| Box::new(Node::new()));
        }
        node.binding = Some(protocol.clone());
        routes.by_hex.insert(signature.to_hex(), protocol);
    }

    /// Remove the binding for the exact `signature`, if present.
    pub fn unbind(&self, signature: &Signature) {
        let mut routes = self.write_routes();
        routes.by_hex.remove(&signature.to_hex());
        let mut node = &mut routes.root;
        for byte in signature.as_bytes() {
            match node.children[usize::from(*byte)].as_deref_mut() {
                Some(next) => node = next,
                None => return,
            }
        }
        node.binding = None;
    }

    /// Identify the frame's protocol and parse it.
    pub fn ingest(&self, frame: &[u8]) -> Result<(Record, ProtocolId), IngestError> {
        let protocol = self.match_protocol(frame)?;
        match self.manager.parse_data(&protocol, frame) {
            Ok(record) => Ok((record, protocol)),
            Err(ManagerError::UnknownParser(protocol)) => {
                Err(IngestError::UnknownParser { protocol })
            }
            Err(ManagerError::Exec(source)) => Err(IngestError::ParseFailed { protocol, source }),
            // parse_data never returns persistence errors
            Err(other) => Err(IngestError::ParseFailed {
                protocol,
                source: ExecError::Panic(other.to_string()),
            }),
        }
    }

    /// Longest-prefix match without parsing.
    pub fn match_protocol(&self, frame: &[u8]) -> Result<ProtocolId, IngestError> {
        if frame.is_empty() {
            return Err(IngestError::EmptyFrame);
        }
        let routes = self.read_routes();
        let mut node = &routes.root;
        let mut best: Option<&ProtocolId> = None;
        for byte in frame {
            match node.children[usize::from(*byte)].as_deref() {
                Some(next) => {
                    node = next;
                    if node.binding.is_some() {
                        best = node.binding.as_ref();
                    }
                }
                None => break,
            }
        }
        best.cloned().ok_or_else(|| IngestError::UnknownSignature {
            prefix: hex::encode_upper(&frame[..frame.len().min(4)]),
        })
    }

    /// Immutable snapshot of `{hex signature -> protocol id}`.
    #[must_use]
    pub fn bindings(&self) -> BTreeMap<String, ProtocolId> {
        self.read_routes().by_hex.clone()
    }

    /// Reverse lookup: the signature currently bound to `protocol`. When a
    /// protocol somehow has several bindings the shortest wins.
    #[must_use]
    pub fn signature_for(&self, protocol: &ProtocolId) -> Option<Signature> {
        let routes = self.read_routes();
        let mut hexes: Vec<&String> = routes
            .by_hex
            .iter()
            .filter(|(_, id)| *id == protocol)
            .map(|(hex, _)| hex)
            .collect();
        hexes.sort_by_key(|h| h.len());
        hexes
            .first()
            .and_then(|h| Signature::from_hex(h).ok())
    }

    fn read_routes(&self) -> RwLockReadGuard<'_, Routes> {
        self.routes.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_routes(&self) -> RwLockWriteGuard<'_, Routes> {
        self.routes.write().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use framegate_engine::Engine;
    use framegate_types::FieldValue;

    fn fixture() -> (Arc<Manager>, Dispatcher, tempfile::TempDir) {
        let dir = tempfile::tempdir().expect("tempdir");
        let engine = Arc::new(Engine::new());
        let manager =
            Arc::new(Manager::new(engine, dir.path().join("storage"), None).expect("manager"));
        let dispatcher = Dispatcher::new(Arc::clone(&manager));
        (manager, dispatcher, dir)
    }

    fn sig(bytes: &[u8]) -> Signature {
        Signature::new(bytes.to_vec()).expect("valid signature")
    }

    fn id(s: &str) -> ProtocolId {
        ProtocolId::new(s).expect("valid id")
    }

    const RPM_SOURCE: &str = r#"package dynamic
func Parse(data []byte) map[string]interface{} {
	if len(data) < 2 {
		return nil
	}
	return map[string]interface{}{"rpm": int(data[1]) * 100}
}"#;

    #[test]
    fn empty_frame_is_rejected() {
        let (_, dispatcher, _dir) = fixture();
        assert!(matches!(
            dispatcher.ingest(&[]),
            Err(IngestError::EmptyFrame)
        ));
    }

    #[test]
    fn unknown_signature_reports_prefix_and_no_protocol() {
        let (_, dispatcher, _dir) = fixture();
        let err = dispatcher.ingest(&[0xDE, 0xAD, 0xBE, 0xEF, 0x01]).unwrap_err();
        match &err {
            IngestError::UnknownSignature { prefix } => assert_eq!(prefix, "DEADBEEF"),
            other => panic!("expected UnknownSignature, got {other:?}"),
        }
        assert!(err.protocol().is_none());
    }

    #[test]
    fn fast_path_single_byte_signature() {
        let (manager, dispatcher, _dir) = fixture();
        manager.register_parser(&id("Engine"), RPM_SOURCE).unwrap();
        dispatcher.bind(&sig(&[0x01]), id("Engine"));

        let (record, protocol) = dispatcher.ingest(&[0x01, 0x1E]).unwrap();
        assert_eq!(protocol, id("Engine"));
        assert_eq!(record.get("rpm"), Some(&FieldValue::Int(3000)));
    }

    #[test]
    fn longest_prefix_wins() {
        let (manager, dispatcher, _dir) = fixture();
        let generic = r#"package dynamic
func Parse(data []byte) map[string]interface{} {
	return map[string]interface{}{"which": "generic"}
}"#;
        let specific = r#"package dynamic
func Parse(data []byte) map[string]interface{} {
	return map[string]interface{}{"which": "specific"}
}"#;
        manager.register_parser(&id("OBD"), generic).unwrap();
        manager.register_parser(&id("CoolantTemp"), specific).unwrap();
        dispatcher.bind(&sig(&[0x41]), id("OBD"));
        dispatcher.bind(&sig(&[0x41, 0x05]), id("CoolantTemp"));

        let (record, protocol) = dispatcher.ingest(&[0x41, 0x05, 0x5A]).unwrap();
        assert_eq!(protocol, id("CoolantTemp"));
        assert_eq!(record.get("which"), Some(&FieldValue::from("specific")));

        let (record, protocol) = dispatcher.ingest(&[0x41, 0x0D, 0x4B]).unwrap();
        assert_eq!(protocol, id("OBD"));
        assert_eq!(record.get("which"), Some(&FieldValue::from("generic")));
    }

    #[test]
    fn prefix_of_bound_signature_alone_is_unknown() {
        let (manager, dispatcher, _dir) = fixture();
        manager.register_parser(&id("Deep"), RPM_SOURCE).unwrap();
        dispatcher.bind(&sig(&[0x41, 0x05]), id("Deep"));

        assert!(matches!(
            dispatcher.ingest(&[0x41, 0x06]),
            Err(IngestError::UnknownSignature { .. })
        ));
    }

    #[test]
    fn bind_overwrites_exact_signature() {
        let (manager, dispatcher, _dir) = fixture();
        manager.register_parser(&id("A"), RPM_SOURCE).unwrap();
        manager.register_parser(&id("B"), RPM_SOURCE).unwrap();
        dispatcher.bind(&sig(&[0x10]), id("A"));
        dispatcher.bind(&sig(&[0x10]), id("B"));

        let (_, protocol) = dispatcher.ingest(&[0x10, 0x00]).unwrap();
        assert_eq!(protocol, id("B"));
        assert_eq!(dispatcher.bindings().len(), 1);
    }

    #[test]
    fn parse_failure_carries_protocol_for_repair() {
        let (manager, dispatcher, _dir) = fixture();
        let oob = r#"package dynamic
func Parse(data []byte) map[string]interface{} {
	return map[string]interface{}{"v": int(data[5])}
}"#;
        manager.register_parser(&id("sensor_42"), oob).unwrap();
        dispatcher.bind(&sig(&[0x42]), id("sensor_42"));

        let err = dispatcher.ingest(&[0x42, 0xFF]).unwrap_err();
        match &err {
            IngestError::ParseFailed { protocol, source } => {
                assert_eq!(protocol, &id("sensor_42"));
                assert!(matches!(source, ExecError::Panic(_)));
            }
            other => panic!("expected ParseFailed, got {other:?}"),
        }
        assert_eq!(err.protocol(), Some(&id("sensor_42")));
    }

    #[test]
    fn binding_without_source_is_unknown_parser() {
        let (_, dispatcher, _dir) = fixture();
        dispatcher.bind(&sig(&[0x99]), id("ghost"));
        assert!(matches!(
            dispatcher.ingest(&[0x99, 0x01]),
            Err(IngestError::UnknownParser { .. })
        ));
    }

    #[test]
    fn bindings_snapshot_is_detached() {
        let (manager, dispatcher, _dir) = fixture();
        manager.register_parser(&id("A"), RPM_SOURCE).unwrap();
        dispatcher.bind(&sig(&[0x01]), id("A"));
        let snapshot = dispatcher.bindings();
        dispatcher.bind(&sig(&[0x02]), id("A"));
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.get("01"), Some(&id("A")));
        assert_eq!(dispatcher.bindings().len(), 2);
    }

    #[test]
    fn signature_reverse_lookup() {
        let (manager, dispatcher, _dir) = fixture();
        manager.register_parser(&id("A"), RPM_SOURCE).unwrap();
        dispatcher.bind(&sig(&[0x55, 0xAA]), id("A"));
        assert_eq!(
            dispatcher.signature_for(&id("A")),
            Some(sig(&[0x55, 0xAA]))
        );
        assert_eq!(dispatcher.signature_for(&id("missing")), None);
    }

    #[test]
    fn unbind_removes_route() {
        let (manager, dispatcher, _dir) = fixture();
        manager.register_parser(&id("A"), RPM_SOURCE).unwrap();
        dispatcher.bind(&sig(&[0x01]), id("A"));
        dispatcher.unbind(&sig(&[0x01]));
        assert!(matches!(
            dispatcher.ingest(&[0x01, 0x02]),
            Err(IngestError::UnknownSignature { .. })
        ));
        assert!(dispatcher.bindings().is_empty());
    }

    #[test]
    fn any_suffix_of_bound_prefix_matches_it() {
        // for every bound signature s, ingest(s ++ suffix) selects s or a
        // strictly longer bound prefix, never a shorter one
        let (manager, dispatcher, _dir) = fixture();
        manager.register_parser(&id("short"), RPM_SOURCE).unwrap();
        manager.register_parser(&id("long"), RPM_SOURCE).unwrap();
        dispatcher.bind(&sig(&[0x41]), id("short"));
        dispatcher.bind(&sig(&[0x41, 0x05, 0x07]), id("long"));

        for suffix in [vec![], vec![0x00], vec![0x05], vec![0x05, 0x07, 0x09]] {
            let mut frame = vec![0x41];
            frame.extend(&suffix);
            let matched = dispatcher.match_protocol(&frame).unwrap();
            if frame.starts_with(&[0x41, 0x05, 0x07]) {
                assert_eq!(matched, id("long"), "frame {frame:02X?}");
            } else {
                assert_eq!(matched, id("short"), "frame {frame:02X?}");
            }
        }
    }
}
