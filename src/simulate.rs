//! Simulated inbound stream for demos and smoke runs.
//!
//! Replays a short fixed sequence through the exact decision procedure the
//! TCP receiver uses: fast path for the pre-bound engine frame, discovery
//! for the multi-byte voltage signature, and discovery or repair for the
//! trailing sensor frame depending on what storage already holds.

use std::sync::Arc;

use framegate_gateway::{Discovery, Dispatcher, FrameOutcome, Manager, handle_frame};
use framegate_types::{ProtocolId, Signature};

const ENGINE_SOURCE: &str = r#"package dynamic

// Signature: 01
func Parse(data []byte) map[string]interface{} {
	if len(data) < 2 {
		return nil
	}
	return map[string]interface{}{"rpm": int(data[1]) * 100}
}"#;

pub async fn run(
    dispatcher: &Arc<Dispatcher>,
    manager: &Arc<Manager>,
    discovery: &Arc<Discovery>,
) -> anyhow::Result<()> {
    // pre-bind a known protocol so the first frame exercises the fast path
    let engine_id = ProtocolId::new("Engine_System")?;
    manager.register_parser(&engine_id, ENGINE_SOURCE)?;
    dispatcher.bind(&Signature::new(vec![0x01])?, engine_id);

    let stream: &[&[u8]] = &[
        &[0x01, 0x64],                   // known single-byte signature
        &[0x55, 0xAA, 0x03, 0xE8, 0xFF], // multi-byte signature, triggers discovery
        &[0x2A, 0x01, 0xF4],             // known from storage, or discovery
    ];

    println!("framegate gateway started (simulate mode)");
    println!("--------------------------------------------");

    for frame in stream {
        match handle_frame(dispatcher, discovery, frame).await {
            FrameOutcome::Parsed {
                protocol,
                record,
                healed,
                learned,
            } => {
                let json = serde_json::to_string(&record)?;
                if learned {
                    println!("learned  {protocol}: {json}");
                } else if healed {
                    println!("repaired {protocol}: {json}");
                } else {
                    println!("parsed   {protocol}: {json}");
                }
            }
            FrameOutcome::Failed { error } => {
                println!("failed   {}: {error}", hex::encode_upper(frame));
            }
        }
    }

    println!("--------------------------------------------");
    println!("done; generated parsers are in ./storage");
    Ok(())
}
