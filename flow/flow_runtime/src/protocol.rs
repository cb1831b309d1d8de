use crate::ui::UiId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io::{self, Read, Write};
use std::sync::mpsc::Receiver;

pub const CLIENT_TO_SERVER_CAP: usize = 65_536;
pub const SERVER_TO_CLIENT_CAP: usize = 1_048_576;

pub const SERVER_SYNC_ID: &str = "syncId";
pub const CLIENT_TO_SERVER_ID: &str = "clientId";
pub const META_KEY: &str = "meta";
pub const CHANGES_KEY: &str = "changes";
pub const TEMPLATES_KEY: &str = "templates";
pub const CONSTANTS_KEY: &str = "constants";
pub const DEPENDENCY_KEY: &str = "dependencies";
pub const EXECUTE_KEY: &str = "execute";
pub const TIMINGS_KEY: &str = "timings";

pub const RPC_TYPE: &str = "type";
pub const RPC_NODE: &str = "node";

/// Marker used in JSON snapshots for a reference to another node.
pub const NODE_REF_KEY: &str = "@node";

/// Sent as `syncId` when sync id checking is disabled.
pub const SYNC_ID_DISABLED: i64 = -1;

/// One client-to-server message: RPC invocations plus the ids that keep the
/// two sides in step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientMessage {
    #[serde(rename = "syncId", default = "disabled_sync_id")]
    pub sync_id: i64,
    #[serde(rename = "clientId")]
    pub client_id: i64,
    #[serde(default)]
    pub rpc: Vec<Value>,
}

fn disabled_sync_id() -> i64 {
    SYNC_ID_DISABLED
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "t")]
pub enum ClientEnvelope {
    #[serde(rename = "init")]
    Init,
    #[serde(rename = "uidl")]
    Uidl { ui: UiId, message: ClientMessage },
    /// Front-end resource request, answered through the dev server proxy.
    #[serde(rename = "resource")]
    Resource {
        id: u64,
        #[serde(default = "default_method")]
        method: String,
        path: String,
        #[serde(default)]
        headers: Vec<(String, String)>,
    },
}

fn default_method() -> String {
    "GET".to_string()
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "t")]
pub enum ServerEnvelope {
    #[serde(rename = "uidl")]
    Uidl { ui: UiId, body: Value },
    #[serde(rename = "resource")]
    Resource {
        id: u64,
        status: u16,
        headers: Vec<(String, String)>,
        body: String,
    },
    #[serde(rename = "error")]
    Error {
        #[serde(skip_serializing_if = "Option::is_none")]
        ui: Option<UiId>,
        /// Set when the failed request was a `resource` request.
        #[serde(skip_serializing_if = "Option::is_none")]
        resource: Option<u64>,
        code: String,
        message: String,
    },
}

impl ServerEnvelope {
    pub fn ui(&self) -> Option<UiId> {
        match self {
            Self::Uidl { ui, .. } => Some(*ui),
            Self::Resource { .. } => None,
            Self::Error { ui, .. } => *ui,
        }
    }
}

pub fn error_envelope(ui: Option<UiId>, code: &str, message: impl Into<String>) -> ServerEnvelope {
    ServerEnvelope::Error {
        ui,
        resource: None,
        code: code.to_string(),
        message: message.into(),
    }
}

pub fn resource_error(id: u64, code: &str, message: impl Into<String>) -> ServerEnvelope {
    ServerEnvelope::Error {
        ui: None,
        resource: Some(id),
        code: code.to_string(),
        message: message.into(),
    }
}

/// Writes queued envelopes until the channel closes. A response over
/// [`SERVER_TO_CLIENT_CAP`] is replaced by a `response_too_large` error for
/// the same UI, so the client still gets exactly one reply per request.
pub fn writer_loop(rx: Receiver<ServerEnvelope>, mut writer: impl Write) -> io::Result<()> {
    for envelope in rx {
        let mut payload = encode_server_envelope(&envelope)?;
        if payload.len() > SERVER_TO_CLIENT_CAP {
            log::error!(
                "dropping {} byte response for ui {:?}, limit is {SERVER_TO_CLIENT_CAP}",
                payload.len(),
                envelope.ui()
            );
            let replacement = error_envelope(
                envelope.ui(),
                "response_too_large",
                format!("response of {} bytes exceeds the frame limit", payload.len()),
            );
            payload = encode_server_envelope(&replacement)?;
        }
        write_frame(&mut writer, &payload, SERVER_TO_CLIENT_CAP)?;
        writer.flush()?;
    }

    Ok(())
}

/// Reads frames until EOF. Frames that fail to decode are handed to
/// `on_envelope` as errors so the caller can answer them; broken framing
/// ends the loop.
pub fn reader_loop<F>(mut reader: impl Read, mut on_envelope: F) -> io::Result<()>
where
    F: FnMut(io::Result<ClientEnvelope>),
{
    loop {
        match read_frame(&mut reader, CLIENT_TO_SERVER_CAP) {
            Ok(payload) => on_envelope(decode_client_envelope(&payload)),
            Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => return Ok(()),
            Err(err) => return Err(err),
        }
    }
}

fn encode_server_envelope(envelope: &ServerEnvelope) -> io::Result<Vec<u8>> {
    serde_json::to_vec(envelope).map_err(json_error)
}

fn decode_client_envelope(payload: &[u8]) -> io::Result<ClientEnvelope> {
    serde_json::from_slice(payload).map_err(json_error)
}

const LEN_PREFIX: usize = 4;

/// Reads one length-prefixed frame. EOF before the first prefix byte
/// surfaces as `UnexpectedEof` like any other short read.
pub fn read_frame(reader: &mut impl Read, max_payload: usize) -> io::Result<Vec<u8>> {
    let mut prefix = [0_u8; LEN_PREFIX];
    reader.read_exact(&mut prefix)?;
    let len = check_frame_len(u32::from_be_bytes(prefix) as usize, max_payload)?;

    let mut payload = vec![0_u8; len];
    reader.read_exact(&mut payload)?;
    Ok(payload)
}

/// Writes `payload` behind its big-endian length in a single write.
pub fn write_frame(writer: &mut impl Write, payload: &[u8], max_payload: usize) -> io::Result<()> {
    let len = check_frame_len(payload.len(), max_payload)?;
    let prefix = u32::try_from(len)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "frame length does not fit the prefix"))?
        .to_be_bytes();

    let mut frame = Vec::with_capacity(LEN_PREFIX + len);
    frame.extend_from_slice(&prefix);
    frame.extend_from_slice(payload);
    writer.write_all(&frame)
}

fn check_frame_len(len: usize, max_payload: usize) -> io::Result<usize> {
    if len > max_payload {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame of {len} bytes exceeds the {max_payload} byte limit"),
        ));
    }
    Ok(len)
}

fn json_error(err: serde_json::Error) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, err)
}
