//! Inbound routing messages: the traffic carried inside established
//! paths.
//!
//! A routing message is a bencoded dictionary whose first key `A` holds a
//! one-byte tag selecting the variant; the remaining keys belong to that
//! variant. The parser keeps one pre-allocated slot per variant and
//! reuses it across messages, so the hot inbound path never allocates
//! per message. One parser per stream; a parser instance is never shared
//! across concurrent calls.

use crate::bencode::BencodeReader;
use crate::contact::require_version;
use crate::crypto::Sig;
use crate::types::{Error, PathId, Result, RouterContext, RouterId};

/// Bytes of a failed input dumped for diagnosis.
const DUMP_LIMIT: usize = 128;

/// Largest single payload fragment carried by TransferTraffic.
pub const MAX_TRAFFIC_PAYLOAD: usize = 1500;

/// Width of the tunnel nonces carried by several exit messages.
pub const TUNNEL_NONCE_SIZE: usize = 24;

pub type TunnelNonce = [u8; TUNNEL_NONCE_SIZE];

// ---------------------------------------------------------------------------
// Message tags
// ---------------------------------------------------------------------------

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MessageTag {
    DataDiscard = b'D',
    PathLatency = b'L',
    Dht = b'M',
    PathConfirm = b'P',
    PathTransfer = b'T',
    ProtocolFrame = b'H',
    TransferTraffic = b'I',
    GrantExit = b'G',
    RejectExit = b'J',
    ObtainExit = b'O',
    UpdateExit = b'U',
    CloseExit = b'C',
}

impl TryFrom<u8> for MessageTag {
    type Error = Error;
    fn try_from(v: u8) -> Result<Self> {
        match v {
            b'D' => Ok(Self::DataDiscard),
            b'L' => Ok(Self::PathLatency),
            b'M' => Ok(Self::Dht),
            b'P' => Ok(Self::PathConfirm),
            b'T' => Ok(Self::PathTransfer),
            b'H' => Ok(Self::ProtocolFrame),
            b'I' => Ok(Self::TransferTraffic),
            b'G' => Ok(Self::GrantExit),
            b'J' => Ok(Self::RejectExit),
            b'O' => Ok(Self::ObtainExit),
            b'U' => Ok(Self::UpdateExit),
            b'C' => Ok(Self::CloseExit),
            _ => Err(Error::UnrecognizedMessage),
        }
    }
}

impl MessageTag {
    fn as_char(self) -> char {
        char::from(self as u8)
    }
}

// ---------------------------------------------------------------------------
// Message variants
// ---------------------------------------------------------------------------

/// Tells the path owner that traffic with a given sequence number was
/// dropped.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DataDiscard {
    pub from: PathId,
    pub path_id: PathId,
    pub seqno: u64,
    pub version: u64,
}

/// Latency probe and its echo.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PathLatency {
    pub from: PathId,
    pub latency: u64,
    pub sent_time: u64,
    pub seqno: u64,
    pub version: u64,
}

/// Carrier for DHT traffic; the payload stays bencoded and is decoded by
/// the DHT layer it is dispatched to.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Dht {
    pub from: PathId,
    pub payload: Vec<u8>,
    pub version: u64,
}

/// Sent hop-to-origin when a path finishes building.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PathConfirm {
    pub from: PathId,
    pub lifetime: u64,
    pub build_started: u64,
    pub version: u64,
}

/// Hands a service-layer frame across to another path on this router.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PathTransfer {
    pub from: PathId,
    pub path_id: PathId,
    pub frame: Vec<u8>,
    pub nonce: TunnelNonce,
    pub version: u64,
}

/// Encrypted service-layer frame; opaque at this layer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProtocolFrame {
    pub from: PathId,
    pub ciphertext: Vec<u8>,
    pub nonce: TunnelNonce,
    pub flag: u64,
    pub conv_tag: [u8; 16],
    pub sig: Sig,
    pub version: u64,
}

impl Default for ProtocolFrame {
    fn default() -> Self {
        Self {
            from: PathId::default(),
            ciphertext: Vec::new(),
            nonce: [0u8; TUNNEL_NONCE_SIZE],
            flag: 0,
            conv_tag: [0u8; 16],
            sig: [0u8; 64],
            version: 0,
        }
    }
}

/// Tunneled exit traffic fragments.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TransferTraffic {
    pub from: PathId,
    pub seqno: u64,
    pub payloads: Vec<Vec<u8>>,
    pub version: u64,
}

/// Exit granted to the requesting path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GrantExit {
    pub from: PathId,
    pub seqno: u64,
    pub txid: u64,
    pub nonce: TunnelNonce,
    pub sig: Sig,
    pub version: u64,
}

impl Default for GrantExit {
    fn default() -> Self {
        Self {
            from: PathId::default(),
            seqno: 0,
            txid: 0,
            nonce: [0u8; TUNNEL_NONCE_SIZE],
            sig: [0u8; 64],
            version: 0,
        }
    }
}

/// Exit refused, with a backoff hint.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RejectExit {
    pub from: PathId,
    pub backoff: u64,
    pub seqno: u64,
    pub txid: u64,
    pub nonce: TunnelNonce,
    pub sig: Sig,
    pub version: u64,
}

impl Default for RejectExit {
    fn default() -> Self {
        Self {
            from: PathId::default(),
            backoff: 0,
            seqno: 0,
            txid: 0,
            nonce: [0u8; TUNNEL_NONCE_SIZE],
            sig: [0u8; 64],
            version: 0,
        }
    }
}

/// Request to use this router as an exit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObtainExit {
    pub from: PathId,
    pub flag: u64,
    pub identity: RouterId,
    pub seqno: u64,
    pub txid: u64,
    pub sig: Sig,
    pub version: u64,
}

impl Default for ObtainExit {
    fn default() -> Self {
        Self {
            from: PathId::default(),
            flag: 0,
            identity: RouterId::default(),
            seqno: 0,
            txid: 0,
            sig: [0u8; 64],
            version: 0,
        }
    }
}

/// Re-points an existing exit session at a new path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UpdateExit {
    pub from: PathId,
    pub path_id: PathId,
    pub seqno: u64,
    pub txid: u64,
    pub sig: Sig,
    pub version: u64,
}

impl Default for UpdateExit {
    fn default() -> Self {
        Self {
            from: PathId::default(),
            path_id: PathId::default(),
            seqno: 0,
            txid: 0,
            sig: [0u8; 64],
            version: 0,
        }
    }
}

/// Ends an exit session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CloseExit {
    pub from: PathId,
    pub seqno: u64,
    pub nonce: TunnelNonce,
    pub sig: Sig,
    pub version: u64,
}

impl Default for CloseExit {
    fn default() -> Self {
        Self {
            from: PathId::default(),
            seqno: 0,
            nonce: [0u8; TUNNEL_NONCE_SIZE],
            sig: [0u8; 64],
            version: 0,
        }
    }
}

// ---------------------------------------------------------------------------
// Handler
// ---------------------------------------------------------------------------

/// Receives decoded routing messages. Returning false marks the message
/// as unhandled; the default for every method is unhandled.
pub trait MessageHandler {
    fn handle_data_discard(&mut self, _msg: &DataDiscard, _router: &dyn RouterContext) -> bool {
        false
    }
    fn handle_path_latency(&mut self, _msg: &PathLatency, _router: &dyn RouterContext) -> bool {
        false
    }
    fn handle_dht(&mut self, _msg: &Dht, _router: &dyn RouterContext) -> bool {
        false
    }
    fn handle_path_confirm(&mut self, _msg: &PathConfirm, _router: &dyn RouterContext) -> bool {
        false
    }
    fn handle_path_transfer(&mut self, _msg: &PathTransfer, _router: &dyn RouterContext) -> bool {
        false
    }
    fn handle_protocol_frame(&mut self, _msg: &ProtocolFrame, _router: &dyn RouterContext) -> bool {
        false
    }
    fn handle_transfer_traffic(
        &mut self,
        _msg: &TransferTraffic,
        _router: &dyn RouterContext,
    ) -> bool {
        false
    }
    fn handle_grant_exit(&mut self, _msg: &GrantExit, _router: &dyn RouterContext) -> bool {
        false
    }
    fn handle_reject_exit(&mut self, _msg: &RejectExit, _router: &dyn RouterContext) -> bool {
        false
    }
    fn handle_obtain_exit(&mut self, _msg: &ObtainExit, _router: &dyn RouterContext) -> bool {
        false
    }
    fn handle_update_exit(&mut self, _msg: &UpdateExit, _router: &dyn RouterContext) -> bool {
        false
    }
    fn handle_close_exit(&mut self, _msg: &CloseExit, _router: &dyn RouterContext) -> bool {
        false
    }
}

// ---------------------------------------------------------------------------
// Per-variant decoding
// ---------------------------------------------------------------------------

/// Internal decode/dispatch surface shared by all variants. Variant
/// decoders are strict: a key the variant does not define aborts the
/// parse.
trait RoutingMessage {
    fn decode_key(&mut self, key: &[u8], r: &mut BencodeReader) -> Result<()>;
    fn set_from(&mut self, from: PathId);
    fn clear(&mut self);
    fn handle(&self, handler: &mut dyn MessageHandler, router: &dyn RouterContext) -> bool;
}

impl RoutingMessage for DataDiscard {
    fn decode_key(&mut self, key: &[u8], r: &mut BencodeReader) -> Result<()> {
        match key {
            b"P" => self.path_id = PathId(r.read_fixed()?),
            b"S" => self.seqno = r.read_int()?,
            b"v" => self.version = require_version(r)?,
            _ => return Err(Error::Decode),
        }
        Ok(())
    }
    fn set_from(&mut self, from: PathId) {
        self.from = from;
    }
    fn clear(&mut self) {
        *self = Self::default();
    }
    fn handle(&self, handler: &mut dyn MessageHandler, router: &dyn RouterContext) -> bool {
        handler.handle_data_discard(self, router)
    }
}

impl RoutingMessage for PathLatency {
    fn decode_key(&mut self, key: &[u8], r: &mut BencodeReader) -> Result<()> {
        match key {
            b"L" => self.latency = r.read_int()?,
            b"S" => self.seqno = r.read_int()?,
            b"T" => self.sent_time = r.read_int()?,
            b"v" => self.version = require_version(r)?,
            _ => return Err(Error::Decode),
        }
        Ok(())
    }
    fn set_from(&mut self, from: PathId) {
        self.from = from;
    }
    fn clear(&mut self) {
        *self = Self::default();
    }
    fn handle(&self, handler: &mut dyn MessageHandler, router: &dyn RouterContext) -> bool {
        handler.handle_path_latency(self, router)
    }
}

impl RoutingMessage for Dht {
    fn decode_key(&mut self, key: &[u8], r: &mut BencodeReader) -> Result<()> {
        match key {
            b"M" => self.payload = r.raw_value()?.to_vec(),
            b"v" => self.version = require_version(r)?,
            _ => return Err(Error::Decode),
        }
        Ok(())
    }
    fn set_from(&mut self, from: PathId) {
        self.from = from;
    }
    fn clear(&mut self) {
        *self = Self::default();
    }
    fn handle(&self, handler: &mut dyn MessageHandler, router: &dyn RouterContext) -> bool {
        handler.handle_dht(self, router)
    }
}

impl RoutingMessage for PathConfirm {
    fn decode_key(&mut self, key: &[u8], r: &mut BencodeReader) -> Result<()> {
        match key {
            b"L" => self.lifetime = r.read_int()?,
            b"S" => self.build_started = r.read_int()?,
            b"v" => self.version = require_version(r)?,
            _ => return Err(Error::Decode),
        }
        Ok(())
    }
    fn set_from(&mut self, from: PathId) {
        self.from = from;
    }
    fn clear(&mut self) {
        *self = Self::default();
    }
    fn handle(&self, handler: &mut dyn MessageHandler, router: &dyn RouterContext) -> bool {
        handler.handle_path_confirm(self, router)
    }
}

impl RoutingMessage for PathTransfer {
    fn decode_key(&mut self, key: &[u8], r: &mut BencodeReader) -> Result<()> {
        match key {
            b"P" => self.path_id = PathId(r.read_fixed()?),
            b"T" => self.frame = r.raw_value()?.to_vec(),
            b"Y" => self.nonce = r.read_fixed()?,
            b"v" => self.version = require_version(r)?,
            _ => return Err(Error::Decode),
        }
        Ok(())
    }
    fn set_from(&mut self, from: PathId) {
        self.from = from;
    }
    fn clear(&mut self) {
        *self = Self::default();
    }
    fn handle(&self, handler: &mut dyn MessageHandler, router: &dyn RouterContext) -> bool {
        handler.handle_path_transfer(self, router)
    }
}

impl RoutingMessage for ProtocolFrame {
    fn decode_key(&mut self, key: &[u8], r: &mut BencodeReader) -> Result<()> {
        match key {
            b"D" => self.ciphertext = r.read_bytes()?.to_vec(),
            b"N" => self.nonce = r.read_fixed()?,
            b"R" => self.flag = r.read_int()?,
            b"T" => self.conv_tag = r.read_fixed()?,
            b"Z" => self.sig = r.read_fixed()?,
            b"v" => self.version = require_version(r)?,
            _ => return Err(Error::Decode),
        }
        Ok(())
    }
    fn set_from(&mut self, from: PathId) {
        self.from = from;
    }
    fn clear(&mut self) {
        *self = Self::default();
    }
    fn handle(&self, handler: &mut dyn MessageHandler, router: &dyn RouterContext) -> bool {
        handler.handle_protocol_frame(self, router)
    }
}

impl RoutingMessage for TransferTraffic {
    fn decode_key(&mut self, key: &[u8], r: &mut BencodeReader) -> Result<()> {
        match key {
            b"S" => self.seqno = r.read_int()?,
            b"X" => {
                let mut payloads = Vec::new();
                r.read_list(|r| {
                    let payload = r.read_bytes()?;
                    if payload.len() > MAX_TRAFFIC_PAYLOAD {
                        return Err(Error::Decode);
                    }
                    payloads.push(payload.to_vec());
                    Ok(())
                })?;
                self.payloads = payloads;
            }
            b"v" => self.version = require_version(r)?,
            _ => return Err(Error::Decode),
        }
        Ok(())
    }
    fn set_from(&mut self, from: PathId) {
        self.from = from;
    }
    fn clear(&mut self) {
        *self = Self::default();
    }
    fn handle(&self, handler: &mut dyn MessageHandler, router: &dyn RouterContext) -> bool {
        handler.handle_transfer_traffic(self, router)
    }
}

impl RoutingMessage for GrantExit {
    fn decode_key(&mut self, key: &[u8], r: &mut BencodeReader) -> Result<()> {
        match key {
            b"S" => self.seqno = r.read_int()?,
            b"T" => self.txid = r.read_int()?,
            b"Y" => self.nonce = r.read_fixed()?,
            b"Z" => self.sig = r.read_fixed()?,
            b"v" => self.version = require_version(r)?,
            _ => return Err(Error::Decode),
        }
        Ok(())
    }
    fn set_from(&mut self, from: PathId) {
        self.from = from;
    }
    fn clear(&mut self) {
        *self = Self::default();
    }
    fn handle(&self, handler: &mut dyn MessageHandler, router: &dyn RouterContext) -> bool {
        handler.handle_grant_exit(self, router)
    }
}

impl RoutingMessage for RejectExit {
    fn decode_key(&mut self, key: &[u8], r: &mut BencodeReader) -> Result<()> {
        match key {
            b"B" => self.backoff = r.read_int()?,
            b"S" => self.seqno = r.read_int()?,
            b"T" => self.txid = r.read_int()?,
            b"Y" => self.nonce = r.read_fixed()?,
            b"Z" => self.sig = r.read_fixed()?,
            b"v" => self.version = require_version(r)?,
            _ => return Err(Error::Decode),
        }
        Ok(())
    }
    fn set_from(&mut self, from: PathId) {
        self.from = from;
    }
    fn clear(&mut self) {
        *self = Self::default();
    }
    fn handle(&self, handler: &mut dyn MessageHandler, router: &dyn RouterContext) -> bool {
        handler.handle_reject_exit(self, router)
    }
}

impl RoutingMessage for ObtainExit {
    fn decode_key(&mut self, key: &[u8], r: &mut BencodeReader) -> Result<()> {
        match key {
            b"E" => self.flag = r.read_int()?,
            b"I" => self.identity = RouterId(r.read_fixed()?),
            b"S" => self.seqno = r.read_int()?,
            b"T" => self.txid = r.read_int()?,
            b"Z" => self.sig = r.read_fixed()?,
            b"v" => self.version = require_version(r)?,
            _ => return Err(Error::Decode),
        }
        Ok(())
    }
    fn set_from(&mut self, from: PathId) {
        self.from = from;
    }
    fn clear(&mut self) {
        *self = Self::default();
    }
    fn handle(&self, handler: &mut dyn MessageHandler, router: &dyn RouterContext) -> bool {
        handler.handle_obtain_exit(self, router)
    }
}

impl RoutingMessage for UpdateExit {
    fn decode_key(&mut self, key: &[u8], r: &mut BencodeReader) -> Result<()> {
        match key {
            b"P" => self.path_id = PathId(r.read_fixed()?),
            b"S" => self.seqno = r.read_int()?,
            b"T" => self.txid = r.read_int()?,
            b"Z" => self.sig = r.read_fixed()?,
            b"v" => self.version = require_version(r)?,
            _ => return Err(Error::Decode),
        }
        Ok(())
    }
    fn set_from(&mut self, from: PathId) {
        self.from = from;
    }
    fn clear(&mut self) {
        *self = Self::default();
    }
    fn handle(&self, handler: &mut dyn MessageHandler, router: &dyn RouterContext) -> bool {
        handler.handle_update_exit(self, router)
    }
}

impl RoutingMessage for CloseExit {
    fn decode_key(&mut self, key: &[u8], r: &mut BencodeReader) -> Result<()> {
        match key {
            b"S" => self.seqno = r.read_int()?,
            b"Y" => self.nonce = r.read_fixed()?,
            b"Z" => self.sig = r.read_fixed()?,
            b"v" => self.version = require_version(r)?,
            _ => return Err(Error::Decode),
        }
        Ok(())
    }
    fn set_from(&mut self, from: PathId) {
        self.from = from;
    }
    fn clear(&mut self) {
        *self = Self::default();
    }
    fn handle(&self, handler: &mut dyn MessageHandler, router: &dyn RouterContext) -> bool {
        handler.handle_close_exit(self, router)
    }
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

/// One pre-allocated slot per message kind, reused across parses. Each
/// slot is reset after dispatch so no state bleeds into the next
/// message.
#[derive(Default)]
struct MessageHolder {
    data_discard: DataDiscard,
    path_latency: PathLatency,
    dht: Dht,
    path_confirm: PathConfirm,
    path_transfer: PathTransfer,
    protocol_frame: ProtocolFrame,
    transfer_traffic: TransferTraffic,
    grant_exit: GrantExit,
    reject_exit: RejectExit,
    obtain_exit: ObtainExit,
    update_exit: UpdateExit,
    close_exit: CloseExit,
}

impl MessageHolder {
    fn get_mut(&mut self, tag: MessageTag) -> &mut dyn RoutingMessage {
        match tag {
            MessageTag::DataDiscard => &mut self.data_discard,
            MessageTag::PathLatency => &mut self.path_latency,
            MessageTag::Dht => &mut self.dht,
            MessageTag::PathConfirm => &mut self.path_confirm,
            MessageTag::PathTransfer => &mut self.path_transfer,
            MessageTag::ProtocolFrame => &mut self.protocol_frame,
            MessageTag::TransferTraffic => &mut self.transfer_traffic,
            MessageTag::GrantExit => &mut self.grant_exit,
            MessageTag::RejectExit => &mut self.reject_exit,
            MessageTag::ObtainExit => &mut self.obtain_exit,
            MessageTag::UpdateExit => &mut self.update_exit,
            MessageTag::CloseExit => &mut self.close_exit,
        }
    }
}

/// Streaming decoder for inbound routing messages. Failure is never
/// fatal: the parser is ready for the next buffer regardless of the
/// previous outcome.
#[derive(Default)]
pub struct InboundMessageParser {
    holder: MessageHolder,
}

impl InboundMessageParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode one bencoded routing message and hand it to `handler`.
    /// `from` is the receive-side id of the path that delivered the
    /// buffer. Returns true iff the message decoded and the handler
    /// accepted it.
    pub fn parse_message_buffer(
        &mut self,
        buf: &[u8],
        handler: &mut dyn MessageHandler,
        from: PathId,
        router: &dyn RouterContext,
    ) -> bool {
        // Read from a private copy so the caller's buffer survives a
        // failed parse intact for the diagnostic dump.
        let copy = buf.to_vec();
        let mut reader = BencodeReader::new(&copy);

        let holder = &mut self.holder;
        let mut tag: Option<MessageTag> = None;
        let parsed = reader.read_dict(|key, r| match tag {
            None => {
                if key != b"A" {
                    return Err(Error::Decode);
                }
                let value = r.read_bytes()?;
                if value.len() != 1 {
                    return Err(Error::Decode);
                }
                let t = MessageTag::try_from(value[0]).map_err(|e| {
                    tracing::error!("invalid routing message id: {:?}", char::from(value[0]));
                    e
                })?;
                tracing::debug!("routing message '{}'", t.as_char());
                tag = Some(t);
                Ok(())
            }
            Some(t) => holder.get_mut(t).decode_key(key, r),
        });

        let mut result = false;
        match (parsed, tag) {
            (Ok(()), Some(t)) => {
                let msg = holder.get_mut(t);
                msg.set_from(from);
                result = msg.handle(handler, router);
                if !result {
                    tracing::warn!("failed to handle inbound routing message '{}'", t.as_char());
                }
            }
            (Ok(()), None) => {
                tracing::error!("inbound routing message was an empty dict");
            }
            (Err(_), _) => {
                tracing::error!("read dict failed in routing layer");
                let n = buf.len().min(DUMP_LIMIT);
                tracing::debug!("offending buffer: {}", hex::encode(&buf[..n]));
            }
        }

        if let Some(t) = tag {
            holder.get_mut(t).clear();
        }
        result
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bencode::BencodeWriter;

    struct TestRouter;

    impl RouterContext for TestRouter {
        fn now_ms(&self) -> u64 {
            1_000
        }
    }

    /// Handler that records what it saw and answers as told.
    #[derive(Default)]
    struct Recorder {
        refuse: bool,
        confirms: Vec<PathConfirm>,
        latencies: Vec<PathLatency>,
        discards: Vec<DataDiscard>,
        dhts: Vec<Dht>,
        transfers: Vec<PathTransfer>,
        traffic: Vec<TransferTraffic>,
        obtains: Vec<ObtainExit>,
        rejects: Vec<RejectExit>,
    }

    impl MessageHandler for Recorder {
        fn handle_data_discard(&mut self, msg: &DataDiscard, _r: &dyn RouterContext) -> bool {
            self.discards.push(msg.clone());
            !self.refuse
        }
        fn handle_path_latency(&mut self, msg: &PathLatency, _r: &dyn RouterContext) -> bool {
            self.latencies.push(msg.clone());
            !self.refuse
        }
        fn handle_dht(&mut self, msg: &Dht, _r: &dyn RouterContext) -> bool {
            self.dhts.push(msg.clone());
            !self.refuse
        }
        fn handle_path_confirm(&mut self, msg: &PathConfirm, _r: &dyn RouterContext) -> bool {
            self.confirms.push(msg.clone());
            !self.refuse
        }
        fn handle_path_transfer(&mut self, msg: &PathTransfer, _r: &dyn RouterContext) -> bool {
            self.transfers.push(msg.clone());
            !self.refuse
        }
        fn handle_transfer_traffic(
            &mut self,
            msg: &TransferTraffic,
            _r: &dyn RouterContext,
        ) -> bool {
            self.traffic.push(msg.clone());
            !self.refuse
        }
        fn handle_obtain_exit(&mut self, msg: &ObtainExit, _r: &dyn RouterContext) -> bool {
            self.obtains.push(msg.clone());
            !self.refuse
        }
        fn handle_reject_exit(&mut self, msg: &RejectExit, _r: &dyn RouterContext) -> bool {
            self.rejects.push(msg.clone());
            !self.refuse
        }
    }

    fn encode<F>(f: F) -> Vec<u8>
    where
        F: FnOnce(&mut BencodeWriter) -> crate::types::Result<()>,
    {
        let mut buf = [0u8; 2048];
        let mut w = BencodeWriter::new(&mut buf);
        f(&mut w).unwrap();
        let n = w.written();
        buf[..n].to_vec()
    }

    fn tagged<F>(tag: u8, rest: F) -> Vec<u8>
    where
        F: FnOnce(&mut BencodeWriter) -> crate::types::Result<()>,
    {
        encode(|w| {
            w.begin_dict()?;
            w.write_bytes(b"A")?;
            w.write_bytes(&[tag])?;
            rest(w)?;
            w.write_bytes(b"v")?;
            w.write_int(0)?;
            w.end()
        })
    }

    #[test]
    fn dispatches_path_confirm_with_from() {
        let buf = tagged(b'P', |w| {
            w.write_bytes(b"L")?;
            w.write_int(600_000)?;
            w.write_bytes(b"S")?;
            w.write_int(1_000)?;
            Ok(())
        });

        let mut parser = InboundMessageParser::new();
        let mut handler = Recorder::default();
        let from = PathId([0x5a; 16]);
        assert!(parser.parse_message_buffer(&buf, &mut handler, from, &TestRouter));

        assert_eq!(handler.confirms.len(), 1);
        let msg = &handler.confirms[0];
        assert_eq!(msg.lifetime, 600_000);
        assert_eq!(msg.build_started, 1_000);
        assert_eq!(msg.from, from);
    }

    #[test]
    fn sequential_parses_do_not_bleed_state() {
        let mut parser = InboundMessageParser::new();
        let mut handler = Recorder::default();

        let confirm = tagged(b'P', |w| {
            w.write_bytes(b"L")?;
            w.write_int(600_000)?;
            Ok(())
        });
        assert!(parser.parse_message_buffer(
            &confirm,
            &mut handler,
            PathId([1; 16]),
            &TestRouter
        ));

        // A latency probe next; nothing from the confirm may leak in.
        let latency = tagged(b'L', |w| {
            w.write_bytes(b"T")?;
            w.write_int(77)?;
            Ok(())
        });
        assert!(parser.parse_message_buffer(
            &latency,
            &mut handler,
            PathId([2; 16]),
            &TestRouter
        ));
        assert_eq!(handler.latencies.len(), 1);
        assert_eq!(handler.latencies[0].sent_time, 77);
        assert_eq!(handler.latencies[0].latency, 0);
        assert_eq!(handler.latencies[0].from, PathId([2; 16]));

        // A second confirm with no L key sees the cleared slot, not the
        // previous lifetime.
        let bare_confirm = tagged(b'P', |w| {
            w.write_bytes(b"S")?;
            w.write_int(5)?;
            Ok(())
        });
        assert!(parser.parse_message_buffer(
            &bare_confirm,
            &mut handler,
            PathId([3; 16]),
            &TestRouter
        ));
        assert_eq!(handler.confirms[1].lifetime, 0);
        assert_eq!(handler.confirms[1].build_started, 5);
    }

    #[test]
    fn empty_dict_fails_and_parser_stays_usable() {
        let mut parser = InboundMessageParser::new();
        let mut handler = Recorder::default();

        assert!(!parser.parse_message_buffer(b"de", &mut handler, PathId::default(), &TestRouter));

        let discard = tagged(b'D', |w| {
            w.write_bytes(b"P")?;
            w.write_bytes(&[9u8; 16])?;
            w.write_bytes(b"S")?;
            w.write_int(4)?;
            Ok(())
        });
        assert!(parser.parse_message_buffer(
            &discard,
            &mut handler,
            PathId::default(),
            &TestRouter
        ));
        assert_eq!(handler.discards.len(), 1);
        assert_eq!(handler.discards[0].path_id, PathId([9; 16]));
        assert_eq!(handler.discards[0].seqno, 4);
    }

    #[test]
    fn unknown_tag_fails() {
        let buf = tagged(b'X', |_| Ok(()));
        let mut parser = InboundMessageParser::new();
        let mut handler = Recorder::default();
        assert!(!parser.parse_message_buffer(&buf, &mut handler, PathId::default(), &TestRouter));
    }

    #[test]
    fn first_key_must_be_the_tag() {
        let buf = encode(|w| {
            w.begin_dict()?;
            w.write_bytes(b"B")?;
            w.write_int(1)?;
            w.write_bytes(b"A")?;
            w.write_bytes(b"P")?;
            w.end()
        });
        let mut parser = InboundMessageParser::new();
        let mut handler = Recorder::default();
        assert!(!parser.parse_message_buffer(&buf, &mut handler, PathId::default(), &TestRouter));
    }

    #[test]
    fn tag_must_be_one_byte() {
        let buf = encode(|w| {
            w.begin_dict()?;
            w.write_bytes(b"A")?;
            w.write_bytes(b"PP")?;
            w.end()
        });
        let mut parser = InboundMessageParser::new();
        let mut handler = Recorder::default();
        assert!(!parser.parse_message_buffer(&buf, &mut handler, PathId::default(), &TestRouter));
    }

    #[test]
    fn malformed_buffer_fails_without_breaking_parser() {
        let mut parser = InboundMessageParser::new();
        let mut handler = Recorder::default();
        assert!(!parser.parse_message_buffer(
            b"d1:A1:P",
            &mut handler,
            PathId::default(),
            &TestRouter
        ));
        assert!(!parser.parse_message_buffer(
            b"not bencode at all",
            &mut handler,
            PathId::default(),
            &TestRouter
        ));

        let ok = tagged(b'P', |_| Ok(()));
        assert!(parser.parse_message_buffer(&ok, &mut handler, PathId::default(), &TestRouter));
    }

    #[test]
    fn handler_refusal_warns_and_fails_the_parse() {
        let buf = tagged(b'P', |_| Ok(()));
        let mut parser = InboundMessageParser::new();
        let mut handler = Recorder {
            refuse: true,
            ..Recorder::default()
        };
        assert!(!parser.parse_message_buffer(&buf, &mut handler, PathId::default(), &TestRouter));
        assert_eq!(handler.confirms.len(), 1);
    }

    #[test]
    fn unknown_variant_key_aborts() {
        let buf = tagged(b'P', |w| {
            w.write_bytes(b"Q")?;
            w.write_int(1)?;
            Ok(())
        });
        let mut parser = InboundMessageParser::new();
        let mut handler = Recorder::default();
        assert!(!parser.parse_message_buffer(&buf, &mut handler, PathId::default(), &TestRouter));
    }

    #[test]
    fn bad_version_aborts() {
        let buf = encode(|w| {
            w.begin_dict()?;
            w.write_bytes(b"A")?;
            w.write_bytes(b"P")?;
            w.write_bytes(b"v")?;
            w.write_int(9)?;
            w.end()
        });
        let mut parser = InboundMessageParser::new();
        let mut handler = Recorder::default();
        assert!(!parser.parse_message_buffer(&buf, &mut handler, PathId::default(), &TestRouter));
    }

    #[test]
    fn dht_payload_stays_bencoded() {
        let buf = tagged(b'M', |w| {
            w.write_bytes(b"M")?;
            w.begin_list()?;
            w.write_bytes(b"findnode")?;
            w.write_int(3)?;
            w.end()
        });
        let mut parser = InboundMessageParser::new();
        let mut handler = Recorder::default();
        assert!(parser.parse_message_buffer(&buf, &mut handler, PathId::default(), &TestRouter));
        assert_eq!(handler.dhts[0].payload, b"l8:findnodei3ee");
    }

    #[test]
    fn path_transfer_carries_opaque_frame() {
        let nonce = [7u8; TUNNEL_NONCE_SIZE];
        let buf = tagged(b'T', |w| {
            w.write_bytes(b"P")?;
            w.write_bytes(&[3u8; 16])?;
            w.write_bytes(b"T")?;
            w.write_bytes(b"ciphertext")?;
            w.write_bytes(b"Y")?;
            w.write_bytes(&nonce)?;
            Ok(())
        });
        let mut parser = InboundMessageParser::new();
        let mut handler = Recorder::default();
        assert!(parser.parse_message_buffer(&buf, &mut handler, PathId::default(), &TestRouter));
        let msg = &handler.transfers[0];
        assert_eq!(msg.path_id, PathId([3; 16]));
        assert_eq!(msg.frame, b"10:ciphertext");
        assert_eq!(msg.nonce, nonce);
    }

    #[test]
    fn transfer_traffic_rejects_oversized_payload() {
        let big = vec![0u8; MAX_TRAFFIC_PAYLOAD + 1];
        let buf = tagged(b'I', |w| {
            w.write_bytes(b"X")?;
            w.begin_list()?;
            w.write_bytes(&big)?;
            w.end()
        });
        let mut parser = InboundMessageParser::new();
        let mut handler = Recorder::default();
        assert!(!parser.parse_message_buffer(&buf, &mut handler, PathId::default(), &TestRouter));

        let fine = tagged(b'I', |w| {
            w.write_bytes(b"S")?;
            w.write_int(2)?;
            w.write_bytes(b"X")?;
            w.begin_list()?;
            w.write_bytes(b"packet one")?;
            w.write_bytes(b"packet two")?;
            w.end()
        });
        assert!(parser.parse_message_buffer(&fine, &mut handler, PathId::default(), &TestRouter));
        assert_eq!(handler.traffic[0].payloads.len(), 2);
        assert_eq!(handler.traffic[0].seqno, 2);
    }

    #[test]
    fn exit_messages_decode() {
        let mut parser = InboundMessageParser::new();
        let mut handler = Recorder::default();

        let obtain = tagged(b'O', |w| {
            w.write_bytes(b"E")?;
            w.write_int(1)?;
            w.write_bytes(b"I")?;
            w.write_bytes(&[0xaa; 32])?;
            w.write_bytes(b"T")?;
            w.write_int(42)?;
            w.write_bytes(b"Z")?;
            w.write_bytes(&[0xbb; 64])?;
            Ok(())
        });
        assert!(parser.parse_message_buffer(&obtain, &mut handler, PathId::default(), &TestRouter));
        let msg = &handler.obtains[0];
        assert_eq!(msg.flag, 1);
        assert_eq!(msg.identity, RouterId([0xaa; 32]));
        assert_eq!(msg.txid, 42);
        assert_eq!(msg.sig, [0xbb; 64]);

        let reject = tagged(b'J', |w| {
            w.write_bytes(b"B")?;
            w.write_int(5_000)?;
            w.write_bytes(b"T")?;
            w.write_int(42)?;
            w.write_bytes(b"Y")?;
            w.write_bytes(&[1u8; TUNNEL_NONCE_SIZE])?;
            w.write_bytes(b"Z")?;
            w.write_bytes(&[2u8; 64])?;
            Ok(())
        });
        assert!(parser.parse_message_buffer(&reject, &mut handler, PathId::default(), &TestRouter));
        assert_eq!(handler.rejects[0].backoff, 5_000);
    }
}
