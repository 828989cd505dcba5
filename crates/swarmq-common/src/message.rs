use std::fmt;

use rand::distributions::Alphanumeric;
use rand::Rng;

/// Single-frame payload a worker sends right after connecting.
pub const READY: &[u8] = b"READY";

/// Single-frame liveness ping, valid in both directions, requiring no reply.
pub const HEARTBEAT: &[u8] = b"HEARTBEAT";

/// Opaque addressing token identifying the logical sender on a router-style
/// endpoint.
///
/// Identities are announced by the connecting side during the transport
/// handshake and are unique per endpoint: a reconnect with the same identity
/// replaces the previous link, which is what lets a worker or client rebuild
/// its connection without losing its address.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Identity(Vec<u8>);

impl Identity {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Generates a readable identity like `client-4XploP1n`.
    pub fn random(prefix: &str) -> Self {
        let suffix: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(8)
            .map(char::from)
            .collect();
        Self(format!("{prefix}-{suffix}").into_bytes())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl From<&str> for Identity {
    fn from(value: &str) -> Self {
        Self(value.as_bytes().to_vec())
    }
}

impl From<String> for Identity {
    fn from(value: String) -> Self {
        Self(value.into_bytes())
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Identity({})", String::from_utf8_lossy(&self.0))
    }
}

/// An ordered sequence of opaque byte frames.
///
/// Routed messages carry a *routing envelope*: zero or more non-empty
/// address frames followed by an empty delimiter frame, then the payload.
/// Fresh client requests have no envelope; brokers add one before dispatch
/// and strip it again on the way back. The envelope operations below only
/// make sense on enveloped messages.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Message {
    frames: Vec<Vec<u8>>,
}

impl Message {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_frames(frames: Vec<Vec<u8>>) -> Self {
        Self { frames }
    }

    /// Convenience constructor for one-frame control messages.
    pub fn single(frame: impl Into<Vec<u8>>) -> Self {
        Self {
            frames: vec![frame.into()],
        }
    }

    pub fn frames(&self) -> &[Vec<u8>] {
        &self.frames
    }

    pub fn frame(&self, index: usize) -> Option<&[u8]> {
        self.frames.get(index).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn push(&mut self, frame: impl Into<Vec<u8>>) {
        self.frames.push(frame.into());
    }

    /// Prepends an address frame to the routing envelope.
    pub fn push_address(&mut self, address: impl Into<Vec<u8>>) {
        self.frames.insert(0, address.into());
    }

    /// Prepends the empty delimiter frame that separates the routing
    /// envelope from the payload. Call once before the first
    /// [`push_address`](Self::push_address) on a fresh (unenveloped)
    /// request.
    pub fn push_delimiter(&mut self) {
        self.frames.insert(0, Vec::new());
    }

    /// Pops the leading address frame, also dropping an immediately
    /// following delimiter frame if present (so popping the last address
    /// removes the envelope entirely).
    pub fn pop_address(&mut self) -> Option<Vec<u8>> {
        if self.frames.is_empty() || self.frames[0].is_empty() {
            return None;
        }
        let address = self.frames.remove(0);
        if self.frames.first().is_some_and(|f| f.is_empty()) {
            self.frames.remove(0);
        }
        Some(address)
    }

    /// Address frames before the delimiter: the request's routing history.
    /// Empty for messages without an envelope.
    pub fn address_stack(&self) -> &[Vec<u8>] {
        match self.frames.iter().position(|f| f.is_empty()) {
            Some(delimiter) => &self.frames[..delimiter],
            None => &[],
        }
    }

    /// Payload frames after the delimiter; the whole message when no
    /// envelope is present.
    pub fn payload(&self) -> &[Vec<u8>] {
        match self.frames.iter().position(|f| f.is_empty()) {
            Some(delimiter) => &self.frames[delimiter + 1..],
            None => &self.frames,
        }
    }

    /// Builds a reply that carries this request's envelope (addresses plus
    /// delimiter) followed by `payload`. Returns `None` when the request has
    /// no envelope, which a worker treats as malformed.
    pub fn reply_with(&self, payload: Vec<Vec<u8>>) -> Option<Message> {
        let delimiter = self.frames.iter().position(|f| f.is_empty())?;
        let mut frames: Vec<Vec<u8>> = self.frames[..=delimiter].to_vec();
        frames.extend(payload);
        Some(Message::from_frames(frames))
    }
}

// Frame dumps show up in warn logs for malformed messages, so keep them
// short and lossy.
impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut list = f.debug_list();
        for frame in &self.frames {
            if frame.len() <= 32 {
                list.entry(&String::from_utf8_lossy(frame));
            } else {
                list.entry(&format!("<{} bytes>", frame.len()));
            }
        }
        list.finish()
    }
}

/// What a broker made of a message arriving on its worker-facing endpoint.
///
/// The control vocabulary is deliberately modeled as a tagged kind rather
/// than inline byte comparisons at every call site.
#[derive(Debug)]
pub enum WorkerSignal {
    /// Single-frame `READY`: the worker just (re)joined the pool.
    Ready,
    /// Single-frame `HEARTBEAT`: idle but alive.
    Heartbeat,
    /// Anything with more than one frame is an application reply and must
    /// be routed, never interpreted.
    Reply(Message),
    /// A single frame that is neither control literal.
    Malformed(Message),
}

impl WorkerSignal {
    pub fn from_message(message: Message) -> Self {
        if message.len() == 1 {
            match message.frame(0) {
                Some(frame) if frame == READY => WorkerSignal::Ready,
                Some(frame) if frame == HEARTBEAT => WorkerSignal::Heartbeat,
                _ => WorkerSignal::Malformed(message),
            }
        } else {
            WorkerSignal::Reply(message)
        }
    }
}

/// What a worker made of a message arriving from its broker.
#[derive(Debug)]
pub enum BrokerSignal {
    /// Single-frame `HEARTBEAT`: the broker is alive.
    Heartbeat,
    /// An enveloped application request to process.
    Request(Message),
    /// A single frame that is not the heartbeat literal.
    Malformed(Message),
}

impl BrokerSignal {
    pub fn from_message(message: Message) -> Self {
        if message.len() == 1 {
            match message.frame(0) {
                Some(frame) if frame == HEARTBEAT => BrokerSignal::Heartbeat,
                _ => BrokerSignal::Malformed(message),
            }
        } else {
            BrokerSignal::Request(message)
        }
    }
}
