use std::fmt;
use std::ops::BitXor;

/// Ed25519 public signing key used as a router's identity.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct RouterId(pub [u8; 32]);

impl RouterId {
    /// All-ones sentinel, further from every key than any real distance.
    pub fn max_distance() -> Self {
        Self([0xff; 32])
    }
}

impl fmt::Display for RouterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl fmt::Debug for RouterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RouterId({})", self)
    }
}

impl From<[u8; 32]> for RouterId {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for RouterId {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// XOR metric between two identities. The result is compared
/// lexicographically (big-endian unsigned semantics) via `Ord`.
impl BitXor for RouterId {
    type Output = RouterId;

    fn bitxor(self, rhs: RouterId) -> RouterId {
        let mut out = [0u8; 32];
        for (i, byte) in out.iter_mut().enumerate() {
            *byte = self.0[i] ^ rhs.0[i];
        }
        RouterId(out)
    }
}

/// Receive- or transmit-side identifier of an onion path.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct PathId(pub [u8; 16]);

impl fmt::Display for PathId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl fmt::Debug for PathId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PathId({})", self)
    }
}

impl From<[u8; 16]> for PathId {
    fn from(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for PathId {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Errors returned by larch operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("encode error")]
    Encode,
    #[error("decode error")]
    Decode,
    #[error("oversized contact")]
    Oversized,
    #[error("bad signature")]
    BadSignature,
    #[error("unrecognized routing message")]
    UnrecognizedMessage,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// The narrow slice of the surrounding router that paths and message
/// handlers are allowed to touch during a tick or dispatch.
pub trait RouterContext: Send + Sync {
    /// Wall clock in milliseconds.
    fn now_ms(&self) -> u64;
}
