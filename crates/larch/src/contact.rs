//! Router Contact: the signed descriptor that identifies a routing node.
//!
//! An RC binds a router's signing identity to its advertised link-layer
//! addresses and exit policies. It travels bencoded, signed over the
//! encoding with the signature field zeroed, and fits in 1024 bytes.

use std::fmt;
use std::net::Ipv6Addr;
use std::path::Path as FsPath;

use crate::bencode::{BencodeReader, BencodeWriter};
use crate::crypto::{Crypto, PublicKey, Sig, PUBLIC_KEY_SIZE, SIGNATURE_SIZE};
use crate::types::{Error, Result, RouterId};

/// Largest well-formed RC encoding.
pub const MAX_RC_SIZE: usize = 1024;

/// Fixed width of the nickname buffer.
pub const NICK_LEN: usize = 32;

/// Wire protocol version carried in the `v` key of every dictionary.
pub const PROTO_VERSION: u64 = 0;

// ---------------------------------------------------------------------------
// AddressInfo: one advertised link-layer address
// ---------------------------------------------------------------------------

/// A link-layer address advertisement.
/// Bencoded as `{c: rank, d: dialect, e: enc key, i: ip, p: port, v: version}`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AddressInfo {
    pub rank: u64,
    pub dialect: String,
    pub enc_key: PublicKey,
    pub ip: Ipv6Addr,
    pub port: u16,
    pub version: u64,
}

impl Default for AddressInfo {
    fn default() -> Self {
        Self {
            rank: 0,
            dialect: String::new(),
            enc_key: [0u8; PUBLIC_KEY_SIZE],
            ip: Ipv6Addr::UNSPECIFIED,
            port: 0,
            version: PROTO_VERSION,
        }
    }
}

impl fmt::Display for AddressInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://[{}]:{}", self.dialect, self.ip, self.port)
    }
}

impl AddressInfo {
    pub fn bencode(&self, w: &mut BencodeWriter) -> Result<()> {
        w.begin_dict()?;
        w.write_bytes(b"c")?;
        w.write_int(self.rank)?;
        w.write_bytes(b"d")?;
        w.write_bytes(self.dialect.as_bytes())?;
        w.write_bytes(b"e")?;
        w.write_bytes(&self.enc_key)?;
        w.write_bytes(b"i")?;
        w.write_bytes(&self.ip.octets())?;
        w.write_bytes(b"p")?;
        w.write_int(u64::from(self.port))?;
        w.write_bytes(b"v")?;
        w.write_int(self.version)?;
        w.end()
    }

    pub fn decode(r: &mut BencodeReader) -> Result<Self> {
        let mut info = AddressInfo::default();
        r.read_dict(|key, r| {
            match key {
                b"c" => info.rank = r.read_int()?,
                b"d" => {
                    info.dialect = String::from_utf8(r.read_bytes()?.to_vec())
                        .map_err(|_| Error::Decode)?;
                }
                b"e" => info.enc_key = r.read_fixed()?,
                b"i" => {
                    let octets: [u8; 16] = r.read_fixed()?;
                    info.ip = Ipv6Addr::from(octets);
                }
                b"p" => {
                    info.port = u16::try_from(r.read_int()?).map_err(|_| Error::Decode)?;
                }
                b"v" => info.version = require_version(r)?,
                _ => r.skip_value()?,
            }
            Ok(())
        })?;
        Ok(info)
    }
}

// ---------------------------------------------------------------------------
// ExitInfo: one advertised exit policy
// ---------------------------------------------------------------------------

/// An exit policy advertisement.
/// Bencoded as `{a: address, b: netmask, k: exit key, v: version}`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExitInfo {
    pub address: Ipv6Addr,
    pub netmask: Ipv6Addr,
    pub pubkey: PublicKey,
    pub version: u64,
}

impl Default for ExitInfo {
    fn default() -> Self {
        Self {
            address: Ipv6Addr::UNSPECIFIED,
            netmask: Ipv6Addr::UNSPECIFIED,
            pubkey: [0u8; PUBLIC_KEY_SIZE],
            version: PROTO_VERSION,
        }
    }
}

impl ExitInfo {
    pub fn bencode(&self, w: &mut BencodeWriter) -> Result<()> {
        w.begin_dict()?;
        w.write_bytes(b"a")?;
        w.write_bytes(&self.address.octets())?;
        w.write_bytes(b"b")?;
        w.write_bytes(&self.netmask.octets())?;
        w.write_bytes(b"k")?;
        w.write_bytes(&self.pubkey)?;
        w.write_bytes(b"v")?;
        w.write_int(self.version)?;
        w.end()
    }

    pub fn decode(r: &mut BencodeReader) -> Result<Self> {
        let mut info = ExitInfo::default();
        r.read_dict(|key, r| {
            match key {
                b"a" => {
                    let octets: [u8; 16] = r.read_fixed()?;
                    info.address = Ipv6Addr::from(octets);
                }
                b"b" => {
                    let octets: [u8; 16] = r.read_fixed()?;
                    info.netmask = Ipv6Addr::from(octets);
                }
                b"k" => info.pubkey = r.read_fixed()?,
                b"v" => info.version = require_version(r)?,
                _ => r.skip_value()?,
            }
            Ok(())
        })?;
        Ok(info)
    }
}

// ---------------------------------------------------------------------------
// RouterContact
// ---------------------------------------------------------------------------

/// Signed router descriptor. Dictionary keys, in canonical order:
/// `a` addresses, `e` exits, `k` encryption key, `n` nickname (present
/// iff set), `p` signing key, `s` signature, `u` last-updated, `v`
/// version.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RouterContact {
    pub addrs: Vec<AddressInfo>,
    pub exits: Vec<ExitInfo>,
    pub enc_key: PublicKey,
    pub pubkey: RouterId,
    pub nickname: [u8; NICK_LEN],
    pub last_updated: u64,
    pub signature: Sig,
    pub version: u64,
}

impl Default for RouterContact {
    fn default() -> Self {
        Self {
            addrs: Vec::new(),
            exits: Vec::new(),
            enc_key: [0u8; PUBLIC_KEY_SIZE],
            pubkey: RouterId::default(),
            nickname: [0u8; NICK_LEN],
            last_updated: 0,
            signature: [0u8; SIGNATURE_SIZE],
            version: PROTO_VERSION,
        }
    }
}

impl RouterContact {
    /// Encode the full dictionary into `buf`. Output is byte-identical
    /// across runs for equal inputs.
    pub fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        let mut w = BencodeWriter::new(buf);
        self.bencode(&mut w)?;
        Ok(w.written())
    }

    fn bencode(&self, w: &mut BencodeWriter) -> Result<()> {
        w.begin_dict()?;

        w.write_bytes(b"a")?;
        w.begin_list()?;
        for addr in &self.addrs {
            addr.bencode(w)?;
        }
        w.end()?;

        w.write_bytes(b"e")?;
        w.begin_list()?;
        for exit in &self.exits {
            exit.bencode(w)?;
        }
        w.end()?;

        w.write_bytes(b"k")?;
        w.write_bytes(&self.enc_key)?;

        if self.has_nick() {
            w.write_bytes(b"n")?;
            w.write_bytes(&self.nickname)?;
        }

        w.write_bytes(b"p")?;
        w.write_bytes(&self.pubkey.0)?;

        w.write_bytes(b"s")?;
        w.write_bytes(&self.signature)?;

        w.write_bytes(b"u")?;
        w.write_int(self.last_updated)?;

        w.write_bytes(b"v")?;
        w.write_int(self.version)?;

        w.end()
    }

    /// Decode a bencoded RC. Unknown keys are skipped; a repeated key's
    /// last occurrence wins; trailing bytes after the dictionary are
    /// rejected.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut rc = RouterContact::default();
        let mut r = BencodeReader::new(bytes);
        r.read_dict(|key, r| {
            rc.decode_key(key, r)
        })?;
        if !r.is_empty() {
            return Err(Error::Decode);
        }
        Ok(rc)
    }

    fn decode_key(&mut self, key: &[u8], r: &mut BencodeReader) -> Result<()> {
        match key {
            b"a" => {
                let mut addrs = Vec::new();
                r.read_list(|r| {
                    addrs.push(AddressInfo::decode(r)?);
                    Ok(())
                })?;
                self.addrs = addrs;
            }
            b"e" => {
                let mut exits = Vec::new();
                r.read_list(|r| {
                    exits.push(ExitInfo::decode(r)?);
                    Ok(())
                })?;
                self.exits = exits;
            }
            b"k" => self.enc_key = r.read_fixed()?,
            b"n" => {
                let nick = r.read_bytes()?;
                if nick.len() > NICK_LEN {
                    return Err(Error::Decode);
                }
                self.nickname = [0u8; NICK_LEN];
                self.nickname[..nick.len()].copy_from_slice(nick);
            }
            b"p" => self.pubkey = RouterId(r.read_fixed()?),
            b"s" => self.signature = r.read_fixed()?,
            b"u" => self.last_updated = r.read_int()?,
            b"v" => self.version = require_version(r)?,
            _ => r.skip_value()?,
        }
        Ok(())
    }

    /// Stamp `last_updated`, then sign the encoding with the signature
    /// field zeroed and store the result.
    pub fn sign(&mut self, crypto: &Crypto) -> Result<()> {
        self.last_updated = Crypto::now_ms();
        self.signature = [0u8; SIGNATURE_SIZE];
        let mut buf = [0u8; MAX_RC_SIZE];
        let n = self.encode(&mut buf)?;
        self.signature = crypto.sign(&buf[..n]);
        Ok(())
    }

    /// Check `signature` over the zero-signature encoding, against the
    /// RC's own signing key. Any encode failure counts as a bad
    /// signature.
    pub fn verify_signature(&self) -> bool {
        let mut copy = self.clone();
        copy.signature = [0u8; SIGNATURE_SIZE];
        let mut buf = [0u8; MAX_RC_SIZE];
        match copy.encode(&mut buf) {
            Ok(n) => Crypto::verify(&self.pubkey.0, &buf[..n], &self.signature),
            Err(_) => false,
        }
    }

    /// A public router advertises at least one exit.
    pub fn is_public_router(&self) -> bool {
        !self.exits.is_empty()
    }

    pub fn has_nick(&self) -> bool {
        self.nickname[0] != 0
    }

    /// Nickname bytes up to the first zero.
    pub fn nick(&self) -> String {
        let end = self
            .nickname
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(NICK_LEN);
        String::from_utf8_lossy(&self.nickname[..end]).into_owned()
    }

    /// Zero-fill the nickname buffer, then copy up to `NICK_LEN` bytes.
    pub fn set_nick(&mut self, nick: &str) {
        self.nickname = [0u8; NICK_LEN];
        let bytes = nick.as_bytes();
        let n = bytes.len().min(NICK_LEN);
        self.nickname[..n].copy_from_slice(&bytes[..n]);
    }

    /// Write the bencoded form to a file.
    pub fn write(&self, path: &FsPath) -> Result<()> {
        let mut buf = [0u8; MAX_RC_SIZE];
        let n = self.encode(&mut buf)?;
        std::fs::write(path, &buf[..n])?;
        tracing::debug!("wrote rc for {} to {}", self.pubkey, path.display());
        Ok(())
    }

    /// Read a bencoded RC from a file. Tampered contents decode fine but
    /// fail `verify_signature` downstream.
    pub fn read(path: &FsPath) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        if bytes.len() > MAX_RC_SIZE {
            return Err(Error::Oversized);
        }
        Self::decode(&bytes)
    }
}

/// Read the `v` value, rejecting versions we do not speak.
pub(crate) fn require_version(r: &mut BencodeReader) -> Result<u64> {
    let version = r.read_int()?;
    if version != PROTO_VERSION {
        return Err(Error::Decode);
    }
    Ok(version)
}
