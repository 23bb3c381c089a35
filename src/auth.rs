use crate::protocol::CREDENTIAL_LEN;
use anyhow::{Result, anyhow, bail};
use std::fmt;
use std::str::FromStr;

/// Byte offsets of the hyphens in the 8-4-4-4-12 form
const HYPHEN_POSITIONS: [usize; 4] = [8, 13, 18, 23];

/// Credential is the 16-byte identifier every handshake must carry.
/// It is configured in its UUID text form and compared as raw bytes.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Credential([u8; CREDENTIAL_LEN]);

/// Credential implementation block
impl Credential {
    /// from_bytes builds a credential from its raw 16 bytes
    pub fn from_bytes(bytes: [u8; CREDENTIAL_LEN]) -> Self {
        Self(bytes)
    }

    /// as_bytes returns the raw credential bytes
    pub fn as_bytes(&self) -> &[u8; CREDENTIAL_LEN] {
        &self.0
    }

    /// matches compares a slice taken from a handshake against the
    /// configured credential
    pub fn matches(&self, candidate: &[u8]) -> bool {
        candidate == self.0.as_slice()
    }
}

impl FromStr for Credential {
    type Err = anyhow::Error;

    /// Accepts the hyphenated 8-4-4-4-12 UUID form or 32 bare hex digits
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();

        let compact = match s.len() {
            32 => s.to_owned(),
            36 if s
                .char_indices()
                .all(|(i, c)| (c == '-') == HYPHEN_POSITIONS.contains(&i)) =>
            {
                s.replace('-', "")
            }
            _ => bail!("credential must be a UUID (8-4-4-4-12) or 32 hex digits: '{s}'"),
        };

        let mut bytes = [0u8; CREDENTIAL_LEN];
        hex::decode_to_slice(&compact, &mut bytes)
            .map_err(|e| anyhow!("invalid credential '{s}': {e}"))?;

        Ok(Self(bytes))
    }
}

impl fmt::Display for Credential {
    /// Canonical lowercase 8-4-4-4-12 rendering
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex = hex::encode(self.0);
        write!(
            f,
            "{}-{}-{}-{}-{}",
            &hex[0..8],
            &hex[8..12],
            &hex[12..16],
            &hex[16..20],
            &hex[20..32]
        )
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Credential").field(&self.to_string()).finish()
    }
}

/// UserPass holds username/password credentials for an upstream
/// SOCKS5 proxy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserPass {
    pub username: String,
    pub password: String,
}
