use crate::address::{Address, parse_address};
use crate::auth::Credential;
use crate::protocol::{
    AddressType, CREDENTIAL_LEN, CREDENTIAL_OFFSET, Command, MIN_HEADER_LEN, OPTIONS_LEN_OFFSET,
};
use anyhow::{Result, anyhow, bail};

/// HandshakeRequest is the decoded first frame of an inbound channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeRequest {
    /// Protocol version, carried but never negotiated
    pub version: u8,
    pub credential: Credential,
    /// Length of the skipped options block
    pub options_len: u8,
    pub command: Command,
    pub port: u16,
    pub address_type: AddressType,
    pub address: Address,
    /// Offset into the frame where application data begins
    pub payload_offset: usize,
}

/// HandshakeRequest implementation block
impl HandshakeRequest {
    /// is_datagram reports whether the client asked for the datagram transport
    pub fn is_datagram(&self) -> bool {
        self.command == Command::Datagram
    }

    /// payload returns the application bytes that followed the header in `frame`
    pub fn payload<'a>(&self, frame: &'a [u8]) -> &'a [u8] {
        frame.get(self.payload_offset..).unwrap_or_default()
    }
}

/// parse_handshake decodes the first frame of a channel and authenticates it
/// against `credential`. Every failure is reported the same way to the caller.
pub fn parse_handshake(frame: &[u8], credential: &Credential) -> Result<HandshakeRequest> {
    if frame.len() < MIN_HEADER_LEN {
        bail!("handshake too short: {} bytes", frame.len());
    }

    let version = frame[0];

    // Authenticate before looking at anything else
    let candidate = &frame[CREDENTIAL_OFFSET..CREDENTIAL_OFFSET + CREDENTIAL_LEN];
    if !credential.matches(candidate) {
        bail!("credential mismatch");
    }

    // Options block is skipped, never interpreted
    let options_len = frame[OPTIONS_LEN_OFFSET];
    let mut offset = OPTIONS_LEN_OFFSET + 1 + options_len as usize;

    let command = Command::from_byte(byte_at(frame, offset, "command")?);
    offset += 1;

    // Port -> BigEndian (network order)
    let port = u16::from_be_bytes([
        byte_at(frame, offset, "port")?,
        byte_at(frame, offset + 1, "port")?,
    ]);
    offset += 2;

    let atyp = byte_at(frame, offset, "address kind")?;
    let address_type =
        AddressType::from_byte(atyp).ok_or_else(|| anyhow!("unknown address kind: {atyp}"))?;
    offset += 1;

    let (address, consumed) = parse_address(frame, offset, atyp)?;
    let payload_offset = offset + consumed;

    if payload_offset > frame.len() {
        bail!(
            "payload offset {payload_offset} past end of {} byte frame",
            frame.len()
        );
    }

    Ok(HandshakeRequest {
        version,
        credential: *credential,
        options_len,
        command,
        port,
        address_type,
        address,
        payload_offset,
    })
}

fn byte_at(frame: &[u8], offset: usize, field: &str) -> Result<u8> {
    frame
        .get(offset)
        .copied()
        .ok_or_else(|| anyhow!("handshake truncated before {field}"))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) const UUID: &str = "a10d76fd-25ec-4d5a-bdf1-6593a73e2e16";

    /// build_handshake lays out a frame the way a client would
    pub(crate) fn build_handshake(
        credential: &Credential,
        options: &[u8],
        command: u8,
        port: u16,
        atyp: u8,
        address: &[u8],
        payload: &[u8],
    ) -> Vec<u8> {
        let mut frame = vec![0u8];
        frame.extend_from_slice(credential.as_bytes());
        frame.push(options.len() as u8);
        frame.extend_from_slice(options);
        frame.push(command);
        frame.extend_from_slice(&port.to_be_bytes());
        frame.push(atyp);
        frame.extend_from_slice(address);
        frame.extend_from_slice(payload);
        frame
    }

    fn credential() -> Credential {
        UUID.parse().unwrap()
    }

    #[test]
    fn decodes_ipv4_stream_request() {
        let cred = credential();
        let mut frame = build_handshake(&cred, &[], 1, 0, 1, &[1, 2, 3, 4], b"hello");
        // Port bytes written literally: 0x01BB = 443
        frame[19] = 0x01;
        frame[20] = 0xBB;

        let req = parse_handshake(&frame, &cred).unwrap();
        assert_eq!(req.address_type, AddressType::IPv4);
        assert_eq!(req.address.to_string(), "1.2.3.4");
        assert_eq!(req.port, 443);
        assert_eq!(req.payload_offset, 26);
        assert!(!req.is_datagram());
        assert_eq!(req.payload(&frame), b"hello");
    }

    #[test]
    fn decodes_domain_datagram_request_with_options() {
        let cred = credential();
        let mut address = vec![11u8];
        address.extend_from_slice(b"example.com");
        let frame = build_handshake(&cred, &[9, 9, 9], 2, 53, 2, &address, &[]);

        let req = parse_handshake(&frame, &cred).unwrap();
        assert_eq!(req.options_len, 3);
        assert_eq!(req.address.to_string(), "example.com");
        assert_eq!(req.port, 53);
        assert!(req.is_datagram());
        assert_eq!(req.payload_offset, frame.len());
        assert!(req.payload(&frame).is_empty());
    }

    #[test]
    fn decodes_ipv6_request() {
        let cred = credential();
        let mut octets = [0u8; 16];
        octets[15] = 1;
        let frame = build_handshake(&cred, &[], 1, 8443, 3, &octets, b"x");

        let req = parse_handshake(&frame, &cred).unwrap();
        assert_eq!(req.address.to_string(), "[0:0:0:0:0:0:0:1]");
        assert_eq!(req.port, 8443);
        assert_eq!(req.payload(&frame), b"x");
    }

    #[test]
    fn unknown_commands_select_stream() {
        let cred = credential();
        for command in [0u8, 1, 3, 0x7f, 0xff] {
            let frame = build_handshake(&cred, &[], command, 80, 1, &[10, 0, 0, 1], &[]);
            let req = parse_handshake(&frame, &cred).unwrap();
            assert_eq!(req.command, Command::Stream, "command byte {command}");
        }
    }

    #[test]
    fn short_frames_always_fail() {
        let cred = credential();
        let full = build_handshake(&cred, &[], 1, 80, 1, &[10, 0, 0, 1], b"payload");
        for len in 0..MIN_HEADER_LEN {
            assert!(parse_handshake(&full[..len], &cred).is_err(), "length {len}");
        }
    }

    #[test]
    fn wrong_credential_fails() {
        let cred = credential();
        let other: Credential = "00000000-0000-0000-0000-000000000001".parse().unwrap();
        let frame = build_handshake(&other, &[], 1, 80, 1, &[10, 0, 0, 1], b"payload");

        let err = parse_handshake(&frame, &cred).unwrap_err();
        assert!(err.to_string().contains("credential"));
    }

    #[test]
    fn unknown_address_kind_fails() {
        let cred = credential();
        let frame = build_handshake(&cred, &[], 1, 80, 4, &[0u8; 16], &[]);
        assert!(parse_handshake(&frame, &cred).is_err());
    }

    #[test]
    fn truncated_address_fails() {
        let cred = credential();
        let mut address = vec![200u8];
        address.extend_from_slice(b"short.example");
        let frame = build_handshake(&cred, &[], 1, 80, 2, &address, &[]);
        assert!(frame.len() >= MIN_HEADER_LEN);
        assert!(parse_handshake(&frame, &cred).is_err());
    }

    #[test]
    fn options_running_past_frame_fail() {
        let cred = credential();
        let mut frame = build_handshake(&cred, &[], 1, 80, 1, &[10, 0, 0, 1], &[0; 8]);
        frame[OPTIONS_LEN_OFFSET] = 250;
        assert!(parse_handshake(&frame, &cred).is_err());
    }
}
