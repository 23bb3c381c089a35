// Handshake layout
// +-----+----------+------+---------+-----+------+------+----------+---------+
// | VER |   UUID   | OLEN | OPTIONS | CMD | PORT | ATYP | DST.ADDR | PAYLOAD |
// +-----+----------+------+---------+-----+------+------+----------+---------+
// |  1  |    16    |  1   |  OLEN   |  1  |  2   |  1   | Variable | Variable|
// +-----+----------+------+---------+-----+------+------+----------+---------+

/// Shortest frame that can carry a complete handshake
pub const MIN_HEADER_LEN: usize = 24;

/// Length of the credential carried in the handshake
pub const CREDENTIAL_LEN: usize = 16;

/// Offset of the credential within the handshake
pub const CREDENTIAL_OFFSET: usize = 1;

/// Offset of the options length byte
pub const OPTIONS_LEN_OFFSET: usize = CREDENTIAL_OFFSET + CREDENTIAL_LEN;

/// Largest UDP payload we will ever receive in one datagram
pub const MAX_DGRAM: usize = 65_535;

/// Read buffer used for the stream outbound leg
pub const STREAM_BUFFER: usize = 32 * 1024;

/// AddressType represents the handshake address kinds:
/// IPv4, Domain Name, IPv6
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressType {
    IPv4 = 0x01,
    DomainName = 0x02,
    IPv6 = 0x03,
}

/// AddressType implementation block
impl AddressType {
    /// from_byte converts a byte to its related network address type
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(AddressType::IPv4),
            0x02 => Some(AddressType::DomainName),
            0x03 => Some(AddressType::IPv6),
            _ => None,
        }
    }
}

/// Command represents the outbound transport requested by the client
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Stream = 0x01,
    Datagram = 0x02,
}

/// Command implementation block
impl Command {
    /// from_byte converts a byte to its command. Only 0x02 selects the
    /// datagram transport, every other value falls back to Stream.
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            0x02 => Command::Datagram,
            _ => Command::Stream,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_type_known_values() {
        assert_eq!(AddressType::from_byte(1), Some(AddressType::IPv4));
        assert_eq!(AddressType::from_byte(2), Some(AddressType::DomainName));
        assert_eq!(AddressType::from_byte(3), Some(AddressType::IPv6));
        assert_eq!(AddressType::from_byte(0), None);
        assert_eq!(AddressType::from_byte(4), None);
    }

    #[test]
    fn command_is_lenient() {
        for byte in 0..=u8::MAX {
            let expected = if byte == 2 {
                Command::Datagram
            } else {
                Command::Stream
            };
            assert_eq!(Command::from_byte(byte), expected, "command byte {byte}");
        }
    }
}
