use amqp_wire::types::Octect;

/// Bytes sent right after the socket connects to announce the protocol version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolHeader {
    major: Octect,
    minor: Octect,
    revision: Octect,
}

impl ProtocolHeader {
    pub const fn new(major: Octect, minor: Octect, revision: Octect) -> Self {
        Self {
            major,
            minor,
            revision,
        }
    }

    pub fn major(&self) -> Octect {
        self.major
    }

    pub fn minor(&self) -> Octect {
        self.minor
    }

    pub fn revision(&self) -> Octect {
        self.revision
    }

    /// Versions with a revision use the 0-9-1 layout `AMQP 0 major minor revision`,
    /// older ones the 0-8 layout `AMQP 1 1 major minor`.
    pub fn to_bytes(&self) -> [u8; 8] {
        if self.revision != 0 {
            [b'A', b'M', b'Q', b'P', 0, self.major, self.minor, self.revision]
        } else {
            [b'A', b'M', b'Q', b'P', 1, 1, self.major, self.minor]
        }
    }
}

impl Default for ProtocolHeader {
    fn default() -> Self {
        Self::new(0, 9, 1)
    }
}

#[cfg(test)]
mod tests {
    use super::ProtocolHeader;

    #[test]
    fn test_protocol_header_layout() {
        assert_eq!(b"AMQP\x00\x00\x09\x01", &ProtocolHeader::default().to_bytes());
        assert_eq!(b"AMQP\x01\x01\x00\x08", &ProtocolHeader::new(0, 8, 0).to_bytes());
    }
}
