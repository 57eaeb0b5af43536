//! WebTransport datagram wire format.
//!
//! ```text
//! offset 0   1 byte   kind
//! offset 1   4 bytes  fd            (network byte order)
//! offset 5   2 bytes  payloadLen    (network byte order)
//! offset 7   payloadLen bytes       payload
//! ```

use crate::error::TransportError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Open = 1,
    OpenOk = 2,
    OpenErr = 3,
    Data = 4,
    Eof = 5,
    Close = 6,
    Err = 7,
}

impl FrameKind {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(FrameKind::Open),
            2 => Some(FrameKind::OpenOk),
            3 => Some(FrameKind::OpenErr),
            4 => Some(FrameKind::Data),
            5 => Some(FrameKind::Eof),
            6 => Some(FrameKind::Close),
            7 => Some(FrameKind::Err),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Frame {
    pub kind: FrameKind,
    pub fd: i32,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(7 + self.payload.len());
        out.push(self.kind as u8);
        out.extend((self.fd as u32).to_be_bytes());
        out.extend((self.payload.len() as u16).to_be_bytes());
        out.extend_from_slice(&self.payload);
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, TransportError> {
        if bytes.len() < 7 {
            return Err(TransportError::OpenFailed {
                proxy_url: String::new(),
                reason: "frame shorter than header".to_string(),
            });
        }
        let kind = FrameKind::from_u8(bytes[0]).ok_or_else(|| TransportError::OpenFailed {
            proxy_url: String::new(),
            reason: format!("unknown frame kind {}", bytes[0]),
        })?;
        let fd = u32::from_be_bytes(bytes[1..5].try_into().unwrap()) as i32;
        let payload_len = u16::from_be_bytes(bytes[5..7].try_into().unwrap()) as usize;
        if bytes.len() < 7 + payload_len {
            return Err(TransportError::OpenFailed {
                proxy_url: String::new(),
                reason: "frame shorter than declared payload length".to_string(),
            });
        }
        Ok(Frame {
            kind,
            fd,
            payload: bytes[7..7 + payload_len].to_vec(),
        })
    }
}

/// Address bytes for `OPEN`: 1-byte family, 2-byte port, 4-or-16 bytes of
/// IP, optional 1-byte length + hostname.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Addr {
    pub family: u8,
    pub port: u16,
    pub ip: Vec<u8>,
    pub hostname: Option<String>,
}

impl Addr {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.push(self.family);
        out.extend(self.port.to_be_bytes());
        out.extend_from_slice(&self.ip);
        if let Some(hostname) = &self.hostname {
            let bytes = hostname.as_bytes();
            let len = bytes.len().min(255);
            out.push(len as u8);
            out.extend_from_slice(&bytes[..len]);
        }
        out
    }

    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.is_empty() {
            return None;
        }
        let family = bytes[0];
        let ip_len = match family {
            4 => 4,
            6 => 16,
            _ => return None,
        };
        if bytes.len() < 3 + ip_len {
            return None;
        }
        let port = u16::from_be_bytes(bytes[1..3].try_into().ok()?);
        let ip = bytes[3..3 + ip_len].to_vec();
        let rest = &bytes[3 + ip_len..];
        let hostname = if !rest.is_empty() {
            let len = rest[0] as usize;
            rest.get(1..1 + len)
                .map(|b| String::from_utf8_lossy(b).to_string())
        } else {
            None
        };
        Some(Self {
            family,
            port,
            ip,
            hostname,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_round_trip() {
        let frame = Frame {
            kind: FrameKind::Data,
            fd: 42,
            payload: b"hello".to_vec(),
        };
        let bytes = frame.encode();
        let decoded = Frame::decode(&bytes).unwrap();
        assert_eq!(decoded.kind, FrameKind::Data);
        assert_eq!(decoded.fd, 42);
        assert_eq!(decoded.payload, b"hello");
    }

    #[test]
    fn addr_round_trip_with_hostname() {
        let addr = Addr {
            family: 4,
            port: 8080,
            ip: vec![127, 0, 0, 1],
            hostname: Some("example.com".to_string()),
        };
        let bytes = addr.encode();
        let decoded = Addr::decode(&bytes).unwrap();
        assert_eq!(decoded.port, 8080);
        assert_eq!(decoded.ip, vec![127, 0, 0, 1]);
        assert_eq!(decoded.hostname.as_deref(), Some("example.com"));
    }
}
