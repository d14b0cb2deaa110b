//! Frame codec for the space link.
//!
//! Wire layout, all integers big-endian:
//!
//! ```text
//! SYNC  | TYPE | LEN  | PAYLOAD | CRC
//! 2B    | 1B   | 2B   | nB      | 2B
//! 0xEB90
//! ```
//!
//! The CRC is CRC-16/CCITT-FALSE over TYPE, LEN, and PAYLOAD. Frames that
//! fail the checksum are reported and skipped; the deframer resynchronizes
//! on the next sync marker.

use chrono::{DateTime, Utc};
use crc_any::CRCu16;
use thiserror::Error;

use satlink_core::{Command, CommandId, CommandKind, TelemetryReading};

/// Frame sync marker.
pub const FRAME_SYNC: [u8; 2] = [0xEB, 0x90];

/// Maximum payload length accepted by the deframer.
pub const MAX_PAYLOAD: usize = 4096;

const HEADER_LEN: usize = 5;
const CRC_LEN: usize = 2;

/// Frame decoding errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    /// Payload shorter than its codec requires.
    #[error("Frame payload truncated")]
    Truncated,

    /// Checksum mismatch; the frame is dropped, never delivered.
    #[error("Frame checksum mismatch: expected {expected:#06x}, got {actual:#06x}")]
    ChecksumMismatch { expected: u16, actual: u16 },

    /// Declared length exceeds [`MAX_PAYLOAD`].
    #[error("Frame payload oversize: {0} bytes")]
    Oversize(usize),

    /// Unknown frame type tag.
    #[error("Unknown frame type: {0:#04x}")]
    UnknownType(u8),

    /// Payload bytes do not decode to the declared type.
    #[error("Bad frame payload: {0}")]
    BadPayload(String),
}

/// Frame type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameType {
    /// Telemetry sample from the asset.
    Telemetry = 0x01,
    /// One chunk of a photo download.
    PhotoChunk = 0x02,
    /// Acknowledgment of a ground command.
    CommandAck = 0x03,
    /// Ground command to the asset.
    Command = 0x04,
}

impl FrameType {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(Self::Telemetry),
            0x02 => Some(Self::PhotoChunk),
            0x03 => Some(Self::CommandAck),
            0x04 => Some(Self::Command),
            _ => None,
        }
    }
}

/// A validated frame: type tag plus raw payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub frame_type: FrameType,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(frame_type: FrameType, payload: Vec<u8>) -> Self {
        Self {
            frame_type,
            payload,
        }
    }

    /// Encode the frame for the wire, checksum included.
    pub fn encode(&self) -> Vec<u8> {
        let len = self.payload.len() as u16;
        let mut buf = Vec::with_capacity(HEADER_LEN + self.payload.len() + CRC_LEN);
        buf.extend_from_slice(&FRAME_SYNC);
        buf.push(self.frame_type as u8);
        buf.extend_from_slice(&len.to_be_bytes());
        buf.extend_from_slice(&self.payload);
        let crc = checksum(&buf[2..]);
        buf.extend_from_slice(&crc.to_be_bytes());
        buf
    }
}

/// CRC-16/CCITT-FALSE over the given bytes.
fn checksum(bytes: &[u8]) -> u16 {
    let mut crc = CRCu16::crc16ccitt_false();
    crc.digest(bytes);
    crc.get_crc()
}

fn take<const N: usize>(bytes: &[u8], at: usize) -> Result<[u8; N], FrameError> {
    bytes
        .get(at..at + N)
        .and_then(|s| s.try_into().ok())
        .ok_or(FrameError::Truncated)
}

/// Encode a telemetry reading payload.
///
/// Layout: epoch-secs i64 | signal f32 | snr f32 | ber f32 | temp f32 |
/// packets sent u32 | packets received u32.
pub fn encode_telemetry(reading: &TelemetryReading) -> Vec<u8> {
    let mut buf = Vec::with_capacity(32);
    buf.extend_from_slice(&reading.timestamp.timestamp().to_be_bytes());
    buf.extend_from_slice(&reading.signal_strength.to_be_bytes());
    buf.extend_from_slice(&reading.snr_db.to_be_bytes());
    buf.extend_from_slice(&reading.ber.to_be_bytes());
    buf.extend_from_slice(&reading.temperature_c.to_be_bytes());
    buf.extend_from_slice(&reading.packets_sent.to_be_bytes());
    buf.extend_from_slice(&reading.packets_received.to_be_bytes());
    buf
}

/// Decode a telemetry payload, stamping it with the receiving link id.
pub fn decode_telemetry(payload: &[u8], link_id: &str) -> Result<TelemetryReading, FrameError> {
    let secs = i64::from_be_bytes(take::<8>(payload, 0)?);
    let timestamp: DateTime<Utc> = DateTime::from_timestamp(secs, 0)
        .ok_or_else(|| FrameError::BadPayload(format!("timestamp out of range: {}", secs)))?;
    Ok(TelemetryReading {
        timestamp,
        signal_strength: f32::from_be_bytes(take::<4>(payload, 8)?),
        snr_db: f32::from_be_bytes(take::<4>(payload, 12)?),
        ber: f32::from_be_bytes(take::<4>(payload, 16)?),
        temperature_c: f32::from_be_bytes(take::<4>(payload, 20)?),
        packets_sent: u32::from_be_bytes(take::<4>(payload, 24)?),
        packets_received: u32::from_be_bytes(take::<4>(payload, 28)?),
        link_id: link_id.to_string(),
    })
}

/// One chunk of a photo download.
///
/// Layout: photo id u32 | chunk index u16 | total chunks u16 | bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhotoChunk {
    pub photo_id: u32,
    pub index: u16,
    pub total: u16,
    pub data: Vec<u8>,
}

impl PhotoChunk {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(8 + self.data.len());
        buf.extend_from_slice(&self.photo_id.to_be_bytes());
        buf.extend_from_slice(&self.index.to_be_bytes());
        buf.extend_from_slice(&self.total.to_be_bytes());
        buf.extend_from_slice(&self.data);
        buf
    }

    pub fn decode(payload: &[u8]) -> Result<Self, FrameError> {
        Ok(Self {
            photo_id: u32::from_be_bytes(take::<4>(payload, 0)?),
            index: u16::from_be_bytes(take::<2>(payload, 4)?),
            total: u16::from_be_bytes(take::<2>(payload, 6)?),
            data: payload.get(8..).ok_or(FrameError::Truncated)?.to_vec(),
        })
    }
}

/// Command acknowledgment payload.
///
/// Layout: command id 16B | status u8 (0 = accepted, otherwise rejected).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AckPayload {
    pub command_id: CommandId,
    pub accepted: bool,
}

impl AckPayload {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(17);
        buf.extend_from_slice(self.command_id.0.as_bytes());
        buf.push(if self.accepted { 0 } else { 1 });
        buf
    }

    pub fn decode(payload: &[u8]) -> Result<Self, FrameError> {
        let id_bytes = take::<16>(payload, 0)?;
        let status = *payload.get(16).ok_or(FrameError::Truncated)?;
        Ok(Self {
            command_id: CommandId(uuid::Uuid::from_bytes(id_bytes)),
            accepted: status == 0,
        })
    }
}

/// Encode a command payload.
///
/// Layout: command id 16B | opcode u8 | parameters as `k=v` pairs joined
/// with `;`.
pub fn encode_command(command: &Command) -> Vec<u8> {
    let params = command
        .parameters
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(";");
    let mut buf = Vec::with_capacity(17 + params.len());
    buf.extend_from_slice(command.id.0.as_bytes());
    buf.push(command.kind.opcode());
    buf.extend_from_slice(params.as_bytes());
    buf
}

/// Decode a command payload into id, kind, and ordered parameters.
pub fn decode_command(
    payload: &[u8],
) -> Result<(CommandId, CommandKind, Vec<(String, String)>), FrameError> {
    let id_bytes = take::<16>(payload, 0)?;
    let opcode = *payload.get(16).ok_or(FrameError::Truncated)?;
    let rest = payload.get(17..).unwrap_or_default();
    let text = std::str::from_utf8(rest)
        .map_err(|_| FrameError::BadPayload("parameters are not UTF-8".to_string()))?;
    let mut parameters = Vec::new();
    for pair in text.split(';').filter(|p| !p.is_empty()) {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| FrameError::BadPayload(format!("malformed parameter: {}", pair)))?;
        parameters.push((key.to_string(), value.to_string()));
    }
    Ok((
        CommandId(uuid::Uuid::from_bytes(id_bytes)),
        CommandKind::from_opcode(opcode),
        parameters,
    ))
}

/// Incremental frame decoder over a byte stream.
///
/// Accumulates bytes, scans for the sync marker, and yields validated
/// frames. Checksum failures are yielded as errors so the session can count
/// them; the bad bytes are consumed and scanning continues.
#[derive(Debug, Default)]
pub struct Deframer {
    buf: Vec<u8>,
}

impl Deframer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed received bytes into the decoder.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Bytes currently buffered, for diagnostics.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Try to decode the next frame.
    ///
    /// `None` means more bytes are needed. An `Err` item is a consumed,
    /// invalid frame; decoding may continue afterwards.
    pub fn next_frame(&mut self) -> Option<Result<Frame, FrameError>> {
        // Drop garbage before the sync marker, keeping a possible partial
        // marker at the tail.
        match find_sync(&self.buf) {
            Some(start) => {
                if start > 0 {
                    self.buf.drain(..start);
                }
            }
            None => {
                let keep = usize::from(self.buf.last() == Some(&FRAME_SYNC[0]));
                self.buf.drain(..self.buf.len() - keep);
                return None;
            }
        }

        if self.buf.len() < HEADER_LEN {
            return None;
        }
        let type_byte = self.buf[2];
        let len = u16::from_be_bytes([self.buf[3], self.buf[4]]) as usize;
        if len > MAX_PAYLOAD {
            // Length field is garbage; skip this marker and resync.
            self.buf.drain(..FRAME_SYNC.len());
            return Some(Err(FrameError::Oversize(len)));
        }
        let total = HEADER_LEN + len + CRC_LEN;
        if self.buf.len() < total {
            return None;
        }

        let expected = u16::from_be_bytes([self.buf[HEADER_LEN + len], self.buf[HEADER_LEN + len + 1]]);
        let actual = checksum(&self.buf[2..HEADER_LEN + len]);
        if expected != actual {
            self.buf.drain(..FRAME_SYNC.len());
            return Some(Err(FrameError::ChecksumMismatch { expected, actual }));
        }

        let payload = self.buf[HEADER_LEN..HEADER_LEN + len].to_vec();
        self.buf.drain(..total);
        match FrameType::from_byte(type_byte) {
            Some(frame_type) => Some(Ok(Frame {
                frame_type,
                payload,
            })),
            None => Some(Err(FrameError::UnknownType(type_byte))),
        }
    }
}

fn find_sync(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == FRAME_SYNC)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn reading() -> TelemetryReading {
        TelemetryReading {
            timestamp: Utc.with_ymd_and_hms(2026, 3, 14, 9, 26, 53).unwrap(),
            signal_strength: 0.82,
            snr_db: 23.5,
            ber: 3.2e-6,
            temperature_c: -11.25,
            packets_sent: 4821,
            packets_received: 4790,
            link_id: "sat-0".to_string(),
        }
    }

    #[test]
    fn test_telemetry_round_trip() {
        let original = reading();
        let payload = encode_telemetry(&original);
        let decoded = decode_telemetry(&payload, "sat-0").unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_telemetry_truncated_payload() {
        let payload = encode_telemetry(&reading());
        assert_eq!(
            decode_telemetry(&payload[..20], "sat-0"),
            Err(FrameError::Truncated)
        );
    }

    #[test]
    fn test_photo_chunk_round_trip() {
        let chunk = PhotoChunk {
            photo_id: 7,
            index: 3,
            total: 5,
            data: vec![0xDE, 0xAD, 0xBE, 0xEF],
        };
        assert_eq!(PhotoChunk::decode(&chunk.encode()).unwrap(), chunk);
    }

    #[test]
    fn test_command_round_trip() {
        let command = Command::new(
            CommandKind::Steer,
            vec![
                ("az".to_string(), "182.4".to_string()),
                ("el".to_string(), "45.0".to_string()),
            ],
        );
        let payload = encode_command(&command);
        let (id, kind, params) = decode_command(&payload).unwrap();
        assert_eq!(id, command.id);
        assert_eq!(kind, CommandKind::Steer);
        assert_eq!(params, command.parameters);
    }

    #[test]
    fn test_ack_round_trip() {
        let ack = AckPayload {
            command_id: CommandId::new(),
            accepted: false,
        };
        assert_eq!(AckPayload::decode(&ack.encode()).unwrap(), ack);
    }

    #[test]
    fn test_deframer_whole_frame() {
        let frame = Frame::new(FrameType::Telemetry, encode_telemetry(&reading()));
        let mut deframer = Deframer::new();
        deframer.extend(&frame.encode());
        assert_eq!(deframer.next_frame(), Some(Ok(frame)));
        assert_eq!(deframer.next_frame(), None);
    }

    #[test]
    fn test_deframer_split_delivery() {
        let frame = Frame::new(FrameType::PhotoChunk, vec![1, 2, 3, 4, 5, 6, 7, 8, 9]);
        let encoded = frame.encode();
        let mut deframer = Deframer::new();
        deframer.extend(&encoded[..4]);
        assert_eq!(deframer.next_frame(), None);
        deframer.extend(&encoded[4..]);
        assert_eq!(deframer.next_frame(), Some(Ok(frame)));
    }

    #[test]
    fn test_deframer_resyncs_after_garbage() {
        let frame = Frame::new(FrameType::CommandAck, AckPayload {
            command_id: CommandId::new(),
            accepted: true,
        }.encode());
        let mut bytes = vec![0x00, 0x42, 0xEB, 0x13, 0x37];
        bytes.extend_from_slice(&frame.encode());
        let mut deframer = Deframer::new();
        deframer.extend(&bytes);
        assert_eq!(deframer.next_frame(), Some(Ok(frame)));
    }

    #[test]
    fn test_deframer_corrupted_frame_is_error_not_frame() {
        let frame = Frame::new(FrameType::Telemetry, encode_telemetry(&reading()));
        let mut encoded = frame.encode();
        let idx = encoded.len() / 2;
        encoded[idx] ^= 0xFF;
        let mut deframer = Deframer::new();
        deframer.extend(&encoded);
        match deframer.next_frame() {
            Some(Err(FrameError::ChecksumMismatch { .. })) => {}
            other => panic!("expected checksum mismatch, got {:?}", other),
        }
        // The corrupted frame never becomes a valid one.
        while let Some(item) = deframer.next_frame() {
            assert!(item.is_err());
        }
    }

    #[test]
    fn test_deframer_corrupt_then_good_frame() {
        let good = Frame::new(FrameType::PhotoChunk, vec![9, 9, 9, 9, 9, 9, 9, 9, 1]);
        let mut corrupted = Frame::new(FrameType::Telemetry, encode_telemetry(&reading())).encode();
        corrupted[6] ^= 0x55;

        let mut bytes = corrupted;
        bytes.extend_from_slice(&good.encode());
        let mut deframer = Deframer::new();
        deframer.extend(&bytes);

        let mut errors = 0;
        loop {
            match deframer.next_frame() {
                Some(Ok(frame)) => {
                    assert_eq!(frame, good);
                    break;
                }
                Some(Err(_)) => errors += 1,
                None => panic!("good frame never recovered"),
            }
        }
        assert!(errors >= 1);
    }

    #[test]
    fn test_deframer_rejects_oversize_length() {
        let mut bytes = FRAME_SYNC.to_vec();
        bytes.push(FrameType::Telemetry as u8);
        bytes.extend_from_slice(&(u16::MAX).to_be_bytes());
        let mut deframer = Deframer::new();
        deframer.extend(&bytes);
        assert_eq!(
            deframer.next_frame(),
            Some(Err(FrameError::Oversize(u16::MAX as usize)))
        );
    }

    #[test]
    fn test_deframer_unknown_type() {
        let mut bytes = FRAME_SYNC.to_vec();
        bytes.push(0x7F);
        bytes.extend_from_slice(&2u16.to_be_bytes());
        bytes.extend_from_slice(&[0xAA, 0xBB]);
        let crc = {
            let mut crc = CRCu16::crc16ccitt_false();
            crc.digest(&bytes[2..]);
            crc.get_crc()
        };
        bytes.extend_from_slice(&crc.to_be_bytes());
        let mut deframer = Deframer::new();
        deframer.extend(&bytes);
        assert_eq!(deframer.next_frame(), Some(Err(FrameError::UnknownType(0x7F))));
    }
}
