//! Modbus TCP framing for the two read primitives the heat pumps need.
//!
//! Only function 3 (read holding registers) and function 1 (read coils) are
//! implemented. The pCO controllers answer both with plain MBAP frames, so a
//! small hand-rolled codec keeps us in full control of the quirks instead of
//! fighting an off-the-shelf parser.

use tokio_util::bytes::Buf;
use tracing::trace;

#[derive(Debug, Clone, Copy)]
pub struct Request {
    pub unit_id: u8,
    pub transaction_id: u16,
    pub operation: Operation,
}

#[derive(Debug, Clone, Copy)]
pub enum Operation {
    ReadHoldings { address: u16, count: u16 },
    ReadCoils { address: u16, count: u16 },
}

impl Operation {
    pub fn function_code(&self) -> u8 {
        match self {
            Operation::ReadHoldings { .. } => 3,
            Operation::ReadCoils { .. } => 1,
        }
    }
}

#[derive(Debug)]
pub struct Response {
    pub unit_id: u8,
    pub transaction_id: u16,
    pub kind: ResponseKind,
}

impl Response {
    pub fn exception_code(&self) -> Option<u8> {
        match &self.kind {
            ResponseKind::ErrorCode(c) => Some(*c),
            ResponseKind::Holdings { .. } | ResponseKind::Coils { .. } => None,
        }
    }
}

#[derive(Debug)]
pub enum ResponseKind {
    ErrorCode(u8),
    Holdings {
        words: Vec<u16>,
    },
    /// Coil states unpacked LSB-first from the response payload.
    ///
    /// The payload is padded to whole bytes, so this may hold up to 7 more
    /// bits than were asked for; the caller truncates to its request count.
    Coils {
        bits: Vec<bool>,
    },
}

pub struct ModbusTcpCodec {}

impl tokio_util::codec::Encoder<&Request> for ModbusTcpCodec {
    type Error = std::io::Error;
    fn encode(
        &mut self,
        req: &Request,
        dst: &mut tokio_util::bytes::BytesMut,
    ) -> Result<(), Self::Error> {
        let (Operation::ReadHoldings { address, count } | Operation::ReadCoils { address, count }) =
            req.operation;
        dst.extend(req.transaction_id.to_be_bytes());
        dst.extend(&[0, 0, 0, 6, req.unit_id, req.operation.function_code()]);
        dst.extend(address.to_be_bytes());
        dst.extend(count.to_be_bytes());
        trace!(message = "sending encoded", buffer = ?dst);
        Ok(())
    }
}

impl tokio_util::codec::Decoder for ModbusTcpCodec {
    type Item = Response;
    type Error = std::io::Error;
    fn decode(
        &mut self,
        src: &mut tokio_util::bytes::BytesMut,
    ) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            trace!(message = "attempt at decoding", buffer = ?src);
            if src.len() < 9 {
                return Ok(None);
            }
            let Some((tr_id_buffer, remainder)) = src.split_first_chunk::<2>() else {
                return Ok(None);
            };
            let transaction_id = u16::from_be_bytes(*tr_id_buffer);
            let Some((proto_buffer, remainder)) = remainder.split_first_chunk::<2>() else {
                return Ok(None);
            };
            if u16::from_be_bytes(*proto_buffer) != 0 {
                // Not a MBAP frame boundary. Resynchronize byte by byte.
                src.advance(1);
                continue;
            }
            let Some((length_buffer, remainder)) = remainder.split_first_chunk::<2>() else {
                return Ok(None);
            };
            let required_length = u16::from_be_bytes(*length_buffer);
            let Some((data, _)) = remainder.split_at_checked(required_length.into()) else {
                return Ok(None);
            };
            let [unit_id, function_code, payload @ ..] = data else {
                src.advance(1);
                continue;
            };
            let (unit_id, function_code) = (*unit_id, *function_code);
            let kind = if function_code > 0x80 {
                let [code, ..] = payload else {
                    src.advance(1);
                    continue;
                };
                ResponseKind::ErrorCode(*code)
            } else {
                // The first payload byte is the byte count. The controllers
                // fill it in faithfully, but the MBAP length already tells us
                // where the frame ends, so the rest of the payload is
                // authoritative either way.
                match function_code {
                    3 => {
                        let [_, words @ ..] = payload else {
                            src.advance(1);
                            continue;
                        };
                        let words = words
                            .chunks_exact(2)
                            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                            .collect();
                        ResponseKind::Holdings { words }
                    }
                    1 => {
                        let [_, packed @ ..] = payload else {
                            src.advance(1);
                            continue;
                        };
                        let bits = packed
                            .iter()
                            .flat_map(|byte| (0..8).map(move |bit| byte & (1 << bit) != 0))
                            .collect();
                        ResponseKind::Coils { bits }
                    }
                    _ => {
                        src.advance(1);
                        continue;
                    }
                }
            };
            src.advance(usize::from(required_length) + 6);
            return Ok(Some(Response { transaction_id, unit_id, kind }));
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio_util::bytes::BytesMut;
    use tokio_util::codec::{Decoder as _, Encoder as _};

    use super::*;

    #[test]
    fn read_holdings_requests_encode_to_exact_frames() {
        let mut buffer = BytesMut::new();
        let request = Request {
            unit_id: 1,
            transaction_id: 0x0102,
            operation: Operation::ReadHoldings { address: 5001, count: 100 },
        };
        ModbusTcpCodec {}.encode(&request, &mut buffer).unwrap();
        assert_eq!(&buffer[..], &[0x01, 0x02, 0, 0, 0, 6, 1, 3, 0x13, 0x89, 0, 100]);
    }

    #[test]
    fn read_coils_requests_encode_to_exact_frames() {
        let mut buffer = BytesMut::new();
        let request = Request {
            unit_id: 7,
            transaction_id: 0xBEEF,
            operation: Operation::ReadCoils { address: 502, count: 100 },
        };
        ModbusTcpCodec {}.encode(&request, &mut buffer).unwrap();
        assert_eq!(&buffer[..], &[0xBE, 0xEF, 0, 0, 0, 6, 7, 1, 0x01, 0xF6, 0, 100]);
    }

    #[test]
    fn holding_responses_decode_into_words() {
        let mut buffer = BytesMut::new();
        buffer.extend([0x00, 0x2A, 0, 0, 0, 7, 1, 3, 4, 0x00, 0x0A, 0xFF, 0xFF]);
        let response = ModbusTcpCodec {}.decode(&mut buffer).unwrap().unwrap();
        assert_eq!(response.transaction_id, 0x2A);
        assert_eq!(response.unit_id, 1);
        assert!(matches!(response.kind, ResponseKind::Holdings { words } if words == [10, 0xFFFF]));
        assert!(buffer.is_empty());
    }

    #[test]
    fn coil_responses_unpack_bits_lsb_first() {
        let mut buffer = BytesMut::new();
        // 0b0000_0101: coils 0 and 2 on, the rest off.
        buffer.extend([0, 1, 0, 0, 0, 4, 1, 1, 1, 0b0000_0101]);
        let response = ModbusTcpCodec {}.decode(&mut buffer).unwrap().unwrap();
        let ResponseKind::Coils { bits } = response.kind else {
            panic!("expected a coil response");
        };
        assert_eq!(bits.len(), 8);
        assert_eq!(&bits[..4], &[true, false, true, false]);
    }

    #[test]
    fn exception_responses_surface_the_code() {
        let mut buffer = BytesMut::new();
        buffer.extend([0, 9, 0, 0, 0, 3, 1, 0x83, 2]);
        let response = ModbusTcpCodec {}.decode(&mut buffer).unwrap().unwrap();
        assert_eq!(response.exception_code(), Some(2));
    }

    #[test]
    fn partial_frames_wait_for_more_data() {
        let mut codec = ModbusTcpCodec {};
        let mut buffer = BytesMut::new();
        buffer.extend([0, 9, 0, 0, 0, 5, 1, 3, 2]);
        assert!(codec.decode(&mut buffer).unwrap().is_none());
        buffer.extend([0x12, 0x34]);
        let response = codec.decode(&mut buffer).unwrap().unwrap();
        assert!(matches!(response.kind, ResponseKind::Holdings { words } if words == [0x1234]));
    }

    #[test]
    fn consecutive_frames_decode_one_by_one() {
        let mut codec = ModbusTcpCodec {};
        let mut buffer = BytesMut::new();
        buffer.extend([0, 1, 0, 0, 0, 5, 1, 3, 2, 0, 1]);
        buffer.extend([0, 2, 0, 0, 0, 5, 1, 3, 2, 0, 2]);
        assert_eq!(codec.decode(&mut buffer).unwrap().unwrap().transaction_id, 1);
        assert_eq!(codec.decode(&mut buffer).unwrap().unwrap().transaction_id, 2);
        assert!(codec.decode(&mut buffer).unwrap().is_none());
    }
}
