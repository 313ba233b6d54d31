//! Splitting encoded bodies into submit_sm PDUs

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TransportError};
use crate::pdu::{tag, ShortMessage, Tlv, ESM_CLASS_UDHI};

/// At most this many segments fit the one-octet segment counters
pub const MAX_SEGMENTS: usize = 255;

pub const DEFAULT_CSM_SPLIT_LENGTH: usize = 130;

/// How a long body is carried; fixed per transport instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FragmentationStrategy {
    /// Single submit_sm, body in short_message
    #[default]
    Plain,
    /// Single submit_sm, body in the message_payload parameter
    LongMessage,
    /// One submit_sm per chunk, linked by sar_* parameters
    Sar,
    /// One submit_sm per chunk, linked by a concatenation UDH
    Udh,
}

impl std::str::FromStr for FragmentationStrategy {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "plain" | "none" => Ok(Self::Plain),
            "long_message" | "long" => Ok(Self::LongMessage),
            "sar" => Ok(Self::Sar),
            "udh" => Ok(Self::Udh),
            other => Err(TransportError::Config(format!(
                "Unknown fragmentation strategy {:?}",
                other
            ))),
        }
    }
}

/// Build the PDUs for `body` from `template`, which carries addressing,
/// data coding and any optional parameters shared by every segment.
///
/// `reference` links the segments of a multipart message together.
pub fn fragment(
    template: &ShortMessage,
    body: &[u8],
    strategy: FragmentationStrategy,
    csm_split_length: usize,
    reference: u16,
) -> Result<Vec<ShortMessage>> {
    let split = csm_split_length.max(1);
    match strategy {
        FragmentationStrategy::Plain => Ok(vec![single(template, body)]),
        FragmentationStrategy::LongMessage => {
            let mut sm = template.clone();
            sm.short_message = Bytes::new();
            sm.optional_parameters
                .push(Tlv::new(tag::MESSAGE_PAYLOAD, Bytes::copy_from_slice(body)));
            Ok(vec![sm])
        }
        FragmentationStrategy::Sar | FragmentationStrategy::Udh if body.len() <= split => {
            Ok(vec![single(template, body)])
        }
        FragmentationStrategy::Sar => {
            let chunks = chunk(body, split)?;
            let total = chunks.len() as u8;
            Ok(chunks
                .into_iter()
                .enumerate()
                .map(|(i, part)| {
                    let mut sm = single(template, part);
                    sm.optional_parameters.extend([
                        Tlv::u16(tag::SAR_MSG_REF_NUM, reference),
                        Tlv::u8(tag::SAR_TOTAL_SEGMENTS, total),
                        Tlv::u8(tag::SAR_SEGMENT_SEQNUM, i as u8 + 1),
                    ]);
                    sm
                })
                .collect())
        }
        FragmentationStrategy::Udh => {
            let chunks = chunk(body, split)?;
            let total = chunks.len() as u8;
            // 8-bit reference concatenation element
            let reference = (reference & 0xFF) as u8;
            Ok(chunks
                .into_iter()
                .enumerate()
                .map(|(i, part)| {
                    let mut payload = BytesMut::with_capacity(6 + part.len());
                    payload.put_slice(&[0x05, 0x00, 0x03, reference, total, i as u8 + 1]);
                    payload.put_slice(part);
                    let mut sm = template.clone();
                    sm.esm_class |= ESM_CLASS_UDHI;
                    sm.short_message = payload.freeze();
                    sm
                })
                .collect())
        }
    }
}

fn single(template: &ShortMessage, body: &[u8]) -> ShortMessage {
    let mut sm = template.clone();
    sm.short_message = Bytes::copy_from_slice(body);
    sm
}

fn chunk(body: &[u8], split: usize) -> Result<Vec<&[u8]>> {
    let chunks: Vec<&[u8]> = body.chunks(split).collect();
    if chunks.len() > MAX_SEGMENTS {
        return Err(TransportError::MessageTooLong {
            segments: chunks.len(),
        });
    }
    Ok(chunks)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template() -> ShortMessage {
        ShortMessage {
            destination_addr: "27831234567".into(),
            source_addr: "12345".into(),
            optional_parameters: vec![Tlv::u8(tag::USSD_SERVICE_OP, 2)],
            ..Default::default()
        }
    }

    #[test]
    fn test_plain_and_long_message() {
        let body = vec![b'a'; 200];
        let plain = fragment(&template(), &body, FragmentationStrategy::Plain, 130, 1).unwrap();
        assert_eq!(plain.len(), 1);
        assert_eq!(plain[0].short_message.len(), 200);

        let long = fragment(&template(), &body, FragmentationStrategy::LongMessage, 130, 1).unwrap();
        assert_eq!(long.len(), 1);
        assert!(long[0].short_message.is_empty());
        assert_eq!(long[0].tlv(tag::MESSAGE_PAYLOAD).unwrap().value.len(), 200);
        assert!(long[0].tlv(tag::USSD_SERVICE_OP).is_some());
    }

    #[test]
    fn test_sar_segments() {
        let body = vec![b'x'; 300];
        let parts = fragment(&template(), &body, FragmentationStrategy::Sar, 130, 0xBEEF).unwrap();
        assert_eq!(parts.len(), 3);
        for (i, part) in parts.iter().enumerate() {
            assert_eq!(part.tlv(tag::SAR_MSG_REF_NUM).unwrap().as_u16(), Some(0xBEEF));
            assert_eq!(part.tlv(tag::SAR_TOTAL_SEGMENTS).unwrap().as_u8(), Some(3));
            assert_eq!(part.tlv(tag::SAR_SEGMENT_SEQNUM).unwrap().as_u8(), Some(i as u8 + 1));
            assert!(part.tlv(tag::USSD_SERVICE_OP).is_some());
        }
        assert_eq!(parts[2].short_message.len(), 40);
    }

    #[test]
    fn test_short_body_is_not_split() {
        let parts = fragment(&template(), b"hello", FragmentationStrategy::Sar, 130, 1).unwrap();
        assert_eq!(parts.len(), 1);
        assert!(parts[0].tlv(tag::SAR_MSG_REF_NUM).is_none());

        let parts = fragment(&template(), b"hello", FragmentationStrategy::Udh, 130, 1).unwrap();
        assert_eq!(parts[0].esm_class & ESM_CLASS_UDHI, 0);
    }

    #[test]
    fn test_udh_segments() {
        let body = vec![b'y'; 150];
        let parts = fragment(&template(), &body, FragmentationStrategy::Udh, 130, 0x0142).unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(&parts[0].short_message[..6], &[0x05, 0x00, 0x03, 0x42, 2, 1]);
        assert_eq!(&parts[1].short_message[..6], &[0x05, 0x00, 0x03, 0x42, 2, 2]);
        assert_eq!(parts[1].short_message.len(), 6 + 20);
        assert!(parts.iter().all(|p| p.esm_class & ESM_CLASS_UDHI != 0));
    }

    #[test]
    fn test_too_many_segments() {
        let body = vec![0u8; 256 * 10];
        assert!(matches!(
            fragment(&template(), &body, FragmentationStrategy::Sar, 10, 1),
            Err(TransportError::MessageTooLong { segments: 256 })
        ));
    }
}
