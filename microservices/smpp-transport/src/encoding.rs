//! Text encoding for short message bodies

use encoding_rs::{Encoding, UTF_16BE, WINDOWS_1252};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TransportError};

/// What to do with inbound bytes that cannot be decoded as text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UndecodablePolicy {
    /// Publish the raw bytes hex-encoded
    #[default]
    Hex,
    Drop,
}

impl std::str::FromStr for UndecodablePolicy {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "hex" => Ok(Self::Hex),
            "drop" => Ok(Self::Drop),
            other => Err(TransportError::Config(format!(
                "Unknown undecodable content policy {:?}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedContent {
    Text(String),
    /// Hex rendering of bytes that were not decodable
    Hex(String),
}

fn is_utf16_label(label: &str) -> bool {
    matches!(
        label.to_ascii_lowercase().as_str(),
        "utf-16be" | "utf16be" | "ucs2" | "ucs-2" | "utf-16" | "utf16"
    )
}

fn is_ascii_label(label: &str) -> bool {
    matches!(label.to_ascii_lowercase().as_str(), "ascii" | "us-ascii")
}

/// Whether `label` names an encoding this module can handle
pub fn is_known_encoding(label: &str) -> bool {
    is_utf16_label(label) || is_ascii_label(label) || Encoding::for_label(label.as_bytes()).is_some()
}

/// Encode outbound text with the configured encoding label
pub fn encode_text(text: &str, label: &str) -> Result<Vec<u8>> {
    if is_utf16_label(label) {
        return Ok(text.encode_utf16().flat_map(u16::to_be_bytes).collect());
    }
    if is_ascii_label(label) {
        if !text.is_ascii() {
            return Err(TransportError::UnencodableContent(format!(
                "text is not representable in {}",
                label
            )));
        }
        return Ok(text.as_bytes().to_vec());
    }

    let encoding = Encoding::for_label(label.as_bytes())
        .ok_or_else(|| TransportError::UnencodableContent(format!("unknown encoding {:?}", label)))?;
    let (bytes, _, had_errors) = encoding.encode(text);
    if had_errors {
        return Err(TransportError::UnencodableContent(format!(
            "text is not representable in {}",
            encoding.name()
        )));
    }
    Ok(bytes.into_owned())
}

fn decode_with_label(bytes: &[u8], label: &str) -> Option<String> {
    if is_utf16_label(label) {
        return decode_strict(bytes, UTF_16BE);
    }
    if is_ascii_label(label) {
        return bytes.is_ascii().then(|| String::from_utf8_lossy(bytes).into_owned());
    }
    Encoding::for_label(label.as_bytes()).and_then(|encoding| decode_strict(bytes, encoding))
}

fn decode_strict(bytes: &[u8], encoding: &'static Encoding) -> Option<String> {
    encoding
        .decode_without_bom_handling_and_without_replacement(bytes)
        .map(|text| text.into_owned())
}

/// Decode an inbound body according to its `data_coding`.
///
/// 0 uses `default_encoding`, 1 is ASCII, 3 is Latin-1 and 8 is UCS-2.
/// 2 and 4 are binary and always go through `policy`. Unknown codings
/// are rejected.
pub fn decode_short_message(
    bytes: &[u8],
    data_coding: u8,
    default_encoding: &str,
    policy: UndecodablePolicy,
) -> Result<DecodedContent> {
    let decoded = match data_coding {
        0 => decode_with_label(bytes, default_encoding),
        1 => decode_with_label(bytes, "ascii"),
        3 => decode_strict(bytes, WINDOWS_1252),
        8 => decode_strict(bytes, UTF_16BE),
        2 | 4 => None,
        other => {
            return Err(TransportError::UnencodableContent(format!(
                "unsupported data_coding {}",
                other
            )))
        }
    };

    match (decoded, policy) {
        (Some(text), _) => Ok(DecodedContent::Text(text)),
        (None, UndecodablePolicy::Hex) => Ok(DecodedContent::Hex(hex::encode(bytes))),
        (None, UndecodablePolicy::Drop) => Err(TransportError::UnencodableContent(format!(
            "{} octets with data_coding {} are not text",
            bytes.len(),
            data_coding
        ))),
    }
}
