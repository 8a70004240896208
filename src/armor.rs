//! Armor framing.
//!
//! rpgp's [`Dearmor`] decodes the base64 body. This module finds the blocks
//! in a text, normalizes the framing variants seen in the wild (CRLF, no
//! blank line after the BEGIN marker, `PGP SECRET KEY BLOCK`, a CRC glued to
//! the end of the body) and rejects a CRC24 footer that does not match.

use std::io::{BufReader, Cursor, Read};

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use pgp::armor::Dearmor;

const BEGIN: &str = "-----BEGIN PGP ";
const END: &str = "-----END PGP ";
const DASHES: &str = "-----";
const LINE_WIDTH: usize = 64;

const CRC24_INIT: u32 = 0x00B7_04CE;
const CRC24_POLY: u32 = 0x0186_4CFB;

pub(crate) const SIGNATURE_LABEL: &str = "SIGNATURE";
const PUBLIC_KEY_LABEL: &str = "PUBLIC KEY BLOCK";
const PRIVATE_KEY_LABEL: &str = "PRIVATE KEY BLOCK";
const SECRET_KEY_LABEL: &str = "SECRET KEY BLOCK";

/// One armored block as found in a text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ArmoredBlock {
    label: String,
    headers: Vec<String>,
    body: String,
    checksum: Option<String>,
}

impl ArmoredBlock {
    /// A block around a compact body, which may end in `=XXXX`.
    pub(crate) fn from_body(label: &str, body: &str) -> Self {
        let (body, checksum) = split_checksum(body);
        Self {
            label: label.to_string(),
            headers: Vec::new(),
            body: body.to_string(),
            checksum: checksum.map(str::to_string),
        }
    }

    /// Text between the markers, e.g. `PUBLIC KEY BLOCK`.
    pub(crate) fn label(&self) -> &str {
        &self.label
    }

    pub(crate) fn is_key_block(&self) -> bool {
        self.label == PUBLIC_KEY_LABEL || self.label == PRIVATE_KEY_LABEL
    }

    /// Decode the body. A CRC24 footer, when present, must match the data.
    pub(crate) fn decode(&self) -> Result<Vec<u8>, String> {
        let text = self.to_text();
        let mut data = Vec::new();
        let mut reader = BufReader::new(Dearmor::new(Cursor::new(text.as_bytes())));
        reader
            .read_to_end(&mut data)
            .map_err(|e| format!("{} block: {}", self.label, e))?;

        if let Some(expected) = &self.checksum {
            let actual = checksum(&data);
            if &actual != expected {
                return Err(format!(
                    "{} block: checksum mismatch (footer {}, data {})",
                    self.label, expected, actual
                ));
            }
        }
        Ok(data)
    }

    /// Canonical framing: headers, a blank line, 64 column body, `=XXXX`.
    fn to_text(&self) -> String {
        let mut out = format!("{}{}{}\n", BEGIN, self.label, DASHES);
        for header in &self.headers {
            out.push_str(header);
            out.push('\n');
        }
        out.push('\n');
        // the body is ASCII, checked when the block was read
        for chunk in self.body.as_bytes().chunks(LINE_WIDTH) {
            out.push_str(&String::from_utf8_lossy(chunk));
            out.push('\n');
        }
        if let Some(checksum) = &self.checksum {
            out.push('=');
            out.push_str(checksum);
            out.push('\n');
        }
        out.push_str(&format!("{}{}{}\n", END, self.label, DASHES));
        out
    }
}

/// Every armored block in `text`, in order. Text outside blocks is ignored.
pub(crate) fn parse_blocks(text: &str) -> Result<Vec<ArmoredBlock>, String> {
    let mut blocks = Vec::new();
    let mut lines = text.lines();

    while let Some(line) = lines.next() {
        let Some(label) = line
            .trim()
            .strip_prefix(BEGIN)
            .and_then(|rest| rest.strip_suffix(DASHES))
        else {
            continue;
        };
        let label = match label {
            SECRET_KEY_LABEL => PRIVATE_KEY_LABEL.to_string(),
            other => other.to_string(),
        };

        let mut headers = Vec::new();
        let mut body = String::new();
        let mut checksum = None;
        let mut in_headers = true;
        let mut closed = false;

        for line in lines.by_ref() {
            let line = line.trim();
            if line.starts_with(END) {
                closed = true;
                break;
            }
            if in_headers {
                if line.is_empty() {
                    in_headers = false;
                    continue;
                }
                if line.contains(": ") {
                    headers.push(line.to_string());
                    continue;
                }
                in_headers = false;
            }
            if line.is_empty() {
                continue;
            }
            match line.strip_prefix('=') {
                Some(crc) if crc.len() == 4 => checksum = Some(crc.to_string()),
                _ => body.push_str(line),
            }
        }

        if !closed {
            return Err(format!("{} block has no END marker", label));
        }
        if !body.is_ascii() {
            return Err(format!("{} block body is not base64", label));
        }

        let (body, embedded) = split_checksum(&body);
        blocks.push(ArmoredBlock {
            label,
            headers,
            body: body.to_string(),
            checksum: checksum.or_else(|| embedded.map(str::to_string)),
        });
    }

    Ok(blocks)
}

/// Split `BASE64=XXXX` into the body and its CRC.
///
/// The CRC is only recognized on a quantum boundary: base64 without a CRC
/// never has `=` five characters from the end.
pub(crate) fn split_checksum(body: &str) -> (&str, Option<&str>) {
    let bytes = body.as_bytes();
    let len = bytes.len();
    if len >= 5 && bytes[len - 5] == b'=' && (len - 5) % 4 == 0 {
        // `=` is one byte, so both split points are char boundaries
        (&body[..len - 5], Some(&body[len - 4..]))
    } else {
        (body, None)
    }
}

/// CRC24 of `data` (RFC 4880, section 6.1), base64 encoded.
pub(crate) fn checksum(data: &[u8]) -> String {
    let mut crc = CRC24_INIT;
    for byte in data {
        crc ^= u32::from(*byte) << 16;
        for _ in 0..8 {
            crc <<= 1;
            if crc & 0x0100_0000 != 0 {
                crc ^= CRC24_POLY;
            }
        }
    }
    STANDARD.encode(&(crc & 0x00FF_FFFF).to_be_bytes()[1..])
}

/// Armor `data` without headers.
#[cfg(test)]
pub(crate) fn encode(label: &str, data: &[u8]) -> String {
    let block = ArmoredBlock {
        label: label.to_string(),
        headers: Vec::new(),
        body: STANDARD.encode(data),
        checksum: Some(checksum(data)),
    };
    block.to_text()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum() {
        assert_eq!(checksum(b""), "twTO");
        assert_eq!(checksum(b"HUEBR").len(), 4);
        assert_ne!(checksum(b"HUEBR"), checksum(b"HUEBS"));
    }

    #[test]
    fn test_split_checksum() {
        assert_eq!(split_checksum("wsBcTEo==uzle"), ("wsBcTEo=", Some("uzle")));
        assert_eq!(split_checksum("SFVFQlI="), ("SFVFQlI=", None));
        assert_eq!(split_checksum("AAAA"), ("AAAA", None));
        assert_eq!(split_checksum("€€"), ("€€", None));
    }

    #[test]
    fn test_decode_round_trip() {
        let text = encode(SIGNATURE_LABEL, b"HUEBR");
        let blocks = parse_blocks(&text).unwrap();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].label(), SIGNATURE_LABEL);
        assert_eq!(blocks[0].decode().unwrap(), b"HUEBR");
    }

    #[test]
    fn test_tolerated_framing() {
        let crc = checksum(b"HUEBR");
        let text = format!(
            "junk\r\n-----BEGIN PGP SECRET KEY BLOCK-----\r\nVersion: test\r\nSFVFQlI=\r\n={}\r\n-----END PGP SECRET KEY BLOCK-----\r\n",
            crc
        );
        let blocks = parse_blocks(&text).unwrap();
        assert_eq!(blocks[0].label(), PRIVATE_KEY_LABEL);
        assert!(blocks[0].is_key_block());
        assert_eq!(blocks[0].decode().unwrap(), b"HUEBR");

        let embedded = format!(
            "-----BEGIN PGP SIGNATURE-----\n\nSFVFQlI={}\n-----END PGP SIGNATURE-----\n",
            crc
        );
        assert_eq!(parse_blocks(&embedded).unwrap()[0].decode().unwrap(), b"HUEBR");
    }

    #[test]
    fn test_bad_checksum_rejected() {
        let block = ArmoredBlock::from_body(SIGNATURE_LABEL, "SFVFQlI==AAAA");
        assert!(block.decode().is_err());
    }

    #[test]
    fn test_unterminated_block() {
        assert!(parse_blocks("-----BEGIN PGP SIGNATURE-----\n\nSFVFQlI=\n").is_err());
        assert!(parse_blocks("no armor here").unwrap().is_empty());
    }
}
