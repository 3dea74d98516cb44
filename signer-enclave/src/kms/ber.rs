//! BER to DER normalization for CMS payloads.
//!
//! KMS emits `CiphertextForRecipient` with BER indefinite lengths and may
//! segment octet strings, while the `cms` crate only decodes DER. This module
//! re-encodes such input with definite minimal lengths, joins segmented octet
//! strings and sorts `SET OF` members.

use std::borrow::Cow;

use super::KmsError;

const MAX_DEPTH: usize = 32;

const OCTET_STRING: &[u8] = &[0x04];
const OCTET_STRING_CONSTRUCTED: &[u8] = &[0x24];
const OBJECT_IDENTIFIER: &[u8] = &[0x06];
const SEQUENCE: &[u8] = &[0x30];
const SET: &[u8] = &[0x31];
const CONTEXT_0_CONSTRUCTED: &[u8] = &[0xa0];
const CONTEXT_0_PRIMITIVE: &[u8] = &[0x80];

/// Position of `encryptedContent [0] IMPLICIT OCTET STRING` in `EncryptedContentInfo`
const ENCRYPTED_CONTENT_INDEX: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Tlv<'a> {
    identifier: &'a [u8],
    body: Body<'a>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Body<'a> {
    Primitive(Cow<'a, [u8]>),
    Constructed(Vec<Tlv<'a>>),
}

/// Re-encodes a BER value as DER.
///
/// DER input comes back unchanged.
///
/// # Errors
/// Returns `Envelope` on truncated input, trailing bytes, indefinite length
/// primitives, a missing end-of-contents marker or excessive nesting.
pub fn to_der(input: &[u8]) -> Result<Vec<u8>, KmsError> {
    let (value, rest) = parse(input, 0)?;
    if !rest.is_empty() {
        return Err(malformed("trailing data after the outer value"));
    }

    let mut out = Vec::with_capacity(input.len());
    normalize(value)?.encode(&mut out);
    Ok(out)
}

fn parse(input: &[u8], depth: usize) -> Result<(Tlv<'_>, &[u8]), KmsError> {
    if depth > MAX_DEPTH {
        return Err(malformed("nesting too deep"));
    }

    let (identifier, rest) = split_identifier(input)?;
    let constructed = identifier[0] & 0x20 != 0;

    let (&first, rest) = rest
        .split_first()
        .ok_or_else(|| malformed("truncated length"))?;

    if first == 0x80 {
        if !constructed {
            return Err(malformed("indefinite length on a primitive value"));
        }
        let mut children = Vec::new();
        let mut rest = rest;
        loop {
            if let Some(after) = rest.strip_prefix(&[0x00, 0x00]) {
                let tlv = Tlv {
                    identifier,
                    body: Body::Constructed(children),
                };
                return Ok((tlv, after));
            }
            if rest.is_empty() {
                return Err(malformed("missing end-of-contents"));
            }
            let (child, after) = parse(rest, depth + 1)?;
            children.push(child);
            rest = after;
        }
    }

    let (length, rest) = definite_length(first, rest)?;
    if rest.len() < length {
        return Err(malformed("truncated contents"));
    }
    let (contents, rest) = rest.split_at(length);

    let body = if constructed {
        let mut children = Vec::new();
        let mut remaining = contents;
        while !remaining.is_empty() {
            let (child, after) = parse(remaining, depth + 1)?;
            children.push(child);
            remaining = after;
        }
        Body::Constructed(children)
    } else {
        Body::Primitive(Cow::Borrowed(contents))
    };

    Ok((Tlv { identifier, body }, rest))
}

fn split_identifier(input: &[u8]) -> Result<(&[u8], &[u8]), KmsError> {
    let first = *input.first().ok_or_else(|| malformed("truncated identifier"))?;
    if first & 0x1f != 0x1f {
        return Ok(input.split_at(1));
    }

    // High tag number form, continued while bit 8 is set
    let continuation = input[1..]
        .iter()
        .position(|b| b & 0x80 == 0)
        .ok_or_else(|| malformed("truncated identifier"))?;
    Ok(input.split_at(continuation + 2))
}

fn definite_length(first: u8, rest: &[u8]) -> Result<(usize, &[u8]), KmsError> {
    if first & 0x80 == 0 {
        return Ok((usize::from(first), rest));
    }

    let count = usize::from(first & 0x7f);
    if count == 0x7f || count > std::mem::size_of::<usize>() {
        return Err(malformed("unsupported length encoding"));
    }
    if rest.len() < count {
        return Err(malformed("truncated length"));
    }
    let (bytes, rest) = rest.split_at(count);
    let length = bytes
        .iter()
        .fold(0usize, |length, byte| (length << 8) | usize::from(*byte));
    Ok((length, rest))
}

fn normalize(tlv: Tlv<'_>) -> Result<Tlv<'_>, KmsError> {
    let Tlv { identifier, body } = tlv;
    let children = match body {
        Body::Constructed(children) => children,
        primitive @ Body::Primitive(_) => {
            return Ok(Tlv {
                identifier,
                body: primitive,
            })
        }
    };

    let mut children = children
        .into_iter()
        .map(normalize)
        .collect::<Result<Vec<_>, _>>()?;

    if identifier == OCTET_STRING_CONSTRUCTED {
        let joined = join_segments(&children)
            .ok_or_else(|| malformed("constructed octet string with non octet string segment"))?;
        return Ok(Tlv {
            identifier: OCTET_STRING,
            body: Body::Primitive(Cow::Owned(joined)),
        });
    }

    if identifier == SEQUENCE && is_encrypted_content_info(&children) {
        let encrypted = &mut children[ENCRYPTED_CONTENT_INDEX];
        if let Body::Constructed(segments) = &encrypted.body {
            if let Some(joined) = join_segments(segments) {
                *encrypted = Tlv {
                    identifier: CONTEXT_0_PRIMITIVE,
                    body: Body::Primitive(Cow::Owned(joined)),
                };
            }
        }
    }

    if identifier == SET {
        children.sort_by_cached_key(|child| child.to_vec());
    }

    Ok(Tlv {
        identifier,
        body: Body::Constructed(children),
    })
}

fn is_encrypted_content_info(children: &[Tlv<'_>]) -> bool {
    children.len() > ENCRYPTED_CONTENT_INDEX
        && children[0].identifier == OBJECT_IDENTIFIER
        && children[ENCRYPTED_CONTENT_INDEX].identifier == CONTEXT_0_CONSTRUCTED
}

fn join_segments(segments: &[Tlv<'_>]) -> Option<Vec<u8>> {
    let mut joined = Vec::new();
    for segment in segments {
        match &segment.body {
            Body::Primitive(bytes) if segment.identifier == OCTET_STRING => {
                joined.extend_from_slice(bytes);
            }
            _ => return None,
        }
    }
    Some(joined)
}

impl Tlv<'_> {
    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self.identifier);
        match &self.body {
            Body::Primitive(contents) => {
                encode_length(contents.len(), out);
                out.extend_from_slice(contents);
            }
            Body::Constructed(children) => {
                let mut contents = Vec::new();
                for child in children {
                    child.encode(&mut contents);
                }
                encode_length(contents.len(), out);
                out.extend_from_slice(&contents);
            }
        }
    }

    fn to_vec(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.encode(&mut out);
        out
    }
}

#[allow(clippy::cast_possible_truncation)]
fn encode_length(length: usize, out: &mut Vec<u8>) {
    if length < 0x80 {
        out.push(length as u8);
        return;
    }
    let bytes = length.to_be_bytes();
    let skip = bytes.iter().take_while(|b| **b == 0).count();
    out.push(0x80 | (bytes.len() - skip) as u8);
    out.extend_from_slice(&bytes[skip..]);
}

fn malformed(reason: &str) -> KmsError {
    KmsError::Envelope(format!("malformed BER: {reason}"))
}

/// Re-encodes DER with indefinite lengths everywhere and splits long octet
/// strings, including the encrypted content, into 16 byte segments.
#[cfg(test)]
pub(super) fn to_indefinite_ber(der: &[u8]) -> Vec<u8> {
    fn write(tlv: &Tlv<'_>, segment_context: bool, out: &mut Vec<u8>) {
        match &tlv.body {
            Body::Primitive(contents)
                if contents.len() > 16
                    && (tlv.identifier == OCTET_STRING
                        || (segment_context && tlv.identifier == CONTEXT_0_PRIMITIVE)) =>
            {
                let constructed = if tlv.identifier == OCTET_STRING {
                    OCTET_STRING_CONSTRUCTED
                } else {
                    CONTEXT_0_CONSTRUCTED
                };
                out.extend_from_slice(constructed);
                out.push(0x80);
                for chunk in contents.chunks(16) {
                    Tlv {
                        identifier: OCTET_STRING,
                        body: Body::Primitive(Cow::Borrowed(chunk)),
                    }
                    .encode(out);
                }
                out.extend_from_slice(&[0x00, 0x00]);
            }
            Body::Primitive(_) => tlv.encode(out),
            Body::Constructed(children) => {
                let encrypted_content_info =
                    tlv.identifier == SEQUENCE && children.len() > ENCRYPTED_CONTENT_INDEX
                        && children[0].identifier == OBJECT_IDENTIFIER;
                out.extend_from_slice(tlv.identifier);
                out.push(0x80);
                for (index, child) in children.iter().enumerate() {
                    let segment =
                        encrypted_content_info && index == ENCRYPTED_CONTENT_INDEX;
                    write(child, segment, out);
                }
                out.extend_from_slice(&[0x00, 0x00]);
            }
        }
    }

    let (value, _) = parse(der, 0).unwrap();
    let mut out = Vec::new();
    write(&value, false, &mut out);
    out
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_der_passes_through_unchanged() {
        let der = [0x30, 0x08, 0x02, 0x01, 0x05, 0x04, 0x03, 0xaa, 0xbb, 0xcc];
        assert_eq!(to_der(&der).unwrap(), der.to_vec());
    }

    #[test]
    fn test_indefinite_lengths_become_definite() {
        let ber = [
            0x30, 0x80, 0x30, 0x80, 0x04, 0x01, 0xaa, 0x00, 0x00, 0x02, 0x01, 0x05, 0x00, 0x00,
        ];
        assert_eq!(
            to_der(&ber).unwrap(),
            vec![0x30, 0x08, 0x30, 0x03, 0x04, 0x01, 0xaa, 0x02, 0x01, 0x05]
        );
    }

    #[test]
    fn test_segmented_octet_string_is_joined() {
        let ber = [
            0x24, 0x80, 0x04, 0x02, 0x01, 0x02, 0x24, 0x80, 0x04, 0x01, 0x03, 0x00, 0x00, 0x00,
            0x00,
        ];
        assert_eq!(to_der(&ber).unwrap(), vec![0x04, 0x03, 0x01, 0x02, 0x03]);
    }

    #[test]
    fn test_segmented_encrypted_content_becomes_implicit_primitive() {
        // EncryptedContentInfo { OID, AlgorithmIdentifier, [0] { "\xaa\xbb", "\xcc" } }
        let ber = [
            0x30, 0x80, 0x06, 0x01, 0x2a, 0x30, 0x00, 0xa0, 0x80, 0x04, 0x02, 0xaa, 0xbb, 0x04,
            0x01, 0xcc, 0x00, 0x00, 0x00, 0x00,
        ];
        assert_eq!(
            to_der(&ber).unwrap(),
            vec![0x30, 0x0a, 0x06, 0x01, 0x2a, 0x30, 0x00, 0x80, 0x03, 0xaa, 0xbb, 0xcc]
        );
    }

    #[test]
    fn test_explicit_context_tag_elsewhere_is_kept() {
        // ContentInfo shape: the [0] sits at index 1 and stays constructed
        let ber = [0x30, 0x80, 0x06, 0x01, 0x2a, 0xa0, 0x80, 0x04, 0x01, 0xaa, 0x00, 0x00, 0x00, 0x00];
        assert_eq!(
            to_der(&ber).unwrap(),
            vec![0x30, 0x08, 0x06, 0x01, 0x2a, 0xa0, 0x03, 0x04, 0x01, 0xaa]
        );
    }

    #[test]
    fn test_lengths_are_minimal() {
        assert_eq!(
            to_der(&[0x04, 0x82, 0x00, 0x02, 0xaa, 0xbb]).unwrap(),
            vec![0x04, 0x02, 0xaa, 0xbb]
        );

        let mut ber = vec![0x30, 0x80, 0x04, 0x81, 0xc8];
        ber.extend_from_slice(&[0x11; 200]);
        ber.extend_from_slice(&[0x00, 0x00]);

        let der = to_der(&ber).unwrap();
        assert_eq!(&der[..6], &[0x30, 0x81, 0xcb, 0x04, 0x81, 0xc8]);
        assert_eq!(der.len(), 206);
    }

    #[test]
    fn test_set_members_are_sorted() {
        let ber = [0x31, 0x80, 0x02, 0x01, 0x07, 0x02, 0x01, 0x03, 0x00, 0x00];
        assert_eq!(
            to_der(&ber).unwrap(),
            vec![0x31, 0x06, 0x02, 0x01, 0x03, 0x02, 0x01, 0x07]
        );
    }

    #[test]
    fn test_high_tag_numbers_are_preserved() {
        let ber = [0x30, 0x80, 0x9f, 0x81, 0x00, 0x01, 0xaa, 0x00, 0x00];
        assert_eq!(
            to_der(&ber).unwrap(),
            vec![0x30, 0x05, 0x9f, 0x81, 0x00, 0x01, 0xaa]
        );
    }

    #[test]
    fn test_malformed_input_is_rejected() {
        let cases: [&[u8]; 6] = [
            &[0x30, 0x80, 0x02, 0x01, 0x05],
            &[0x04, 0x05, 0xaa],
            &[0x02, 0x01, 0x05, 0xff],
            &[0x04, 0x80, 0xaa, 0x00, 0x00],
            &[0x24, 0x80, 0x02, 0x01, 0x05, 0x00, 0x00],
            &[],
        ];

        for case in cases {
            assert!(
                matches!(to_der(case), Err(KmsError::Envelope(_))),
                "{}",
                hex::encode(case)
            );
        }
    }

    #[test]
    fn test_excessive_nesting_is_rejected() {
        let mut ber = [0x30, 0x80].repeat(MAX_DEPTH + 2);
        ber.extend_from_slice(&[0x00, 0x00].repeat(MAX_DEPTH + 2));

        assert!(matches!(to_der(&ber), Err(KmsError::Envelope(_))));
    }

    #[test]
    fn test_indefinite_fixture_round_trips_to_der() {
        let der = [0x30, 0x0a, 0x06, 0x01, 0x2a, 0x30, 0x00, 0x80, 0x03, 0xaa, 0xbb, 0xcc];
        let ber = to_indefinite_ber(&der);

        assert_eq!(&ber[..2], &[0x30, 0x80]);
        assert_eq!(to_der(&ber).unwrap(), der.to_vec());
    }
}
