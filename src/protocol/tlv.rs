//! BER-TLV reading and writing for PIV data objects
//!
//! Tags are one or two bytes (`7C`, `7F49`); lengths use the short form or
//! the `81`/`82` long forms.

use thiserror::Error;

/// One decoded tag/value pair borrowing from the input buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tlv<'a> {
    pub tag: u16,
    pub value: &'a [u8],
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TlvError {
    #[error("TLV truncated at offset {offset}")]
    Truncated { offset: usize },

    #[error("Unsupported TLV length byte {byte:#04x}")]
    UnsupportedLength { byte: u8 },

    #[error("Missing tag {tag:#06x}")]
    MissingTag { tag: u16 },

    #[error("Value of {len} bytes for tag {tag:#06x} exceeds the 0xFFFF length limit")]
    TooLong { tag: u16, len: usize },
}

/// Longest value the `82` length form can describe
pub const MAX_VALUE_LEN: usize = 0xFFFF;

/// Parse every top-level TLV in `data`
pub fn parse_all(data: &[u8]) -> Result<Vec<Tlv<'_>>, TlvError> {
    let mut out = Vec::new();
    let mut offset = 0;
    while offset < data.len() {
        let (tlv, next) = parse_one(data, offset)?;
        out.push(tlv);
        offset = next;
    }
    Ok(out)
}

/// Value of the first top-level `tag`, if present
pub fn find(data: &[u8], tag: u16) -> Result<Option<&[u8]>, TlvError> {
    Ok(parse_all(data)?
        .into_iter()
        .find(|tlv| tlv.tag == tag)
        .map(|tlv| tlv.value))
}

/// Value of `tag`, failing when absent
pub fn require(data: &[u8], tag: u16) -> Result<&[u8], TlvError> {
    find(data, tag)?.ok_or(TlvError::MissingTag { tag })
}

fn parse_one(data: &[u8], start: usize) -> Result<(Tlv<'_>, usize), TlvError> {
    let byte = |i: usize| data.get(i).copied().ok_or(TlvError::Truncated { offset: i });

    let mut offset = start;
    let first = byte(offset)?;
    offset += 1;
    let tag = if first & 0x1F == 0x1F {
        let second = byte(offset)?;
        offset += 1;
        (u16::from(first) << 8) | u16::from(second)
    } else {
        u16::from(first)
    };

    let len_byte = byte(offset)?;
    offset += 1;
    let len = match len_byte {
        0x00..=0x7F => usize::from(len_byte),
        0x81 => {
            let l = byte(offset)?;
            offset += 1;
            usize::from(l)
        }
        0x82 => {
            let hi = byte(offset)?;
            let lo = byte(offset + 1)?;
            offset += 2;
            (usize::from(hi) << 8) | usize::from(lo)
        }
        other => return Err(TlvError::UnsupportedLength { byte: other }),
    };

    let end = offset + len;
    if end > data.len() {
        return Err(TlvError::Truncated { offset: data.len() });
    }
    Ok((
        Tlv {
            tag,
            value: &data[offset..end],
        },
        end,
    ))
}

/// Encode a single TLV
pub fn encode(tag: u16, value: &[u8]) -> Result<Vec<u8>, TlvError> {
    let mut out = Vec::with_capacity(value.len() + 5);
    if tag > 0xFF {
        out.push((tag >> 8) as u8);
    }
    out.push(tag as u8);
    match value.len() {
        len @ 0..=0x7F => out.push(len as u8),
        len @ 0x80..=0xFF => out.extend_from_slice(&[0x81, len as u8]),
        len @ 0x100..=MAX_VALUE_LEN => out.extend_from_slice(&[0x82, (len >> 8) as u8, len as u8]),
        len => return Err(TlvError::TooLong { tag, len }),
    }
    out.extend_from_slice(value);
    Ok(out)
}

/// Accumulates sibling TLVs, optionally wrapping them in a template tag
///
/// The first encoding failure is kept and reported by `build` or `wrap`.
#[derive(Debug, Default, Clone)]
pub struct TlvBuilder {
    buffer: Vec<u8>,
    error: Option<TlvError>,
}

impl TlvBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(mut self, tag: u16, value: &[u8]) -> Self {
        if self.error.is_none() {
            match encode(tag, value) {
                Ok(bytes) => self.buffer.extend_from_slice(&bytes),
                Err(err) => self.error = Some(err),
            }
        }
        self
    }

    /// Push `inner` as the value of `tag`
    pub fn nest(self, tag: u16, inner: TlvBuilder) -> Self {
        match inner.build() {
            Ok(bytes) => self.push(tag, &bytes),
            Err(err) => self.fail(err),
        }
    }

    fn fail(mut self, err: TlvError) -> Self {
        self.error.get_or_insert(err);
        self
    }

    pub fn build(self) -> Result<Vec<u8>, TlvError> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.buffer),
        }
    }

    pub fn wrap(self, template: u16) -> Result<Vec<u8>, TlvError> {
        encode(template, &self.build()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_template() {
        let data = TlvBuilder::new()
            .push(0x80, &[])
            .push(0x81, &[1, 2, 3])
            .wrap(0x7C)
            .unwrap();
        assert_eq!(data, vec![0x7C, 0x07, 0x80, 0x00, 0x81, 0x03, 1, 2, 3]);

        let inner = require(&data, 0x7C).unwrap();
        let tlvs = parse_all(inner).unwrap();
        assert_eq!(tlvs.len(), 2);
        assert_eq!(tlvs[1], Tlv { tag: 0x81, value: &[1, 2, 3] });
    }

    #[test]
    fn test_two_byte_tag() {
        let data = TlvBuilder::new().push(0x86, &[0x04; 65]).wrap(0x7F49).unwrap();
        assert_eq!(&data[..2], &[0x7F, 0x49]);
        let point = require(require(&data, 0x7F49).unwrap(), 0x86).unwrap();
        assert_eq!(point.len(), 65);
    }

    #[test]
    fn test_long_form_lengths() {
        let short = encode(0x82, &[0u8; 0x80]).unwrap();
        assert_eq!(&short[..3], &[0x82, 0x81, 0x80]);
        let long = encode(0x53, &[0u8; 300]).unwrap();
        assert_eq!(&long[..4], &[0x53, 0x82, 0x01, 0x2C]);
        assert_eq!(require(&long, 0x53).unwrap().len(), 300);
    }

    #[test]
    fn test_truncated() {
        assert_eq!(
            parse_all(&[0x80, 0x05, 0x01]),
            Err(TlvError::Truncated { offset: 3 })
        );
        assert!(matches!(parse_all(&[0x80]), Err(TlvError::Truncated { .. })));
    }

    #[test]
    fn test_missing_tag() {
        let data = encode(0x80, &[1]).unwrap();
        assert_eq!(find(&data, 0x81), Ok(None));
        assert_eq!(require(&data, 0x81), Err(TlvError::MissingTag { tag: 0x81 }));
    }

    #[test]
    fn test_value_over_length_limit_rejected() {
        let largest = encode(0x81, &vec![0u8; MAX_VALUE_LEN]).unwrap();
        assert_eq!(&largest[..3], &[0x81, 0x82, 0xFF]);
        assert_eq!(require(&largest, 0x81).unwrap().len(), MAX_VALUE_LEN);

        assert_eq!(
            encode(0x81, &vec![0u8; 70_000]),
            Err(TlvError::TooLong { tag: 0x81, len: 70_000 })
        );
    }

    #[test]
    fn test_builder_keeps_first_error() {
        let result = TlvBuilder::new()
            .push(0x82, &[])
            .push(0x81, &vec![0u8; MAX_VALUE_LEN + 1])
            .push(0x80, &[1])
            .wrap(0x7C);
        assert_eq!(
            result,
            Err(TlvError::TooLong { tag: 0x81, len: MAX_VALUE_LEN + 1 })
        );

        let outer = TlvBuilder::new()
            .nest(0x7C, TlvBuilder::new().push(0x81, &vec![0u8; MAX_VALUE_LEN]))
            .build();
        assert!(matches!(outer, Err(TlvError::TooLong { tag: 0x7C, .. })));
    }
}
