//! Minimal BER TLV reader for PIV data objects (single byte tags, definite lengths).

/// One tag-length-value entry borrowed from the input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tlv<'a> {
    pub tag: u8,
    pub value: &'a [u8],
}

/// Iterates over consecutive TLV entries; stops at the end of the input or at the first
/// malformed entry.
pub struct TlvReader<'a> {
    input: &'a [u8],
}

impl<'a> TlvReader<'a> {
    #[must_use]
    pub const fn new(input: &'a [u8]) -> Self {
        Self { input }
    }

    /// Read the next entry, or `None` when the input is exhausted or malformed.
    pub fn read(&mut self) -> Option<Tlv<'a>> {
        let (&tag, rest) = self.input.split_first()?;
        let (len, rest) = read_length(rest)?;
        if rest.len() < len {
            return None;
        }
        let (value, rest) = rest.split_at(len);
        self.input = rest;
        Some(Tlv { tag, value })
    }

    /// Read the next entry, keeping whatever part of its value is present when the input ends
    /// early. The reader is exhausted afterwards if the value was cut.
    pub fn read_partial(&mut self) -> Option<Tlv<'a>> {
        let (&tag, rest) = self.input.split_first()?;
        let (len, rest) = read_length(rest)?;
        let (value, rest) = rest.split_at(len.min(rest.len()));
        self.input = rest;
        Some(Tlv { tag, value })
    }
}

impl<'a> Iterator for TlvReader<'a> {
    type Item = Tlv<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read()
    }
}

fn read_length(input: &[u8]) -> Option<(usize, &[u8])> {
    let (&first, rest) = input.split_first()?;
    if first < 0x80 {
        return Some((usize::from(first), rest));
    }
    // long form, at most three length bytes; 0x80 (indefinite) is not allowed here
    let count = usize::from(first & 0x7F);
    if count == 0 || count > 3 || rest.len() < count {
        return None;
    }
    let (bytes, rest) = rest.split_at(count);
    let len = bytes
        .iter()
        .fold(0_usize, |len, byte| (len << 8) | usize::from(*byte));
    Some((len, rest))
}
