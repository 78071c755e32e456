//! Stateless EBML decoding helpers and the element header value type.
//!
//! EBML frames every element as a variable-length id, a variable-length
//! size, then `size` bytes of payload. Both id and size signal their own
//! width through the leading-zero count of the first octet; the difference
//! is that an id keeps its marker bits while a size masks them out.

/// Width in octets (1..=8) signalled by the first octet of an id or vint.
///
/// The caller must ensure `octet != 0`; a zero octet has no marker bit and
/// is not a valid vint start.
pub fn octet_width(octet: u8) -> u8 {
    octet.leading_zeros() as u8 + 1
}

/// Data-bit mask for the first octet of a vint of the given width.
pub fn vint_mask(width: u8) -> u8 {
    (0xFFu16 >> width) as u8
}

/// Bias subtracted from a vint to obtain a signed lace-size delta.
///
/// `2^(7*width - 1) - 1`: width 1 -> 63, width 2 -> 8191, width 3 ->
/// 1048575, width 4 -> 134217727, and so on up to width 8.
pub fn lace_bias(width: u8) -> i64 {
    (1i64 << (7 * width as u32 - 1)) - 1
}

/// Sign-extend a big-endian accumulated integer of `size` bytes.
pub fn sign_extend(acc: u64, size: u64) -> i64 {
    let shift = 64 - 8 * size as u32;
    ((acc << shift) as i64) >> shift
}

/// One decoded EBML element header.
///
/// Pure data: `offset` is where the id's first octet sits in the file,
/// `data_offset` is where the payload starts, and `end` is derived as
/// `data_offset + size`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElementHeader {
    /// Element id with marker bits retained.
    pub id: u32,
    /// Payload length in bytes.
    pub size: u64,
    /// Absolute offset of the first header byte.
    pub offset: u64,
    /// Absolute offset of the first payload byte.
    pub data_offset: u64,
}

impl ElementHeader {
    /// Build a header from its decoded parts.
    pub fn new(id: u32, size: u64, offset: u64, data_offset: u64) -> Self {
        Self {
            id,
            size,
            offset,
            data_offset,
        }
    }

    /// Absolute offset one past the last payload byte.
    pub fn end(&self) -> u64 {
        self.data_offset + self.size
    }

    /// Width of the encoded header (id plus size vint) in bytes.
    pub fn header_width(&self) -> u64 {
        self.data_offset - self.offset
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn octet_widths() {
        assert_eq!(octet_width(0x80), 1);
        assert_eq!(octet_width(0xFF), 1);
        assert_eq!(octet_width(0x40), 2);
        assert_eq!(octet_width(0x20), 3);
        assert_eq!(octet_width(0x10), 4);
        assert_eq!(octet_width(0x08), 5);
        assert_eq!(octet_width(0x04), 6);
        assert_eq!(octet_width(0x02), 7);
        assert_eq!(octet_width(0x01), 8);
    }

    #[test]
    fn vint_masks() {
        assert_eq!(vint_mask(1), 0x7F);
        assert_eq!(vint_mask(2), 0x3F);
        assert_eq!(vint_mask(3), 0x1F);
        assert_eq!(vint_mask(4), 0x0F);
        assert_eq!(vint_mask(8), 0x00);
    }

    #[test]
    fn lace_biases() {
        assert_eq!(lace_bias(1), 63);
        assert_eq!(lace_bias(2), 8191);
        assert_eq!(lace_bias(3), 1_048_575);
        assert_eq!(lace_bias(4), 134_217_727);
    }

    #[test]
    fn sign_extension() {
        assert_eq!(sign_extend(0x00, 1), 0);
        assert_eq!(sign_extend(0x01, 1), 1);
        assert_eq!(sign_extend(0xFF, 1), -1);
        assert_eq!(sign_extend(0x0080, 2), 128);
        assert_eq!(sign_extend(0xFF7F, 2), -129);
        assert_eq!(sign_extend(u64::MAX, 8), -1);
    }

    #[test]
    fn header_derived_fields() {
        let h = ElementHeader::new(0x1A45DFA3, 31, 0, 5);
        assert_eq!(h.end(), 36);
        assert_eq!(h.header_width(), 5);
        assert_eq!(h.data_offset, h.offset + h.header_width());
    }
}
