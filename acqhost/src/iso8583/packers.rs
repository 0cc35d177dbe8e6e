use crate::bcdutil;
use crate::Error;

/// Byte-level strategy for one ISO 8583 data format.
pub trait FieldPacker: Sync {
    fn pack(&self, value: &str) -> Result<Vec<u8>, Error>;
    fn unpack(&self, data: &[u8]) -> Result<String, Error>;
    fn packed_len(&self, text_len: usize) -> usize;
}

pub struct AsciiPacker;

impl FieldPacker for AsciiPacker {
    fn pack(&self, value: &str) -> Result<Vec<u8>, Error> {
        Ok(value.as_bytes().to_vec())
    }

    fn unpack(&self, data: &[u8]) -> Result<String, Error> {
        Ok(String::from_utf8_lossy(data).to_string())
    }

    fn packed_len(&self, text_len: usize) -> usize {
        text_len
    }
}

pub struct BinaryPacker;

impl FieldPacker for BinaryPacker {
    fn pack(&self, value: &str) -> Result<Vec<u8>, Error> {
        bcdutil::hex_to_bytes(value)
    }

    fn unpack(&self, data: &[u8]) -> Result<String, Error> {
        Ok(bcdutil::bytes_to_hex(data))
    }

    fn packed_len(&self, text_len: usize) -> usize {
        (text_len + 1) / 2
    }
}

pub struct BcdPackedUnsignedPacker;

impl FieldPacker for BcdPackedUnsignedPacker {
    fn pack(&self, value: &str) -> Result<Vec<u8>, Error> {
        bcdutil::str_to_bcd_packed_unsigned(value)
    }

    fn unpack(&self, data: &[u8]) -> Result<String, Error> {
        Ok(bcdutil::bcd_packed_unsigned_to_str(data))
    }

    fn packed_len(&self, text_len: usize) -> usize {
        (text_len + 1) / 2
    }
}

pub struct BcdPackedSignedPacker;

impl FieldPacker for BcdPackedSignedPacker {
    fn pack(&self, value: &str) -> Result<Vec<u8>, Error> {
        bcdutil::str_to_bcd_packed_signed(value)
    }

    fn unpack(&self, data: &[u8]) -> Result<String, Error> {
        Ok(bcdutil::bcd_packed_signed_to_str(data))
    }

    fn packed_len(&self, text_len: usize) -> usize {
        (text_len + 1) / 2
    }
}

/// BCD on the wire; leading zeros do not survive unpacking, an all-zero
/// field collapses to "0".
pub struct NumericFieldPacker;

impl FieldPacker for NumericFieldPacker {
    fn pack(&self, value: &str) -> Result<Vec<u8>, Error> {
        bcdutil::str_to_bcd_packed_unsigned(value)
    }

    fn unpack(&self, data: &[u8]) -> Result<String, Error> {
        let digits = bcdutil::bcd_packed_unsigned_to_str(data);
        let stripped = digits.trim_start_matches('0');

        if stripped.is_empty() {
            Ok("0".to_string())
        } else {
            Ok(stripped.to_string())
        }
    }

    fn packed_len(&self, text_len: usize) -> usize {
        (text_len + 1) / 2
    }
}

pub fn default_packer(format: super::FieldFormat) -> &'static dyn FieldPacker {
    match format {
        super::FieldFormat::N => &NumericFieldPacker,
        super::FieldFormat::B => &BinaryPacker,
        super::FieldFormat::XN => &BcdPackedSignedPacker,
        _ => &AsciiPacker,
    }
}
