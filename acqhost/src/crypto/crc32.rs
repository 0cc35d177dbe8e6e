use crc::{Crc, CRC_32_ISO_HDLC};

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

pub fn checksum(data: &[u8]) -> u32 {
    CRC32.checksum(data)
}

/// Checksum as the 8 hex digits the field 63 envelope carries.
pub fn checksum_hex(data: &[u8]) -> String {
    format!("{:08x}", checksum(data))
}

pub fn checksum_bytes(data: &[u8]) -> [u8; 4] {
    checksum(data).to_be_bytes()
}
