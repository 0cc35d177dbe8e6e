use crate::bcdutil;
use crate::crypto::crc32;
use crate::Error;
use log::trace;

// Sub-token framing: "! XX" tag, 5-digit nominal length, one space, payload.
// Slicing trusts the fixed offsets below, never the nominal length ("! ER"
// advertises 00002 for a 12-character record).
const HEADER_LEN: usize = 10;

const EW_TOTAL_LEN: usize = 548;
const EW_WRAPPED_KEY: (usize, usize) = (10, 522);
const EW_KCV: (usize, usize) = (522, 528);
const EW_CRC: (usize, usize) = (540, 548);

const ES_TOTAL_LEN: usize = 70;
const ES_ENCRYPTED_OFFSET: usize = 50;
const ES_ENCRYPTED_MARKER: u8 = b'5';

const EZ_TOTAL_LEN: usize = 108;
const EZ_KSN: (usize, usize) = (10, 30);
const EZ_CIPHERTEXT: (usize, usize) = (48, 96);

fn slice_token<'a>(
    field63: &'a str,
    tag: &'static str,
    total_len: usize,
    short: &'static str,
) -> Result<&'a str, Error> {
    let start = field63.find(tag).ok_or(Error::BadToken(short))?;
    field63
        .get(start..start + total_len)
        .ok_or(Error::BadToken(short))
}

#[derive(Debug)]
pub struct KeyInitRequest {
    pub wrapped_key_hex: String,
    pub kcv_hex: String,
    pub crc_hex: String,
}

pub fn parse_ew(field63: &str) -> Result<KeyInitRequest, Error> {
    let token = slice_token(field63, "! EW", EW_TOTAL_LEN, "! EW token missing or short")?;

    Ok(KeyInitRequest {
        wrapped_key_hex: token[EW_WRAPPED_KEY.0..EW_WRAPPED_KEY.1].to_string(),
        kcv_hex: token[EW_KCV.0..EW_KCV.1].to_string(),
        crc_hex: token[EW_CRC.0..EW_CRC.1].to_string(),
    })
}

/// The envelope CRC covers the ASCII spelling of the uppercased hex of the
/// wrapped key, not the key bytes themselves.
pub fn verify_ew_crc(request: &KeyInitRequest) -> Result<(), Error> {
    let wrapped = bcdutil::hex_to_bytes(&request.wrapped_key_hex)?;
    let ascii_hex = bcdutil::bytes_to_hex(&wrapped).to_uppercase();
    let computed = crc32::checksum_hex(ascii_hex.as_bytes());

    if !computed.eq_ignore_ascii_case(&request.crc_hex) {
        return Err(Error::CrcMismatch {
            message: request.crc_hex.clone(),
            computed,
        });
    }

    trace!("! EW envelope CRC verified ({})", computed);

    Ok(())
}

pub fn token_er(suggest_key_init: bool, require_key_init: bool, update_bin: bool) -> String {
    let key_init_flag = if require_key_init {
        '2'
    } else if suggest_key_init {
        '1'
    } else {
        '0'
    };

    format!(
        "! ER00002 {}{}",
        key_init_flag,
        if update_bin { '1' } else { '0' }
    )
}

pub fn token_ex(wrapped_base_key: &[u8], ksn: &[u8], base_key_kcv: &[u8]) -> String {
    assert_eq!(wrapped_base_key.len(), 16);
    assert_eq!(ksn.len(), 10);
    assert_eq!(base_key_kcv.len(), 3);

    let wrapped_hex = bcdutil::bytes_to_hex(wrapped_base_key);
    let crc = crc32::checksum_hex(wrapped_hex.as_bytes());

    format!(
        "! EX00068 {}{}{}00{}",
        wrapped_hex,
        bcdutil::bytes_to_hex(ksn),
        bcdutil::bytes_to_hex(base_key_kcv),
        crc
    )
}

pub fn token_ex_error(code: &str) -> String {
    assert_eq!(code.len(), 2);

    format!(
        "! EX00068 {}{}{}",
        "0".repeat(58),
        code,
        "0".repeat(8)
    )
}

pub fn es_indicates_encrypted(field63: &str) -> Result<bool, Error> {
    let token = slice_token(field63, "! ES", ES_TOTAL_LEN, "! ES token missing or short")?;
    Ok(token.as_bytes()[ES_ENCRYPTED_OFFSET] == ES_ENCRYPTED_MARKER)
}

#[derive(Debug)]
pub struct EncryptedTrack {
    pub ksn: Vec<u8>,
    pub ciphertext: Vec<u8>,
}

pub fn parse_ez(field63: &str) -> Result<EncryptedTrack, Error> {
    let token = slice_token(field63, "! EZ", EZ_TOTAL_LEN, "! EZ token missing or short")?;

    Ok(EncryptedTrack {
        ksn: bcdutil::hex_to_bytes(&token[EZ_KSN.0..EZ_KSN.1])?,
        ciphertext: bcdutil::hex_to_bytes(&token[EZ_CIPHERTEXT.0..EZ_CIPHERTEXT.1])?,
    })
}

/// Terminal-side framing helpers; the simulator builds requests with these.
pub fn build_ew(wrapped_key_hex: &str, kcv_hex: &str, crc_hex: &str) -> String {
    assert_eq!(wrapped_key_hex.len(), EW_WRAPPED_KEY.1 - EW_WRAPPED_KEY.0);
    assert_eq!(kcv_hex.len(), EW_KCV.1 - EW_KCV.0);
    assert_eq!(crc_hex.len(), 8);

    format!(
        "! EW{:05} {}{}{}{}",
        EW_TOTAL_LEN - HEADER_LEN,
        wrapped_key_hex,
        kcv_hex,
        "0".repeat(EW_CRC.0 - EW_KCV.1),
        crc_hex
    )
}

pub fn build_es(encrypted: bool) -> String {
    let mut payload = vec![b'0'; ES_TOTAL_LEN - HEADER_LEN];
    if encrypted {
        payload[ES_ENCRYPTED_OFFSET - HEADER_LEN] = ES_ENCRYPTED_MARKER;
    }

    format!(
        "! ES{:05} {}",
        ES_TOTAL_LEN - HEADER_LEN,
        String::from_utf8_lossy(&payload)
    )
}

pub fn build_ez(ksn: &[u8], ciphertext: &[u8]) -> String {
    assert_eq!(ksn.len(), 10);
    assert_eq!(ciphertext.len(), 24);

    format!(
        "! EZ{:05} {}{}{}{}",
        EZ_TOTAL_LEN - HEADER_LEN,
        bcdutil::bytes_to_hex(ksn),
        "0".repeat(EZ_CIPHERTEXT.0 - EZ_KSN.1),
        bcdutil::bytes_to_hex(ciphertext),
        "0".repeat(EZ_TOTAL_LEN - EZ_CIPHERTEXT.1)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_ew() -> String {
        let wrapped_hex = "a5".repeat(256);
        let crc = crc32::checksum_hex(wrapped_hex.to_uppercase().as_bytes());
        build_ew(&wrapped_hex, "fdfcae", &crc)
    }

    #[test]
    fn test_er_layout() {
        assert_eq!(token_er(false, false, false), "! ER00002 00");
        assert_eq!(token_er(true, false, true), "! ER00002 11");
        assert_eq!(token_er(true, true, false), "! ER00002 20");
        assert_eq!(token_er(false, false, false).len(), 12);
    }

    #[test]
    fn test_ex_layout() {
        let wrapped = hex::decode("9824A56B6A743541696481E1597F6850").unwrap();
        let ksn = hex::decode("0102012345678AE00000").unwrap();
        let kcv = hex::decode("FDFCAE").unwrap();

        let token = token_ex(&wrapped, &ksn, &kcv);
        assert_eq!(token.len(), 78);
        assert_eq!(
            token,
            "! EX00068 9824a56b6a743541696481e1597f68500102012345678ae00000fdfcae0028f0c83c"
        );
    }

    #[test]
    fn test_ex_error_layout() {
        let token = token_ex_error("03");
        assert_eq!(token.len(), 78);
        assert_eq!(
            token,
            format!("! EX00068 {}03{}", "0".repeat(58), "0".repeat(8))
        );
        // the status code sits where the success token carries it
        assert_eq!(&token[68..70], "03");
    }

    #[test]
    fn test_ew_round_trip() -> Result<(), Error> {
        let field63 = format!("prefix junk {}", sample_ew());
        let request = parse_ew(&field63)?;

        assert_eq!(request.wrapped_key_hex.len(), 512);
        assert_eq!(request.kcv_hex, "fdfcae");
        verify_ew_crc(&request)?;
        Ok(())
    }

    #[test]
    fn test_ew_crc_mismatch() -> Result<(), Error> {
        let mut token = sample_ew();
        token.replace_range(540..548, "00000000");

        let request = parse_ew(&token)?;
        assert!(matches!(
            verify_ew_crc(&request),
            Err(Error::CrcMismatch { .. })
        ));
        Ok(())
    }

    #[test]
    fn test_ew_missing_or_short() {
        assert!(matches!(parse_ew("! ES00060 x"), Err(Error::BadToken(_))));
        assert!(matches!(parse_ew("! EW00538 abc"), Err(Error::BadToken(_))));
    }

    #[test]
    fn test_es_marker() -> Result<(), Error> {
        assert!(es_indicates_encrypted(&build_es(true))?);
        assert!(!es_indicates_encrypted(&build_es(false))?);
        assert_eq!(build_es(true).len(), 70);
        Ok(())
    }

    #[test]
    fn test_ez_slicing() -> Result<(), Error> {
        let ksn = hex::decode("0102012345678AE00001").unwrap();
        let ciphertext =
            hex::decode("2D922BC36C0FCA0E6F49E69EDB3A9E83669B94E0095A0D27").unwrap();

        let token = build_ez(&ksn, &ciphertext);
        assert_eq!(token.len(), 108);

        let track = parse_ez(&format!("{}{}", build_es(true), token))?;
        assert_eq!(track.ksn, ksn);
        assert_eq!(track.ciphertext, ciphertext);
        Ok(())
    }
}
