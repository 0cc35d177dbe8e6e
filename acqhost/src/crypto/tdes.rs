use crate::Error;
use openssl::symm::{Cipher, Crypter, Mode};
use std::sync::OnceLock;

const BLOCK_SIZE: usize = 8;

// OpenSSL 3.x moved single-DES into the "legacy" provider, which is not
// loaded by default. Load it once so Cipher::des_ecb() can be fetched.
fn ensure_legacy_provider() {
    static LEGACY: OnceLock<Option<openssl::provider::Provider>> = OnceLock::new();
    LEGACY.get_or_init(|| openssl::provider::Provider::load(None, "legacy").ok());
}

// A 16-byte key is used in the (K1, K2, K1) form.
fn extend_key(key: &[u8]) -> Result<Vec<u8>, Error> {
    match key.len() {
        16 => {
            let mut extended = key.to_vec();
            extended.extend_from_slice(&key[..8]);
            Ok(extended)
        }
        24 => Ok(key.to_vec()),
        n => Err(Error::CryptoFailure(format!(
            "3DES key must be 16 or 24 bytes, got {}",
            n
        ))),
    }
}

fn ecb(cipher: Cipher, mode: Mode, key: &[u8], data: &[u8]) -> Result<Vec<u8>, Error> {
    if data.len() % BLOCK_SIZE != 0 {
        return Err(Error::CryptoFailure(format!(
            "input length {} is not a multiple of the DES block size",
            data.len()
        )));
    }

    let mut crypter = Crypter::new(cipher, mode, key, None)?;
    crypter.pad(false);

    let mut output = vec![0u8; data.len() + cipher.block_size()];
    let mut written = crypter.update(data, &mut output)?;
    written += crypter.finalize(&mut output[written..])?;
    output.truncate(written);

    Ok(output)
}

pub fn tdes_ecb_encrypt(key: &[u8], data: &[u8]) -> Result<Vec<u8>, Error> {
    ecb(Cipher::des_ede3(), Mode::Encrypt, &extend_key(key)?, data)
}

pub fn tdes_ecb_decrypt(key: &[u8], data: &[u8]) -> Result<Vec<u8>, Error> {
    ecb(Cipher::des_ede3(), Mode::Decrypt, &extend_key(key)?, data)
}

pub(crate) fn des_ecb_encrypt(key: &[u8], data: &[u8]) -> Result<Vec<u8>, Error> {
    if key.len() != BLOCK_SIZE {
        return Err(Error::CryptoFailure(format!(
            "DES key must be 8 bytes, got {}",
            key.len()
        )));
    }

    ensure_legacy_provider();
    ecb(Cipher::des_ecb(), Mode::Encrypt, key, data)
}

/// First 3 bytes of the encryption of a zero block under the key.
pub fn key_check_value(key: &[u8]) -> Result<[u8; 3], Error> {
    let block = tdes_ecb_encrypt(key, &[0u8; BLOCK_SIZE])?;
    Ok([block[0], block[1], block[2]])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() -> Result<(), Error> {
        let key = hex::decode("0123456789ABCDEFFEDCBA9876543210").unwrap();
        let clear = hex::decode("00112233445566778899AABBCCDDEEFF").unwrap();

        let ciphered = tdes_ecb_encrypt(&key, &clear)?;
        assert_eq!(ciphered.len(), clear.len());
        assert_ne!(ciphered, clear);
        assert_eq!(tdes_ecb_decrypt(&key, &ciphered)?, clear);
        Ok(())
    }

    #[test]
    fn test_double_length_key_equals_explicit_triple() -> Result<(), Error> {
        let key16 = hex::decode("0123456789ABCDEFFEDCBA9876543210").unwrap();
        let mut key24 = key16.clone();
        key24.extend_from_slice(&key16[..8]);

        let clear = [0u8; 8];
        assert_eq!(
            tdes_ecb_encrypt(&key16, &clear)?,
            tdes_ecb_encrypt(&key24, &clear)?
        );
        Ok(())
    }

    #[test]
    fn test_blocks_are_independent() -> Result<(), Error> {
        let key = hex::decode("0123456789ABCDEFFEDCBA9876543210").unwrap();
        let clear = hex::decode("01234567012345670123456701234567").unwrap();

        let ciphered = tdes_ecb_encrypt(&key, &clear)?;
        assert_eq!(ciphered[..8], ciphered[8..16]);
        Ok(())
    }

    #[test]
    fn test_rejects_partial_block() {
        let key = [0u8; 16];
        assert!(matches!(
            tdes_ecb_encrypt(&key, &[0u8; 7]),
            Err(Error::CryptoFailure(_))
        ));
    }

    #[test]
    fn test_rejects_bad_key_length() {
        assert!(matches!(
            tdes_ecb_encrypt(&[0u8; 8], &[0u8; 8]),
            Err(Error::CryptoFailure(_))
        ));
    }

    #[test]
    fn test_key_check_value() -> Result<(), Error> {
        let key = hex::decode("0123456789ABCDEFFEDCBA9876543210").unwrap();
        assert_eq!(hex::encode(key_check_value(&key)?), "08d7b4");

        let key = hex::decode("FDB5C138D31DDCAA6C5DC76827EF487E").unwrap();
        assert_eq!(hex::encode(key_check_value(&key)?), "fdfcae");
        Ok(())
    }
}
