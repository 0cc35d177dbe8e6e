use crate::crypto::tdes;
use crate::Error;

// ANSI X9.24-1 TDEA DUKPT constants.
const KSN_MASK: [u8; 10] = [0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xE0, 0x00, 0x00];
const KEY_VARIANT_MASK: [u8; 16] = [
    0xC0, 0xC0, 0xC0, 0xC0, 0x00, 0x00, 0x00, 0x00, 0xC0, 0xC0, 0xC0, 0xC0, 0x00, 0x00, 0x00, 0x00,
];
const DATA_VARIANT_MASK: [u8; 16] = [
    0x00, 0x00, 0x00, 0x00, 0x00, 0xFF, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0xFF, 0x00, 0x00,
];
const PIN_VARIANT_MASK: [u8; 16] = [
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0xFF, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0xFF,
];
const MAC_VARIANT_MASK: [u8; 16] = [
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0xFF, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0xFF, 0x00,
];

const COUNTER_MASK: u32 = 0x1F_FFFF;

fn xor(a: &[u8], b: &[u8]) -> Vec<u8> {
    a.iter().zip(b.iter()).map(|(x, y)| x ^ y).collect()
}

fn check_inputs(bdk: &[u8], ksn: &[u8]) -> Result<(), Error> {
    if bdk.len() != 16 {
        return Err(Error::CryptoFailure(format!(
            "BDK must be 16 bytes, got {}",
            bdk.len()
        )));
    }
    if ksn.len() != 10 {
        return Err(Error::CryptoFailure(format!(
            "KSN must be 10 bytes, got {}",
            ksn.len()
        )));
    }
    Ok(())
}

pub fn create_ipek(bdk: &[u8], ksn: &[u8]) -> Result<Vec<u8>, Error> {
    check_inputs(bdk, ksn)?;

    // clear the transaction counter bits
    let masked_ksn: Vec<u8> = ksn.iter().zip(KSN_MASK.iter()).map(|(k, m)| k & m).collect();
    let masked_ksn = &masked_ksn[..8];

    let mut ipek = tdes::tdes_ecb_encrypt(bdk, masked_ksn)?;
    let variant_bdk = xor(bdk, &KEY_VARIANT_MASK);
    ipek.extend(tdes::tdes_ecb_encrypt(&variant_bdk, masked_ksn)?);

    Ok(ipek)
}

// X9.24 non-reversible key generation: crypto register pass under one
// key half, folded back with the other.
fn encrypt_register(key: &[u8], register: &[u8]) -> Result<Vec<u8>, Error> {
    let top = &key[..8];
    let bottom = &key[8..16];

    let block = tdes::des_ecb_encrypt(top, &xor(bottom, register))?;
    Ok(xor(bottom, &block))
}

fn generate_key(key: &[u8], register: &[u8]) -> Result<Vec<u8>, Error> {
    let mut next = encrypt_register(&xor(key, &KEY_VARIANT_MASK), register)?;
    next.extend(encrypt_register(key, register)?);
    Ok(next)
}

/// Walks the 21-bit transaction counter from the IPEK down to the key for
/// this exact KSN. The register KSN accumulates the counter bits as the
/// shift register advances.
pub fn derive_base_key(bdk: &[u8], ksn: &[u8]) -> Result<Vec<u8>, Error> {
    check_inputs(bdk, ksn)?;

    let mut current = create_ipek(bdk, ksn)?;

    let mut base_ksn: Vec<u8> = ksn[2..10]
        .iter()
        .zip(KSN_MASK[..8].iter())
        .map(|(k, m)| k & m)
        .collect();

    let counter = u32::from_be_bytes([0, ksn[7], ksn[8], ksn[9]]) & COUNTER_MASK;

    let mut shift_register: u32 = 0x10_0000;
    while shift_register > 0 {
        if shift_register & counter != 0 {
            let tail = u32::from_be_bytes([0, base_ksn[5], base_ksn[6], base_ksn[7]])
                | shift_register;

            base_ksn[5] = (tail >> 16) as u8;
            base_ksn[6] = (tail >> 8) as u8;
            base_ksn[7] = tail as u8;

            current = generate_key(&current, &base_ksn)?;
        }
        shift_register >>= 1;
    }

    Ok(current)
}

/// Data-encryption session key: the data variant is additionally
/// self-encrypted one half at a time.
pub fn derive_data_key(bdk: &[u8], ksn: &[u8]) -> Result<Vec<u8>, Error> {
    let variant = xor(&derive_base_key(bdk, ksn)?, &DATA_VARIANT_MASK);

    let mut key = tdes::tdes_ecb_encrypt(&variant, &variant[..8])?;
    key.extend(tdes::tdes_ecb_encrypt(&variant, &variant[8..16])?);

    Ok(key)
}

pub fn derive_pin_key(bdk: &[u8], ksn: &[u8]) -> Result<Vec<u8>, Error> {
    Ok(xor(&derive_base_key(bdk, ksn)?, &PIN_VARIANT_MASK))
}

pub fn derive_mac_key(bdk: &[u8], ksn: &[u8]) -> Result<Vec<u8>, Error> {
    Ok(xor(&derive_base_key(bdk, ksn)?, &MAC_VARIANT_MASK))
}

#[cfg(test)]
mod tests {
    use super::*;

    // ANSI X9.24 reference BDK/KSN pair.
    const BDK: &str = "0123456789ABCDEFFEDCBA9876543210";
    const KSN: &str = "FFFF9876543210E00008";

    #[test]
    fn test_create_ipek_reference_vector() -> Result<(), Error> {
        let ipek = create_ipek(&hex::decode(BDK).unwrap(), &hex::decode(KSN).unwrap())?;
        assert_eq!(
            hex::encode_upper(&ipek),
            "6AC292FAA1315B4D858AB3A3D7D5933A"
        );
        Ok(())
    }

    #[test]
    fn test_derive_base_key_reference_vector() -> Result<(), Error> {
        let key = derive_base_key(&hex::decode(BDK).unwrap(), &hex::decode(KSN).unwrap())?;
        assert_eq!(
            hex::encode_upper(&key),
            "27F66D5244FF62E1AA6F6120EDEB4280"
        );
        Ok(())
    }

    #[test]
    fn test_derive_data_key_reference_vector() -> Result<(), Error> {
        let key = derive_data_key(&hex::decode(BDK).unwrap(), &hex::decode(KSN).unwrap())?;
        assert_eq!(
            hex::encode_upper(&key),
            "C39B2778B058AC376FB18DC906F75CBA"
        );
        Ok(())
    }

    #[test]
    fn test_derive_pin_key_reference_vector() -> Result<(), Error> {
        let key = derive_pin_key(&hex::decode(BDK).unwrap(), &hex::decode(KSN).unwrap())?;
        assert_eq!(
            hex::encode_upper(&key),
            "27F66D5244FF621EAA6F6120EDEB427F"
        );
        Ok(())
    }

    #[test]
    fn test_derive_mac_key_reference_vector() -> Result<(), Error> {
        let key = derive_mac_key(&hex::decode(BDK).unwrap(), &hex::decode(KSN).unwrap())?;
        assert_eq!(
            hex::encode_upper(&key),
            "27F66D5244FF9DE1AA6F6120EDEBBD80"
        );
        Ok(())
    }

    #[test]
    fn test_variants_are_pairwise_distinct() -> Result<(), Error> {
        let bdk = hex::decode(BDK).unwrap();
        let ksn = hex::decode(KSN).unwrap();

        let data = derive_data_key(&bdk, &ksn)?;
        let pin = derive_pin_key(&bdk, &ksn)?;
        let mac = derive_mac_key(&bdk, &ksn)?;

        assert_ne!(data, pin);
        assert_ne!(data, mac);
        assert_ne!(pin, mac);
        Ok(())
    }

    #[test]
    fn test_derivation_is_deterministic() -> Result<(), Error> {
        let bdk = hex::decode(BDK).unwrap();
        let ksn = hex::decode(KSN).unwrap();
        assert_eq!(derive_data_key(&bdk, &ksn)?, derive_data_key(&bdk, &ksn)?);
        Ok(())
    }

    #[test]
    fn test_rejects_bad_lengths() {
        assert!(create_ipek(&[0u8; 15], &[0u8; 10]).is_err());
        assert!(create_ipek(&[0u8; 16], &[0u8; 9]).is_err());
    }
}
