use crate::Error;
use log::trace;
use openssl::hash::MessageDigest;
use openssl::pkey::{PKey, Private};
use openssl::rsa::{Padding, Rsa};
use openssl::sign::Signer;
use std::fs;

pub fn load_private_key(path: &str) -> Result<Rsa<Private>, Error> {
    let pem = fs::read(path).map_err(|err| Error::Config(format!("{}: {}", path, err)))?;
    // PKey accepts both PKCS#1 and PKCS#8 PEM encodings
    PKey::private_key_from_pem(&pem)
        .and_then(|key| key.rsa())
        .map_err(|err| Error::Config(format!("{}: {}", path, err)))
}

/// PKCS#1 v1.5 unwrap of the RSA-wrapped 3DES transport key.
pub fn unwrap_transport_key(key: &Rsa<Private>, wrapped: &[u8]) -> Result<Vec<u8>, Error> {
    let mut output = vec![0u8; key.size() as usize];

    let length = key
        .private_decrypt(wrapped, &mut output, Padding::PKCS1)
        .map_err(|_| Error::CryptoFailure("transport key unwrap failed".to_string()))?;
    output.truncate(length);

    if length != 16 && length != 24 {
        return Err(Error::CryptoFailure(format!(
            "unwrapped transport key has {} bytes, expected 16 or 24",
            length
        )));
    }

    trace!("transport key unwrapped ({} bytes)", length);

    Ok(output)
}

/// RSASSA-PKCS1-v1_5 with SHA-256, used for the terminal provisioning token.
pub fn sign_sha256(key: &Rsa<Private>, payload: &[u8]) -> Result<Vec<u8>, Error> {
    let pkey = PKey::from_rsa(key.clone())?;
    let mut signer = Signer::new(MessageDigest::sha256(), &pkey)?;
    signer.update(payload)?;

    Ok(signer.sign_to_vec()?)
}
