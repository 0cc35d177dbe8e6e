use crate::crypto::{dukpt, rsa, tdes};
#[cfg(test)]
use crate::iso8583::mti::Mti;
use crate::iso8583::{standard_field_definitions, FieldDefinition, IsoMessage};
use crate::{bcdutil, field63, Error, Settings};
use chrono::Utc;
use hexplay::HexViewBuilder;
use log::{debug, info, warn};
use openssl::pkey::Private;
use openssl::rsa::Rsa;
use std::collections::{HashMap, HashSet};

/// Base derivation key injected into terminals during key init; sale
/// session keys derive from it and the KSN the terminal reports.
pub const INJECTED_BASE_KEY: [u8; 16] = [
    0xFD, 0xB5, 0xC1, 0x38, 0xD3, 0x1D, 0xDC, 0xAA, 0x6C, 0x5D, 0xC7, 0x68, 0x27, 0xEF, 0x48, 0x7E,
];

pub const INJECTED_BASE_KEY_KSN: [u8; 10] =
    [0x01, 0x02, 0x01, 0x23, 0x45, 0x67, 0x8A, 0xE0, 0x00, 0x00];

const TOKEN_VERSION: u8 = 0x01;
const TOKEN_VALIDITY_HOURS: i64 = 48;

const RESPONSE_APPROVED: &str = "00";
const RESPONSE_DECLINED: &str = "01";
const RESPONSE_KCV_MISMATCH: &str = "72";
const RESPONSE_CRC_MISMATCH: &str = "73";

const EX_STATUS_KCV_MISMATCH: &str = "01";
const EX_STATUS_CRC_MISMATCH: &str = "03";

const ECHOED_FIELDS: [u32; 3] = [11, 37, 41];

// Authorization logs carry the BIN and the last four digits at most.
fn masked_pan(pan: &str) -> String {
    if pan.len() <= 10 {
        return "*".repeat(pan.len());
    }

    format!(
        "{}{}{}",
        &pan[..6],
        "*".repeat(pan.len() - 10),
        &pan[pan.len() - 4..]
    )
}

pub struct Gateway {
    settings: Settings,
    definitions: HashMap<u32, FieldDefinition>,
    transport_key: Rsa<Private>,
    signing_key: Rsa<Private>,
    allowed_terminals: HashSet<String>,
}

impl Gateway {
    /// Loads both private keys up front; request handling never touches
    /// the filesystem.
    pub fn new(settings: Settings) -> Result<Gateway, Error> {
        let transport_key = rsa::load_private_key(&settings.key_files.transport_private_key)?;
        let signing_key = rsa::load_private_key(&settings.key_files.token_signing_private_key)?;
        let allowed_terminals = settings.allowed_terminals.iter().cloned().collect();

        Ok(Gateway {
            settings,
            definitions: standard_field_definitions(),
            transport_key,
            signing_key,
            allowed_terminals,
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    fn request_from_hex(&self, iso_hex: &str) -> Result<IsoMessage, Error> {
        let raw = bcdutil::hex_to_bytes(iso_hex)?;

        if self.settings.censor_sensitive_fields {
            debug!("request ({} bytes)", raw.len());
        } else {
            debug!(
                "request ({} bytes):\n{}",
                raw.len(),
                HexViewBuilder::new(&raw).finish()
            );
        }

        let mut message = IsoMessage::with_fields(self.definitions.clone())?;
        message.unpack(&raw)?;

        Ok(message)
    }

    fn response_for(&self, request: &IsoMessage) -> Result<IsoMessage, Error> {
        let mut response = IsoMessage::with_fields(self.definitions.clone())?;

        if let Some(mti) = request.mti() {
            response.set_mti(mti.response());
        }
        for field in ECHOED_FIELDS {
            if let Some(value) = request.field(field) {
                response.set_field(field, value)?;
            }
        }

        Ok(response)
    }

    fn hex_response(&self, response: &IsoMessage) -> Result<String, Error> {
        let raw = response.pack()?;

        if self.settings.censor_sensitive_fields {
            debug!("response ({} bytes)", raw.len());
        } else {
            debug!(
                "response ({} bytes):\n{}",
                raw.len(),
                HexViewBuilder::new(&raw).finish()
            );
        }

        Ok(bcdutil::bytes_to_hex(&raw))
    }

    /// DUKPT key injection: validate the `! EW` envelope, unwrap the
    /// transport key and ship the base key back under it.
    pub fn key_init(&self, iso_hex: &str) -> Result<String, Error> {
        let request = self.request_from_hex(iso_hex)?;

        let field63_value = request
            .field(63)
            .ok_or(Error::BadToken("Campo 63 no encontrado."))?;
        let key_request = field63::parse_ew(field63_value)?;

        if let Err(err) = field63::verify_ew_crc(&key_request) {
            warn!("key init envelope rejected: {}", err);
            return self.key_init_failure(&request, RESPONSE_CRC_MISMATCH, EX_STATUS_CRC_MISMATCH);
        }

        let wrapped = bcdutil::hex_to_bytes(&key_request.wrapped_key_hex)?;
        let transport_key = rsa::unwrap_transport_key(&self.transport_key, &wrapped)?;

        let kcv = tdes::key_check_value(&transport_key)?;
        if !bcdutil::bytes_to_hex(&kcv).eq_ignore_ascii_case(&key_request.kcv_hex) {
            warn!(
                "transport key KCV mismatch: message carries {}",
                key_request.kcv_hex
            );
            return self.key_init_failure(&request, RESPONSE_KCV_MISMATCH, EX_STATUS_KCV_MISMATCH);
        }

        info!("transport key accepted, KCV {}", key_request.kcv_hex);

        let base_key_kcv = tdes::key_check_value(&INJECTED_BASE_KEY)?;
        let wrapped_base_key = tdes::tdes_ecb_encrypt(&transport_key, &INJECTED_BASE_KEY)?;

        let mut response = self.response_for(&request)?;
        response.set_field(39, RESPONSE_APPROVED)?;
        response.set_field(
            63,
            &format!(
                "{}{}",
                field63::token_er(false, false, false),
                field63::token_ex(&wrapped_base_key, &INJECTED_BASE_KEY_KSN, &base_key_kcv)
            ),
        )?;

        self.hex_response(&response)
    }

    fn key_init_failure(
        &self,
        request: &IsoMessage,
        response_code: &str,
        ex_status: &str,
    ) -> Result<String, Error> {
        let mut response = self.response_for(request)?;
        response.set_field(39, response_code)?;
        response.set_field(
            63,
            &format!(
                "{}{}",
                field63::token_er(false, false, false),
                field63::token_ex_error(ex_status)
            ),
        )?;

        self.hex_response(&response)
    }

    /// Sale authorization. PAN source priority: clear field 2, then track 2
    /// in field 35, then the DUKPT-encrypted `! EZ` record in field 63.
    pub fn sale(&self, iso_hex: &str) -> Result<String, Error> {
        let request = self.request_from_hex(iso_hex)?;
        let mut response = self.response_for(&request)?;

        match self.extract_pan(&request) {
            Ok(pan) => {
                let code = if pan.starts_with('4') {
                    RESPONSE_DECLINED
                } else {
                    RESPONSE_APPROVED
                };

                info!(
                    "sale authorization, PAN {}: response {}",
                    masked_pan(&pan),
                    code
                );
                response.set_field(39, code)?;
            }
            Err(err) => {
                warn!("PAN extraction failed: {}", err);
                response.set_field(39, RESPONSE_DECLINED)?;

                let mut diagnostic = err.to_string();
                diagnostic.truncate(25);
                if !diagnostic.is_empty() {
                    response.set_field(44, &diagnostic)?;
                }
            }
        }

        self.hex_response(&response)
    }

    fn extract_pan(&self, request: &IsoMessage) -> Result<String, Error> {
        if let Some(pan) = request.field(2) {
            return Ok(pan.to_string());
        }

        if let Some(track2) = request.field(35) {
            let upper = track2.to_uppercase();
            let pan = upper
                .split(|c| c == 'D' || c == '=')
                .next()
                .unwrap_or("")
                .to_string();
            return Ok(pan);
        }

        let field63_value = request
            .field(63)
            .ok_or(Error::BadToken("no PAN source present in message"))?;

        if !field63::es_indicates_encrypted(field63_value)? {
            return Err(Error::BadToken("sale record does not carry encrypted track data"));
        }

        let track = field63::parse_ez(field63_value)?;
        let session_key = dukpt::derive_data_key(&INJECTED_BASE_KEY, &track.ksn)?;
        let clear = tdes::tdes_ecb_decrypt(&session_key, &track.ciphertext)?;

        let track_hex = bcdutil::bytes_to_hex(&clear).to_uppercase();
        let pan = track_hex.split('D').next().unwrap_or("").to_string();

        debug!("PAN recovered from encrypted track data, KSN {}", bcdutil::bytes_to_hex(&track.ksn));

        Ok(pan)
    }

    /// Provisioning token: version byte, RSA-SHA256 signature, 48-bit
    /// big-endian expiry in Unix milliseconds.
    pub fn terminal_token(&self, serial: &str) -> Result<Vec<u8>, Error> {
        if !self.allowed_terminals.contains(serial) {
            return Err(Error::UnknownTerminal(serial.to_string()));
        }

        let expires = Utc::now() + chrono::Duration::hours(TOKEN_VALIDITY_HOURS);
        let expires_ms = expires.timestamp_millis() as u64;
        let expires_be48 = &expires_ms.to_be_bytes()[2..8];

        let mut payload = vec![TOKEN_VERSION];
        payload.extend_from_slice(expires_be48);
        payload.extend_from_slice(serial.as_bytes());

        let signature = rsa::sign_sha256(&self.signing_key, &payload)?;

        info!("issued provisioning token for terminal {}", serial);

        let mut token = vec![TOKEN_VERSION];
        token.extend(signature);
        token.extend_from_slice(expires_be48);

        Ok(token)
    }
}
