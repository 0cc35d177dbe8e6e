use serde::{Deserialize, Serialize};
use thiserror::Error as ThisError;

pub mod bcdutil;
pub mod crypto;
pub mod field63;
pub mod handlers;
pub mod iso8583;

macro_rules! serialize_yaml {
    ($file:expr, $static_resource:expr) => {
        serde_yaml::from_str(
            &std::fs::read_to_string($file).unwrap_or_else(|_| {
                String::from_utf8_lossy(include_bytes!($static_resource)).to_string()
            }),
        )
    };
}

#[derive(Debug, ThisError)]
pub enum Error {
    #[error("invalid hex input {0:?}")]
    BadHex(String),
    #[error("invalid BCD digit in {0:?}")]
    BadBcd(String),
    #[error("field registry entries must be numbered 2 or higher, got {0}")]
    BadRegistry(u32),
    #[error("field {0} is not defined in the registry")]
    BadField(u32),
    #[error("value {value:?} violates the {format:?} format of field {field}")]
    BadFormat {
        field: u32,
        format: iso8583::FieldFormat,
        value: String,
    },
    #[error("value length {len} exceeds field {field} maximum of {max}")]
    BadLen { field: u32, len: usize, max: usize },
    #[error("MTI must be 4 decimal digits, got {0:?}")]
    BadMti(String),
    #[error("{0}")]
    BadToken(&'static str),
    #[error("insufficient data: expected {expected}, got {actual}")]
    InsufficientData { expected: usize, actual: usize },
    #[error("CRC mismatch: message carries {message}, computed {computed}")]
    CrcMismatch { message: String, computed: String },
    #[error("transport key KCV mismatch: message carries {message}, computed {computed}")]
    KcvMismatch { message: String, computed: String },
    #[error("cryptographic operation failed: {0}")]
    CryptoFailure(String),
    #[error("unknown terminal serial {0:?}")]
    UnknownTerminal(String),
    #[error("configuration error: {0}")]
    Config(String),
}

impl From<openssl::error::ErrorStack> for Error {
    fn from(err: openssl::error::ErrorStack) -> Self {
        Error::CryptoFailure(err.to_string())
    }
}

impl From<hex::FromHexError> for Error {
    fn from(err: hex::FromHexError) -> Self {
        Error::BadHex(err.to_string())
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct KeyFiles {
    pub transport_private_key: String,
    pub token_signing_private_key: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Settings {
    pub port: u16,
    pub censor_sensitive_fields: bool,
    pub key_files: KeyFiles,
    pub allowed_terminals: Vec<String>,
}

impl Settings {
    pub fn load(settings_file: &str) -> Result<Settings, Error> {
        serialize_yaml!(settings_file, "../../config/settings.yaml")
            .map_err(|err: serde_yaml::Error| Error::Config(err.to_string()))
    }
}
