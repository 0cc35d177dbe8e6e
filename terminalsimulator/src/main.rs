use acqhost::crypto::{crc32, dukpt, tdes};
use acqhost::handlers::INJECTED_BASE_KEY;
use acqhost::iso8583::mti::Mti;
use acqhost::iso8583::tlv::TlvPackage;
use acqhost::iso8583::{standard_field_definitions, IsoMessage};
use acqhost::{bcdutil, field63, Settings};
use clap::{App, Arg};
use log::{error, info};
use openssl::rsa::{Padding, Rsa};

const DEFAULT_PAN: &str = "5413330089604111";
const DEFAULT_KSN: &str = "0102012345678AE00001";
const DEMO_TRANSPORT_KEY: &str = "0123456789ABCDEFFEDCBA9876543210";

fn emv_field55(amount: &str) -> Result<Vec<u8>, String> {
    let mut package = TlvPackage::new();
    package.push(
        0x9F02,
        &bcdutil::str_to_bcd_packed_unsigned(amount).map_err(|err| err.to_string())?,
    );
    package.push(0x9A, &[0x25, 0x07, 0x15]);
    package.push(0x9C, &[0x00]);

    Ok(package.serialize())
}

fn sale_skeleton() -> Result<IsoMessage, String> {
    let mut request =
        IsoMessage::with_fields(standard_field_definitions()).map_err(|err| err.to_string())?;
    request.set_mti(Mti::parse("0200").map_err(|err| err.to_string())?);

    let amount = "000000000100";
    request.set_field(3, "000000").map_err(|err| err.to_string())?;
    request.set_field(4, amount).map_err(|err| err.to_string())?;
    request.set_field(11, "000001").map_err(|err| err.to_string())?;
    request.set_field(41, "TERM0001").map_err(|err| err.to_string())?;
    request
        .set_binary_field(55, &emv_field55(amount)?)
        .map_err(|err| err.to_string())?;

    Ok(request)
}

fn encrypted_track_tokens(pan: &str, ksn_hex: &str) -> Result<String, String> {
    let ksn = bcdutil::hex_to_bytes(ksn_hex).map_err(|err| err.to_string())?;

    let mut track = format!("{}D25121010000000000000", pan);
    while track.len() < 48 {
        track.push('F');
    }
    track.truncate(48);

    let clear = bcdutil::hex_to_bytes(&track).map_err(|err| err.to_string())?;
    let session_key =
        dukpt::derive_data_key(&INJECTED_BASE_KEY, &ksn).map_err(|err| err.to_string())?;
    let ciphertext = tdes::tdes_ecb_encrypt(&session_key, &clear).map_err(|err| err.to_string())?;

    info!(
        "track data enciphered under DUKPT session key, KSN {}",
        ksn_hex
    );

    Ok(format!(
        "{}{}",
        field63::build_es(true),
        field63::build_ez(&ksn, &ciphertext)
    ))
}

fn key_init_field63(settings: &Settings) -> Result<String, String> {
    let pem = std::fs::read(&settings.key_files.transport_private_key)
        .map_err(|err| format!("transport key file: {}", err))?;
    let rsa = Rsa::private_key_from_pem(&pem).map_err(|err| err.to_string())?;

    let transport_key = bcdutil::hex_to_bytes(DEMO_TRANSPORT_KEY).unwrap();
    let kcv = tdes::key_check_value(&transport_key).map_err(|err| err.to_string())?;

    let mut wrapped = vec![0u8; rsa.size() as usize];
    let length = rsa
        .public_encrypt(&transport_key, &mut wrapped, Padding::PKCS1)
        .map_err(|err| err.to_string())?;
    wrapped.truncate(length);

    let wrapped_hex = bcdutil::bytes_to_hex(&wrapped);
    let crc = crc32::checksum_hex(wrapped_hex.to_uppercase().as_bytes());

    Ok(field63::build_ew(
        &wrapped_hex,
        &bcdutil::bytes_to_hex(&kcv),
        &crc,
    ))
}

fn print_decoded(response_hex: &str) -> Result<(), String> {
    let mut response =
        IsoMessage::with_fields(standard_field_definitions()).map_err(|err| err.to_string())?;
    response
        .unpack(&bcdutil::hex_to_bytes(response_hex).map_err(|err| err.to_string())?)
        .map_err(|err| err.to_string())?;

    println!("MTI: {}", response.mti().map(|m| m.to_string()).unwrap_or_default());
    for number in response.field_numbers().collect::<Vec<_>>() {
        println!("{:3}: {}", number, response.field(number).unwrap_or(""));
    }

    Ok(())
}

fn run() -> Result<Option<String>, String> {
    log4rs::init_file("config/log4rs.yaml", Default::default()).ok();

    let matches = App::new("Terminal Simulator")
        .version("0.1")
        .about("Builds POS request messages for the acquirer host")
        .arg(
            Arg::with_name("pan")
                .short("p")
                .long("pan")
                .value_name("PAN")
                .help("Card number for a clear-PAN sale")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("track2")
                .long("track2")
                .value_name("DATA")
                .help("Track 2 data for a field 35 sale")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("encrypted")
                .long("encrypted")
                .help("Carry the track DUKPT-enciphered in field 63"),
        )
        .arg(
            Arg::with_name("ksn")
                .long("ksn")
                .value_name("HEX")
                .help("Key serial number for the encrypted sale")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("keyinit")
                .long("keyinit")
                .help("Build a DUKPT key injection request"),
        )
        .arg(
            Arg::with_name("response")
                .long("response")
                .value_name("HEX")
                .help("Decode a host response instead of building a request")
                .takes_value(true),
        )
        .get_matches();

    if let Some(response_hex) = matches.value_of("response") {
        print_decoded(response_hex)?;
        return Ok(None);
    }

    let request = if matches.is_present("keyinit") {
        let settings = Settings::load("config/settings.yaml").map_err(|err| err.to_string())?;

        let mut request = IsoMessage::with_fields(standard_field_definitions())
            .map_err(|err| err.to_string())?;
        request.set_mti(Mti::parse("0800").map_err(|err| err.to_string())?);
        request.set_field(11, "000001").map_err(|err| err.to_string())?;
        request.set_field(41, "TERM0001").map_err(|err| err.to_string())?;
        request
            .set_field(63, &key_init_field63(&settings)?)
            .map_err(|err| err.to_string())?;
        request
    } else {
        let mut request = sale_skeleton()?;
        let pan = matches.value_of("pan").unwrap_or(DEFAULT_PAN);

        if matches.is_present("encrypted") {
            let ksn = matches.value_of("ksn").unwrap_or(DEFAULT_KSN);
            request
                .set_field(63, &encrypted_track_tokens(pan, ksn)?)
                .map_err(|err| err.to_string())?;
        } else if let Some(track2) = matches.value_of("track2") {
            request.set_field(35, track2).map_err(|err| err.to_string())?;
        } else {
            request.set_field(2, pan).map_err(|err| err.to_string())?;
        }

        request
    };

    let packed = request.pack().map_err(|err| err.to_string())?;

    info!("request text form: {}", request);
    println!("{}", bcdutil::bytes_to_hex(&packed));

    Ok(None)
}

fn main() {
    std::process::exit(match run() {
        Ok(None) => 0,
        Ok(msg) => {
            info!("{:?}", msg);
            0
        }
        Err(err) => {
            error!("{:?}", err);
            eprintln!("{}", err);
            1
        }
    });
}
