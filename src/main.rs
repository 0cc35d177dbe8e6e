use acqhost::handlers::Gateway;
use acqhost::{Error, Settings};
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use clap::{App, Arg};
use log::{error, info, warn};
use std::sync::Arc;

async fn index() -> Response {
    match tokio::fs::read_to_string("public/index.html").await {
        Ok(body) => Html(body).into_response(),
        Err(_) => (StatusCode::NOT_FOUND, "not found").into_response(),
    }
}

async fn key_init(State(gateway): State<Arc<Gateway>>, Path(iso): Path<String>) -> Response {
    match gateway.key_init(&iso) {
        Ok(response_hex) => (StatusCode::OK, response_hex).into_response(),
        Err(err) => {
            warn!("key init failed: {}", err);
            (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response()
        }
    }
}

async fn sale(State(gateway): State<Arc<Gateway>>, Path(iso): Path<String>) -> Response {
    match gateway.sale(&iso) {
        Ok(response_hex) => (StatusCode::OK, response_hex).into_response(),
        Err(err) => {
            warn!("sale failed: {}", err);
            (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response()
        }
    }
}

async fn terminal_token(
    State(gateway): State<Arc<Gateway>>,
    Path(serial): Path<String>,
) -> Response {
    match gateway.terminal_token(&serial) {
        Ok(token) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/octet-stream")],
            token,
        )
            .into_response(),
        Err(Error::UnknownTerminal(serial)) => {
            warn!("token request for unknown terminal {:?}", serial);
            (StatusCode::BAD_REQUEST, "invalid ID").into_response()
        }
        Err(err) => {
            warn!("token signing failed: {}", err);
            (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response()
        }
    }
}

async fn run() -> Result<(), String> {
    log4rs::init_file("config/log4rs.yaml", Default::default()).map_err(|err| err.to_string())?;

    let matches = App::new("Acquirer Host")
        .version("0.1")
        .about("ISO 8583 authorization endpoint simulation")
        .arg(
            Arg::with_name("settings")
                .short("s")
                .long("settings")
                .value_name("FILE")
                .help("Settings file location")
                .takes_value(true),
        )
        .get_matches();

    let settings = Settings::load(matches.value_of("settings").unwrap_or("config/settings.yaml"))
        .map_err(|err| err.to_string())?;

    let port = std::env::var("PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(settings.port);

    let gateway = Arc::new(Gateway::new(settings).map_err(|err| err.to_string())?);

    let app = Router::new()
        .route("/", get(index))
        .route("/keyinit/:iso", get(key_init))
        .route("/sale/:iso", get(sale))
        .route("/token/:serial", get(terminal_token))
        .with_state(gateway);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
        .await
        .map_err(|err| format!("could not bind port {}: {}", port, err))?;

    info!("listening on 0.0.0.0:{}", port);

    axum::serve(listener, app)
        .await
        .map_err(|err| err.to_string())
}

#[tokio::main]
async fn main() {
    std::process::exit(match run().await {
        Ok(()) => 0,
        Err(err) => {
            error!("{}", err);
            eprintln!("{}", err);
            1
        }
    });
}
