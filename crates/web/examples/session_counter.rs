//! Counts visits per browser session.
//!
//! ```text
//! cargo run --example session_counter -- [config.toml]
//! curl -c jar -b jar http://127.0.0.1:3000/
//! curl http://127.0.0.1:3000/stop
//! ```

use ember_http::cookie::Cookie;
use ember_web::{handler_fn, HandlerError, Request, Response, Server, ServerConfig};
use serde::Serialize;

#[derive(Serialize)]
struct Visits<'a> {
    session: &'a str,
    visits: u64,
}

async fn count(request: Request) -> Result<Response, HandlerError> {
    match request.endpoint() {
        "/stop" => Ok(Response::text("stopping").stop_server()),
        "/logout" => Ok(Response::new().delete_cookie("session_id").redirect("/")),
        _ => {
            let visits = match request.session().get("visits") {
                Some(visits) => visits.parse::<u64>()? + 1,
                None => 1,
            };
            let body = Visits { session: request.session_id(), visits };
            Ok(Response::json(&body)?
                .session("visits", visits.to_string())
                .cookie(Cookie::new("last_path", request.endpoint())))
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = match std::env::args().nth(1) {
        Some(path) => ServerConfig::from_toml_file(path)?,
        None => ServerConfig { host: "127.0.0.1".into(), port: 3000, ..ServerConfig::default() },
    };

    Server::builder().config(config).handler(handler_fn(count)).build()?.start().await?;
    Ok(())
}
