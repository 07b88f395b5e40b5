use std::io;
use std::time::Duration;

use nano_http::handler::{make_handler, make_interceptor};
use nano_http::protocol::{FileResource, Request, Response, StatusCode};
use nano_http::server::Server;
use tracing::{Level, error, info};
use tracing_subscriber::FmtSubscriber;

fn main() {
    let subscriber = FmtSubscriber::builder().with_max_level(Level::INFO).finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    // GET /file?path=Cargo.toml serves a file with range support
    let files = make_interceptor(|request: &Request| {
        let path = (request.path() == "/file").then(|| request.query().get("path").map(str::to_owned)).flatten();
        let headers = request.headers().clone();
        let mime_types = request.mime_types().clone();
        async move {
            let Some(path) = path else {
                return Ok::<_, io::Error>(None);
            };
            let response = match FileResource::open(&path, &mime_types).await {
                Ok(file) => file.respond(&headers).await?,
                Err(_) => Response::not_found(),
            };
            Ok(Some(response))
        }
    });

    let hello = make_handler(|request: &Request| {
        let name = request.query().get("name").unwrap_or("World").to_owned();
        info!(path = request.path(), remote_addr = ?request.remote_addr(), "receiving request");
        async move { Ok::<_, io::Error>(Response::text(StatusCode::Ok, format!("Hello {name}!\r\n"))) }
    });

    let server = Server::builder()
        .address(([127, 0, 0, 1], 8080))
        .read_timeout(Duration::from_secs(5))
        .interceptor(files)
        .handler(hello)
        .build();

    if let Err(e) = server.start() {
        error!(cause = %e, "failed to start server");
        return;
    }
    info!(port = ?server.listening_port(), "server started, press enter to stop");

    let mut line = String::new();
    let _ = io::stdin().read_line(&mut line);

    server.stop();
    info!("server stopped");
}
