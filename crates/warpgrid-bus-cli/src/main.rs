//! warpbus: drive round trips through an in-process WarpGrid bus.
//!
//! # Usage
//!
//! ```text
//! warpbus echo --body "hello"
//! warpbus --config bus.toml stream --sections 3 --elements 5
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use warpgrid_bus::{
    Bus, BusConfig, Method, Reply, Request, RequestHandler, Response, Section, Sender,
};

const ECHO_RESOURCE: &str = "echo";
const STREAM_RESOURCE: &str = "stream";

#[derive(Parser)]
#[command(name = "warpbus", about = "WarpGrid in-process bus driver", version)]
struct Cli {
    /// Bus configuration file (TOML, `[bus]` table).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Send a body and print the single response.
    Echo {
        #[arg(long)]
        body: String,
    },
    /// Request a streamed reply and print every section and element.
    Stream {
        /// Number of array sections the handler produces.
        #[arg(long, default_value = "2")]
        sections: u32,
        /// Number of elements per section.
        #[arg(long, default_value = "3")]
        elements: u32,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| {
                    tracing_subscriber::EnvFilter::new("info,warpbus=debug,warpgrid_bus=debug")
                }),
        )
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => BusConfig::from_file(path)
            .with_context(|| format!("failed to load bus config from {}", path.display()))?,
        None => BusConfig::default(),
    };
    let bus = Bus::from_config(demo_handler(), &config);
    info!(timeout = ?bus.default_timeout(), "bus ready");

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, cancelling request");
            ctrl_c.cancel();
        }
    });

    match cli.command {
        Command::Echo { body } => run_echo(&bus, &cancel, body).await,
        Command::Stream { sections, elements } => {
            run_stream(&bus, &cancel, sections, elements).await
        }
    }
}

async fn run_echo(bus: &Bus, cancel: &CancellationToken, body: String) -> anyhow::Result<()> {
    let request = Request::new(Method::POST, ECHO_RESOURCE).with_body(body);
    let reply = bus.send_request(cancel, request).await.context("echo request failed")?;
    let Some(response) = reply.into_response() else {
        bail!("echo handler answered with a stream");
    };
    println!(
        "{} {}: {}",
        response.status_code,
        response.content_type,
        String::from_utf8_lossy(&response.data)
    );
    Ok(())
}

async fn run_stream(
    bus: &Bus,
    cancel: &CancellationToken,
    sections: u32,
    elements: u32,
) -> anyhow::Result<()> {
    let request = Request::new(Method::GET, STREAM_RESOURCE)
        .with_query("sections", sections.to_string())
        .with_query("elements", elements.to_string());
    let reply = bus.send_request(cancel, request).await.context("stream request failed")?;
    let Reply::Sections(mut stream) = reply else {
        bail!("stream handler answered with a single response");
    };

    let mut count = 0usize;
    while let Some(section) = stream.next(cancel).await {
        println!("[{}] {}", section.section_type(), section.path().join("/"));
        match section {
            Section::Array(array) => {
                while let Some(value) = array.next(cancel).await {
                    println!("  {}", String::from_utf8_lossy(&value));
                    count += 1;
                }
            }
            Section::Map(map) => {
                while let Some((name, value)) = map.next(cancel).await {
                    println!("  {name} = {}", String::from_utf8_lossy(&value));
                    count += 1;
                }
            }
            Section::Object(mut object) => {
                if let Some(value) = object.value(cancel).await {
                    println!("  {}", String::from_utf8_lossy(&value));
                    count += 1;
                }
            }
        }
    }

    if let Some(err) = stream.terminal_error() {
        bail!("stream ended with error: {err}");
    }
    info!(elements = count, "stream complete");
    Ok(())
}

/// Handler serving the `echo` and `stream` resources.
fn demo_handler() -> RequestHandler {
    Arc::new(|cancel, sender, request| Box::pin(handle(cancel, sender, request)))
}

async fn handle(_cancel: CancellationToken, sender: Sender, request: Request) {
    debug!(resource = %request.resource, "handling request");
    match request.resource.as_str() {
        ECHO_RESOURCE => {
            let content_type = request.header.get("Content-Type").unwrap_or("text/plain");
            sender.send_response(Response::new(content_type, 200, request.body.clone()));
        }
        STREAM_RESOURCE => {
            let sections = query_count(&request, "sections");
            let elements = query_count(&request, "elements");
            let mut rs = sender.send_parallel_response();
            for section in 0..sections {
                let index = section.to_string();
                rs.start_array_section("rows", &["section", index.as_str()]);
                for element in 0..elements {
                    let row = serde_json::json!({ "section": section, "element": element });
                    if let Err(err) = rs.send_element("", &row).await {
                        warn!(error = %err, "caller stopped reading");
                        rs.close(Some(err));
                        return;
                    }
                }
            }
            let summary = serde_json::json!({ "sections": sections, "elements": elements });
            let result = rs.object_section("summary", &[], &summary).await;
            rs.close(result.err());
        }
        other => {
            sender.send_response(Response::text(404, format!("unknown resource {other}")));
        }
    }
}

fn query_count(request: &Request, name: &str) -> u32 {
    request
        .query
        .get(name)
        .and_then(|v| v.parse().ok())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn echo_returns_body() {
        let bus = Bus::new(demo_handler());
        let cancel = CancellationToken::new();
        let request = Request::new(Method::POST, ECHO_RESOURCE).with_body("ping");
        let resp = bus
            .send_request(&cancel, request)
            .await
            .unwrap()
            .into_response()
            .unwrap();
        assert_eq!(resp.data.as_ref(), b"ping");
        assert_eq!(resp.content_type, "text/plain");
    }

    #[tokio::test]
    async fn stream_produces_requested_shape() {
        let bus = Bus::new(demo_handler());
        let cancel = CancellationToken::new();
        let request = Request::new(Method::GET, STREAM_RESOURCE)
            .with_query("sections", "2")
            .with_query("elements", "3");
        let mut stream = bus
            .send_request(&cancel, request)
            .await
            .unwrap()
            .into_sections()
            .unwrap();

        let mut rows = 0;
        for _ in 0..2 {
            let array = stream.next(&cancel).await.unwrap().into_array().unwrap();
            while array.next(&cancel).await.is_some() {
                rows += 1;
            }
        }
        assert_eq!(rows, 6);
        let mut summary = stream.next(&cancel).await.unwrap().into_object().unwrap();
        assert!(summary.value(&cancel).await.is_some());
        assert!(stream.next(&cancel).await.is_none());
        assert!(stream.terminal_error().is_none());
    }

    #[tokio::test]
    async fn unknown_resource_is_not_found() {
        let bus = Bus::new(demo_handler());
        let cancel = CancellationToken::new();
        let resp = bus
            .send_request(&cancel, Request::new(Method::GET, "missing"))
            .await
            .unwrap()
            .into_response()
            .unwrap();
        assert_eq!(resp.status_code, 404);
    }

    #[test]
    fn cli_parses_stream_command() {
        let cli = Cli::try_parse_from(["warpbus", "--config", "bus.toml", "stream", "--sections", "4"])
            .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("bus.toml")));
        assert!(matches!(
            cli.command,
            Command::Stream { sections: 4, elements: 3 }
        ));
    }
}
