use std::path::PathBuf;

use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, COOKIE, LOCATION, SET_COOKIE};
use reqwest::redirect::Policy;
use serde_json::Value;

use edge_router::config::{load_config, RouteConfig};
use edge_router::routing::{join_pathname, PatternInit};

#[derive(Parser)]
#[command(name = "edge-router-cli")]
#[command(about = "Inspect edge-router configurations and probe running routers", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a configuration file and print its route table
    Check {
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Send one request without following redirects
    Probe {
        #[arg(short, long, default_value = "http://localhost:8080")]
        url: String,

        /// Path and query to request
        #[arg(default_value = "/")]
        path: String,

        #[arg(short = 'X', long, default_value = "GET")]
        method: String,

        /// Raw `Cookie` header value
        #[arg(short, long)]
        cookie: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Check { config } => {
            let config = load_config(&config)?;
            println!("listening on {}", config.listener.bind_address);
            println!("bindings: {}", config.bindings.keys().cloned().collect::<Vec<_>>().join(", "));
            for route in &config.routes {
                print_route(route, None, 0);
            }
        }
        Commands::Probe {
            url,
            path,
            method,
            cookie,
        } => {
            let client = reqwest::Client::builder().redirect(Policy::none()).build()?;
            let mut headers = HeaderMap::new();
            if let Some(cookie) = cookie {
                headers.insert(COOKIE, HeaderValue::from_str(&cookie)?);
            }
            let method = reqwest::Method::from_bytes(method.to_uppercase().as_bytes())?;
            let res = client
                .request(method, format!("{}{}", url.trim_end_matches('/'), path))
                .headers(headers)
                .send()
                .await?;
            print_response(res).await?;
        }
    }

    Ok(())
}

fn print_route(route: &RouteConfig, parent: Option<&PatternInit>, depth: usize) {
    let effective = PatternInit::inherit(route.effective_pattern().as_ref(), parent);
    let pathname = effective.pathname.clone().unwrap_or_else(|| join_pathname(None, None));
    let kind = match (route.index, route.effective_pattern().is_some()) {
        (true, _) => "index",
        (false, true) => "path",
        (false, false) => "group",
    };
    println!(
        "{:indent$}{} [{}] {} -> {}{}",
        "",
        route.label(),
        kind,
        pathname,
        route.module.as_deref().unwrap_or("-"),
        if route.cache { " (cached)" } else { "" },
        indent = depth * 2
    );
    for child in &route.children {
        print_route(child, Some(&effective), depth + 1);
    }
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", res.status());
    if let Some(location) = res.headers().get(LOCATION) {
        println!("location: {}", location.to_str()?);
    }
    for cookie in res.headers().get_all(SET_COOKIE) {
        println!("set-cookie: {}", cookie.to_str()?);
    }

    let text = res.text().await?;
    if text.is_empty() {
        return Ok(());
    }
    match serde_json::from_str::<Value>(&text) {
        Ok(json) => println!("{}", serde_json::to_string_pretty(&json)?),
        Err(_) => println!("{text}"),
    }
    Ok(())
}
