mod body;
mod config;
mod gateway;
mod github;
mod hooks;
mod http;
mod signature;

use std::{io::Read as _, path::PathBuf};

use actix_web::{middleware::Logger, web, App, HttpServer};
use clap::{Parser, Subcommand};
use color_eyre::eyre::{self, WrapErr as _};

use crate::{config::Config, hooks::Hooks, http::Routes};

/// Keeps a fixed topic on every repository of one GitHub organization.
#[derive(Debug, Parser)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Serve webhook deliveries over HTTP (default)
    Serve,
    /// Answer a single API Gateway proxy event and print the proxy response
    Invoke {
        /// File holding the event JSON; stdin when omitted
        #[arg(long)]
        event: Option<PathBuf>,
    },
}

#[actix_web::main]
async fn main() -> eyre::Result<()> {
    dotenv::dotenv().ok();
    color_eyre::install()?;
    tracing_log::LogTracer::init()?;
    tracing::subscriber::set_global_default(
        tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .finish(),
    )?;

    let cli = Cli::parse();
    let config = Config::from_env().wrap_err("Invalid configuration")?;
    let routes = Routes::new(config.path_prefix.clone());

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config, routes).await,
        Command::Invoke { event } => invoke(config, routes, event).await,
    }
}

async fn serve(config: Config, routes: Routes) -> eyre::Result<()> {
    let bind = config.bind.clone();
    tracing::info!(
        organization = config.organization.as_str(),
        topic = config.topic.as_str(),
        "Listening on http://{}/webhook",
        bind
    );

    HttpServer::new(move || {
        let routes = routes.clone();
        App::new()
            .app_data(web::Data::new(Hooks::from_config(&config)))
            .app_data(http::WebhookConfig::new(config.webhook_secret.clone()))
            .app_data(web::PayloadConfig::new(config.max_body_bytes))
            .wrap(Logger::default())
            .configure(move |cfg| routes.configure(cfg))
    })
    .bind(&bind)?
    .run()
    .await
    .map_err(Into::into)
}

async fn invoke(config: Config, routes: Routes, path: Option<PathBuf>) -> eyre::Result<()> {
    let raw = match &path {
        Some(path) => std::fs::read_to_string(path)
            .wrap_err_with(|| format!("Failed to read event from {:?}", path))?,
        None => {
            let mut raw = String::new();
            std::io::stdin()
                .read_to_string(&mut raw)
                .wrap_err("Failed to read event from stdin")?;
            raw
        }
    };
    let event: gateway::ProxyEvent =
        serde_json::from_str(&raw).wrap_err("Event is not a valid proxy event")?;

    let hooks = Hooks::from_config(&config);
    let response = gateway::handle(event, &config.webhook_secret, &routes, &hooks).await;
    serde_json::to_writer(std::io::stdout(), &response)
        .wrap_err("Failed to write proxy response")?;
    println!();
    Ok(())
}
