use anyhow::{Context, Result};
use clap::Parser;
use ergo_proxy::cli::{Cli, Command};
use ergo_proxy::config::ServerConfig;
use ergo_proxy::forwarder;
use ergo_proxy::logger;
use ergo_proxy::proxy::resolver::NameResolver;
use ergo_proxy::proxy::server::ProxyServer;

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Server { config } => run_server(config),
        Command::TlsForwarder { remote, binding, skip } => run_forwarder(&remote, &binding, skip),
    }
}

fn run_server(config_flag: Option<String>) -> Result<()> {
    let path = Cli::config_path(config_flag);
    logger::init("info");
    log::info!("Reading configuration from {path}");

    let config = ServerConfig::load(std::path::Path::new(&path))
        .with_context(|| format!("could not read configuration file {path}"))?;
    logger::init(&config.logger);

    let matcher = config
        .build_matcher()
        .with_context(|| format!("could not build denylist {path}"))?;
    let resolver = NameResolver::new(matcher, config.force_nameserver.clone());
    let server = ProxyServer::new(resolver, config.authorization.clone());

    server.run(&config.addr).context("could not listen")?;
    Ok(())
}

fn run_forwarder(remote: &str, binding: &str, skip: bool) -> Result<()> {
    logger::init("info");

    let pinned = forwarder::check(remote, skip).context("could not connect to Ergo proxy")?;
    forwarder::run(binding, remote, &pinned).context("could not listen")?;
    Ok(())
}
