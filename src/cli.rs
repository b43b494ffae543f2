//! Command-line surface: `server` and `tls-forwarder` subcommands.

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "ergo-proxy", about = "HTTP(S) forwarding proxy and TLS-pinning tunnel forwarder")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Starts the proxy server.
    Server {
        /// Path to the YAML configuration file.
        #[arg(short, long)]
        config: Option<String>,
    },
    /// Starts a local TLS-tunneling forwarder pinned to a remote proxy.
    TlsForwarder {
        /// `host:port` of the remote proxy to tunnel to.
        remote: String,

        /// Local `host:port` to listen on.
        #[arg(short, long, default_value = "localhost:8080")]
        binding: String,

        /// Skip the first-connect fingerprint confirmation prompt.
        #[arg(long)]
        skip: bool,
    },
}

impl Cli {
    /// Resolves the `server` config path: the `--config` flag, else
    /// `ERGO_PROXY_CONFIG`, else `ergo.yml`.
    pub fn config_path(flag: Option<String>) -> String {
        flag.or_else(|| std::env::var("ERGO_PROXY_CONFIG").ok())
            .unwrap_or_else(|| "ergo.yml".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_path_prefers_flag_over_env() {
        assert_eq!(Cli::config_path(Some("x.yml".into())), "x.yml");
    }

    #[test]
    fn config_path_defaults_to_ergo_yml() {
        std::env::remove_var("ERGO_PROXY_CONFIG");
        assert_eq!(Cli::config_path(None), "ergo.yml");
    }
}
