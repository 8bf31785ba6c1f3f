use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::process;
use tokio::net::{TcpListener, UdpSocket};
use tracing_subscriber::EnvFilter;

use fakedns::addresses::AddressCache;
use fakedns::metrics::serve_prometheus_endpoint_task;
use fakedns::server::{listen_tcp, listen_udp, Responder};
use fakedns::settings::Settings;
use fakedns::store::SharedMappingStore;
use fakedns::synthesise::Synthesiser;

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Full,
    Compact,
    Pretty,
    Json,
}

// the doc comments for this struct turn into the CLI help text
#[derive(Debug, Parser)]
/// A DNS server which answers every query with something plausible.
///
/// Every name resolves: to a configured address, to a default, or to a
/// random address which the name then keeps for the rest of the run.
/// Nothing is ever looked up upstream.
struct Args {
    /// Path to a YAML configuration file.  `FAKEDNS_*` environment
    /// variables override what it says.
    #[clap(short, long, value_parser, env = "FAKEDNS_CONFIG")]
    config: Option<PathBuf>,

    /// Where to remember random address assignments, overriding the
    /// configuration file
    #[clap(long, value_parser)]
    cache_file: Option<PathBuf>,

    /// Format of the log output
    #[clap(long, value_enum, default_value_t = LogFormat::Full, env = "FAKEDNS_LOG_FORMAT")]
    log_format: LogFormat,
}

fn begin_logging(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let logger = tracing_subscriber::fmt().with_env_filter(filter);

    match format {
        LogFormat::Full => logger.init(),
        LogFormat::Compact => logger.compact().init(),
        LogFormat::Pretty => logger.pretty().init(),
        LogFormat::Json => logger.json().init(),
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    begin_logging(args.log_format);

    let mut settings = match Settings::new(args.config.as_deref()) {
        Ok(settings) => settings,
        Err(error) => {
            tracing::error!(config = ?args.config, %error, "could not load configuration");
            process::exit(1);
        }
    };
    if let Some(cache_file) = args.cache_file {
        settings.cache_file = cache_file;
    }

    let mut addresses = AddressCache::new(&settings);
    if settings.random_ip {
        match SharedMappingStore::create(&settings.cache_file) {
            Ok(store) => {
                tracing::info!(
                    cache_file = %settings.cache_file.display(),
                    range = %settings.random_range,
                    "dynamic assignment enabled"
                );
                addresses = addresses.with_dynamic_assignment(store, settings.random_range);
            }
            Err(error) => {
                tracing::error!(%error, "could not create mapping store");
                process::exit(1);
            }
        }
    }

    let responder = Responder::new(
        Synthesiser::new(&settings, addresses),
        &settings.service_name,
    );

    let bind = (settings.bind_address, settings.bind_port);
    tracing::info!(
        address = %settings.bind_address,
        port = %settings.bind_port,
        "binding DNS sockets"
    );

    let udp = match UdpSocket::bind(bind).await {
        Ok(s) => s,
        Err(error) => {
            tracing::error!(%error, "could not bind DNS UDP socket");
            process::exit(1);
        }
    };

    let tcp = match TcpListener::bind(bind).await {
        Ok(s) => s,
        Err(error) => {
            tracing::error!(%error, "could not bind DNS TCP socket");
            process::exit(1);
        }
    };

    if let Some(address) = settings.metrics_address {
        tracing::info!(%address, "binding HTTP socket");
        tokio::spawn(async move {
            if let Err(error) = serve_prometheus_endpoint_task(address).await {
                tracing::error!(%error, "could not serve metrics endpoint");
            }
        });
    }

    tokio::spawn(listen_tcp(responder.clone(), tcp));
    tokio::spawn(listen_udp(responder, udp));

    tracing::info!(service = %settings.service_name, "started");

    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("shutting down"),
        Err(error) => {
            tracing::error!(%error, "could not listen for shutdown signal");
            process::exit(1);
        }
    }
}
