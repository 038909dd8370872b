use std::net::Ipv6Addr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use ed25519_dalek::SigningKey;
use time::macros::format_description;
use tracing_subscriber::{fmt, EnvFilter};

use larch::{AddressInfo, Crypto, ExitInfo, PathSet, RouterContact, RouterContext};

mod config;

use config::Config;

#[derive(Parser, Debug)]
#[command(name = "larchd", version, about = "Onion overlay router daemon")]
struct Args {
    /// Generate a new configuration and print to stdout
    #[arg(long)]
    genconf: bool,

    /// Configuration file to read
    #[arg(long, default_value = "larchd.toml")]
    useconffile: String,

    /// Run without a configuration file (generate ephemeral keys)
    #[arg(long)]
    autoconf: bool,

    /// Print the router identity for the given config and exit
    #[arg(short, long)]
    address: bool,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, default_value = "info")]
    loglevel: String,
}

/// The daemon's view of itself, handed to paths during ticks.
struct Daemon;

impl RouterContext for Daemon {
    fn now_ms(&self) -> u64 {
        Crypto::now_ms()
    }
}

/// Build our router contact from the configuration and sign it.
fn build_contact(config: &Config, crypto: &Crypto) -> Result<RouterContact, String> {
    let ip: Ipv6Addr = config
        .bind_address
        .parse()
        .map_err(|e| format!("invalid bind address: {}", e))?;

    let mut rc = RouterContact::default();
    rc.addrs.push(AddressInfo {
        rank: 1,
        dialect: config.dialect.clone(),
        enc_key: config.enc_key()?,
        ip,
        port: config.port,
        version: 0,
    });
    if config.exit_enabled {
        rc.exits.push(ExitInfo {
            address: ip,
            netmask: Ipv6Addr::new(0xffff, 0xffff, 0xffff, 0xffff, 0, 0, 0, 0),
            pubkey: crypto.public_key,
            version: 0,
        });
    }
    rc.enc_key = config.enc_key()?;
    rc.pubkey = crypto.router_id();
    if !config.nickname.is_empty() {
        rc.set_nick(&config.nickname);
    }
    rc.sign(crypto)
        .map_err(|e| format!("failed to sign router contact: {}", e))?;
    Ok(rc)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // --genconf: generate and print config
    if args.genconf {
        print!("{}", Config::generate_config_text());
        return Ok(());
    }

    // Initialize logging
    let filter = EnvFilter::try_new(&args.loglevel).unwrap_or_else(|_| EnvFilter::new("info"));
    let format = format_description!("[year]-[month]-[day] [hour]:[minute]:[second].[subsecond digits:3]");
    let timer = fmt::time::LocalTime::new(format);
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_target(true)
        .with_level(true)
        .with_timer(timer)
        .init();

    // Load config
    let config = if args.autoconf {
        Config::generate()
    } else {
        match std::fs::read_to_string(&args.useconffile) {
            Ok(text) => toml::from_str::<Config>(&text)?,
            Err(e) => {
                tracing::error!("cannot read {}: {}", args.useconffile, e);
                tracing::error!("run with --genconf to create one, or --autoconf for ephemeral keys");
                std::process::exit(1);
            }
        }
    };

    // Parse or generate signing key
    let signing_key = if config.private_key.is_empty() {
        tracing::warn!("No private key configured, generating ephemeral key");
        SigningKey::generate(&mut rand::rngs::OsRng)
    } else {
        config
            .signing_key()
            .map_err(|e| format!("invalid private key: {}", e))?
    };
    let crypto = Crypto::new(signing_key);

    // --address: print router identity and exit
    if args.address {
        println!("{}", crypto.router_id());
        return Ok(());
    }

    // Build, sign, and persist our router contact
    let rc = build_contact(&config, &crypto)?;
    let rc_path = PathBuf::from(&config.rc_file);
    rc.write(&rc_path)?;

    // Paranoia: what we wrote must load and verify
    let loaded = RouterContact::read(&rc_path)?;
    if !loaded.verify_signature() {
        tracing::error!("persisted router contact failed verification, refusing to start");
        std::process::exit(1);
    }

    tracing::info!("Your router identity is {}", crypto.router_id());
    if rc.has_nick() {
        tracing::info!("Nickname: {}", rc.nick());
    }
    for addr in &rc.addrs {
        tracing::info!("Advertising {}", addr);
    }
    if rc.is_public_router() {
        tracing::info!("Advertising as a public exit router");
    }
    tracing::info!("Router contact written to {}", rc_path.display());

    // Path registry and its tick loop
    let settings = larch::Config::default().with_num_paths(config.num_paths);
    let paths = Arc::new(PathSet::new(settings.num_paths).with_name("larchd"));
    let daemon = Arc::new(Daemon);

    let tick_paths = paths.clone();
    let tick_daemon = daemon.clone();
    let ticker = tokio::spawn(async move {
        let mut interval = tokio::time::interval(settings.tick_interval);
        loop {
            interval.tick().await;
            let now = tick_daemon.now_ms();
            tick_paths.tick_paths(now, tick_daemon.as_ref());
            tick_paths.expire_paths(now);
        }
    });

    tracing::info!("larchd started. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down...");

    ticker.abort();
    tracing::info!("Goodbye!");
    Ok(())
}
