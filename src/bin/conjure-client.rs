//! Conjure client binary.
//!
//! Dials one covert destination through the registration protocol and
//! splices stdin/stdout over the phantom connection.
//!
//! Usage: conjure-client --pubkey <hex32> --covert <host:port> [--width N]
//!        [--proxy] [--transport min|null] [--disable-ipv6] [--debug]

use std::env;
use std::sync::Arc;

use conjure::{AssetBundle, Decoy, Dialer, SessionConfig, Transport, V6Policy};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut pubkey_hex = None;
    let mut covert = None;
    let mut decoys: Vec<Decoy> = Vec::new();
    let mut config = SessionConfig::default();
    let mut debug = false;

    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--pubkey" => pubkey_hex = args.next(),
            "--covert" => covert = args.next(),
            "--decoy" => {
                // "SNI,IP" pairs, repeatable
                if let Some(pair) = args.next() {
                    decoys.push(parse_decoy(&pair)?);
                }
            }
            "--width" => {
                if let Some(w) = args.next() {
                    config.width = w.parse()?;
                }
            }
            "--proxy" => config.use_proxy_header = true,
            "--transport" => {
                config.transport = match args.next().as_deref() {
                    Some("null") => Transport::Null,
                    Some("obfs4") => Transport::Obfs4,
                    _ => Transport::Min,
                };
            }
            "--disable-ipv6" => config.v6_policy = V6Policy::V4Only,
            "--debug" => debug = true,
            "-h" | "--help" => {
                print_usage();
                return Ok(());
            }
            other => anyhow::bail!("unknown option: {other}"),
        }
    }

    tracing_subscriber::fmt()
        .with_max_level(if debug {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        })
        .with_target(false)
        .init();

    let pubkey_hex = pubkey_hex.ok_or_else(|| anyhow::anyhow!("--pubkey is required"))?;
    let covert = covert.ok_or_else(|| anyhow::anyhow!("--covert is required"))?;
    let pubkey: [u8; 32] = hex::decode(&pubkey_hex)?
        .try_into()
        .map_err(|_| anyhow::anyhow!("station pubkey must be 32 bytes of hex"))?;
    if decoys.is_empty() {
        anyhow::bail!("at least one --decoy is required");
    }

    let assets = Arc::new(AssetBundle::new(pubkey, decoys, 0));
    let dialer = Dialer::new(assets).with_config(config);

    let conn = dialer.dial(&covert).await?;
    tracing::info!("phantom connection established; splicing stdio");

    let (mut read_half, mut write_half) = tokio::io::split(conn);
    let mut stdin = tokio::io::stdin();
    let mut stdout = tokio::io::stdout();

    let upstream = async move { tokio::io::copy(&mut stdin, &mut write_half).await };
    let downstream = async move { tokio::io::copy(&mut read_half, &mut stdout).await };

    tokio::select! {
        result = upstream => { result?; }
        result = downstream => { result?; }
    }
    Ok(())
}

fn parse_decoy(pair: &str) -> anyhow::Result<Decoy> {
    let (sni, ip) = pair
        .split_once(',')
        .ok_or_else(|| anyhow::anyhow!("--decoy expects \"SNI,IP\""))?;
    match ip.parse()? {
        std::net::IpAddr::V4(v4) => Ok(Decoy::new(sni, Some(v4), None)),
        std::net::IpAddr::V6(v6) => Ok(Decoy::new(sni, None, Some(v6))),
    }
}

fn print_usage() {
    println!(
        r#"Conjure client

USAGE:
    conjure-client --pubkey <hex32> --covert <host:port> --decoy <SNI,IP>...

OPTIONS:
    --pubkey <hex>        Station X25519 public key, 64 hex chars
    --covert <addr>       Covert destination (host:port)
    --decoy <SNI,IP>      Decoy host, repeatable
    --width <n>           Parallel registrations per session (default 5)
    --proxy               Request the PROXY-protocol header
    --transport <kind>    min | null | obfs4 (default min)
    --disable-ipv6        Register over IPv4 only
    --debug               Debug-level logs"#
    );
}
