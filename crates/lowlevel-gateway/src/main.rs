// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Low-level gateway server
//!
//! Bridges the serial bus to TCP clients until interrupted.
//!
//! # Usage
//!
//! ```bash
//! # Defaults
//! lowlevel-server
//!
//! # Listen on all interfaces, port 9000, other serial device
//! lowlevel-server -a 0.0.0.0 -p 9000 -s /dev/ttyUSB0
//!
//! # Pause socket on another port and token
//! lowlevel-server -b 127.0.0.1 -q 24000 -t 42
//!
//! # Using configuration file
//! lowlevel-server --config gateway.toml
//! ```

use clap::{Parser, Subcommand};
use lowlevel_gateway::{
    run_gateway, CancelToken, GatewayConfig, LoopTiming, NoPause, PauseControl, Router,
    SystemTransports, TcpPause,
};
use std::net::IpAddr;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Serial bus / TCP gateway
#[derive(Parser, Debug)]
#[command(name = "lowlevel-server")]
#[command(about = "Bidirectional gateway between a multiplexed serial bus and TCP clients")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// TCP listen address
    #[arg(short = 'a', long)]
    address: Option<IpAddr>,

    /// TCP listen port
    #[arg(short = 'p', long, value_parser = clap::value_parser!(u16).range(1..))]
    port: Option<u16>,

    /// Serial device
    #[arg(short = 's', long)]
    serial: Option<String>,

    /// Pause socket address
    #[arg(short = 'b', long)]
    pause_address: Option<IpAddr>,

    /// Pause socket port
    #[arg(short = 'q', long, value_parser = clap::value_parser!(u16).range(1..))]
    pause_port: Option<u16>,

    /// Pause token byte
    #[arg(short = 't', long)]
    pause_token: Option<u8>,

    /// Disable the pause socket
    #[arg(long)]
    no_pause: bool,

    /// Maximum number of simultaneous TCP clients
    #[arg(long)]
    max_clients: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate example configuration file
    GenConfig {
        /// Output file path
        #[arg(short, long, default_value = "gateway.toml")]
        output: PathBuf,
    },

    /// Validate a configuration file
    Validate {
        /// Configuration file path
        #[arg(short, long)]
        config: PathBuf,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Handle subcommands
    if let Some(cmd) = args.command {
        return match cmd {
            Commands::GenConfig { output } => cmd_gen_config(output),
            Commands::Validate { config } => cmd_validate(config),
        };
    }

    let config = build_config(&args)?;

    // Initialize logging
    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let cancel = CancelToken::new();
    let handler_token = cancel.clone();
    ctrlc::set_handler(move || {
        handler_token.cancel();
    })?;

    let mut pause: Box<dyn PauseControl> = if config.pause.enabled {
        tracing::info!(
            "Opening pause socket at {} with token {}",
            config.pause.socket_addr(),
            config.pause.token
        );
        Box::new(TcpPause::from_config(&config.pause)?)
    } else {
        Box::new(NoPause)
    };

    let timing = LoopTiming::from_config(&config.routing);
    let mut router = Router::new(config, SystemTransports)?;

    tracing::info!("LowLevelServer started");
    let stats = run_gateway(&mut router, &mut *pause, &cancel, timing);
    tracing::info!("LowLevelServer terminated: {}", stats);

    Ok(())
}

fn build_config(args: &Args) -> Result<GatewayConfig, Box<dyn std::error::Error>> {
    let mut config = match &args.config {
        Some(path) => GatewayConfig::from_file(path)?,
        None => GatewayConfig::default(),
    };

    // CLI overrides
    if let Some(address) = args.address {
        config.socket.address = Some(address);
    }
    if let Some(port) = args.port {
        config.socket.port = port;
    }
    if let Some(serial) = &args.serial {
        config.serial.device = Some(serial.clone());
    }
    if let Some(address) = args.pause_address {
        config.pause.address = address;
    }
    if let Some(port) = args.pause_port {
        config.pause.port = port;
    }
    if let Some(token) = args.pause_token {
        config.pause.token = token;
    }
    if args.no_pause {
        config.pause.enabled = false;
    }
    if let Some(max_clients) = args.max_clients {
        config.socket.max_clients = max_clients;
    }
    if let Some(level) = &args.log_level {
        config.log_level = level.clone();
    }

    config.validate()?;
    Ok(config)
}

fn cmd_gen_config(output: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let config = GatewayConfig::default();
    let toml_str = config.to_toml_string()?;

    // Add comments
    let content = format!(
        r#"# Low-level gateway configuration
# Generated by lowlevel-server gen-config
#
# Command bytes: 0oo ccccc channel data, 100 ooooo direct,
# 101 ooooo broadcast, 11u ccccc subscribe (u=0) / unsubscribe (u=1).

{}
"#,
        toml_str
    );

    std::fs::write(&output, content)?;
    println!("Generated configuration file: {}", output.display());
    Ok(())
}

fn cmd_validate(config_path: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    match GatewayConfig::from_file(&config_path) {
        Ok(config) => {
            println!("Configuration valid!");
            println!();
            match config.socket.socket_addr() {
                Some(addr) => println!("TCP:    {}", addr),
                None => println!("TCP:    (address not set)"),
            }
            println!(
                "Serial: {} (raw mode: {})",
                config.serial.device.as_deref().unwrap_or("(not set)"),
                config.serial.raw_mode
            );
            if config.pause.enabled {
                println!(
                    "Pause:  {} token {}",
                    config.pause.socket_addr(),
                    config.pause.token
                );
            } else {
                println!("Pause:  disabled");
            }
            println!(
                "Slots:  {} (default subscription 0x{:08x})",
                config.socket.max_clients, config.routing.default_subscription
            );
            Ok(())
        }
        Err(e) => {
            eprintln!("Configuration invalid: {}", e);
            std::process::exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_overrides() {
        let args = Args::parse_from([
            "lowlevel-server",
            "-a",
            "0.0.0.0",
            "-p",
            "9000",
            "-s",
            "/dev/ttyUSB0",
            "-q",
            "24000",
            "-t",
            "42",
            "--max-clients",
            "8",
        ]);
        let config = build_config(&args).unwrap();
        assert_eq!(config.socket.socket_addr(), Some("0.0.0.0:9000".parse().unwrap()));
        assert_eq!(config.serial.device.as_deref(), Some("/dev/ttyUSB0"));
        assert_eq!(config.pause.port, 24000);
        assert_eq!(config.pause.token, 42);
        assert_eq!(config.socket.max_clients, 8);
        assert!(config.pause.enabled);
    }

    #[test]
    fn test_cli_rejects_bad_values() {
        assert!(Args::try_parse_from(["lowlevel-server", "-p", "0"]).is_err());
        assert!(Args::try_parse_from(["lowlevel-server", "-t", "300"]).is_err());

        let args = Args::parse_from(["lowlevel-server", "--max-clients", "255"]);
        assert!(build_config(&args).is_err());
    }
}
