//! Entry point for `rcmp`.
//!
//! Parses CLI arguments and dispatches into **send**, **recv**, or **relay**
//! mode.  All protocol work is delegated to library modules; `main.rs` owns
//! only process setup (logging, argument parsing, exit status).

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};

use rcmp::simulator::{Simulator, SimulatorConfig};
use rcmp::transfer::resolve;
use rcmp::{AckPolicy, ReceiverConfig, SendOutcome, SenderConfig, SessionPolicy};

/// Exit status when the final packet was never acknowledged.
const EXIT_UNKNOWN: u8 = 2;

/// Reliable file transfer over UDP.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand)]
enum Mode {
    /// Send a file to a listening receiver.
    Send {
        /// Receiver host name or IP address.
        host: String,
        /// Receiver UDP port.
        #[arg(value_parser = clap::value_parser!(u16).range(1..))]
        port: u16,
        /// File to send.
        file: PathBuf,
        /// Milliseconds to wait for each requested acknowledgement.
        #[arg(long, default_value_t = 200)]
        ack_timeout_ms: u64,
        /// Unanswered attempts on the final packet before giving up.
        #[arg(long, default_value_t = 10)]
        final_attempts: u32,
        /// Ignore stray acknowledgements instead of aborting.
        #[arg(long)]
        lenient_acks: bool,
    },
    /// Receive one file on a UDP port.
    Recv {
        /// UDP port to listen on.
        #[arg(value_parser = clap::value_parser!(u16).range(1..))]
        port: u16,
        /// Output file (created or truncated).
        file: PathBuf,
        /// Accept packets from the first sender only.
        #[arg(long)]
        pinned_session: bool,
    },
    /// Relay datagrams between a sender and a receiver, injecting faults.
    Relay {
        /// Local address senders should target (e.g. 127.0.0.1:9001).
        #[arg(short, long)]
        listen: SocketAddr,
        /// Receiver address to forward to (e.g. 127.0.0.1:9000).
        #[arg(short, long)]
        forward: SocketAddr,
        /// Probability of dropping each datagram.
        #[arg(long, default_value_t = 0.0)]
        loss: f64,
        /// Probability of duplicating each datagram.
        #[arg(long, default_value_t = 0.0)]
        duplicate: f64,
        /// Drop every acknowledgement.
        #[arg(long)]
        drop_acks: bool,
        /// RNG seed for reproducible fault patterns.
        #[arg(long, default_value_t = 0)]
        seed: u64,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    // Initialise env_logger; set RUST_LOG to control verbosity.
    env_logger::init();

    let cli = Cli::parse();
    match run(cli.mode).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(mode: Mode) -> anyhow::Result<ExitCode> {
    match mode {
        Mode::Send {
            host,
            port,
            file,
            ack_timeout_ms,
            final_attempts,
            lenient_acks,
        } => {
            let config = SenderConfig {
                ack_timeout: Duration::from_millis(ack_timeout_ms),
                final_ack_attempts: final_attempts,
                ack_policy: if lenient_acks {
                    AckPolicy::Discard
                } else {
                    AckPolicy::Abort
                },
                ..SenderConfig::default()
            };
            let dest = resolve(&host, port).await?;
            log::info!("Sending {} to {dest}", file.display());
            let report = rcmp::send_path(dest, &file, &config)
                .await
                .with_context(|| format!("sending {}", file.display()))?;
            println!(
                "{}: {} bytes, {} packets, {} timeouts",
                report.outcome, report.file_size, report.packets_sent, report.timeouts
            );
            Ok(match report.outcome {
                SendOutcome::Delivered => ExitCode::SUCCESS,
                SendOutcome::Unknown => ExitCode::from(EXIT_UNKNOWN),
            })
        }
        Mode::Recv {
            port,
            file,
            pinned_session,
        } => {
            let config = ReceiverConfig {
                session_policy: if pinned_session {
                    SessionPolicy::Pinned
                } else {
                    SessionPolicy::Permissive
                },
                ..ReceiverConfig::default()
            };
            let local = SocketAddr::from(([0, 0, 0, 0], port));
            let report = rcmp::receive_path(local, &file, &config)
                .await
                .with_context(|| format!("receiving into {}", file.display()))?;
            println!(
                "received {} bytes ({} packets, {} duplicates, {} dropped)",
                report.bytes_written,
                report.packets_accepted,
                report.duplicates,
                report.discarded + report.foreign
            );
            Ok(ExitCode::SUCCESS)
        }
        Mode::Relay {
            listen,
            forward,
            loss,
            duplicate,
            drop_acks,
            seed,
        } => {
            let config = SimulatorConfig {
                loss_rate: loss,
                duplicate_rate: duplicate,
                drop_acks,
                seed,
                ..SimulatorConfig::default()
            };
            let relay = Simulator::bind(listen, forward, config).await?;
            log::info!("Relaying {} → {forward}", relay.local_addr());
            tokio::select! {
                result = relay.run() => result?,
                _ = tokio::signal::ctrl_c() => log::info!("Relay stopped"),
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}
