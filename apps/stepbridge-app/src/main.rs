//! stepbridge command-line interface.
//!
//! - `headless`: run cart-pole episodes locally through the runner
//! - `serve`: expose the cart-pole environment over TCP
//! - `client`: drive a served environment with a random policy
//! - `info`: print crate versions and the effective configuration

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use stepbridge_cartpole::{CartPoleDevice, cart_pole_env};
use stepbridge_core::prelude::*;
use stepbridge_env::bridge::Bridge;
use stepbridge_env::runner::ThreadedRunner;
use stepbridge_remote::{EnvironmentClient, EnvironmentServer, PollBudget, ProxyError};

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

/// Step an RL environment through a cooperative device scheduler.
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// TOML configuration file (`[proxy]` and `[runner]` tables).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run cart-pole episodes locally and print statistics.
    Headless {
        #[command(flatten)]
        episodes: EpisodeArgs,
    },

    /// Serve the cart-pole environment to remote learners.
    Serve {
        /// Address to bind; overrides the configured host and port.
        #[arg(short, long)]
        address: Option<String>,

        /// Stop after this many client sessions, failed ones included.
        #[arg(long)]
        clients: Option<u32>,
    },

    /// Drive a served environment with a random policy.
    Client {
        /// Server address; overrides the configured host and port.
        #[arg(short, long)]
        address: Option<String>,

        /// Mode to put the environment in before the first episode.
        #[arg(long, default_value = "train")]
        mode: String,

        #[command(flatten)]
        episodes: EpisodeArgs,
    },

    /// Print crate information.
    Info,
}

#[derive(clap::Args)]
struct EpisodeArgs {
    /// Number of episodes to run.
    #[arg(short = 'n', long, default_value_t = 1)]
    episodes: u32,

    /// Maximum steps per episode.
    #[arg(short, long, default_value_t = 200)]
    max_steps: u32,

    /// Random seed for the environment and the policy.
    #[arg(short, long)]
    seed: Option<u64>,
}

// ---------------------------------------------------------------------------
// Episodes
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct EpisodeStats {
    episodes: u32,
    steps: u64,
}

fn policy(seed: Option<u64>) -> StdRng {
    seed.map_or_else(|| StdRng::from_rng(&mut rand::rng()), StdRng::seed_from_u64)
}

fn random_action(rng: &mut StdRng) -> Action {
    Action::Scalar(if rng.random_bool(0.5) { 1.0 } else { 0.0 })
}

/// Run episodes against anything that can reset and step.
fn run_episodes<E>(
    args: &EpisodeArgs,
    mut reset: impl FnMut() -> Result<Observation, E>,
    mut step: impl FnMut(Action) -> Result<StepResult, E>,
) -> Result<EpisodeStats, E> {
    let mut rng = policy(args.seed);
    let mut stats = EpisodeStats::default();

    for ep in 0..args.episodes {
        reset()?;
        let mut total_reward = 0.0;
        let mut steps = 0_u32;
        for _ in 0..args.max_steps {
            let result = step(random_action(&mut rng))?;
            steps += 1;
            total_reward += result.reward;
            if result.done {
                break;
            }
        }
        println!("episode {}: steps={steps}, reward={total_reward:.3}", ep + 1);
        stats.episodes += 1;
        stats.steps += u64::from(steps);
    }
    println!("\ntotal: episodes={}, steps={}", stats.episodes, stats.steps);
    Ok(stats)
}

// ---------------------------------------------------------------------------
// Modes
// ---------------------------------------------------------------------------

fn run_headless(config: &StepBridgeConfig, args: EpisodeArgs) -> Result<(), String> {
    let mut runner =
        ThreadedRunner::new(CartPoleDevice::default()).with_config(config.runner.clone());
    let report = runner
        .run(move |bridge| -> Result<EpisodeStats, EnvError> {
            let mut env = cart_pole_env();
            env.attach_bridge(bridge);
            env.setup()?;
            env.seed(args.seed)?;
            let env = std::cell::RefCell::new(env);
            let stats = run_episodes(
                &args,
                || env.borrow_mut().reset(),
                |action| env.borrow_mut().step(action),
            )?;
            env.borrow_mut().close()?;
            Ok(stats)
        })
        .map_err(|e| e.to_string())?;

    info!(units = report.units, stop = ?report.stop, "runner finished");
    report.output.map(|_| ()).map_err(|e| e.to_string())
}

fn run_serve(
    config: &StepBridgeConfig,
    address: Option<String>,
    clients: Option<u32>,
) -> Result<(), String> {
    let address = address.unwrap_or_else(|| config.proxy.address());
    let server =
        EnvironmentServer::bind_with_config(&address, &config.proxy).map_err(|e| e.to_string())?;
    let local = server.local_addr().map_err(|e| e.to_string())?;
    println!("stepbridge server listening on {local}");

    let mut runner =
        ThreadedRunner::new(CartPoleDevice::default()).with_config(config.runner.clone());
    let report = runner
        .run(move |bridge| serve_sessions(&server, &bridge, clients))
        .map_err(|e| e.to_string())?;

    let tally = report.output;
    info!(
        sessions = tally.sessions,
        completed = tally.completed,
        units = report.units,
        stop = ?report.stop,
        "server stopped"
    );
    Ok(())
}

#[derive(Debug, Default, PartialEq, Eq)]
struct SessionTally {
    /// Clients accepted, whatever the outcome.
    sessions: u32,
    /// Clients that disconnected cleanly.
    completed: u32,
}

/// Serve clients one after another, each against a fresh environment, until
/// `clients` sessions have run or the bridge closes.
fn serve_sessions(server: &EnvironmentServer, bridge: &Bridge, clients: Option<u32>) -> SessionTally {
    let mut tally = SessionTally::default();
    while clients.is_none_or(|max| tally.sessions < max) && !bridge.is_closed() {
        let mut env = cart_pole_env();
        env.attach_bridge(bridge.clone());
        info!("waiting for client");
        match server.serve_one(&mut env) {
            Ok(requests) => {
                info!(requests, "client disconnected cleanly");
                tally.completed += 1;
            }
            Err(e @ ProxyError::PollTimeout { .. }) => {
                warn!(error = %e, "client went quiet");
            }
            Err(e) => error!(error = %e, "client error"),
        }
        tally.sessions += 1;
    }
    tally
}

fn run_client(
    config: &StepBridgeConfig,
    address: Option<String>,
    mode: &str,
    args: &EpisodeArgs,
) -> Result<(), ProxyError> {
    let mut client = match address {
        Some(address) => EnvironmentClient::connect_with_budget(
            address.as_str(),
            PollBudget::from_config(&config.proxy)?,
        )?,
        None => EnvironmentClient::connect_with_config(&config.proxy)?,
    };

    client.setup()?;
    client.set_mode(mode)?;
    if let Some(seed) = args.seed {
        client.seed(seed)?;
    }
    let client = std::cell::RefCell::new(client);
    run_episodes(
        args,
        || client.borrow_mut().reset(),
        |action| client.borrow_mut().step(&action),
    )?;
    Ok(())
}

fn run_info(config: &StepBridgeConfig) {
    println!("stepbridge v{}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("crates:");
    println!("  stepbridge-core      {}", env!("CARGO_PKG_VERSION"));
    println!("  stepbridge-env       {}", env!("CARGO_PKG_VERSION"));
    println!("  stepbridge-remote    {}", env!("CARGO_PKG_VERSION"));
    println!("  stepbridge-cartpole  {}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("proxy:  {}", config.proxy.address());
    println!(
        "        timeout={}s interval={}s max_polls={}",
        config.proxy.timeout_secs, config.proxy.poll_interval_secs, config.proxy.max_polls
    );
    println!(
        "runner: thread={} max_units={:?}",
        config.runner.learner_thread_name, config.runner.max_units
    );
}

// ---------------------------------------------------------------------------
// main
// ---------------------------------------------------------------------------

fn load_config(path: Option<&PathBuf>) -> Result<StepBridgeConfig, ConfigError> {
    match path {
        Some(path) => StepBridgeConfig::from_file(path),
        None => Ok(StepBridgeConfig::default()),
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = match load_config(cli.config.as_ref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("config error: {e}");
            return ExitCode::FAILURE;
        }
    };

    let result = match cli.command {
        Some(Commands::Headless { episodes }) => run_headless(&config, episodes),
        Some(Commands::Serve { address, clients }) => run_serve(&config, address, clients),
        Some(Commands::Client {
            address,
            mode,
            episodes,
        }) => run_client(&config, address, &mode, &episodes).map_err(|e| e.to_string()),
        Some(Commands::Info) => {
            run_info(&config);
            Ok(())
        }
        None => run_headless(
            &config,
            EpisodeArgs {
                episodes: 1,
                max_steps: 200,
                seed: None,
            },
        ),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::net::TcpStream;
    use std::thread;

    use stepbridge_remote::EnvironmentClient;

    use super::*;

    #[test]
    fn only_clean_disconnects_count_as_completed() {
        let server = EnvironmentServer::bind("127.0.0.1:0").unwrap();
        let addr = server.local_addr().unwrap();

        let clients = thread::spawn(move || {
            let mut client = EnvironmentClient::connect(addr).unwrap();
            client.setup().unwrap();
            drop(client);

            // A 12-byte frame cut off after one byte, then hang up.
            let mut stream = TcpStream::connect(addr).unwrap();
            stream.write_all(&[12, 0, 0, 0, b'{']).unwrap();
        });

        let mut runner = ThreadedRunner::new(CartPoleDevice::default());
        let report = runner
            .run(move |bridge| serve_sessions(&server, &bridge, Some(2)))
            .unwrap();
        clients.join().unwrap();

        assert_eq!(
            report.output,
            SessionTally {
                sessions: 2,
                completed: 1,
            }
        );
    }
}
