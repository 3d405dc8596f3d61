mod broker;
mod cli;
mod config;
mod driver;
mod error;
#[cfg(test)]
mod fakes;
mod network;
mod node;
mod ota;
mod sensor;
mod state_machine;

use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use env_logger::{Builder, Env};

use broker::{MqttBroker, Topics};
use cli::{Cli, Command};
use config::NodeConfig;
use driver::{Driver, Exit};
use error::NodeError;
use network::HostLink;
use node::Node;
use ota::Updates;
use sensor::ConfiguredSensor;
use state_machine::{DEFAULT_TRANSITIONS, TransitionTable};

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match dispatch(cli).await {
        Ok(code) => code,
        Err(e) => {
            log::error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    Builder::from_env(Env::default().default_filter_or(level)).init();
}

async fn dispatch(cli: Cli) -> Result<ExitCode> {
    let mut config = NodeConfig::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    if let Some(max_retries) = cli.max_retries {
        config.retry.max_retries = max_retries;
    }

    match cli.command {
        Command::Table => {
            let table = transition_table()?;
            print!("{table}");
            Ok(ExitCode::SUCCESS)
        }
        Command::Check => {
            config.validate()?;
            let table = transition_table()?;
            println!(
                "{} is valid, {} transitions",
                cli.config.display(),
                table.edges().len()
            );
            print!("{table}");
            Ok(ExitCode::SUCCESS)
        }
        Command::Run { iterations } => run(config, iterations).await,
    }
}

async fn run(config: NodeConfig, iterations: Option<u64>) -> Result<ExitCode> {
    config.validate()?;
    let table = transition_table().context("refusing to start")?;

    log::info!(
        "{} v{} starting as {}",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        config.device.name
    );

    let topics = Topics::new(config.broker.topic_prefix.as_deref());
    let link = HostLink::new(config.broker.host.clone(), config.broker.port);
    let broker = MqttBroker::new(
        &config.device.name,
        config.broker.clone(),
        topics.status,
        config.timing.broker_connect(),
    );
    let sensor = ConfiguredSensor::from_config(&config.sensor);
    let updates = Updates::from_config(&config.ota).context("configuring updates")?;
    let policy = config.retry.clone();

    let node = Node::new(config, link, broker, sensor, updates);
    let mut driver = Driver::new(node, table, policy);
    log::debug!("publishing to {:?}", driver.runner().topics());

    let exit = tokio::select! {
        result = driver.run(iterations) => result?,
        _ = tokio::signal::ctrl_c() => {
            log::info!("interrupted");
            Exit::Shutdown
        }
    };
    if exit == Exit::Shutdown {
        driver.finish(exit);
    }

    driver.runner_mut().shutdown().await;
    log::info!("stopped in {}: {exit:?}", driver.phase());
    println!("{}", serde_json::to_string_pretty(driver.summary())?);

    Ok(exit_code(exit))
}

fn transition_table() -> Result<TransitionTable, NodeError> {
    Ok(TransitionTable::new(DEFAULT_TRANSITIONS)?)
}

/// Exit status for the supervisor: 3 asks for a restart into a staged image,
/// 2 for a restart after the retry ceiling was reached.
fn exit_code(exit: Exit) -> ExitCode {
    match exit {
        Exit::Shutdown | Exit::IterationLimit => ExitCode::SUCCESS,
        Exit::RetriesExhausted(_) => ExitCode::from(2),
        Exit::UpdateApplied => ExitCode::from(3),
    }
}
