//! Gingersnap operator binary

use anyhow::Context as _;
use clap::Command;
use gingersnap_operator::{telemetry, OperatorConfig, VERSION};
use tracing::info;

fn cli() -> Command {
    Command::new("gingersnap-operator")
        .version(VERSION)
        .about("Kubernetes operator for Gingersnap caches and cache rules")
        .subcommand(OperatorConfig::augment(
            Command::new("run").about("Run the controllers (default)"),
        ))
        .subcommand(Command::new("crds").about("Print the custom resource definitions as YAML"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let matches = cli().get_matches();

    match matches.subcommand() {
        Some(("crds", _)) => {
            for crd in gingersnap_api::crds() {
                print!("---\n{}", serde_yaml::to_string(&crd)?);
            }
            Ok(())
        }
        Some(("run", args)) => run(args).await,
        _ => {
            let defaults = OperatorConfig::augment(Command::new("run")).get_matches_from(["run"]);
            run(&defaults).await
        }
    }
}

async fn run(args: &clap::ArgMatches) -> anyhow::Result<()> {
    let config = OperatorConfig::from_args(args)?;
    telemetry::init(config.log_format);
    info!(version = VERSION, "gingersnap operator starting");

    let client = kube::Client::try_default()
        .await
        .context("unable to build Kubernetes client")?;
    gingersnap_operator::run(client, config).await;
    Ok(())
}
