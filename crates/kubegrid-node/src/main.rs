//! KubeGrid Node - Runs Kubernetes discovery rounds for a grid member

use anyhow::Context;
use clap::Parser;
use kubegrid_core::{split_pair, PropertyMap, PropertyResolver, SystemProperties};
use kubegrid_discovery::KubernetesDiscoveryStrategyFactory;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "kubegrid-node")]
#[command(about = "Discover grid members through Kubernetes")]
struct Args {
    /// Discovery property, e.g. service-dns=hz-headless.default.svc.cluster.local
    #[arg(long = "property", value_name = "KEY=VALUE")]
    properties: Vec<String>,

    /// System property override, e.g. -D kubegrid.kubernetes.namespace=default
    #[arg(short = 'D', value_name = "KEY=VALUE")]
    system_properties: Vec<String>,

    /// JSON object of discovery properties; --property entries win
    #[arg(long)]
    properties_file: Option<PathBuf>,

    /// Seconds between discovery rounds
    #[arg(long, default_value = "5")]
    interval_secs: u64,

    /// Number of rounds to run, 0 runs until interrupted
    #[arg(long, default_value = "0")]
    rounds: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let mut system = SystemProperties::new();
    for pair in &args.system_properties {
        system.set_from_pair(pair)?;
    }
    let factory = KubernetesDiscoveryStrategyFactory::new(PropertyResolver::from_process(system));

    let properties = load_properties(args.properties_file.as_deref(), &args.properties)?;
    for key in properties.keys() {
        if !factory.configuration_properties().contains(&key.as_str()) {
            tracing::warn!(key = %key, "Unknown discovery property");
        }
    }

    let mut strategy = factory
        .new_strategy(&properties)
        .context("failed to create discovery strategy")?;
    strategy.start();

    tracing::info!(
        resolver = strategy.resolver_name(),
        interval_secs = args.interval_secs,
        rounds = args.rounds,
        "Starting discovery"
    );

    let mut ticker = tokio::time::interval(Duration::from_secs(args.interval_secs.max(1)));
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    let mut round = 0u64;
    let outcome = loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = &mut shutdown => {
                tracing::info!("Interrupted, shutting down");
                break Ok(());
            }
        }

        round += 1;
        match strategy.discover_nodes().await {
            Ok(nodes) => {
                tracing::info!(round, count = nodes.len(), "Discovery round complete");
                for node in &nodes {
                    tracing::info!(node = %node, metadata = ?node.metadata(), "Discovered node");
                }
            }
            Err(e) if e.is_retriable() => {
                tracing::warn!(round, error = %e, "Discovery round failed");
            }
            Err(e) => break Err(e),
        }

        if args.rounds != 0 && round >= args.rounds {
            break Ok(());
        }
    };

    strategy.destroy();
    outcome.context("discovery failed")
}

/// Merge the properties file with command-line pairs
fn load_properties(file: Option<&Path>, pairs: &[String]) -> anyhow::Result<PropertyMap> {
    let mut properties = match file {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            serde_json::from_str::<PropertyMap>(&text)
                .with_context(|| format!("{} is not a JSON object of strings", path.display()))?
        }
        None => PropertyMap::new(),
    };

    for pair in pairs {
        let (key, value) = split_pair(pair)?;
        properties.insert(key.to_string(), value.to_string());
    }
    Ok(properties)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_parse() {
        let args = Args::parse_from([
            "kubegrid-node",
            "--property",
            "service-name=hz",
            "-D",
            "kubegrid.kubernetes.namespace=default",
            "--rounds",
            "3",
        ]);
        assert_eq!(args.properties, vec!["service-name=hz"]);
        assert_eq!(args.system_properties, vec!["kubegrid.kubernetes.namespace=default"]);
        assert_eq!(args.interval_secs, 5);
        assert_eq!(args.rounds, 3);
    }

    #[test]
    fn test_command_line_wins_over_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("discovery.json");
        std::fs::write(&path, r#"{"service-name": "hz", "namespace": "staging"}"#).unwrap();

        let properties =
            load_properties(Some(&path), &["namespace=default".to_string()]).unwrap();
        assert_eq!(properties.get("service-name").map(String::as_str), Some("hz"));
        assert_eq!(properties.get("namespace").map(String::as_str), Some("default"));
    }

    #[test]
    fn test_malformed_pair_is_rejected() {
        assert!(load_properties(None, &["service-dns".to_string()]).is_err());
    }

    #[test]
    fn test_non_string_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("discovery.json");
        std::fs::write(&path, r#"{"namespace": 1}"#).unwrap();

        assert!(load_properties(Some(&path), &[]).is_err());
    }
}
