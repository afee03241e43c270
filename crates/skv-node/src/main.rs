use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::Deserialize;

use skv_consensus::{RaftConfig, ReplicatedLog, ShardNode};
use skv_gateway::{Gateway, GatewayConfig};
use skv_router::ClusterTopology;
use skv_server::{serve_client, serve_cluster, ChannelPool, GrpcShardClient, GrpcTransport, ShardRegistry};
use skv_storage::{FjallLogStorage, FjallStore, MemStateMachine};

#[derive(clap::Parser, Debug)]
#[command(name = "skv-node", about = "Sharded replicated KV storage node")]
struct Cli {
    #[arg(long)]
    node_id: u64,
    #[arg(long, default_value = "0.0.0.0:7000")]
    client_addr: String,
    #[arg(long, default_value = "0.0.0.0:7001")]
    cluster_addr: String,
    #[arg(long)]
    config: Option<PathBuf>,
    /// Overrides `storage.data_dir`.
    #[arg(long)]
    data_dir: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
struct StorageConfig {
    data_dir: PathBuf,
}

#[derive(Debug, Deserialize)]
struct ObservabilityConfig {
    log_level: String,
    log_format: String,
}

#[derive(Debug, Deserialize)]
struct Config {
    storage: StorageConfig,
    raft: RaftConfig,
    gateway: GatewayConfig,
    cluster: ClusterTopology,
    observability: ObservabilityConfig,
}

type Registry = ShardRegistry<FjallLogStorage, MemStateMachine, GrpcTransport>;

/// Open every shard replica this node hosts. Committed entries are replayed
/// into a fresh state machine before the replica starts.
async fn open_shards(cli: &Cli, config: &Config, data_dir: PathBuf) -> anyhow::Result<Registry> {
    let store = FjallStore::open(&data_dir)
        .with_context(|| format!("failed to open storage at {}", data_dir.display()))?;
    // Per-call deadlines are applied by the transport; this only bounds the
    // slowest one, a snapshot chunk.
    let pool = ChannelPool::new(
        config.raft.install_snapshot_timeout().max(config.raft.rpc_timeout()),
        config.raft.max_message_size(),
    );

    let mut shards = ShardRegistry::new();
    for shard_id in config.cluster.shards_hosted_by(cli.node_id) {
        let members = config.cluster.members(shard_id).unwrap_or_default().to_vec();
        let raft = ReplicatedLog::open(
            shard_id,
            cli.node_id,
            members,
            config.raft.clone(),
            FjallLogStorage(store.clone()),
            MemStateMachine::new(),
            GrpcTransport::new(&config.cluster, shard_id, pool.clone(), &config.raft),
        )
        .await
        .with_context(|| format!("failed to open shard {shard_id}"))?;
        let status = raft.status().await;
        tracing::info!(
            shard_id,
            term = status.term,
            last_applied = status.last_applied,
            last_log_index = status.last_log_index,
            snapshot_index = status.snapshot_index,
            "shard replica opened"
        );
        shards.insert(ShardNode::new(raft));
    }
    Ok(shards)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    use clap::Parser;
    let cli = Cli::parse();

    let mut figment = Figment::new().merge(Toml::string(include_str!("../../../config/default.toml")));

    if let Some(ref config_path) = cli.config {
        figment = figment.merge(Toml::file_exact(config_path));
    }

    let config: Config = figment
        .merge(Env::prefixed("SKV_").split("__"))
        .extract()
        .context("failed to load configuration")?;

    match config.observability.log_format.as_str() {
        "json" => {
            tracing_subscriber::fmt()
                .json()
                .with_env_filter(&config.observability.log_level)
                .init();
        }
        _ => {
            tracing_subscriber::fmt()
                .pretty()
                .with_env_filter(&config.observability.log_level)
                .init();
        }
    }

    config.raft.validate().context("invalid [raft] configuration")?;
    config.cluster.validate().context("invalid [cluster] configuration")?;
    if config.cluster.node(cli.node_id).is_none() {
        anyhow::bail!("node {} is not listed in cluster.nodes", cli.node_id);
    }

    tracing::info!(
        node_id = cli.node_id,
        client_addr = %cli.client_addr,
        cluster_addr = %cli.cluster_addr,
        "node starting"
    );

    let client_addr: SocketAddr = cli
        .client_addr
        .parse()
        .with_context(|| format!("invalid client_addr: {}", cli.client_addr))?;
    let cluster_addr: SocketAddr = cli
        .cluster_addr
        .parse()
        .with_context(|| format!("invalid cluster_addr: {}", cli.cluster_addr))?;

    let data_dir = cli
        .data_dir
        .clone()
        .unwrap_or_else(|| config.storage.data_dir.clone())
        .join(format!("node-{}", cli.node_id));
    let shards = Arc::new(open_shards(&cli, &config, data_dir).await?);
    if shards.is_empty() {
        tracing::warn!(node_id = cli.node_id, "node hosts no shards, serving as gateway only");
    }
    shards.start_all();

    // Forwarded writes wait for commit on the remote leader.
    let forward_timeout = config.raft.propose_timeout() + config.raft.rpc_timeout();
    let gateway = Gateway::new(
        config.cluster.clone(),
        config.gateway.clone(),
        GrpcShardClient::new(ChannelPool::new(forward_timeout, config.raft.max_message_size())),
    )
    .context("failed to build gateway")?;

    let servers = async {
        tokio::try_join!(
            serve_client(client_addr, Arc::new(gateway), config.raft.max_message_size()),
            serve_cluster(cluster_addr, shards.clone(), config.raft.max_message_size()),
        )
    };

    tokio::select! {
        res = servers => {
            res?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!(node_id = cli.node_id, "shutdown requested");
        }
    }

    shards.shutdown_all().await;
    Ok(())
}
