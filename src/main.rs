//! Ceph Node Operator
//!
//! Command line front end. Every subcommand builds a fresh node model, runs
//! one controller operation against it, and prints the result as JSON or
//! YAML on stdout. Logs go to stderr.

use anyhow::Context;
use clap::{Args as ClapArgs, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use serde_json::json;
use std::io::Read;
use std::path::PathBuf;
use tracing::{debug, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use ceph_node_operator::cluster::config::{defaults_refresh, name_refresh};
use ceph_node_operator::cluster::remote::{PoolOptions, PoolType, RemoteCluster};
use ceph_node_operator::cluster::ceph_version_refresh;
use ceph_node_operator::controllers::{rgw_pools_create, rgw_pools_missing};
use ceph_node_operator::keyring;
use ceph_node_operator::{
    BindAddress, DiscoveryEngine, Error, InitSystem, KeyringRole, MdsController, MonController,
    NodeContext, NodeModel, OperatorConfig, OsdController, OsdPrepareRequest, Presenter, Purger,
    RgwController,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Ceph Node Operator - discovery and daemon lifecycle for one storage node
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// YAML configuration file
    #[arg(long, env = "CEPH_OPERATOR_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Cluster name
    #[arg(long, env = "CEPH_CLUSTER_NAME", global = true)]
    cluster_name: Option<String>,

    /// Cluster fsid
    #[arg(long, env = "CEPH_CLUSTER_UUID", global = true)]
    cluster_uuid: Option<String>,

    /// Init system (systemd, sysv)
    #[arg(long, env = "CEPH_INIT_SYSTEM", global = true)]
    init: Option<InitSystem>,

    /// Use this hostname instead of asking the host
    #[arg(long, env = "CEPH_HOSTNAME", global = true)]
    hostname: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "warn", global = true)]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON", global = true)]
    log_json: bool,

    /// Result format
    #[arg(long, value_enum, default_value_t = OutputFormat::Json, global = true)]
    output: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum OutputFormat {
    Json,
    Yaml,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Inspect disks and partitions
    #[command(subcommand)]
    Partition(PartitionCommand),
    /// Storage daemons
    #[command(subcommand)]
    Osd(OsdCommand),
    /// Role keyrings
    #[command(subcommand)]
    Keyring(KeyringCommand),
    /// Monitor daemon
    #[command(subcommand)]
    Mon(MonCommand),
    /// Metadata server daemons
    #[command(subcommand)]
    Mds(DaemonCommand),
    /// Object gateway daemons
    #[command(subcommand)]
    Rgw(RgwCommand),
    /// Cluster pools
    #[command(subcommand)]
    Pool(PoolCommand),
    /// Authenticated cluster queries
    #[command(subcommand)]
    Cluster(ClusterCommand),
    /// Stop every cluster service and remove all cluster state from this node
    Purge,
    /// Installed Ceph release
    Version,
}

#[derive(Subcommand, Debug)]
enum PartitionCommand {
    /// Every disk with its partitions
    List,
    /// Partitions holding OSD data
    Osd,
    /// Partitions holding OSD journals
    Journal,
    /// Whether a device is a partition rather than a whole disk
    Is { dev: String },
}

#[derive(Subcommand, Debug)]
enum OsdCommand {
    /// OSDs found on local partitions, by cluster fsid
    Discover,
    /// Prepare a disk or partition for a new OSD
    Prepare {
        #[arg(long)]
        osd_dev: String,
        #[arg(long)]
        journal_dev: Option<String>,
        #[arg(long)]
        fs_type: Option<String>,
        #[arg(long)]
        osd_uuid: Option<String>,
        #[arg(long)]
        journal_uuid: Option<String>,
    },
    /// Activate prepared partitions; all storage partitions when none are named
    Activate { devices: Vec<String> },
    /// Stop an OSD and disable it on boot
    Deactivate { osd_id: String },
    /// Deactivate, revoke, unmount, and delete an OSD
    Remove { osd_id: String },
    /// Wipe the partition table of a whole disk
    Zap { dev: String },
}

#[derive(ClapArgs, Debug)]
struct RoleArg {
    /// admin, mon, osd, mds, rgw
    role: KeyringRole,
}

#[derive(Subcommand, Debug)]
enum KeyringCommand {
    /// Print the keyring, generating one when none is saved
    Create {
        #[command(flatten)]
        role: RoleArg,
        /// Base64 secret to use instead of a generated one
        #[arg(long)]
        secret: Option<String>,
    },
    /// Save keyring text read from a file, or stdin when no file is given
    Save {
        #[command(flatten)]
        role: RoleArg,
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// Create from a secret and save
    CreateAndSave {
        #[command(flatten)]
        role: RoleArg,
        #[arg(long)]
        secret: String,
    },
    /// Whether the keyring is saved on this node
    Present {
        #[command(flatten)]
        role: RoleArg,
    },
    /// Import the keyring into the cluster's auth database
    AuthAdd {
        #[command(flatten)]
        role: RoleArg,
    },
    /// Delete the keyring's principal from the cluster's auth database
    AuthDel {
        #[command(flatten)]
        role: RoleArg,
    },
    /// Delete the saved keyring
    Remove {
        #[command(flatten)]
        role: RoleArg,
    },
}

#[derive(Subcommand, Debug)]
enum MonCommand {
    Is,
    Status,
    Quorum,
    Active,
    List,
    Create,
    Destroy,
}

#[derive(ClapArgs, Debug)]
struct BindArgs {
    #[arg(long)]
    addr: String,
    #[arg(long)]
    port: u16,
}

impl From<&BindArgs> for BindAddress {
    fn from(args: &BindArgs) -> Self {
        BindAddress {
            addr: args.addr.clone(),
            port: args.port,
        }
    }
}

#[derive(Subcommand, Debug)]
enum DaemonCommand {
    /// Prepare and activate
    Create {
        name: String,
        #[command(flatten)]
        bind: BindArgs,
    },
    /// Deactivate and remove
    Destroy { name: String },
    Prepare { name: String },
    Activate {
        name: String,
        #[command(flatten)]
        bind: BindArgs,
    },
    Deactivate { name: String },
    Remove { name: String },
}

#[derive(Subcommand, Debug)]
enum RgwCommand {
    #[command(flatten)]
    Daemon(DaemonCommand),
    /// Required gateway pools the cluster lacks
    PoolsMissing,
    /// Create the missing gateway pools
    PoolsCreate,
}

#[derive(Subcommand, Debug)]
enum PoolCommand {
    List,
    Add {
        name: String,
        #[arg(long)]
        pg_num: Option<u32>,
        #[arg(long)]
        pgp_num: Option<u32>,
        #[arg(long)]
        pool_type: Option<PoolType>,
        #[arg(long)]
        erasure_code_profile: Option<String>,
        #[arg(long)]
        crush_ruleset: Option<String>,
    },
    Del { name: String },
}

#[derive(Subcommand, Debug)]
enum ClusterCommand {
    /// Cluster status as seen by the first keyring that authenticates
    Status,
    /// Whether any keyring on this node reaches a quorate cluster
    Quorum,
    /// Principals in the auth database
    AuthList,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let args = Args::parse();

    init_logging(&args);

    if let Err(e) = run(&args).await {
        eprintln!("Error: {:#}", e);
        let code = e.downcast_ref::<Error>().map(Error::exit_code).unwrap_or(1);
        std::process::exit(code);
    }
}

async fn run(args: &Args) -> anyhow::Result<()> {
    let config = load_config(args)?;
    debug!("Effective configuration: {:?}", config);
    let ctx = NodeContext::standalone(config);
    let mut model = NodeModel::new(args.cluster_name.clone(), args.cluster_uuid.clone());

    let output = match &args.command {
        Command::Partition(command) => partition(&ctx, &mut model, command).await?,
        Command::Osd(command) => osd(&ctx, &mut model, command).await?,
        Command::Keyring(command) => keyring_command(&ctx, &mut model, command).await?,
        Command::Mon(command) => mon(&ctx, &mut model, command).await?,
        Command::Mds(command) => mds(&ctx, &mut model, command).await?,
        Command::Rgw(command) => rgw(&ctx, &mut model, command).await?,
        Command::Pool(command) => pool(&ctx, &mut model, command).await?,
        Command::Cluster(command) => cluster(&ctx, &mut model, command).await?,
        Command::Purge => to_value(Purger::new(&ctx).purge(&mut model).await?)?,
        Command::Version => {
            ceph_version_refresh(&ctx, &mut model).await?;
            to_value(Presenter::new(&model).ceph_version())?
        }
    };

    emit(&output, args.output)
}

fn load_config(args: &Args) -> anyhow::Result<OperatorConfig> {
    let mut config = match &args.config {
        Some(path) => OperatorConfig::from_yaml_file(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => OperatorConfig::default(),
    };
    if let Some(init) = args.init {
        config.init_system = init;
    }
    if let Some(hostname) = &args.hostname {
        config.hostname = Some(hostname.clone());
    }
    Ok(config)
}

fn to_value<T: Serialize>(value: T) -> anyhow::Result<serde_json::Value> {
    Ok(serde_json::to_value(value)?)
}

fn emit(value: &serde_json::Value, format: OutputFormat) -> anyhow::Result<()> {
    let text = match format {
        OutputFormat::Json => serde_json::to_string_pretty(value)?,
        OutputFormat::Yaml => serde_yaml::to_string(value)?,
    };
    println!("{}", text.trim_end());
    Ok(())
}

// =============================================================================
// Subcommands
// =============================================================================

async fn partition(
    ctx: &NodeContext,
    model: &mut NodeModel,
    command: &PartitionCommand,
) -> anyhow::Result<serde_json::Value> {
    let engine = DiscoveryEngine::new(ctx);
    match command {
        PartitionCommand::List => {
            engine.refresh(model).await?;
            to_value(Presenter::new(model).partitions_all())
        }
        PartitionCommand::Osd => {
            engine.refresh(model).await?;
            to_value(Presenter::new(model).storage_partitions())
        }
        PartitionCommand::Journal => {
            engine.refresh(model).await?;
            to_value(Presenter::new(model).journal_partitions())
        }
        PartitionCommand::Is { dev } => Ok(json!(OsdController::new(ctx).is_partition(dev)?)),
    }
}

async fn osd(
    ctx: &NodeContext,
    model: &mut NodeModel,
    command: &OsdCommand,
) -> anyhow::Result<serde_json::Value> {
    let controller = OsdController::new(ctx);
    let value = match command {
        OsdCommand::Discover => {
            DiscoveryEngine::new(ctx).refresh(model).await?;
            to_value(Presenter::new(model).discovered_osds())?
        }
        OsdCommand::Prepare {
            osd_dev,
            journal_dev,
            fs_type,
            osd_uuid,
            journal_uuid,
        } => {
            let request = OsdPrepareRequest {
                osd_dev: osd_dev.clone(),
                journal_dev: journal_dev.clone(),
                fs_type: fs_type.clone(),
                osd_uuid: osd_uuid.clone(),
                journal_uuid: journal_uuid.clone(),
            };
            let outcome = controller.prepare(model, &request).await?;
            json!({ "changed": outcome.created() })
        }
        OsdCommand::Activate { devices } => to_value(controller.activate(model, devices).await?)?,
        OsdCommand::Deactivate { osd_id } => {
            controller.deactivate(osd_id).await?;
            json!(true)
        }
        OsdCommand::Remove { osd_id } => {
            controller.remove(model, osd_id).await?;
            json!(true)
        }
        OsdCommand::Zap { dev } => {
            controller.zap(dev).await?;
            json!(true)
        }
    };
    Ok(value)
}

fn role_of(command: &KeyringCommand) -> KeyringRole {
    match command {
        KeyringCommand::Create { role, .. }
        | KeyringCommand::Save { role, .. }
        | KeyringCommand::CreateAndSave { role, .. }
        | KeyringCommand::Present { role }
        | KeyringCommand::AuthAdd { role }
        | KeyringCommand::AuthDel { role }
        | KeyringCommand::Remove { role } => role.role,
    }
}

async fn keyring_command(
    ctx: &NodeContext,
    model: &mut NodeModel,
    command: &KeyringCommand,
) -> anyhow::Result<serde_json::Value> {
    let role = role_of(command);
    if role == KeyringRole::Mon {
        DiscoveryEngine::new(ctx).hostname_refresh(model).await?;
    }
    let cluster = name_refresh(model, ctx.layout(), &ctx.config.default_cluster_name)?;
    let keyring = keyring::make(ctx, role, &cluster, model.hostname.as_deref())?;

    let value = match command {
        KeyringCommand::Create { secret, .. } => json!(keyring.create(secret.as_deref()).await?),
        KeyringCommand::Save { file, .. } => {
            let text = match file {
                Some(path) => std::fs::read_to_string(path)
                    .with_context(|| format!("reading {}", path.display()))?,
                None => {
                    let mut text = String::new();
                    std::io::stdin()
                        .read_to_string(&mut text)
                        .context("reading keyring from stdin")?;
                    text
                }
            };
            json!({ "changed": keyring.write(&text)?.created() })
        }
        KeyringCommand::CreateAndSave { secret, .. } => {
            json!({ "changed": keyring.create_and_save(secret).await?.created() })
        }
        KeyringCommand::Present { .. } => json!(keyring.present()),
        KeyringCommand::AuthAdd { .. } => {
            keyring.auth_add(model).await?;
            json!(true)
        }
        KeyringCommand::AuthDel { .. } => {
            keyring.auth_del(model).await?;
            json!(true)
        }
        KeyringCommand::Remove { .. } => json!({ "changed": keyring.remove()? }),
    };
    Ok(value)
}

async fn mon(
    ctx: &NodeContext,
    model: &mut NodeModel,
    command: &MonCommand,
) -> anyhow::Result<serde_json::Value> {
    let controller = MonController::new(ctx);
    let value = match command {
        MonCommand::Is => json!(controller.is(model).await?),
        MonCommand::Status => to_value(controller.status(model).await?)?,
        MonCommand::Quorum => json!(controller.quorum(model).await?),
        MonCommand::Active => json!(controller.active(model).await?),
        MonCommand::List => to_value(controller.list(model).await?)?,
        MonCommand::Create => json!({ "changed": controller.create(model).await?.created() }),
        MonCommand::Destroy => json!({ "changed": controller.destroy(model).await? }),
    };
    Ok(value)
}

async fn mds(
    ctx: &NodeContext,
    model: &mut NodeModel,
    command: &DaemonCommand,
) -> anyhow::Result<serde_json::Value> {
    let value = match command {
        DaemonCommand::Create { name, bind } => {
            MdsController::new(ctx, name)?.create(model, &bind.into()).await?;
            json!(true)
        }
        DaemonCommand::Destroy { name } => {
            MdsController::new(ctx, name)?.destroy(model).await?;
            json!(true)
        }
        DaemonCommand::Prepare { name } => {
            let outcome = MdsController::new(ctx, name)?.prepare(model).await?;
            json!({ "changed": outcome.created() })
        }
        DaemonCommand::Activate { name, bind } => {
            MdsController::new(ctx, name)?.activate(model, &bind.into()).await?;
            json!(true)
        }
        DaemonCommand::Deactivate { name } => {
            MdsController::new(ctx, name)?.deactivate().await?;
            json!(true)
        }
        DaemonCommand::Remove { name } => {
            MdsController::new(ctx, name)?.remove(model).await?;
            json!(true)
        }
    };
    Ok(value)
}

async fn rgw(
    ctx: &NodeContext,
    model: &mut NodeModel,
    command: &RgwCommand,
) -> anyhow::Result<serde_json::Value> {
    let command = match command {
        RgwCommand::PoolsMissing => return to_value(rgw_pools_missing(ctx, model).await?),
        RgwCommand::PoolsCreate => return Ok(json!(rgw_pools_create(ctx, model).await?)),
        RgwCommand::Daemon(command) => command,
    };
    let value = match command {
        DaemonCommand::Create { name, bind } => {
            RgwController::new(ctx, name)?.create(model, &bind.into()).await?;
            json!(true)
        }
        DaemonCommand::Destroy { name } => {
            RgwController::new(ctx, name)?.destroy(model).await?;
            json!(true)
        }
        DaemonCommand::Prepare { name } => {
            let outcome = RgwController::new(ctx, name)?.prepare(model).await?;
            json!({ "changed": outcome.created() })
        }
        DaemonCommand::Activate { name, bind } => {
            RgwController::new(ctx, name)?.activate(model, &bind.into()).await?;
            json!(true)
        }
        DaemonCommand::Deactivate { name } => {
            RgwController::new(ctx, name)?.deactivate().await?;
            json!(true)
        }
        DaemonCommand::Remove { name } => {
            RgwController::new(ctx, name)?.remove(model).await?;
            json!(true)
        }
    };
    Ok(value)
}

/// Resolve the cluster and connect with the first keyring that authenticates
async fn connected<'a>(ctx: &'a NodeContext, model: &mut NodeModel) -> anyhow::Result<RemoteCluster<'a>> {
    DiscoveryEngine::new(ctx).hostname_refresh(model).await?;
    defaults_refresh(model, ctx.layout(), &ctx.config.default_cluster_name)?;
    let cluster = model
        .cluster_name
        .clone()
        .ok_or(Error::MissingParameter("cluster_name"))?;
    let mut remote = RemoteCluster::new(ctx, &cluster);
    remote.ensure_connected(model).await?;
    Ok(remote)
}

async fn pool(
    ctx: &NodeContext,
    model: &mut NodeModel,
    command: &PoolCommand,
) -> anyhow::Result<serde_json::Value> {
    let remote = connected(ctx, model).await?;
    remote.pool_list(model).await?;
    let value = match command {
        PoolCommand::List => to_value(Presenter::new(model).pool_list())?,
        PoolCommand::Add {
            name,
            pg_num,
            pgp_num,
            pool_type,
            erasure_code_profile,
            crush_ruleset,
        } => {
            let options = PoolOptions {
                pg_num: *pg_num,
                pgp_num: *pgp_num,
                pool_type: *pool_type,
                erasure_code_profile: erasure_code_profile.clone(),
                crush_ruleset: crush_ruleset.clone(),
            };
            json!({ "changed": remote.pool_add(model, name, &options).await? })
        }
        PoolCommand::Del { name } => json!({ "changed": remote.pool_del(model, name).await? }),
    };
    Ok(value)
}

async fn cluster(
    ctx: &NodeContext,
    model: &mut NodeModel,
    command: &ClusterCommand,
) -> anyhow::Result<serde_json::Value> {
    let value = match command {
        ClusterCommand::Status => {
            connected(ctx, model).await?;
            model.cluster_status.clone().unwrap_or_default()
        }
        ClusterCommand::Quorum => match connected(ctx, model).await {
            Ok(_) => json!(model.cluster_quorum()),
            Err(e) if matches!(e.downcast_ref::<Error>(), Some(Error::NotConnected)) => json!(false),
            Err(e) => return Err(e),
        },
        ClusterCommand::AuthList => {
            let remote = connected(ctx, model).await?;
            remote.auth_list(model).await?;
            to_value(Presenter::new(model).auth_list())?
        }
    };
    Ok(value)
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::WARN,
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}
