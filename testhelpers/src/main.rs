//! Command-line front end for the Rancher Manager test helpers.
//!
//! Deploys Rancher Manager through helm and edits machine pools of
//! provisioning clusters through kubectl.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{ArgAction, Args, Parser, Subcommand};
use testhelpers::core::readiness::{ReadinessCheck, Workload};
use testhelpers::core::release::{CaMode, DeploymentRequest, ProxyMode, VERSION_LATEST, resolve};
use testhelpers::deploy::deploy_rancher_manager;
use testhelpers::exit_codes;
use testhelpers::io::config::{
    HelperConfig, load_config, scaled_limits, scaled_timeout, write_config,
};
use testhelpers::io::helm::HelmCli;
use testhelpers::io::kubectl::KubectlCli;
use testhelpers::logging;
use testhelpers::mutate::{ClusterMutator, MutateError, WriteMode};

#[derive(Parser, Debug)]
#[command(
    name = "testhelpers",
    version,
    about = "Rancher Manager deployment and cluster pool helpers"
)]
struct Cli {
    /// Helper configuration (TOML). Defaults apply when the file is missing.
    #[arg(long, global = true, default_value = "helpers.toml")]
    config: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the repository registration and helm arguments without running helm.
    Flags(ReleaseArgs),
    /// Add the channel repository, refresh it, and install or upgrade Rancher Manager.
    Deploy(ReleaseArgs),
    /// Add a signed delta to the quantity of a machine pool and print the new quantity.
    ScalePool {
        #[command(flatten)]
        target: PoolTarget,
        #[arg(long, allow_negative_numbers = true)]
        delta: i64,
        /// Write conditionally and retry up to N times on concurrent modification.
        #[arg(long, value_name = "N")]
        conditional: Option<u32>,
    },
    /// Set a boolean role attribute (e.g. `etcdRole`) of a machine pool.
    SetRole {
        #[command(flatten)]
        target: PoolTarget,
        #[arg(long)]
        role: String,
        #[arg(long, action = ArgAction::Set)]
        value: bool,
        /// Write conditionally and retry up to N times on concurrent modification.
        #[arg(long, value_name = "N")]
        conditional: Option<u32>,
    },
    /// Store the kubeconfig of a downstream cluster in a file and print its path.
    ClientKubeconfig {
        #[arg(long, default_value = "fleet-default")]
        namespace: String,
        #[arg(long)]
        cluster: String,
    },
    /// Wait until label-selected daemonsets and pods are ready.
    WaitReady {
        /// e.g. `kube-system/k8s-app=canal`; repeatable.
        #[arg(
            long = "daemonset",
            value_name = "NAMESPACE/SELECTOR",
            value_parser = daemonset_check
        )]
        daemonsets: Vec<ReadinessCheck>,
        #[arg(long = "pod", value_name = "NAMESPACE/SELECTOR", value_parser = pod_check)]
        pods: Vec<ReadinessCheck>,
        /// Check this downstream cluster instead of the management cluster.
        #[arg(long)]
        client_cluster: Option<String>,
        /// Namespace of the downstream cluster's kubeconfig secret.
        #[arg(long, default_value = "fleet-default")]
        namespace: String,
        /// Budget per check, scaled by `TIMEOUT_SCALE`.
        #[arg(long, default_value_t = 300)]
        timeout_secs: u64,
        #[arg(long, default_value_t = 5)]
        interval_secs: u64,
    },
    /// Write the default configuration to `--config`.
    InitConfig {
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
}

fn daemonset_check(target: &str) -> Result<ReadinessCheck, String> {
    ReadinessCheck::parse(Workload::DaemonSet, target)
}

fn pod_check(target: &str) -> Result<ReadinessCheck, String> {
    ReadinessCheck::parse(Workload::Pod, target)
}

#[derive(Args, Debug)]
struct ReleaseArgs {
    #[arg(long)]
    hostname: String,
    #[arg(long, default_value = VERSION_LATEST)]
    channel: String,
    /// Chart version, `latest`, `devel`, or an `-rc`/`-alpha` prerelease.
    #[arg(long, default_value = "")]
    rancher_version: String,
    /// Development branch (`2.12`) or `head`.
    #[arg(long, default_value = "")]
    head_version: String,
    #[arg(long, default_value = "selfsigned")]
    ca: CaMode,
    #[arg(long, default_value = "none")]
    proxy: ProxyMode,
    /// Raw flag pair appended to the helm arguments, e.g. `--extra --set auditLog.level=1`.
    #[arg(
        long,
        num_args = 2,
        value_names = ["FLAG", "VALUE"],
        allow_hyphen_values = true,
        action = ArgAction::Append
    )]
    extra: Vec<String>,
}

impl ReleaseArgs {
    fn into_request(self) -> DeploymentRequest {
        let mut request = DeploymentRequest::new(self.hostname, self.channel)
            .with_version(self.rancher_version)
            .with_head_version(self.head_version)
            .with_ca_mode(self.ca)
            .with_proxy_mode(self.proxy);
        for pair in self.extra.chunks_exact(2) {
            request = request.with_extra_flag(pair[0].as_str(), pair[1].as_str());
        }
        request
    }
}

#[derive(Args, Debug)]
struct PoolTarget {
    #[arg(long, default_value = "fleet-default")]
    namespace: String,
    #[arg(long)]
    cluster: String,
    #[arg(long)]
    pool: String,
}

fn main() {
    logging::init();
    let code = match run(Cli::parse()) {
        Ok(()) => exit_codes::OK,
        Err(err) => {
            eprintln!("{:#}", err);
            exit_code_for(&err)
        }
    };
    std::process::exit(code);
}

fn run(cli: Cli) -> Result<()> {
    let load = || load_config(&cli.config);
    match cli.command {
        Command::Flags(args) => cmd_flags(&load()?, args),
        Command::Deploy(args) => cmd_deploy(&load()?, args),
        Command::ScalePool {
            target,
            delta,
            conditional,
        } => {
            let kubectl = kubectl_client(&load()?);
            let quantity = ClusterMutator::new(&kubectl)
                .with_write_mode(write_mode(conditional))
                .adjust_pool_quantity(&target.namespace, &target.cluster, &target.pool, delta)?;
            println!("{quantity}");
            Ok(())
        }
        Command::SetRole {
            target,
            role,
            value,
            conditional,
        } => {
            let kubectl = kubectl_client(&load()?);
            ClusterMutator::new(&kubectl)
                .with_write_mode(write_mode(conditional))
                .set_pool_role(&target.namespace, &target.cluster, &target.pool, &role, value)?;
            Ok(())
        }
        Command::ClientKubeconfig { namespace, cluster } => {
            let kubeconfig = kubectl_client(&load()?).client_kubeconfig(&namespace, &cluster)?;
            println!("{}", kubeconfig.keep()?.display());
            Ok(())
        }
        Command::WaitReady {
            daemonsets,
            pods,
            client_cluster,
            namespace,
            timeout_secs,
            interval_secs,
        } => {
            let checks: Vec<ReadinessCheck> = daemonsets.into_iter().chain(pods).collect();
            if checks.is_empty() {
                bail!("nothing to wait for (pass --daemonset or --pod)");
            }
            let kubectl = kubectl_client(&load()?);
            let client = match &client_cluster {
                Some(cluster) => Some(kubectl.client_kubeconfig(&namespace, cluster)?),
                None => None,
            };
            let downstream = client.as_ref().map(|kubeconfig| kubectl.for_cluster(kubeconfig));
            let target = downstream.as_ref().unwrap_or(&kubectl);
            let timeout = scaled_timeout(Duration::from_secs(timeout_secs));
            let interval = Duration::from_secs(interval_secs.max(1));
            for check in &checks {
                target.wait_ready(check, timeout, interval)?;
            }
            Ok(())
        }
        Command::InitConfig { force } => cmd_init_config(&cli.config, force),
    }
}

fn cmd_flags(config: &HelperConfig, args: ReleaseArgs) -> Result<()> {
    let release = resolve(&config.rancher, &args.into_request());
    println!("{}\t{}", release.repository_name, release.repository_url);
    for arg in &release.args {
        println!("{arg}");
    }
    Ok(())
}

fn cmd_deploy(config: &HelperConfig, args: ReleaseArgs) -> Result<()> {
    let helm = HelmCli::new(config.helm.command.as_str(), scaled_limits(config.helm.limits()));
    let release = deploy_rancher_manager(&helm, &config.rancher, &args.into_request())
        .context("deploy rancher manager")?;
    println!("{}", release.chart());
    Ok(())
}

fn kubectl_client(config: &HelperConfig) -> KubectlCli {
    let client = KubectlCli::new(
        config.kubectl.command.as_str(),
        scaled_limits(config.kubectl.limits()),
    );
    match &config.kubectl.kubeconfig {
        Some(path) => client.with_kubeconfig(path.as_path()),
        None => client,
    }
}

fn cmd_init_config(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!("{} already exists (pass --force to overwrite)", path.display());
    }
    write_config(path, &HelperConfig::default())?;
    println!("{}", path.display());
    Ok(())
}

fn write_mode(conditional: Option<u32>) -> WriteMode {
    match conditional {
        Some(max_attempts) => WriteMode::Conditional { max_attempts },
        None => WriteMode::LastWriteWins,
    }
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<MutateError>() {
        Some(err) if err.is_lookup() => exit_codes::NOT_FOUND,
        _ => exit_codes::FAILED,
    }
}
