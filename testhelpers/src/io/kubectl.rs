//! Resource-management collaborator backed by the `kubectl` CLI.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use tempfile::NamedTempFile;
use tracing::{debug, info, instrument, warn};

use crate::core::readiness::ReadinessCheck;
use crate::io::process::{ProcessLimits, run_checked};

/// Fully qualified resource type of provisioned clusters.
pub const CLUSTER_RESOURCE: &str = "cluster.v1.provisioning.cattle.io";

/// How a serialized document replaces the stored object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplaceMode {
    /// Unconditional write (`kubectl apply`). The last writer wins.
    Overwrite,
    /// Write rejected by the store if the document's `resourceVersion` is stale.
    IfUnchanged,
}

/// The store rejected a conditional replace because the object changed since it was read.
#[derive(Debug, thiserror::Error)]
#[error("{namespace}: object was modified concurrently: {detail}")]
pub struct ReplaceConflict {
    pub namespace: String,
    pub detail: String,
}

/// Fetch/replace access to cluster documents.
///
/// Documents travel as YAML text; decoding belongs to the caller.
pub trait ResourceClient {
    fn fetch_resource(&self, namespace: &str, name: &str) -> Result<String>;
    /// A rejected [`ReplaceMode::IfUnchanged`] write returns a [`ReplaceConflict`].
    fn replace_resource(&self, namespace: &str, document: &str, mode: ReplaceMode) -> Result<()>;
}

/// [`ResourceClient`] that shells out to `kubectl`, piping documents over stdin.
#[derive(Debug, Clone)]
pub struct KubectlCli {
    command: String,
    kubeconfig: Option<PathBuf>,
    limits: ProcessLimits,
}

impl KubectlCli {
    pub fn new(command: impl Into<String>, limits: ProcessLimits) -> Self {
        Self {
            command: command.into(),
            kubeconfig: None,
            limits,
        }
    }

    pub fn with_kubeconfig(mut self, kubeconfig: impl Into<PathBuf>) -> Self {
        self.kubeconfig = Some(kubeconfig.into());
        self
    }

    /// Same binary and limits, talking to the cluster behind `kubeconfig`.
    pub fn for_cluster(&self, kubeconfig: &ClientKubeconfig) -> Self {
        self.clone().with_kubeconfig(kubeconfig.path())
    }

    /// Read secret `<cluster>-kubeconfig` from `namespace` and store the decoded
    /// kubeconfig in a temporary file.
    #[instrument(skip_all, fields(namespace = %namespace, cluster = %cluster))]
    pub fn client_kubeconfig(&self, namespace: &str, cluster: &str) -> Result<ClientKubeconfig> {
        let secret = format!("{cluster}-kubeconfig");
        let encoded = self.run(
            &[
                "get",
                "secret",
                "--namespace",
                namespace,
                &secret,
                "-o",
                "jsonpath={.data.value}",
            ],
            None,
        )?;
        let contents = decode_secret_value(&encoded)
            .with_context(|| format!("decode secret {namespace}/{secret}"))?;

        // Dropping `file` on any error below removes it.
        let mut file = tempfile::Builder::new()
            .prefix("client-kubeconfig-")
            .tempfile()
            .context("create kubeconfig file")?;
        file.write_all(&contents)
            .and_then(|()| file.flush())
            .with_context(|| format!("write {}", file.path().display()))?;
        debug!(path = %file.path().display(), "client kubeconfig written");
        Ok(ClientKubeconfig { file })
    }

    /// Poll until `check` passes, failing once `timeout` has elapsed.
    #[instrument(skip_all, fields(check = %check, timeout_secs = timeout.as_secs()))]
    pub fn wait_ready(
        &self,
        check: &ReadinessCheck,
        timeout: Duration,
        interval: Duration,
    ) -> Result<()> {
        let deadline = Instant::now() + timeout;
        loop {
            let output = self.run(
                &[
                    "get",
                    check.workload.resource(),
                    "--namespace",
                    &check.namespace,
                    "--selector",
                    &check.selector,
                    "-o",
                    check.workload.jsonpath(),
                ],
                None,
            )?;
            if check.workload.is_ready(&output) {
                info!("ready");
                return Ok(());
            }
            let now = Instant::now();
            if now >= deadline {
                bail!("{check} not ready after {}s", timeout.as_secs());
            }
            debug!(status = %output.trim(), "not ready yet");
            thread::sleep(interval.min(deadline - now));
        }
    }

    fn run(&self, args: &[&str], stdin: Option<&[u8]>) -> Result<String> {
        let mut full: Vec<String> = args.iter().map(|arg| arg.to_string()).collect();
        if let Some(kubeconfig) = &self.kubeconfig {
            full.push("--kubeconfig".to_string());
            full.push(kubeconfig.display().to_string());
        }
        run_checked(&self.command, &full, stdin, self.limits)
    }
}

/// Kubeconfig of a downstream cluster held in a temporary file.
///
/// The file is removed on drop unless [`ClientKubeconfig::keep`] is called.
#[derive(Debug)]
pub struct ClientKubeconfig {
    file: NamedTempFile,
}

impl ClientKubeconfig {
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Leave the file on disk and return its path.
    pub fn keep(self) -> Result<PathBuf> {
        self.file
            .into_temp_path()
            .keep()
            .context("keep client kubeconfig")
    }
}

/// Decode the base64 `value` field of a kubeconfig secret.
pub fn decode_secret_value(encoded: &str) -> Result<Vec<u8>> {
    let encoded = encoded.trim();
    if encoded.is_empty() {
        bail!("secret has no value");
    }
    Ok(STANDARD.decode(encoded)?)
}

impl ResourceClient for KubectlCli {
    #[instrument(skip_all, fields(namespace = %namespace, name = %name))]
    fn fetch_resource(&self, namespace: &str, name: &str) -> Result<String> {
        debug!("fetching cluster resource");
        self.run(
            &[
                "get",
                CLUSTER_RESOURCE,
                "--namespace",
                namespace,
                name,
                "-o",
                "yaml",
            ],
            None,
        )
    }

    #[instrument(skip_all, fields(namespace = %namespace, mode = ?mode))]
    fn replace_resource(&self, namespace: &str, document: &str, mode: ReplaceMode) -> Result<()> {
        let verb = match mode {
            ReplaceMode::Overwrite => "apply",
            ReplaceMode::IfUnchanged => "replace",
        };
        debug!(verb, "writing cluster resource");
        match self.run(
            &[verb, "--namespace", namespace, "-f", "-"],
            Some(document.as_bytes()),
        ) {
            Ok(_) => Ok(()),
            Err(err) if mode == ReplaceMode::IfUnchanged && is_conflict(&format!("{err:#}")) => {
                warn!("conditional replace rejected");
                Err(ReplaceConflict {
                    namespace: namespace.to_string(),
                    detail: format!("{err:#}"),
                }
                .into())
            }
            Err(err) => Err(err),
        }
    }
}

/// Recognize the API server's optimistic-concurrency rejection in kubectl output.
pub fn is_conflict(message: &str) -> bool {
    message.contains("the object has been modified") || message.contains("(Conflict)")
}
