//! Helper configuration loaded from TOML with environment overrides.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::node::scale_timeout;
use crate::core::release::ResolverConfig;
use crate::io::process::ProcessLimits;

/// Overrides `rancher.bootstrap_password`.
pub const PASSWORD_ENV: &str = "RANCHER_PASSWORD";
/// Overrides `rancher.proxy_host`.
pub const PROXY_HOST_ENV: &str = "RANCHER_PROXY_HOST";
/// Integer multiplier applied by [`scaled_timeout`].
pub const TIMEOUT_SCALE_ENV: &str = "TIMEOUT_SCALE";

/// Helper configuration (TOML).
///
/// Missing fields default to values that work against a stock test cluster.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HelperConfig {
    pub rancher: ResolverConfig,
    pub helm: HelmConfig,
    pub kubectl: KubectlConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HelmConfig {
    /// Binary name or path.
    pub command: String,
    /// Wall-clock budget per invocation. `helm upgrade` runs with `--wait`.
    pub timeout_secs: u64,
    /// Captured stdout/stderr beyond this many bytes is discarded.
    pub output_limit_bytes: usize,
}

impl Default for HelmConfig {
    fn default() -> Self {
        Self {
            command: "helm".to_string(),
            timeout_secs: 15 * 60,
            output_limit_bytes: 1_000_000,
        }
    }
}

impl HelmConfig {
    pub fn limits(&self) -> ProcessLimits {
        limits(self.timeout_secs, self.output_limit_bytes)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct KubectlConfig {
    pub command: String,
    pub timeout_secs: u64,
    pub output_limit_bytes: usize,
    /// Explicit kubeconfig; kubectl's own resolution applies when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kubeconfig: Option<PathBuf>,
}

impl Default for KubectlConfig {
    fn default() -> Self {
        Self {
            command: "kubectl".to_string(),
            timeout_secs: 120,
            output_limit_bytes: 1_000_000,
            kubeconfig: None,
        }
    }
}

impl KubectlConfig {
    pub fn limits(&self) -> ProcessLimits {
        limits(self.timeout_secs, self.output_limit_bytes)
    }
}

fn limits(timeout_secs: u64, output_limit_bytes: usize) -> ProcessLimits {
    ProcessLimits {
        timeout: Duration::from_secs(timeout_secs),
        output_limit_bytes,
    }
}

fn validate_tool(
    section: &str,
    command: &str,
    timeout_secs: u64,
    output_limit: usize,
) -> Result<()> {
    if command.trim().is_empty() {
        return Err(anyhow!("{section}.command must be non-empty"));
    }
    if timeout_secs == 0 {
        return Err(anyhow!("{section}.timeout_secs must be > 0"));
    }
    if output_limit == 0 {
        return Err(anyhow!("{section}.output_limit_bytes must be > 0"));
    }
    Ok(())
}

impl HelperConfig {
    pub fn validate(&self) -> Result<()> {
        let helm = &self.helm;
        validate_tool("helm", &helm.command, helm.timeout_secs, helm.output_limit_bytes)?;
        let kubectl = &self.kubectl;
        validate_tool(
            "kubectl",
            &kubectl.command,
            kubectl.timeout_secs,
            kubectl.output_limit_bytes,
        )
    }

    /// Apply `RANCHER_PASSWORD` / `RANCHER_PROXY_HOST` from `lookup`.
    ///
    /// Empty values count as unset.
    pub fn with_env_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let present = |key: &str| lookup(key).filter(|value| !value.is_empty());
        if let Some(password) = present(PASSWORD_ENV) {
            self.rancher.bootstrap_password = password;
        }
        if let Some(proxy_host) = present(PROXY_HOST_ENV) {
            self.rancher.proxy_host = proxy_host;
        }
        self
    }
}

/// Load config from a TOML file and apply process environment overrides.
///
/// If the file is missing, defaults are used.
pub fn load_config(path: &Path) -> Result<HelperConfig> {
    let cfg = read_config(path)?.with_env_overrides(|key| std::env::var(key).ok());
    cfg.validate()?;
    Ok(cfg)
}

/// Load config from a TOML file without looking at the environment.
pub fn read_config(path: &Path) -> Result<HelperConfig> {
    if !path.exists() {
        return Ok(HelperConfig::default());
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: HelperConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &HelperConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, buf)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}

/// Scale `timeout` by `TIMEOUT_SCALE` from the process environment.
pub fn scaled_timeout(timeout: Duration) -> Duration {
    scale_timeout(timeout, std::env::var(TIMEOUT_SCALE_ENV).ok().as_deref())
}

/// `limits` with the timeout scaled by `TIMEOUT_SCALE` from the process environment.
pub fn scaled_limits(limits: ProcessLimits) -> ProcessLimits {
    limits_scaled_by(limits, std::env::var(TIMEOUT_SCALE_ENV).ok().as_deref())
}

fn limits_scaled_by(limits: ProcessLimits, scale: Option<&str>) -> ProcessLimits {
    ProcessLimits {
        timeout: scale_timeout(limits.timeout, scale),
        ..limits
    }
}
