//! Release parameter resolution for Rancher Manager deployments.
//!
//! Maps a [`DeploymentRequest`] to a helm repository registration and the
//! ordered argument list for `helm upgrade --install`. Everything here is pure:
//! deployment-wide settings such as the bootstrap password arrive through
//! [`ResolverConfig`].

use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Prefix of every helm repository registration name.
pub const REPOSITORY_PREFIX: &str = "rancher";
/// Helm release name and chart name inside the registered repository.
pub const RELEASE_NAME: &str = "rancher";
/// Namespace Rancher Manager is installed into.
pub const TARGET_NAMESPACE: &str = "cattle-system";
pub const DEFAULT_BOOTSTRAP_PASSWORD: &str = "rancherpassword";
pub const DEFAULT_PROXY_HOST: &str = "172.17.0.1:3128";

/// Sentinel versions understood by the resolver.
pub const VERSION_LATEST: &str = "latest";
pub const VERSION_DEVEL: &str = "devel";
/// Head version selecting the rolling `head` image tag.
pub const HEAD_VERSION_HEAD: &str = "head";

const HEAD_REPOSITORY_BASE: &str = "https://charts.optimus.rancher.io/server-charts/release-v";
const PUBLIC_AGENT_IMAGE: &str = "rancher/rancher-agent";
const STAGING_RANCHER_IMAGE: &str = "stgregistry.suse.com/rancher/rancher";
const STAGING_AGENT_IMAGE: &str = "stgregistry.suse.com/rancher/rancher-agent";
// Commas are escaped for `helm --set`.
const NO_PROXY: &str = "127.0.0.0/8\\,10.0.0.0/8\\,cattle-system.svc\\,172.16.0.0/12\\,192.168.0.0/16\\,.svc\\,.cluster.local";

/// Head versions with public devel images (2.12 and above).
static PUBLIC_HEAD_VERSION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^2\.(1[2-9]|[2-9]\d)$").expect("static regex"));

/// Release tracks with a known helm repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Stable,
    Latest,
    Alpha,
    Prime,
    PrimeOptimus,
    PrimeOptimusAlpha,
    Head,
}

impl Channel {
    pub const ALL: [Channel; 7] = [
        Channel::Stable,
        Channel::Latest,
        Channel::Alpha,
        Channel::Prime,
        Channel::PrimeOptimus,
        Channel::PrimeOptimusAlpha,
        Channel::Head,
    ];

    /// Look up a channel by name. Unknown names yield `None`.
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|channel| channel.as_str() == name)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Channel::Stable => "stable",
            Channel::Latest => "latest",
            Channel::Alpha => "alpha",
            Channel::Prime => "prime",
            Channel::PrimeOptimus => "prime-optimus",
            Channel::PrimeOptimusAlpha => "prime-optimus-alpha",
            Channel::Head => "head",
        }
    }

    /// Repository URL for this channel. The head channel is versioned per
    /// release, so its URL embeds `head_version`.
    pub fn repository_url(self, head_version: &str) -> String {
        let base = match self {
            Channel::Stable => "https://releases.rancher.com/server-charts/stable",
            Channel::Latest => "https://releases.rancher.com/server-charts/latest",
            Channel::Alpha => "https://releases.rancher.com/server-charts/alpha",
            Channel::Prime => "https://charts.rancher.com/server-charts/prime",
            Channel::PrimeOptimus => "https://charts.optimus.rancher.io/server-charts/latest",
            Channel::PrimeOptimusAlpha => "https://charts.optimus.rancher.io/server-charts/alpha",
            Channel::Head => return format!("{HEAD_REPOSITORY_BASE}{head_version}"),
        };
        base.to_string()
    }
}

/// Certificate authority used for the Rancher ingress.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaMode {
    #[default]
    Selfsigned,
    Private,
}

impl FromStr for CaMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "selfsigned" => Ok(CaMode::Selfsigned),
            "private" => Ok(CaMode::Private),
            other => Err(format!("unknown CA mode '{other}' (expected selfsigned|private)")),
        }
    }
}

/// Whether Rancher Manager sits behind an HTTP proxy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyMode {
    #[default]
    None,
    Rancher,
}

impl FromStr for ProxyMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(ProxyMode::None),
            "rancher" => Ok(ProxyMode::Rancher),
            other => Err(format!("unknown proxy mode '{other}' (expected none|rancher)")),
        }
    }
}

/// Deployment-wide settings, normally loaded from the helper config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Bootstrap password handed to Rancher Manager.
    pub bootstrap_password: String,
    /// `host:port` of the HTTP proxy used when [`ProxyMode::Rancher`] is set.
    pub proxy_host: String,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            bootstrap_password: DEFAULT_BOOTSTRAP_PASSWORD.to_string(),
            proxy_host: DEFAULT_PROXY_HOST.to_string(),
        }
    }
}

/// One install/upgrade intent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentRequest {
    pub hostname: String,
    /// Raw channel name. Unknown names are carried through unchanged.
    pub channel: String,
    /// Free-form version, `latest`, `devel`, or a `-rc`/`-alpha` prerelease.
    pub version: String,
    /// Development branch tag (`2.12`) or `head`.
    pub head_version: String,
    pub ca_mode: CaMode,
    pub proxy_mode: ProxyMode,
    /// Raw flag pairs appended verbatim after everything else.
    pub extra_flags: Vec<(String, String)>,
}

impl DeploymentRequest {
    pub fn new(hostname: impl Into<String>, channel: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            channel: channel.into(),
            version: String::new(),
            head_version: String::new(),
            ca_mode: CaMode::default(),
            proxy_mode: ProxyMode::default(),
            extra_flags: Vec::new(),
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_head_version(mut self, head_version: impl Into<String>) -> Self {
        self.head_version = head_version.into();
        self
    }

    pub fn with_ca_mode(mut self, ca_mode: CaMode) -> Self {
        self.ca_mode = ca_mode;
        self
    }

    pub fn with_proxy_mode(mut self, proxy_mode: ProxyMode) -> Self {
        self.proxy_mode = proxy_mode;
        self
    }

    pub fn with_extra_flag(mut self, flag: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_flags.push((flag.into(), value.into()));
        self
    }

    fn is_head_channel(&self) -> bool {
        self.channel == Channel::Head.as_str()
    }

    /// Head version used for the head channel's name and URL, falling back to
    /// `version` when no head version was given.
    fn effective_head_version(&self) -> &str {
        if self.head_version.is_empty() {
            &self.version
        } else {
            &self.head_version
        }
    }
}

/// Repository registration plus the `helm` argument list for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRelease {
    pub repository_name: String,
    /// Empty when the channel is unknown; `helm repo add` then reports the failure.
    pub repository_url: String,
    pub args: Vec<String>,
}

impl ResolvedRelease {
    /// Chart reference `<repository>/rancher`.
    pub fn chart(&self) -> String {
        format!("{}/{}", self.repository_name, RELEASE_NAME)
    }
}

/// Repository URL for a raw channel name; empty for unknown channels.
pub fn repository_url(channel: &str, head_version: &str) -> String {
    Channel::parse(channel)
        .map(|channel| channel.repository_url(head_version))
        .unwrap_or_default()
}

/// Registration name: `rancher-<channel>`, or `rancher-head-<head version>`.
pub fn repository_name(request: &DeploymentRequest) -> String {
    if request.is_head_channel() {
        format!(
            "{REPOSITORY_PREFIX}-{}-{}",
            request.channel,
            request.effective_head_version()
        )
    } else {
        format!("{REPOSITORY_PREFIX}-{}", request.channel)
    }
}

/// Resolve the repository registration and the full argument list.
pub fn resolve(config: &ResolverConfig, request: &DeploymentRequest) -> ResolvedRelease {
    let repository_name = repository_name(request);
    let repository_url = repository_url(&request.channel, request.effective_head_version());
    let args = resolve_flags(config, request, &repository_name);
    ResolvedRelease {
        repository_name,
        repository_url,
        args,
    }
}

/// Build the ordered `helm` arguments for `repository_name`.
pub fn resolve_flags(
    config: &ResolverConfig,
    request: &DeploymentRequest,
    repository_name: &str,
) -> Vec<String> {
    let hostname = &request.hostname;
    let password = &config.bootstrap_password;
    let mut args = Args::default();

    args.push_all([
        "upgrade",
        "--install",
        RELEASE_NAME,
        &format!("{repository_name}/{RELEASE_NAME}"),
        "--namespace",
        TARGET_NAMESPACE,
        "--create-namespace",
    ]);
    args.set(format!("hostname={hostname}"));
    args.set(format!("bootstrapPassword={password}"));
    args.set("extraEnv[0].name=CATTLE_SERVER_URL");
    args.set(format!("extraEnv[0].value=https://{hostname}"));
    args.set("extraEnv[1].name=CATTLE_BOOTSTRAP_PASSWORD");
    args.set(format!("extraEnv[1].value={password}"));
    args.set("replicas=1");
    args.push("--wait");

    push_version_flags(&mut args, request);

    if request.ca_mode == CaMode::Private {
        args.set("ingress.tls.source=secret");
        args.set("privateCA=true");
    }

    if request.proxy_mode == ProxyMode::Rancher {
        args.set(format!("proxy=http://{}", config.proxy_host));
        args.set(format!("noProxy={NO_PROXY}"));
    }

    for (flag, value) in &request.extra_flags {
        args.push(flag.as_str());
        args.push(value.as_str());
    }

    args.0
}

fn push_version_flags(args: &mut Args, request: &DeploymentRequest) {
    let version = request.version.as_str();

    if request.is_head_channel() && !request.head_version.is_empty() {
        // The head repository only ever carries one version.
        args.push("--devel");
    } else if (version.is_empty() || version == VERSION_LATEST) && !request.is_head_channel() {
        // Let helm pick the newest chart of the channel.
    } else if version == VERSION_DEVEL {
        push_development_flags(args, &request.head_version);
    } else if version.contains("-rc") || version.contains("-alpha") {
        args.push_all(["--devel", "--version", version]);
        if request.channel.contains("prime-optimus") {
            // Optimus publishes under the raw chart version.
            args.set(format!("rancherImage={STAGING_RANCHER_IMAGE}"));
            args.agent_image(STAGING_AGENT_IMAGE, version);
        }
    } else {
        args.push_all(["--version", version]);
    }
}

fn push_development_flags(args: &mut Args, head_version: &str) {
    args.push("--devel");

    if head_version == HEAD_VERSION_HEAD {
        args.set(format!("rancherImageTag={HEAD_VERSION_HEAD}"));
        args.agent_image(PUBLIC_AGENT_IMAGE, HEAD_VERSION_HEAD);
        return;
    }

    let tag = format!("v{head_version}-head");
    if PUBLIC_HEAD_VERSION.is_match(head_version) {
        args.set(format!("rancherImageTag={tag}"));
        args.agent_image(PUBLIC_AGENT_IMAGE, &tag);
    } else {
        // No public devel images exist for 2.7 - 2.11.
        args.set(format!("rancherImage={STAGING_RANCHER_IMAGE}"));
        args.set(format!("rancherImageTag={tag}"));
        args.agent_image(STAGING_AGENT_IMAGE, &tag);
    }
}

#[derive(Default)]
struct Args(Vec<String>);

impl Args {
    fn push(&mut self, arg: impl Into<String>) {
        self.0.push(arg.into());
    }

    fn push_all<'a>(&mut self, args: impl IntoIterator<Item = &'a str>) {
        self.0.extend(args.into_iter().map(str::to_string));
    }

    fn set(&mut self, value: impl Into<String>) {
        self.push("--set");
        self.push(value);
    }

    /// Override the agent image through the third `extraEnv` slot.
    fn agent_image(&mut self, image: &str, tag: &str) {
        self.set("extraEnv[2].name=CATTLE_AGENT_IMAGE");
        self.set(format!("extraEnv[2].value={image}:{tag}"));
    }
}
