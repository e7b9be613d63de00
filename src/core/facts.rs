//! Host facts.
//!
//! Each fact is probed by spawning an external command, so values are kept
//! in a [`CoalescingCache`]: concurrent requests for a cold fact share one
//! probe. A probe that fails yields `null`, never an error.

use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

use super::coalescing_cache::{CacheStats, CoalescingCache};

const GNUTAR_MINIMUM_VERSION: (u32, u32) = (1, 20);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FactKind {
    Arch,
    Hostname,
    Kernel,
    GnuTar,
    RunsvdirRunning,
}

impl FactKind {
    pub const ALL: [FactKind; 5] = [
        FactKind::Arch,
        FactKind::Hostname,
        FactKind::Kernel,
        FactKind::GnuTar,
        FactKind::RunsvdirRunning,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FactKind::Arch => "arch",
            FactKind::Hostname => "hostname",
            FactKind::Kernel => "kernel",
            FactKind::GnuTar => "gnutar",
            FactKind::RunsvdirRunning => "runsvdir_running",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HostFacts {
    pub arch: Option<String>,
    pub hostname: Option<String>,
    pub kernel: Option<String>,
    pub gnutar: Option<String>,
    pub runsvdir_running: Option<bool>,
}

#[derive(Clone)]
pub struct FactsProvider {
    cache: CoalescingCache<FactKind, Value>,
    ttl: Duration,
    overrides: Arc<HashMap<FactKind, Value>>,
}

impl FactsProvider {
    pub fn new(ttl: Duration) -> Self {
        Self {
            cache: CoalescingCache::new(),
            ttl,
            overrides: Arc::new(HashMap::new()),
        }
    }

    /// Answer `kind` with a fixed value instead of probing the host. The
    /// value still goes through the cache.
    pub fn with_override(mut self, kind: FactKind, value: Value) -> Self {
        Arc::make_mut(&mut self.overrides).insert(kind, value);
        self
    }

    pub async fn get(&self, kind: FactKind) -> Value {
        let fixed = self.overrides.get(&kind).cloned();
        let fill = move || async move {
            match fixed {
                Some(value) => value,
                None => probe(kind).await,
            }
        };

        match self.cache.get(kind, fill, self.ttl).await {
            Ok(value) => value,
            Err(e) => {
                warn!(fact = kind.as_str(), error = %e, "Fact probe aborted");
                Value::Null
            }
        }
    }

    pub async fn get_facts(&self) -> HostFacts {
        let values = futures::future::join_all(FactKind::ALL.iter().map(|kind| self.get(*kind))).await;
        let mut facts = HostFacts::default();

        for (kind, value) in FactKind::ALL.iter().zip(values) {
            match kind {
                FactKind::Arch => facts.arch = as_string(value),
                FactKind::Hostname => facts.hostname = as_string(value),
                FactKind::Kernel => facts.kernel = as_string(value),
                FactKind::GnuTar => facts.gnutar = as_string(value),
                FactKind::RunsvdirRunning => facts.runsvdir_running = value.as_bool(),
            }
        }
        facts
    }

    /// Path of a GNU tar binary recent enough to unpack bundles.
    pub async fn gnutar(&self) -> Option<String> {
        as_string(self.get(FactKind::GnuTar).await)
    }

    pub async fn hostname(&self) -> Option<String> {
        as_string(self.get(FactKind::Hostname).await)
    }

    /// Flush every fact; the next request probes again.
    pub fn expire(&self) {
        self.cache.expire_all();
    }

    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }
}

fn as_string(value: Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s),
        _ => None,
    }
}

async fn probe(kind: FactKind) -> Value {
    debug!(fact = kind.as_str(), "Probing host fact");
    match kind {
        FactKind::Arch => command_output("uname", &["-m"])
            .await
            .map(|arch| Value::String(normalize_arch(&arch)))
            .unwrap_or(Value::Null),
        FactKind::Hostname => command_output("hostname", &[])
            .await
            .map(Value::String)
            .unwrap_or(Value::Null),
        FactKind::Kernel => command_output("uname", &["-sr"])
            .await
            .map(Value::String)
            .unwrap_or(Value::Null),
        FactKind::GnuTar => find_gnutar().await.map(Value::String).unwrap_or(Value::Null),
        FactKind::RunsvdirRunning => {
            let running = Command::new("pgrep")
                .args(["-x", "runsvdir"])
                .output()
                .await
                .map(|output| output.status.success())
                .unwrap_or(false);
            Value::Bool(running)
        }
    }
}

/// Trimmed stdout of a command that exited successfully.
async fn command_output(program: &str, args: &[&str]) -> Option<String> {
    let output = match Command::new(program).args(args).output().await {
        Ok(output) => output,
        Err(e) => {
            debug!(program, error = %e, "Fact probe could not be spawned");
            return None;
        }
    };
    if !output.status.success() {
        return None;
    }
    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!stdout.is_empty()).then_some(stdout)
}

pub(crate) fn normalize_arch(raw: &str) -> String {
    let arch = raw.trim().to_lowercase();
    match arch.as_str() {
        "amd64" | "x64_64" => "x86_64".to_string(),
        _ => arch,
    }
}

async fn find_gnutar() -> Option<String> {
    // `which` exits non-zero when any candidate is missing, so read stdout
    // regardless of status.
    let output = Command::new("which")
        .args(["gnutar", "gtar", "tar"])
        .output()
        .await
        .ok()?;
    let candidates = String::from_utf8_lossy(&output.stdout).to_string();

    for candidate in candidates.lines().map(str::trim).filter(|line| !line.is_empty()) {
        if let Some(version) = command_output(candidate, &["--version"]).await {
            if gnutar_version_ok(&version) {
                return Some(candidate.to_string());
            }
        }
    }
    None
}

/// True if `--version` output names GNU tar at or above the minimum version.
pub(crate) fn gnutar_version_ok(version_output: &str) -> bool {
    let Some(rest) = version_output
        .lines()
        .find_map(|line| line.split("(GNU tar) ").nth(1))
    else {
        return false;
    };

    let mut parts = rest.trim().split('.').map(|part| {
        part.chars()
            .take_while(|c| c.is_ascii_digit())
            .collect::<String>()
            .parse::<u32>()
            .unwrap_or(0)
    });
    let major = parts.next().unwrap_or(0);
    let minor = parts.next().unwrap_or(0);
    (major, minor) >= GNUTAR_MINIMUM_VERSION
}
