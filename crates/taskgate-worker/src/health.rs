//! Liveness and readiness checks (§6 "Health").
//!
//! Liveness never does any real work: if the process can answer at all, it
//! is alive. Readiness is the interesting one — it actually probes the
//! store, the artifacts directory and (depending on `profile`) the LM
//! proxy's liveliness endpoint, the way the teacher's service health
//! handlers probe their own dependencies before reporting ready.

use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use taskgate_store_core::Backend;
use tracing::warn;

/// Which dependencies a readiness probe should check, selected by the
/// `profile` query parameter on `GET /ready`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadinessProfile {
    /// Store and artifacts directory only.
    Core,
    /// `Core` plus the LM proxy's liveliness endpoint.
    Llm,
    /// Alias for `Llm`; kept distinct so `?profile=full` reads naturally.
    Full,
}

impl ReadinessProfile {
    /// Parse the `profile` query parameter, defaulting to `Core` for an
    /// absent or unrecognized value.
    pub fn parse(value: Option<&str>) -> Self {
        match value {
            Some("llm") => ReadinessProfile::Llm,
            Some("full") => ReadinessProfile::Full,
            Some("core") | None => ReadinessProfile::Core,
            Some(other) => {
                warn!(value = other, "unknown_readiness_profile_falling_back_to_core");
                ReadinessProfile::Core
            }
        }
    }

    fn probes_llm(self) -> bool {
        matches!(self, ReadinessProfile::Llm | ReadinessProfile::Full)
    }
}

/// Outcome of a single named check within a readiness report.
#[derive(Debug, Clone, Serialize)]
pub struct CheckResult {
    /// Check name (`store`, `artifacts_dir`, `disk_space`, `llm_proxy`).
    pub name: String,
    /// `"ok"`, `"not_ready"` or `"skipped"`.
    pub status: String,
    /// Optional human-readable detail (e.g. free space in MiB).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Full readiness report returned by `GET /ready`.
#[derive(Debug, Clone, Serialize)]
pub struct ReadinessReport {
    /// `true` when every required check passed.
    pub ready: bool,
    /// Individual check outcomes.
    pub checks: Vec<CheckResult>,
}

fn ok(name: &str, detail: Option<String>) -> CheckResult {
    CheckResult {
        name: name.to_string(),
        status: "ok".to_string(),
        detail,
    }
}

fn not_ready(name: &str, detail: impl Into<String>) -> CheckResult {
    CheckResult {
        name: name.to_string(),
        status: "not_ready".to_string(),
        detail: Some(detail.into()),
    }
}

fn skipped(name: &str, reason: &str) -> CheckResult {
    CheckResult {
        name: name.to_string(),
        status: "skipped".to_string(),
        detail: Some(reason.to_string()),
    }
}

/// A minimal capability interface over the primary LM client's liveliness
/// probe, so `run_readiness` does not need to depend on `taskgate-llm`
/// directly for anything but this one method.
#[async_trait::async_trait]
pub trait ProxyHealthProbe: Send + Sync {
    /// Probe the proxy's liveliness endpoint with an internally fixed
    /// timeout. Never raises; returns `false` on any failure.
    async fn health_check(&self) -> bool;
}

#[async_trait::async_trait]
impl ProxyHealthProbe for taskgate_llm::PrimaryClient {
    async fn health_check(&self) -> bool {
        taskgate_llm::PrimaryClient::health_check(self).await
    }
}

/// Run the readiness checks appropriate for `profile`.
///
/// `store` and `artifacts_dir` are always checked. `proxy` is consulted only
/// when `profile` requests it; when `profile` requests it but `proxy` is
/// `None` (echo-only deployment), the `llm_proxy` check reports `"skipped"`
/// rather than failing readiness.
pub async fn run_readiness(
    store: &Arc<dyn Backend>,
    artifacts_dir: &Path,
    proxy: Option<&Arc<dyn ProxyHealthProbe>>,
    profile: ReadinessProfile,
) -> ReadinessReport {
    let mut checks = Vec::new();
    let mut ready = true;

    match store.list_tasks(None).await {
        Ok(_) => checks.push(ok("store", None)),
        Err(err) => {
            ready = false;
            checks.push(not_ready("store", err.to_string()));
        }
    }

    match tokio::fs::metadata(artifacts_dir).await {
        Ok(meta) if meta.is_dir() => checks.push(ok("artifacts_dir", None)),
        Ok(_) => {
            ready = false;
            checks.push(not_ready("artifacts_dir", "path exists but is not a directory"));
        }
        Err(err) => {
            ready = false;
            checks.push(not_ready("artifacts_dir", err.to_string()));
        }
    }

    match free_space_mib(artifacts_dir) {
        Some(mib) => checks.push(ok("disk_space", Some(format!("{mib} MiB free")))),
        None => checks.push(not_ready("disk_space", "could not determine free space")),
    }

    if profile.probes_llm() {
        match proxy {
            Some(proxy) => {
                if proxy.health_check().await {
                    checks.push(ok("llm_proxy", None));
                } else {
                    ready = false;
                    checks.push(not_ready("llm_proxy", "liveliness probe failed"));
                }
            }
            None => checks.push(skipped("llm_proxy", "echo-only mode, no primary configured")),
        }
    }

    ReadinessReport { ready, checks }
}

fn free_space_mib(path: &Path) -> Option<u64> {
    // Walk up to the nearest existing ancestor; the artifacts directory may
    // not have been created yet on a cold start.
    let mut probe = path.to_path_buf();
    loop {
        if probe.exists() {
            break;
        }
        if !probe.pop() {
            return None;
        }
    }
    fs4::available_space(&probe).ok().map(|bytes| bytes / (1024 * 1024))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use taskgate_store_sqlite::SqliteBackend;

    struct AlwaysUp;

    #[async_trait::async_trait]
    impl ProxyHealthProbe for AlwaysUp {
        async fn health_check(&self) -> bool {
            true
        }
    }

    struct AlwaysDown;

    #[async_trait::async_trait]
    impl ProxyHealthProbe for AlwaysDown {
        async fn health_check(&self) -> bool {
            false
        }
    }

    async fn store_and_dir() -> (Arc<dyn Backend>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let artifacts = dir.path().join("artifacts");
        tokio::fs::create_dir_all(&artifacts).await.unwrap();
        let backend: Arc<dyn Backend> =
            Arc::new(SqliteBackend::in_memory(artifacts).await.unwrap());
        (backend, dir)
    }

    #[tokio::test]
    async fn core_profile_skips_llm_check() {
        let (store, dir) = store_and_dir().await;
        let artifacts_dir = dir.path().join("artifacts");
        let report = run_readiness(&store, &artifacts_dir, None, ReadinessProfile::Core).await;
        assert!(report.ready);
        assert!(!report.checks.iter().any(|c| c.name == "llm_proxy"));
    }

    #[tokio::test]
    async fn llm_profile_without_proxy_is_skipped_not_failed() {
        let (store, dir) = store_and_dir().await;
        let artifacts_dir = dir.path().join("artifacts");
        let report = run_readiness(&store, &artifacts_dir, None, ReadinessProfile::Llm).await;
        assert!(report.ready);
        let llm_check = report.checks.iter().find(|c| c.name == "llm_proxy").unwrap();
        assert_eq!(llm_check.status, "skipped");
    }

    #[tokio::test]
    async fn llm_profile_with_unhealthy_proxy_fails_readiness() {
        let (store, dir) = store_and_dir().await;
        let artifacts_dir = dir.path().join("artifacts");
        let proxy: Arc<dyn ProxyHealthProbe> = Arc::new(AlwaysDown);
        let report = run_readiness(&store, &artifacts_dir, Some(&proxy), ReadinessProfile::Full).await;
        assert!(!report.ready);
    }

    #[tokio::test]
    async fn llm_profile_with_healthy_proxy_passes() {
        let (store, dir) = store_and_dir().await;
        let artifacts_dir = dir.path().join("artifacts");
        let proxy: Arc<dyn ProxyHealthProbe> = Arc::new(AlwaysUp);
        let report = run_readiness(&store, &artifacts_dir, Some(&proxy), ReadinessProfile::Full).await;
        assert!(report.ready);
    }

    #[tokio::test]
    async fn missing_artifacts_dir_fails_readiness() {
        let (store, dir) = store_and_dir().await;
        let missing = dir.path().join("does-not-exist");
        let report = run_readiness(&store, &missing, None, ReadinessProfile::Core).await;
        assert!(!report.ready);
    }

    #[test]
    fn profile_parse_defaults_to_core() {
        assert_eq!(ReadinessProfile::parse(None), ReadinessProfile::Core);
        assert_eq!(ReadinessProfile::parse(Some("bogus")), ReadinessProfile::Core);
        assert_eq!(ReadinessProfile::parse(Some("llm")), ReadinessProfile::Llm);
        assert_eq!(ReadinessProfile::parse(Some("full")), ReadinessProfile::Full);
    }
}
