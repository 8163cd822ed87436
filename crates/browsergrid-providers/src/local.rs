//! Spawns a real browser process on the local host and talks to its CDP
//! HTTP endpoint (`/json/version`) to discover the WebSocket debugger
//! URL. This is the provider behind `ProviderKind::Local` — used for
//! development and for exercising the rest of the control plane without
//! a container runtime.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicU16, Ordering};

use async_trait::async_trait;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio::time::{sleep, Duration};
use uuid::Uuid;

use browsergrid_core::domain::entities::Session;
use browsergrid_core::ports::outbound::{ProviderDriverPort, ProviderError, ProviderMetricsSample, ProviderResult, ProvisionedEndpoints};

const STARTUP_POLL_INTERVAL: Duration = Duration::from_millis(100);
const STARTUP_POLL_ATTEMPTS: u32 = 50;

pub struct LocalProcessDriver {
    binary: String,
    next_port: AtomicU16,
    children: Mutex<HashMap<Uuid, (Child, u16)>>,
    http: reqwest::Client,
}

impl LocalProcessDriver {
    /// `binary` is the executable to launch (e.g. `chromium`,
    /// `google-chrome`, `firefox`). `base_port` is the first
    /// `--remote-debugging-port` handed out; subsequent sessions get
    /// consecutive ports.
    #[must_use]
    pub fn new(binary: impl Into<String>, base_port: u16) -> Self {
        Self {
            binary: binary.into(),
            next_port: AtomicU16::new(base_port),
            children: Mutex::new(HashMap::new()),
            http: reqwest::Client::new(),
        }
    }

    fn allocate_port(&self) -> u16 {
        self.next_port.fetch_add(1, Ordering::SeqCst)
    }

    async fn poll_version_endpoint(&self, port: u16) -> ProviderResult<serde_json::Value> {
        let url = format!("http://127.0.0.1:{port}/json/version");
        for _ in 0..STARTUP_POLL_ATTEMPTS {
            if let Ok(resp) = self.http.get(&url).send().await {
                if let Ok(json) = resp.json::<serde_json::Value>().await {
                    return Ok(json);
                }
            }
            sleep(STARTUP_POLL_INTERVAL).await;
        }
        Err(ProviderError::StartupFailed(format!(
            "browser did not answer {url} within {}ms",
            STARTUP_POLL_INTERVAL.as_millis() as u32 * STARTUP_POLL_ATTEMPTS
        )))
    }
}

#[async_trait]
impl ProviderDriverPort for LocalProcessDriver {
    fn provider_name(&self) -> &str {
        "local"
    }

    async fn start(&self, session: &Session) -> ProviderResult<ProvisionedEndpoints> {
        let port = self.allocate_port();
        let mut args = vec![
            "--headless".to_string(),
            "--disable-gpu".to_string(),
            "--no-sandbox".to_string(),
            format!("--remote-debugging-port={port}"),
            "--remote-debugging-address=127.0.0.1".to_string(),
            format!("--window-size={},{}", session.screen.width, session.screen.height),
        ];
        for (key, value) in &session.environment {
            args.push(format!("--{key}={value}"));
        }

        let child = Command::new(&self.binary)
            .args(&args)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ProviderError::Refused(format!("failed to spawn {}: {e}", self.binary)))?;

        let version = self.poll_version_endpoint(port).await;

        self.children.lock().await.insert(session.id, (child, port));

        let version = version?;
        let ws_endpoint = version
            .get("webSocketDebuggerUrl")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| ProviderError::StartupFailed("no webSocketDebuggerUrl in /json/version".into()))?;

        Ok(ProvisionedEndpoints {
            ws_endpoint,
            live_url: format!("http://127.0.0.1:{port}"),
        })
    }

    async fn stop(&self, session: &Session) -> ProviderResult<()> {
        let mut children = self.children.lock().await;
        if let Some((mut child, _port)) = children.remove(&session.id) {
            child
                .kill()
                .await
                .map_err(|e| ProviderError::Transient(format!("failed to kill process: {e}")))?;
        }
        Ok(())
    }

    async fn health(&self, session: &Session) -> ProviderResult<()> {
        let port = {
            let children = self.children.lock().await;
            children.get(&session.id).map(|(_, port)| *port)
        };
        let Some(port) = port else {
            return Err(ProviderError::Unhealthy(format!("no tracked process for session {}", session.id)));
        };

        let url = format!("http://127.0.0.1:{port}/json/version");
        self.http
            .get(&url)
            .send()
            .await
            .map_err(|e| ProviderError::Unhealthy(e.to_string()))?
            .error_for_status()
            .map_err(|e| ProviderError::Unhealthy(e.to_string()))?;
        Ok(())
    }

    async fn metrics(&self, session: &Session) -> ProviderResult<ProviderMetricsSample> {
        let pid = {
            let children = self.children.lock().await;
            children.get(&session.id).and_then(|(child, _)| child.id())
        };
        let Some(pid) = pid else {
            return Err(ProviderError::Unhealthy(format!("no tracked process for session {}", session.id)));
        };

        let memory_mb = read_vm_rss_mb(pid).await.unwrap_or(0.0);
        Ok(ProviderMetricsSample {
            // A single /proc read only gives cumulative CPU ticks; a
            // meaningful percentage needs two samples a known interval
            // apart, which the caller (the scheduler's health-check
            // handler) is better positioned to do by diffing successive
            // `metrics()` calls.
            cpu_percent: 0.0,
            memory_mb,
            rx_bytes: 0,
            tx_bytes: 0,
        })
    }
}

#[cfg(target_os = "linux")]
async fn read_vm_rss_mb(pid: u32) -> Option<f64> {
    let status = tokio::fs::read_to_string(format!("/proc/{pid}/status")).await.ok()?;
    for line in status.lines() {
        if let Some(rest) = line.strip_prefix("VmRSS:") {
            let kb: u64 = rest.trim().trim_end_matches(" kB").trim().parse().ok()?;
            return Some(kb as f64 / 1024.0);
        }
    }
    None
}

#[cfg(not(target_os = "linux"))]
async fn read_vm_rss_mb(_pid: u32) -> Option<f64> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_port_increments() {
        let driver = LocalProcessDriver::new("true", 9300);
        assert_eq!(driver.allocate_port(), 9300);
        assert_eq!(driver.allocate_port(), 9301);
    }

    #[test]
    fn provider_name_is_local() {
        let driver = LocalProcessDriver::new("true", 9300);
        assert_eq!(driver.provider_name(), "local");
    }
}
