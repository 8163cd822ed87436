//! `ContainerDriver` and `CloudContainerDriver` document the shape a
//! real implementation would take — the client struct a real driver
//! would hold, the endpoint it would call — without talking to a
//! container engine or a cloud API. Wiring either up is out of scope
//! here; per-provider driver code is an external collaborator.

use async_trait::async_trait;

use browsergrid_core::domain::entities::Session;
use browsergrid_core::ports::outbound::{ProviderDriverPort, ProviderError, ProviderMetricsSample, ProviderResult, ProvisionedEndpoints};

/// Would hold a Docker/containerd client and an image reference. Session
/// start would `docker run` (or the gRPC equivalent) an image carrying
/// the requested browser, exposing its CDP port on the container
/// network.
pub struct ContainerDriver {
    pub engine_endpoint: String,
}

impl ContainerDriver {
    #[must_use]
    pub fn new(engine_endpoint: impl Into<String>) -> Self {
        Self { engine_endpoint: engine_endpoint.into() }
    }
}

#[async_trait]
impl ProviderDriverPort for ContainerDriver {
    fn provider_name(&self) -> &str {
        "container"
    }

    async fn start(&self, _session: &Session) -> ProviderResult<ProvisionedEndpoints> {
        Err(ProviderError::Refused(format!(
            "ContainerDriver against {} is a stub; wire a container engine client to implement start()",
            self.engine_endpoint
        )))
    }

    async fn stop(&self, _session: &Session) -> ProviderResult<()> {
        Err(ProviderError::Transient("ContainerDriver.stop is a stub".into()))
    }

    async fn health(&self, _session: &Session) -> ProviderResult<()> {
        Err(ProviderError::Unhealthy("ContainerDriver.health is a stub".into()))
    }

    async fn metrics(&self, _session: &Session) -> ProviderResult<ProviderMetricsSample> {
        Ok(ProviderMetricsSample::default())
    }
}

/// Would hold a cloud provider SDK client (e.g. a Fargate/Cloud Run
/// client) and a region. Session start would submit a run-task request
/// carrying the requested browser image and resource limits.
pub struct CloudContainerDriver {
    pub region: String,
}

impl CloudContainerDriver {
    #[must_use]
    pub fn new(region: impl Into<String>) -> Self {
        Self { region: region.into() }
    }
}

#[async_trait]
impl ProviderDriverPort for CloudContainerDriver {
    fn provider_name(&self) -> &str {
        "cloud-container"
    }

    async fn start(&self, _session: &Session) -> ProviderResult<ProvisionedEndpoints> {
        Err(ProviderError::Refused(format!(
            "CloudContainerDriver in region {} is a stub; wire a cloud SDK client to implement start()",
            self.region
        )))
    }

    async fn stop(&self, _session: &Session) -> ProviderResult<()> {
        Err(ProviderError::Transient("CloudContainerDriver.stop is a stub".into()))
    }

    async fn health(&self, _session: &Session) -> ProviderResult<()> {
        Err(ProviderError::Unhealthy("CloudContainerDriver.health is a stub".into()))
    }

    async fn metrics(&self, _session: &Session) -> ProviderResult<ProviderMetricsSample> {
        Ok(ProviderMetricsSample::default())
    }
}
