use std::{fmt::Debug, sync::Arc};

use async_trait::async_trait;
use eyre::Result;
use tracing::info;

use crate::{settings::Settings, CoreMetrics, Server};

/// Settings of an agent defined from configuration
pub trait LoadableFromSettings: AsRef<Settings> + Sized {
    /// Create a new instance of these settings by reading the configs and env
    /// vars.
    fn load() -> Result<Self>;
}

/// A fundamental agent which does not make any assumptions about the tools
/// which are used.
#[async_trait]
pub trait BaseAgent: Send + Sync + Debug {
    /// The agent's name
    const AGENT_NAME: &'static str;

    /// The settings object for this agent
    type Settings: LoadableFromSettings;

    /// Instantiate the agent from the standard settings object
    async fn from_settings(settings: Self::Settings, metrics: Arc<CoreMetrics>) -> Result<Self>
    where
        Self: Sized;

    /// Start running this agent.
    #[allow(clippy::async_yields_async)]
    async fn run(self);
}

/// Call this from `main` to fully initialize and run the agent for its entire
/// lifecycle. This assumes only a single agent is being run. This will
/// initialize the metrics server and tracing as well.
pub async fn agent_main<A: BaseAgent>() -> Result<()> {
    #[cfg(feature = "color-eyre")]
    color_eyre::install()?;

    let settings = A::Settings::load()?;
    let core_settings: &Settings = settings.as_ref();

    core_settings.tracing.start_tracing()?;
    let metrics = Arc::new(core_settings.metrics(A::AGENT_NAME)?);
    info!(
        agent = A::AGENT_NAME,
        instance = %core_settings.instance,
        tier = %core_settings.worker_tier,
        chain = %core_settings.chain.name,
        "Starting agent"
    );

    let server = Arc::new(Server::new(metrics.listen_port(), metrics.clone()));
    let _server_task = server.run();

    let agent = A::from_settings(settings, metrics).await?;

    // This await will only end if a panic happens. We won't crash, but instead gracefully shut down
    agent.run().await;
    info!(agent = A::AGENT_NAME, "Shutting down agent...");
    Ok(())
}
