//! Shared state of one running client and the user-facing operations on it

use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use url::Url;

use crate::encode::FrameEncoder;
use crate::endpoint::{parse_endpoint, EndpointConfig, EndpointStore};
use crate::pipeline::{FrameGate, Pipeline};
use crate::upload::{LivenessTracker, Outcome, Transport, UploadClient};
use crate::{Config, ConfigError};

/// Owns the endpoint, liveness flag and upload client that every pipeline
/// built from it shares.
pub struct Session {
    config: Config,
    endpoint: Arc<EndpointConfig>,
    liveness: Arc<LivenessTracker>,
    store: Option<EndpointStore>,
    uploader: UploadClient,
}

impl Session {
    /// Build shared state without touching the network or the state file
    pub fn new(
        config: Config,
        endpoint: Url,
        transport: Arc<dyn Transport>,
        runtime: Handle,
    ) -> Self {
        let endpoint = Arc::new(EndpointConfig::new(endpoint));
        let liveness = Arc::new(LivenessTracker::new());
        let uploader = UploadClient::new(transport, endpoint.clone(), liveness.clone(), runtime);

        Self {
            config,
            endpoint,
            liveness,
            store: None,
            uploader,
        }
    }

    /// Persist reconfigurations to `store`
    pub fn with_store(mut self, store: EndpointStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Resolve the endpoint (saved value first, configured default otherwise),
    /// then probe it once, as the client does on launch.
    pub fn start(
        config: Config,
        transport: Arc<dyn Transport>,
        runtime: Handle,
    ) -> Result<(Self, JoinHandle<Outcome>), ConfigError> {
        config.validate()?;
        let store = EndpointStore::open(&config.upload.state_file);

        let saved = match store.load() {
            Ok(saved) => saved,
            Err(err @ ConfigError::State { .. }) => {
                warn!(error = %err, "Ignoring unreadable state file");
                None
            }
            Err(err) => return Err(err),
        };
        let endpoint = match saved {
            Some(saved) => match parse_endpoint(&saved) {
                Ok(url) => url,
                Err(err) => {
                    warn!(error = %err, "Ignoring saved endpoint");
                    parse_endpoint(&config.upload.default_endpoint)?
                }
            },
            None => parse_endpoint(&config.upload.default_endpoint)?,
        };
        info!(%endpoint, "Using endpoint");

        let session = Self::new(config, endpoint, transport, runtime).with_store(store);
        let probe = session.probe();
        Ok((session, probe))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn endpoint(&self) -> Arc<Url> {
        self.endpoint.snapshot()
    }

    pub fn connected(&self) -> bool {
        self.liveness.get()
    }

    pub fn liveness(&self) -> &Arc<LivenessTracker> {
        &self.liveness
    }

    pub fn uploader(&self) -> &UploadClient {
        &self.uploader
    }

    /// User-triggered connectivity check against the current endpoint
    pub fn probe(&self) -> JoinHandle<Outcome> {
        self.uploader.probe()
    }

    /// Point the client at a new endpoint: validate, persist, swap, probe.
    ///
    /// Uploads already dispatched keep the URL they started with.
    pub fn reconfigure(&self, input: &str) -> Result<JoinHandle<Outcome>, ConfigError> {
        let url = parse_endpoint(input)?;
        if let Some(store) = &self.store {
            store.save(&url)?;
        }
        let previous = self.endpoint.replace(url);
        info!(%previous, current = %self.endpoint.snapshot(), "Endpoint reconfigured");
        Ok(self.probe())
    }

    /// A pipeline sharing this session's endpoint and liveness state
    pub fn pipeline(&self) -> Pipeline {
        Pipeline::new(
            FrameGate::new(self.config.capture.frame_interval(), self.liveness.clone()),
            FrameEncoder::new(&self.config.encode),
            self.uploader.clone(),
        )
    }
}
