use crate::api_key::ApiKeyStore;
use crate::auth::AuthGate;
use crate::config::Config;
use crate::prometheus::PrometheusClient;
use reqwest::{Client, Url};
use std::{sync::Arc, time::Duration};
use tracing::{debug, info};

pub struct AppState {
    pub prometheus: PrometheusClient,
    pub auth: AuthGate,
}

impl AppState {
    pub fn from_config(cfg: &Config) -> anyhow::Result<Self> {
        let timeout = Duration::from_secs(cfg.timeout_secs);
        let mut builder = Client::builder().timeout(timeout);
        if let Some(secs) = cfg.connect_timeout_secs {
            builder = builder.connect_timeout(Duration::from_secs(secs));
        }
        let client = builder.build()?;
        debug!("HTTP client created with timeout: {:?}", timeout);

        // Parse and validate upstream URL at startup
        let url = Url::parse(&cfg.prometheus_url).map_err(|e| {
            anyhow::anyhow!("Invalid Prometheus URL '{}': {}", cfg.prometheus_url, e)
        })?;
        info!("Upstream Prometheus: {}", url);

        let auth = if cfg.secure_api_with_key {
            info!("API key authentication enabled");
            let store = ApiKeyStore::new(&cfg.secret_file, cfg.api_key_override.clone());
            AuthGate::Enabled(Arc::new(store))
        } else {
            debug!("API key authentication disabled");
            AuthGate::Disabled
        };

        Ok(AppState {
            prometheus: PrometheusClient::new(client, url),
            auth,
        })
    }
}
