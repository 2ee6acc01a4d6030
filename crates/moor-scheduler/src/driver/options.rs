use std::sync::Arc;

use moor_actor::RetryStrategy;
use moor_common::config::AppConfig;

use crate::id::SessionId;
use crate::transport::MasterConnector;
use crate::types::ExecutorInfo;

#[readonly::make]
pub struct DriverOptions {
    pub framework_name: String,
    pub executor: ExecutorInfo,
    pub master_url: String,
    /// A session identity obtained from a prior registration. When present,
    /// the driver resumes that session instead of registering fresh.
    pub session_id: Option<SessionId>,
    /// The OS user reported to the master during registration.
    pub user: String,
    pub connect_retry_strategy: RetryStrategy,
    /// An explicit transport connector, bypassing the process-wide
    /// connector registry.
    pub connector: Option<Arc<dyn MasterConnector>>,
}

impl DriverOptions {
    pub fn new(
        config: &AppConfig,
        framework_name: impl Into<String>,
        executor: ExecutorInfo,
    ) -> Self {
        Self {
            framework_name: framework_name.into(),
            executor,
            master_url: config.master.url.clone(),
            session_id: None,
            user: config
                .driver
                .user
                .clone()
                .unwrap_or_else(|| std::env::var("USER").unwrap_or_default()),
            connect_retry_strategy: (&config.driver.connect_retry).into(),
            connector: None,
        }
    }

    /// Point the driver at a master other than the configured one.
    pub fn with_master_url(mut self, url: impl Into<String>) -> Self {
        self.master_url = url.into();
        self
    }

    /// Resume a previously registered session instead of registering fresh.
    pub fn with_session_id(mut self, session_id: SessionId) -> Self {
        self.session_id = Some(session_id);
        self
    }

    /// Use an explicit transport connector instead of resolving one from
    /// the connector registry.
    pub fn with_connector(mut self, connector: Arc<dyn MasterConnector>) -> Self {
        self.connector = Some(connector);
        self
    }
}
