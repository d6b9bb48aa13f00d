use crate::app::ports::{Method, Params, PayloadFetcher};
use crate::error::GatewayError;
use crate::pipeline::ingestion::gateway::RequestGateway;
use std::sync::Arc;

/// A gateway bound to one source: the fetch capability a provider adapter
/// composes instead of re-implementing transport concerns.
#[derive(Clone)]
pub struct SourceClient {
    gateway: Arc<RequestGateway>,
    source: String,
    method: Method,
}

impl SourceClient {
    pub fn new(gateway: Arc<RequestGateway>, source: impl Into<String>) -> Self {
        Self {
            gateway,
            source: source.into(),
            method: Method::Get,
        }
    }

    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn source(&self) -> &str {
        &self.source
    }
}

impl PayloadFetcher for SourceClient {
    fn fetch(&self, endpoint: &str, params: &Params) -> Result<serde_json::Value, GatewayError> {
        self.gateway.fetch(&self.source, endpoint, params, self.method)
    }
}
