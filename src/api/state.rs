//! API shared state

use std::sync::Arc;

use crate::integrity::Signer;
use crate::service::AggregationService;

/// Shared state passed to all API handlers
#[derive(Clone)]
pub struct ApiState {
    /// Service every handler delegates to
    pub service: Arc<AggregationService>,

    /// Present when requests are verified and responses signed
    pub signer: Option<Signer>,
}

impl ApiState {
    pub fn new(service: Arc<AggregationService>, signer: Option<Signer>) -> Self {
        Self { service, signer }
    }
}
