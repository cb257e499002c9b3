// Centralized logging for the login flow. Every line carries the login
// transaction id so a single attempt can be followed across stages.
use log::{debug, info, warn};

use crate::error::AuthFlowError;

pub struct LoggingHelper;

impl LoggingHelper {
    /// Log a forward transition of the login state machine
    pub fn log_stage_transition(correlation_id: &str, from: &str, to: &str) {
        debug!("[{}] {} -> {}", correlation_id, from, to);
    }

    /// Log a login flow that stopped at `stage`
    pub fn log_flow_failed(correlation_id: &str, stage: &str, code: &str, detail: &str) {
        warn!(
            "[{}] ❌ Login failed at {} ({}): {}",
            correlation_id, stage, code, detail
        );
    }

    pub fn log_flow_started(correlation_id: &str, return_to: &str) {
        info!("[{}] 🔐 Login started, returnTo={}", correlation_id, return_to);
    }

    /// Log a directory candidate endpoint that did not produce a usable artifact
    pub fn log_candidate_failed(
        correlation_id: &str,
        kind: &str,
        path: &str,
        status: Option<u16>,
        reason: &str,
    ) {
        match status {
            Some(status) => warn!(
                "[{}] {} candidate {} failed with status {}: {}",
                correlation_id, kind, path, status, reason
            ),
            None => warn!(
                "[{}] {} candidate {} failed: {}",
                correlation_id, kind, path, reason
            ),
        }
    }

    pub fn log_candidate_succeeded(correlation_id: &str, kind: &str, path: &str) {
        info!("[{}] ✅ {} issued via {}", correlation_id, kind, path);
    }

    /// Log the member record the flow settled on
    pub fn log_member_resolved(correlation_id: &str, member_id: &str, action: &str) {
        info!("[{}] Member {} resolved ({})", correlation_id, member_id, action);
    }

    /// Log the session mechanism the cascade ended with
    pub fn log_cascade_outcome(
        correlation_id: &str,
        mechanism: &str,
        degradation: Option<&AuthFlowError>,
    ) {
        match degradation {
            Some(error) => warn!(
                "[{}] ⚠️  {} ({}), redirecting via {}",
                correlation_id,
                error,
                error.code(),
                mechanism
            ),
            None => info!("[{}] 🎯 Session established via {}", correlation_id, mechanism),
        }
    }

    /// Log a failed call to an external service
    pub fn log_external_call_failed(
        correlation_id: &str,
        endpoint: &str,
        status: Option<u16>,
        reason: &str,
    ) {
        match status {
            Some(status) => warn!(
                "[{}] {} returned {}: {}",
                correlation_id, endpoint, status, reason
            ),
            None => warn!("[{}] {} unreachable: {}", correlation_id, endpoint, reason),
        }
    }

    /// Log server startup configuration
    pub fn log_startup(bind_address: &str, issuer_host: &str, directory_base: &str) {
        info!("🚀 Starting memberbridge on {}", bind_address);
        info!("🔧 Accepting ID tokens issued by {}", issuer_host);
        info!("🔧 Member directory at {}", directory_base);
    }
}
