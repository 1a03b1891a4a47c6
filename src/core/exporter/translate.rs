//! Backend integration config to worker integration config

use crate::config::SecretString;
use crate::domain::{AgentError, IntegrationRequest, Result, WorkerIntegration};

/// Turns a backend integration config into the neutral worker form
pub trait ConfigTranslator: Send + Sync {
    fn translate(
        &self,
        request: &IntegrationRequest,
        customer_id: &str,
        encryption_key: Option<&SecretString>,
    ) -> Result<WorkerIntegration>;
}

/// Validates the request and copies its settings unchanged
#[derive(Debug, Default, Clone, Copy)]
pub struct PassthroughTranslator;

impl ConfigTranslator for PassthroughTranslator {
    fn translate(
        &self,
        request: &IntegrationRequest,
        customer_id: &str,
        _encryption_key: Option<&SecretString>,
    ) -> Result<WorkerIntegration> {
        if request.name.trim().is_empty() {
            return Err(AgentError::Validation(format!(
                "Integration {} has no name",
                request.id
            )));
        }
        if !(request.settings.is_object() || request.settings.is_null()) {
            return Err(AgentError::Validation(format!(
                "Integration {} settings must be an object",
                request.id
            )));
        }

        tracing::debug!(
            integration_id = %request.id,
            name = %request.name,
            source_type = %request.source_type,
            customer_id,
            "Integration translated"
        );

        Ok(WorkerIntegration {
            id: request.id.clone(),
            name: request.name.clone(),
            source_type: request.source_type,
            settings: request.settings.clone(),
        })
    }
}
