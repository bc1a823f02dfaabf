use shared::protocol::ReviewRequest;

use crate::{error::ClientError, roles::RoleSet, settings::LlmConfig};

/// Builds the body of a review submission.
///
/// Built-in roles are the backend's defaults and are not sent. The provider
/// triple is attached as saved, without validating the key.
pub fn build_review_request(
    content: &str,
    roles: &RoleSet,
    llm_config: Option<&LlmConfig>,
) -> Result<ReviewRequest, ClientError> {
    if content.trim().is_empty() {
        return Err(ClientError::Validation(
            "review content must not be empty".to_string(),
        ));
    }

    Ok(ReviewRequest {
        content: content.to_string(),
        custom_roles: roles.custom_role_payloads(),
        llm_config: llm_config.map(LlmConfig::to_payload),
    })
}
