// crates/deployer-engines/src/credentials.rs
// ============================================================================
// Module: Assume-Role Credential Injection
// Description: When a module's `ModuleConfig.assume_role` names a role ARN,
// assumes it via the ambient credential provider chain and turns the result
// into subprocess environment variables.
// Purpose: Let a module run its commands against a different AWS account
// without the engine itself knowing anything about STS.
// Dependencies: aws-config, aws-credential-types
// ============================================================================

// ============================================================================
// SECTION: Imports
// ============================================================================

use aws_config::BehaviorVersion;
use aws_config::sts::AssumeRoleProvider;
use aws_credential_types::provider::ProvideCredentials;

use crate::error::EngineError;

/// Assumes `role_arn` using the ambient credential chain and returns the
/// `AWS_ACCESS_KEY_ID` / `AWS_SECRET_ACCESS_KEY` / `AWS_SESSION_TOKEN`
/// (session token only if present) environment variables a subprocess needs
/// to act as that role.
///
/// # Errors
/// Returns [`EngineError::AssumeRole`] if the role cannot be assumed (no
/// ambient credentials, the role denies the trust, or STS is unreachable).
pub async fn assume_role_env(role_arn: &str) -> Result<Vec<(String, String)>, EngineError> {
    let base_config = aws_config::defaults(BehaviorVersion::latest()).load().await;
    let provider = AssumeRoleProvider::builder(role_arn).session_name("orgaform").configure(&base_config).build().await;

    let credentials = provider.provide_credentials().await.map_err(|source| EngineError::AssumeRole { role_arn: role_arn.to_string(), source })?;

    let mut env = vec![
        ("AWS_ACCESS_KEY_ID".to_string(), credentials.access_key_id().to_string()),
        ("AWS_SECRET_ACCESS_KEY".to_string(), credentials.secret_access_key().to_string()),
    ];
    if let Some(session_token) = credentials.session_token() {
        env.push(("AWS_SESSION_TOKEN".to_string(), session_token.to_string()));
    }
    Ok(env)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn assume_role_env_fails_closed_without_ambient_credentials() {
        let result = assume_role_env("arn:aws:iam::111111111111:role/does-not-matter").await;
        assert!(result.is_err());
    }
}
