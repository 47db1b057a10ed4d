//! Caller identity shown before any work starts.

use anyhow::{Context, Result};
use tracing::debug;

use crate::aws::AwsSession;

/// Who the credentials belong to.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Identity {
    pub account_id: String,
    pub alias: Option<String>,
    pub arn: String,
    pub principal: String,
    pub region: String,
}

impl Identity {
    /// One-line form for the overview pane.
    pub fn summary(&self) -> String {
        let account = match &self.alias {
            Some(alias) => format!("{} ({})", self.account_id, alias),
            None => self.account_id.clone(),
        };
        format!("Account: {} | Principal: {} | Region: {}", account, self.principal, self.region)
    }
}

pub trait IdentityResolver {
    fn resolve_identity(&self) -> Result<Identity>;
}

/// Extract the principal name from an STS caller ARN.
///
/// `arn:aws:iam::123:user/alice` gives `alice`,
/// `arn:aws:sts::123:assumed-role/Admin/session` gives `Admin`.
pub fn principal_from_arn(arn: &str) -> String {
    let resource = arn.splitn(6, ':').nth(5).unwrap_or(arn);
    let mut parts = resource.split('/');
    match parts.next() {
        Some("user") => parts.last().unwrap_or(resource).to_string(),
        Some("assumed-role") => parts.next().unwrap_or(resource).to_string(),
        _ => resource.rsplit('/').next().unwrap_or(resource).to_string(),
    }
}

/// Pick the account alias to display. A configured alias wins and skips the
/// lookup. A failed lookup (commonly a missing `iam:ListAccountAliases`
/// permission) leaves the alias unset.
pub fn resolve_alias<F>(configured: Option<&str>, lookup: F) -> Option<String>
where
    F: FnOnce() -> Result<Option<String>>,
{
    if let Some(alias) = configured.filter(|a| !a.is_empty()) {
        return Some(alias.to_string());
    }
    match lookup() {
        Ok(alias) => alias.filter(|a| !a.is_empty()),
        Err(e) => {
            debug!("Account alias lookup failed: {:#}", e);
            None
        }
    }
}

/// Resolves the identity with STS `GetCallerIdentity` and the account alias
/// with IAM `ListAccountAliases`.
pub struct AwsIdentityResolver {
    session: AwsSession,
    alias: Option<String>,
}

impl AwsIdentityResolver {
    pub fn new(session: AwsSession) -> Self {
        Self { session, alias: None }
    }

    /// Display alias that replaces the IAM lookup.
    pub fn with_alias(mut self, alias: Option<String>) -> Self {
        self.alias = alias.filter(|a| !a.is_empty());
        self
    }

    fn lookup_alias(&self) -> Result<Option<String>> {
        let client = aws_sdk_iam::Client::new(self.session.sdk_config());
        let output = self
            .session
            .block_on(client.list_account_aliases().send())
            .context("ListAccountAliases failed")?;
        Ok(output.account_aliases().first().cloned())
    }
}

impl IdentityResolver for AwsIdentityResolver {
    fn resolve_identity(&self) -> Result<Identity> {
        let client = aws_sdk_sts::Client::new(self.session.sdk_config());
        let output = self
            .session
            .block_on(client.get_caller_identity().send())
            .with_context(|| format!("GetCallerIdentity failed for profile '{}'", self.session.profile()))?;

        let alias = resolve_alias(self.alias.as_deref(), || self.lookup_alias());

        let arn = output.arn().unwrap_or_default().to_string();
        Ok(Identity {
            account_id: output.account().unwrap_or_default().to_string(),
            alias,
            principal: principal_from_arn(&arn),
            arn,
            region: self.session.region().unwrap_or_else(|| "unknown".to_string()),
        })
    }
}
