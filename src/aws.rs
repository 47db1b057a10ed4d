//! AWS profile loading shared by the S3 store and the identity resolver.
//!
//! The pipeline itself is synchronous, so the session owns a small tokio
//! runtime and every async SDK call is driven through [`AwsSession::block_on`].

use std::future::IntoFuture;
use std::sync::Arc;

use anyhow::{Context, Result};
use aws_config::{BehaviorVersion, Region, SdkConfig};
use aws_credential_types::provider::ProvideCredentials;
use aws_credential_types::Credentials;
use tokio::runtime::{Builder, Runtime};

/// Multi-threaded runtime that blocking callers drive async I/O through.
pub struct IoRuntime {
    runtime: Runtime,
}

impl IoRuntime {
    pub fn new() -> Result<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("bucket-sync-io")
            .enable_all()
            .build()
            .context("Failed to start I/O runtime")?;
        Ok(Self { runtime })
    }

    /// Accepts anything awaitable, including OpenDAL's builder-style
    /// operation futures which only implement `IntoFuture`.
    pub fn block_on<F: IntoFuture>(&self, future: F) -> F::Output {
        self.runtime.block_on(future.into_future())
    }
}

/// Loaded AWS configuration for one named profile.
#[derive(Clone)]
pub struct AwsSession {
    runtime: Arc<IoRuntime>,
    sdk_config: SdkConfig,
    profile: String,
}

impl AwsSession {
    /// Load `profile` from the shared AWS config/credentials files.
    pub fn load(profile: &str, region: Option<&str>) -> Result<Self> {
        let runtime = IoRuntime::new()?;

        let mut loader = aws_config::defaults(BehaviorVersion::latest()).profile_name(profile);
        if let Some(region) = region {
            loader = loader.region(Region::new(region.to_string()));
        }
        let sdk_config = runtime.block_on(loader.load());

        Ok(Self {
            runtime: Arc::new(runtime),
            sdk_config,
            profile: profile.to_string(),
        })
    }

    pub fn profile(&self) -> &str {
        &self.profile
    }

    pub fn region(&self) -> Option<String> {
        self.sdk_config.region().map(|r| r.to_string())
    }

    pub fn sdk_config(&self) -> &SdkConfig {
        &self.sdk_config
    }

    /// Resolve static credentials from the profile's provider chain.
    pub fn credentials(&self) -> Result<Credentials> {
        let provider = self
            .sdk_config
            .credentials_provider()
            .with_context(|| format!("No credentials provider for profile '{}'", self.profile))?;

        self.block_on(provider.provide_credentials())
            .with_context(|| format!("Failed to load credentials for profile '{}'", self.profile))
    }

    /// Run a future to completion on the session runtime. Safe to call from
    /// several worker threads at once.
    pub fn block_on<F: IntoFuture>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }
}
