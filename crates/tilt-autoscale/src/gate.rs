//! Scale gate — checks a requested instance count before anything is called.

use std::fmt;

use anyhow::Context;
use tracing::{info, warn};

use tilt_core::TiltConfig;
use tilt_core::config::ScaleConfig;

/// Smallest fleet the gate will accept.
pub const MIN_INSTANCES: i64 = 1;

/// Largest fleet the gate will accept.
pub const MAX_INSTANCES: i64 = 8;

/// Outcome of a scale request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScaleDecision {
    /// Accepted and carried out by the executor.
    Executed(u32),
    /// Accepted, but no executor or credentials are configured so nothing
    /// was called.
    DryRun(u32),
    /// Outside the fleet limits. Nothing was called.
    Rejected(i64),
}

impl ScaleDecision {
    pub fn is_accepted(&self) -> bool {
        !matches!(self, ScaleDecision::Rejected(_))
    }
}

/// Everything an executor needs to resize the application.
#[derive(Clone, PartialEq, Eq)]
pub struct ScaleRequest {
    pub app_name: String,
    pub username: String,
    pub password: String,
    pub instances: u32,
}

impl fmt::Debug for ScaleRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScaleRequest")
            .field("app_name", &self.app_name)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("instances", &self.instances)
            .finish()
    }
}

/// Callback type for performing scaling actions.
pub type ScaleCallback = Box<dyn Fn(ScaleRequest) -> BoxFuture + Send + Sync>;

/// Future returned by a [`ScaleCallback`].
pub type BoxFuture = std::pin::Pin<
    Box<dyn std::future::Future<Output = anyhow::Result<()>> + Send>,
>;

pub struct ScaleGate {
    scale: Option<ScaleConfig>,
    /// Callback to perform scaling.
    scale_fn: Option<ScaleCallback>,
}

impl ScaleGate {
    pub fn new(config: &TiltConfig) -> Self {
        Self {
            scale: config.scale.clone(),
            scale_fn: None,
        }
    }

    /// Set the callback used to perform scaling.
    pub fn with_scale_fn(mut self, f: ScaleCallback) -> Self {
        self.scale_fn = Some(f);
        self
    }

    /// Whether an accepted request would reach an executor.
    pub fn can_execute(&self) -> bool {
        self.scale_fn.is_some()
            && self
                .scale
                .as_ref()
                .and_then(ScaleConfig::credentials)
                .is_some()
    }

    /// Map a requested count onto the fleet limits.
    pub fn check_bounds(target: i64) -> Option<u32> {
        if (MIN_INSTANCES..=MAX_INSTANCES).contains(&target) {
            u32::try_from(target).ok()
        } else {
            None
        }
    }

    /// Validate `target` and, when possible, forward it to the executor.
    ///
    /// Only an executor failure is an error; out-of-bounds targets come back
    /// as [`ScaleDecision::Rejected`].
    pub async fn request_scale(&self, target: i64) -> anyhow::Result<ScaleDecision> {
        let Some(instances) = Self::check_bounds(target) else {
            info!(
                requested = target,
                min = MIN_INSTANCES,
                max = MAX_INSTANCES,
                "scale request rejected"
            );
            return Ok(ScaleDecision::Rejected(target));
        };

        let credentials = self.scale.as_ref().and_then(ScaleConfig::credentials);
        let (Some((app_name, username, password)), Some(scale_fn)) = (credentials, &self.scale_fn)
        else {
            warn!(instances, "scale request accepted but no executor is configured");
            return Ok(ScaleDecision::DryRun(instances));
        };

        let request = ScaleRequest {
            app_name: app_name.to_string(),
            username: username.to_string(),
            password: password.to_string(),
            instances,
        };
        scale_fn(request)
            .await
            .with_context(|| format!("scaling {app_name} to {instances} instances"))?;
        info!(%app_name, instances, "scale request executed");
        Ok(ScaleDecision::Executed(instances))
    }
}
