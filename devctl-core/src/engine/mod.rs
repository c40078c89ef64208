//! # Pipeline Engine
//!
//! Walks the plugin clients in run order through the phases of an `up`:
//! config mutation, build, prepare, validate and launch planning. Phases
//! run one client at a time; results are merged in client order, so the
//! same plugin outputs always produce the same config and plan.

pub mod commands;
pub mod types;

pub use commands::CommandRegistry;
pub use types::{
    BuildResult, HealthCheck, LaunchPlan, PrepareResult, Probe, ServiceSpec, StepResult,
    StepsResult, ValidateResult,
};

use crate::error::{DevctlError, Result};
use crate::patch::{apply, Config};
use crate::runtime::{call_typed, Client, OpContext};
use log::{debug, info, warn};
use plugin_protocol::model::ops;
use std::sync::Arc;
use types::{ConfigInput, MutateOutput};

#[derive(Debug, Clone, Copy, Default)]
pub struct PipelineOptions {
    /// Launch-plan name collisions abort the run instead of replacing.
    pub strict: bool,
    /// Reported to callers; plugins see it through the request context.
    pub dry_run: bool,
}

pub struct Pipeline {
    clients: Vec<Arc<dyn Client>>,
    options: PipelineOptions,
}

impl Pipeline {
    pub fn new(mut clients: Vec<Arc<dyn Client>>, options: PipelineOptions) -> Self {
        clients.sort_by(|a, b| a.spec().run_order(b.spec()));
        Self { clients, options }
    }

    pub fn clients(&self) -> &[Arc<dyn Client>] {
        &self.clients
    }

    pub fn options(&self) -> PipelineOptions {
        self.options
    }

    fn supporting<'a>(&'a self, op: &'a str) -> impl Iterator<Item = &'a Arc<dyn Client>> + 'a {
        self.clients.iter().filter(move |c| c.supports_op(op))
    }

    /// Feeds the config through every `config.mutate`, applying each
    /// returned patch before the next plugin sees the config.
    pub async fn mutate_config(&self, ctx: &OpContext, mut config: Config) -> Result<Config> {
        for client in self.supporting(ops::CONFIG_MUTATE) {
            let out: MutateOutput =
                call_typed(client.as_ref(), ctx, ops::CONFIG_MUTATE, &ConfigInput { config: &config })
                    .await?;
            if out.config_patch.is_empty() {
                continue;
            }
            debug!(
                "{}: config patch sets {} key(s), unsets {}",
                client.id(),
                out.config_patch.set.len(),
                out.config_patch.unset.len()
            );
            config = apply(&config, &out.config_patch)?;
        }
        Ok(config)
    }

    pub async fn build(&self, ctx: &OpContext, config: &Config) -> Result<BuildResult> {
        self.run_steps(ctx, ops::BUILD_RUN, config).await
    }

    pub async fn prepare(&self, ctx: &OpContext, config: &Config) -> Result<PrepareResult> {
        self.run_steps(ctx, ops::PREPARE_RUN, config).await
    }

    /// Steps concatenate in client order; later artifacts overwrite earlier ones.
    async fn run_steps(&self, ctx: &OpContext, op: &str, config: &Config) -> Result<StepsResult> {
        let mut merged = StepsResult::default();
        for client in self.supporting(op) {
            let out: StepsResult =
                call_typed(client.as_ref(), ctx, op, &ConfigInput { config }).await?;
            merged.steps.extend(out.steps);
            merged.artifacts.extend(out.artifacts);
        }
        Ok(merged)
    }

    /// Collects errors and warnings. Valid iff no plugin reported an error.
    pub async fn validate(&self, ctx: &OpContext, config: &Config) -> Result<ValidateResult> {
        let mut merged = ValidateResult::default();
        for client in self.supporting(ops::VALIDATE_RUN) {
            let out: ValidateResult =
                call_typed(client.as_ref(), ctx, ops::VALIDATE_RUN, &ConfigInput { config }).await?;
            for e in &out.errors {
                warn!("{}: validation error {}: {}", client.id(), e.code, e.message);
            }
            merged.errors.extend(out.errors);
            merged.warnings.extend(out.warnings);
        }
        merged.valid = merged.errors.is_empty();
        Ok(merged)
    }

    pub async fn launch_plan(&self, ctx: &OpContext, config: &Config) -> Result<LaunchPlan> {
        let mut plans = Vec::new();
        for client in self.supporting(ops::LAUNCH_PLAN) {
            let plan: LaunchPlan =
                call_typed(client.as_ref(), ctx, ops::LAUNCH_PLAN, &ConfigInput { config }).await?;
            plans.push((client.id().to_string(), plan));
        }
        let plan = merge_plans(plans, self.options.strict)?;
        info!("launch plan: {:?}", plan.names());
        Ok(plan)
    }
}

/// Merges per-plugin plans by service name.
///
/// A later plan's service replaces an earlier one of the same name in
/// place; in strict mode the collision is an error instead.
pub fn merge_plans<I>(plans: I, strict: bool) -> Result<LaunchPlan>
where
    I: IntoIterator<Item = (String, LaunchPlan)>,
{
    let mut merged = LaunchPlan::default();
    for (plugin_id, plan) in plans {
        for svc in plan.services {
            if svc.name.trim().is_empty() {
                return Err(DevctlError::EmptyServiceName);
            }
            match merged.services.iter().position(|s| s.name == svc.name) {
                Some(_) if strict => return Err(DevctlError::ServiceCollision(svc.name)),
                Some(idx) => {
                    warn!("{}: replaces service {}", plugin_id, svc.name);
                    merged.services[idx] = svc;
                }
                None => merged.services.push(svc),
            }
        }
    }
    Ok(merged)
}
