//! Top-level role loop
//!
//! Asks a [`RoleSource`] for a role, runs one orchestrator pass, reports the
//! outcome and asks again until the source is exhausted. The loop itself
//! keeps no session state.

use crate::config::qos::{BenchConfig, ConfigError};
use crate::link::events::log_report;
use crate::session::orchestrator::{Orchestrator, SessionError, SessionResult};
use crate::session::state::Role;
use std::collections::VecDeque;
use tracing::{error, info};

/// Supplies roles (and optional configuration changes) to the loop
pub trait RoleSource {
    /// Next role to run, or None to leave the loop
    fn next_role(&mut self) -> Option<Role>;

    /// Offer a configuration change before an initiator pass
    ///
    /// # Returns
    /// The new configuration, None to keep the current one, or the
    /// validation error that rejects the pass
    fn reconfigure(&mut self, _current: &BenchConfig) -> Result<Option<BenchConfig>, ConfigError> {
        Ok(None)
    }

    /// Called once per pass with its outcome
    fn report(&mut self, _role: Role, _result: &SessionResult) {}
}

/// Counts of passes run by [`run_role_loop`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RoleLoopSummary {
    pub passes: u64,
    pub succeeded: u64,
    pub failed: u64,
}

/// A fixed list of roles, optionally with one configuration per initiator pass
#[derive(Debug, Default)]
pub struct ScriptedRoles {
    roles: VecDeque<Role>,
    configs: VecDeque<BenchConfig>,
    results: Vec<(Role, Result<(), SessionError>)>,
}

impl ScriptedRoles {
    pub fn new(roles: impl IntoIterator<Item = Role>) -> Self {
        Self {
            roles: roles.into_iter().collect(),
            ..Default::default()
        }
    }

    /// The same role `count` times
    pub fn repeat(role: Role, count: usize) -> Self {
        Self::new(std::iter::repeat_n(role, count))
    }

    /// Configurations handed out to successive initiator passes
    pub fn with_configs(mut self, configs: impl IntoIterator<Item = BenchConfig>) -> Self {
        self.configs = configs.into_iter().collect();
        self
    }

    /// Outcomes reported so far
    pub fn results(&self) -> &[(Role, Result<(), SessionError>)] {
        &self.results
    }
}

impl RoleSource for ScriptedRoles {
    fn next_role(&mut self) -> Option<Role> {
        self.roles.pop_front()
    }

    fn reconfigure(&mut self, _current: &BenchConfig) -> Result<Option<BenchConfig>, ConfigError> {
        Ok(self.configs.pop_front())
    }

    fn report(&mut self, role: Role, result: &SessionResult) {
        self.results
            .push((role, result.as_ref().map(|_| ()).map_err(Clone::clone)));
    }
}

/// Run passes until the source has no more roles
pub async fn run_role_loop(
    orchestrator: &mut Orchestrator,
    source: &mut dyn RoleSource,
) -> RoleLoopSummary {
    let mut summary = RoleLoopSummary::default();

    while let Some(role) = source.next_role() {
        summary.passes += 1;

        if role == Role::Initiator {
            let change = source
                .reconfigure(orchestrator.config())
                .and_then(|next| match next {
                    Some(config) => orchestrator.set_config(config),
                    None => Ok(()),
                });
            if let Err(e) = change {
                error!("Rejected configuration: {}", e);
                summary.failed += 1;
                source.report(role, &Err(SessionError::ConfigInvalid(e)));
                continue;
            }
        }

        let result = orchestrator.run_session(role).await;
        match &result {
            Ok(pass) => {
                summary.succeeded += 1;
                info!(
                    %role,
                    streams = pass.streams,
                    sent = pass.packets_sent,
                    duration_ms = pass.duration.as_millis() as u64,
                    local_teardown = pass.local_teardown,
                    "Session completed ({} - {})",
                    pass.started_at.format("%H:%M:%S"),
                    pass.ended_at.format("%H:%M:%S")
                );
                info!("This session: {}", pass.session_stats);
            }
            Err(e) => {
                summary.failed += 1;
                error!(%role, "Session failed: {}", e);
            }
        }
        source.report(role, &result);
    }

    log_report(&orchestrator.hub().context().stats_report());
    info!(
        passes = summary.passes,
        succeeded = summary.succeeded,
        failed = summary.failed,
        "Role loop finished"
    );
    summary
}
