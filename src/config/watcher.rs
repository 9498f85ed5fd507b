//! Hot reload of the connection settings.
//!
//! Only the `[connection]` section is live: it feeds
//! `LifecycleController::update_config`. The other sections are read once at
//! startup, so edits to them are reported and otherwise ignored.

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::config::loader::load_config;
use crate::config::schema::{ConnectionConfig, LinkConfig};

/// What a reloaded file changes relative to the configuration in force.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReloadPlan {
    /// `[connection]` fields whose value changed.
    pub connection_changes: Vec<&'static str>,
    /// Startup-only sections that changed.
    pub restart_required: Vec<&'static str>,
}

impl ReloadPlan {
    pub fn between(current: &LinkConfig, next: &LinkConfig) -> Self {
        let (old, new) = (&current.connection, &next.connection);
        let mut connection_changes = Vec::new();
        if old.connect_timeout_ms != new.connect_timeout_ms {
            connection_changes.push("connect_timeout_ms");
        }
        if old.backoff_ceiling_secs != new.backoff_ceiling_secs {
            connection_changes.push("backoff_ceiling_secs");
        }
        if old.no_response_baseline != new.no_response_baseline {
            connection_changes.push("no_response_baseline");
        }
        if old.disconnect_baseline != new.disconnect_baseline {
            connection_changes.push("disconnect_baseline");
        }

        let mut restart_required = Vec::new();
        if current.service != next.service {
            restart_required.push("service");
        }
        if current.parameters != next.parameters {
            restart_required.push("parameters");
        }
        if current.observability != next.observability {
            restart_required.push("observability");
        }

        Self {
            connection_changes,
            restart_required,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.connection_changes.is_empty() && self.restart_required.is_empty()
    }
}

/// Watches the configuration file and forwards connection updates.
pub struct ConfigWatcher {
    path: PathBuf,
    current: LinkConfig,
    update_tx: mpsc::UnboundedSender<ConnectionConfig>,
}

impl ConfigWatcher {
    /// `current` is the configuration the process started with.
    ///
    /// Returns the watcher and a receiver for validated connection settings
    /// that differ from the ones in force.
    pub fn new(
        path: &Path,
        current: LinkConfig,
    ) -> (Self, mpsc::UnboundedReceiver<ConnectionConfig>) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();

        (
            Self {
                path: path.to_path_buf(),
                current,
                update_tx,
            },
            update_rx,
        )
    }

    /// Start watching the file. Keep the returned watcher alive for as long as
    /// updates should flow.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let tx = self.update_tx;
        let path = self.path.clone();
        let current = Mutex::new(self.current);

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) if event.kind.is_modify() || event.kind.is_create() => {
                    match load_config(&path) {
                        Ok(next) => {
                            let mut current = current.lock().expect("config mutex poisoned");
                            if let Some(connection) = apply_reload(&mut current, next) {
                                let _ = tx.send(connection);
                            }
                        }
                        Err(e) => tracing::error!(
                            path = ?path,
                            error = %e,
                            "Failed to reload config, keeping current configuration"
                        ),
                    }
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = ?e, "Watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        watcher.watch(&self.path, RecursiveMode::NonRecursive)?;

        tracing::info!(path = ?self.path, "Config watcher started");
        Ok(watcher)
    }
}

/// Fold `next` into `current` and return the connection settings to apply,
/// if they changed.
fn apply_reload(current: &mut LinkConfig, next: LinkConfig) -> Option<ConnectionConfig> {
    let plan = ReloadPlan::between(current, &next);
    if plan.is_empty() {
        tracing::debug!("Config file touched without changes");
        return None;
    }
    if !plan.restart_required.is_empty() {
        tracing::warn!(
            sections = ?plan.restart_required,
            "Config sections changed that only apply at startup"
        );
    }
    if plan.connection_changes.is_empty() {
        return None;
    }

    tracing::info!(
        changed = ?plan.connection_changes,
        connect_timeout_ms = next.connection.connect_timeout_ms,
        backoff_ceiling_secs = next.connection.backoff_ceiling_secs,
        no_response_baseline = next.connection.no_response_baseline,
        disconnect_baseline = next.connection.disconnect_baseline,
        "Connection settings reloaded"
    );
    let connection = next.connection.clone();
    current.connection = next.connection;
    Some(connection)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::FallbackPolicy;

    #[test]
    fn test_plan_lists_changed_connection_fields() {
        let current = LinkConfig::default();
        let mut next = current.clone();
        next.connection.backoff_ceiling_secs = 60;
        next.connection.connect_timeout_ms = 500;

        let plan = ReloadPlan::between(&current, &next);
        assert_eq!(
            plan.connection_changes,
            vec!["connect_timeout_ms", "backoff_ceiling_secs"]
        );
        assert!(plan.restart_required.is_empty());
    }

    #[test]
    fn test_unchanged_file_sends_nothing() {
        let mut current = LinkConfig::default();
        assert_eq!(apply_reload(&mut current, LinkConfig::default()), None);
    }

    #[test]
    fn test_startup_only_change_is_not_forwarded() {
        let mut current = LinkConfig::default();
        let mut next = current.clone();
        next.parameters.fallback_policy = FallbackPolicy::AnyFailure;

        let plan = ReloadPlan::between(&current, &next);
        assert_eq!(plan.restart_required, vec!["parameters"]);
        assert_eq!(apply_reload(&mut current, next), None);
        assert_eq!(current.parameters.fallback_policy, FallbackPolicy::NotFoundOnly);
    }

    #[test]
    fn test_connection_change_is_forwarded_once() {
        let mut current = LinkConfig::default();
        let mut next = current.clone();
        next.connection.disconnect_baseline = 2;

        let applied = apply_reload(&mut current, next.clone()).unwrap();
        assert_eq!(applied.disconnect_baseline, 2);
        assert_eq!(current.connection, applied);
        assert_eq!(apply_reload(&mut current, next), None);
    }
}
