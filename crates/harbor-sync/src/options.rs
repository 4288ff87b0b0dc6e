//! Per-call options and engine configuration.
//!
//! Settings resolve in three layers: a value set on the call wins over the
//! entity's default, which wins over the engine's [`SyncConfig`].

use std::time::Duration;

use harbor_core::{EntityDescriptor, Filter, RawQuery};
use tokio::sync::oneshot;

use crate::engine::Payload;

/// What the error path hands back besides the error itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorFallback {
    /// The best local data available for the call.
    #[default]
    LocalData,
    /// Only the remote failure.
    RawFailure,
}

/// Engine-wide defaults.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Timeout handed to the transport when a call sets none.
    pub default_timeout: Duration,
    /// Records classified between two yields to the scheduler.
    pub chunk_size: usize,
    pub error_fallback: ErrorFallback,
    /// Persist writes locally when the server rejects them.
    pub save_on_error: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_millis(5000),
            chunk_size: 100,
            error_fallback: ErrorFallback::LocalData,
            save_on_error: true,
        }
    }
}

/// Options for one sync call.
#[derive(Debug, Default)]
pub struct SyncOptions {
    /// Shapes the local read that produces the result.
    pub filter: Option<Filter>,
    /// Replaces `filter` with caller-supplied SQL.
    pub raw_query: Option<RawQuery>,
    /// Overrides the entity's base URL.
    pub url: Option<String>,
    pub url_params: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub timeout: Option<Duration>,
    /// Skip the transport entirely and work on local data.
    pub local_only: bool,
    /// Receives the local result before the remote call is made.
    pub fetch_local_first: Option<oneshot::Sender<Payload>>,
    /// Delete every local row before merging fetched records.
    pub reset_before_merge: bool,
    pub save_on_error: Option<bool>,
    pub strict: Option<bool>,
    /// Leave the last-modified column as supplied.
    pub suppress_last_modified: bool,
    /// Tunnel PUT and DELETE through POST.
    pub emulate_http: bool,
}

impl SyncOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn raw_query(mut self, query: RawQuery) -> Self {
        self.raw_query = Some(query);
        self
    }

    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn url_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.url_params.push((name.into(), value.into()));
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn local_only(mut self) -> Self {
        self.local_only = true;
        self
    }

    /// Deliver the cached local result on `tx` before going remote.
    ///
    /// That result is provisional: the call's own outcome follows once the
    /// server has answered.
    pub fn fetch_local_first(mut self, tx: oneshot::Sender<Payload>) -> Self {
        self.fetch_local_first = Some(tx);
        self
    }

    pub fn reset_before_merge(mut self) -> Self {
        self.reset_before_merge = true;
        self
    }

    pub fn save_on_error(mut self, save: bool) -> Self {
        self.save_on_error = Some(save);
        self
    }

    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = Some(strict);
        self
    }

    pub fn suppress_last_modified(mut self) -> Self {
        self.suppress_last_modified = true;
        self
    }

    pub fn emulate_http(mut self) -> Self {
        self.emulate_http = true;
        self
    }

    /// Whether a server error should still persist the write locally.
    pub fn resolve_save_on_error(&self, entity: &EntityDescriptor, config: &SyncConfig) -> bool {
        self.save_on_error
            .or(entity.save_on_error())
            .unwrap_or(config.save_on_error)
    }

    /// Whether inserts must carry every declared column.
    pub fn resolve_strict(&self, entity: &EntityDescriptor) -> bool {
        self.strict.unwrap_or(entity.strict())
    }

    pub fn resolve_timeout(&self, config: &SyncConfig) -> Duration {
        self.timeout.unwrap_or(config.default_timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entity(save_on_error: Option<bool>) -> EntityDescriptor {
        let builder = EntityDescriptor::builder("wine").column("name", "text");
        match save_on_error {
            Some(save) => builder.save_on_error(save).build().unwrap(),
            None => builder.build().unwrap(),
        }
    }

    #[test]
    fn test_save_on_error_precedence() {
        let config = SyncConfig::default();

        // engine default
        assert!(SyncOptions::new().resolve_save_on_error(&entity(None), &config));
        // entity over engine
        assert!(!SyncOptions::new().resolve_save_on_error(&entity(Some(false)), &config));
        // call over entity
        assert!(SyncOptions::new()
            .save_on_error(true)
            .resolve_save_on_error(&entity(Some(false)), &config));
        assert!(!SyncOptions::new()
            .save_on_error(false)
            .resolve_save_on_error(&entity(Some(true)), &config));
    }

    #[test]
    fn test_timeout_falls_back_to_config() {
        let config = SyncConfig::default();
        assert_eq!(
            SyncOptions::new().resolve_timeout(&config),
            Duration::from_millis(5000)
        );
        assert_eq!(
            SyncOptions::new()
                .timeout(Duration::from_secs(1))
                .resolve_timeout(&config),
            Duration::from_secs(1)
        );
    }
}
