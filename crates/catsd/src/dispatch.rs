//! Handler registry and dispatch.
//!
//! Mirrors `cats.v2.server.handlers.Api`/`HandlerItem`: handlers are
//! registered per `handler_id` with an optional `[version, end_version]`
//! range; resolution picks the first registered range containing the
//! connection's negotiated api version. A single unversioned registration
//! is a wildcard that always matches.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use cats_codec::codec::Payload;
use cats_core::Headers;

use crate::connection::ConnectionHandle;

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("no handler registered for id {0}")]
    UnknownHandler(u16),
    #[error("handler {handler_id} has overlapping version ranges")]
    OverlappingVersions { handler_id: u16 },
    #[error("guard failed: {0}")]
    GuardFailed(String),
}

/// What a handler returns to the caller once it accepts a request.
pub struct HandlerOutcome {
    pub headers: Headers,
    pub payload: cats_codec::codec::EncodeInput,
}

impl HandlerOutcome {
    pub fn json(body: serde_json::Value) -> Self {
        Self { headers: Headers::new(), payload: cats_codec::codec::EncodeInput::Document(body) }
    }

    pub fn bytes(body: Vec<u8>) -> Self {
        Self { headers: Headers::new(), payload: cats_codec::codec::EncodeInput::Bytes(body) }
    }

    pub fn with_status(mut self, status: i64) -> Self {
        self.headers.set_status(status);
        self
    }
}

/// Declarative guards checked in `prepare`, before `handle` runs. A guard
/// failure drains the inbound payload and reports to middleware; the
/// connection stays healthy.
#[derive(Debug, Clone, Default)]
pub struct HandlerGuards {
    pub allowed_data_types: Option<Vec<u8>>,
    pub min_data_len: Option<usize>,
    pub max_data_len: Option<usize>,
    pub require_auth: bool,
    pub require_models: Option<Vec<String>>,
    pub block_models: Option<Vec<String>>,
}

impl HandlerGuards {
    pub fn check(&self, data_type: u8, data_len: usize, model_name: Option<&str>) -> Result<(), DispatchError> {
        if let Some(allowed) = &self.allowed_data_types {
            if !allowed.contains(&data_type) {
                return Err(DispatchError::GuardFailed(format!("data_type {data_type} not allowed")));
            }
        }
        if let Some(min) = self.min_data_len {
            if data_len < min {
                return Err(DispatchError::GuardFailed(format!("data_len {data_len} below minimum {min}")));
            }
        }
        if let Some(max) = self.max_data_len {
            if data_len > max {
                return Err(DispatchError::GuardFailed(format!("data_len {data_len} above maximum {max}")));
            }
        }
        if self.require_auth && model_name.is_none() {
            return Err(DispatchError::GuardFailed("authentication required".to_string()));
        }
        if let Some(required) = &self.require_models {
            let name = model_name.unwrap_or("");
            if !required.iter().any(|m| m == name) {
                return Err(DispatchError::GuardFailed(format!("model {name} not permitted")));
            }
        }
        if let Some(blocked) = &self.block_models {
            let name = model_name.unwrap_or("");
            if blocked.iter().any(|m| m == name) {
                return Err(DispatchError::GuardFailed(format!("model {name} blocked")));
            }
        }
        Ok(())
    }
}

/// One registered handler: the behavior plus its declarative guards.
#[async_trait]
pub trait Handler: Send + Sync {
    fn guards(&self) -> &HandlerGuards;

    async fn handle(
        &self,
        conn: &ConnectionHandle,
        headers: Headers,
        payload: Payload,
    ) -> Result<Option<HandlerOutcome>, DispatchError>;
}

struct HandlerItem {
    handler: Arc<dyn Handler>,
    version: Option<u32>,
    end_version: Option<u32>,
}

impl HandlerItem {
    fn matches(&self, api_version: u32) -> bool {
        match (self.version, self.end_version) {
            (None, None) => true,
            (Some(v), Some(end)) => api_version >= v && api_version <= end,
            (Some(v), None) => api_version >= v,
            (None, Some(end)) => api_version <= end,
        }
    }
}

/// Registry of handlers keyed by `handler_id`, each id holding a list of
/// version-ranged items.
#[derive(Default)]
pub struct Api {
    handlers: HashMap<u16, Vec<HandlerItem>>,
}

impl Api {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for `handler_id`. Pass `None` for both bounds to
    /// register a wildcard; registering a second item for the same id when
    /// a wildcard already exists (or ranges overlap) is an error.
    pub fn register(
        &mut self,
        handler_id: u16,
        handler: Arc<dyn Handler>,
        version: Option<u32>,
        end_version: Option<u32>,
    ) -> Result<(), DispatchError> {
        let item = HandlerItem { handler, version, end_version };
        let items = self.handlers.entry(handler_id).or_default();

        let (item_lo, item_hi) = (item.version.unwrap_or(u32::MIN), item.end_version.unwrap_or(u32::MAX));
        for existing in items.iter() {
            let (ex_lo, ex_hi) = (existing.version.unwrap_or(u32::MIN), existing.end_version.unwrap_or(u32::MAX));
            let ranges_overlap = item_lo <= ex_hi && ex_lo <= item_hi;
            if ranges_overlap {
                return Err(DispatchError::OverlappingVersions { handler_id });
            }
        }

        items.push(item);
        items.sort_by_key(|i| i.version.unwrap_or(0));
        Ok(())
    }

    /// Merge another `Api`'s handlers into this one (used to combine
    /// multiple feature modules into one running server, as
    /// `Application(*apis)` does).
    pub fn merge(&mut self, other: Api) {
        for (handler_id, items) in other.handlers {
            self.handlers.entry(handler_id).or_default().extend(items);
        }
    }

    pub fn resolve(&self, handler_id: u16, api_version: u32) -> Result<Arc<dyn Handler>, DispatchError> {
        let items = self.handlers.get(&handler_id).ok_or(DispatchError::UnknownHandler(handler_id))?;
        items
            .iter()
            .find(|item| item.matches(api_version))
            .map(|item| item.handler.clone())
            .ok_or(DispatchError::UnknownHandler(handler_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;

    #[async_trait]
    impl Handler for Noop {
        fn guards(&self) -> &HandlerGuards {
            static GUARDS: HandlerGuards = HandlerGuards {
                allowed_data_types: None,
                min_data_len: None,
                max_data_len: None,
                require_auth: false,
                require_models: None,
                block_models: None,
            };
            &GUARDS
        }

        async fn handle(
            &self,
            _conn: &ConnectionHandle,
            _headers: Headers,
            _payload: Payload,
        ) -> Result<Option<HandlerOutcome>, DispatchError> {
            Ok(None)
        }
    }

    #[test]
    fn wildcard_matches_any_version() {
        let mut api = Api::new();
        api.register(1, Arc::new(Noop), None, None).unwrap();
        assert!(api.resolve(1, 7).is_ok());
    }

    #[test]
    fn versioned_ranges_resolve_correctly() {
        let mut api = Api::new();
        api.register(1, Arc::new(Noop), Some(1), Some(2)).unwrap();
        api.register(1, Arc::new(Noop), Some(3), Some(5)).unwrap();
        assert!(api.resolve(1, 2).is_ok());
        assert!(api.resolve(1, 4).is_ok());
        assert!(api.resolve(1, 6).is_err());
    }

    #[test]
    fn overlapping_versions_are_rejected() {
        let mut api = Api::new();
        api.register(1, Arc::new(Noop), Some(1), Some(3)).unwrap();
        assert!(api.register(1, Arc::new(Noop), Some(2), Some(4)).is_err());
    }

    #[test]
    fn unknown_handler_id_errors() {
        let api = Api::new();
        assert!(matches!(api.resolve(99, 1), Err(DispatchError::UnknownHandler(99))));
    }

    #[test]
    fn guard_checks_data_type_and_length() {
        let guards = HandlerGuards {
            allowed_data_types: Some(vec![1]),
            min_data_len: Some(2),
            max_data_len: Some(10),
            ..Default::default()
        };
        assert!(guards.check(1, 5, None).is_ok());
        assert!(guards.check(0, 5, None).is_err());
        assert!(guards.check(1, 1, None).is_err());
        assert!(guards.check(1, 20, None).is_err());
    }
}
