//! # Predefined Administrative Steps
//!
//! Small named routines run during a transition request: as the
//! type-specific hook of the steps living in the `predefined` container, and
//! as outcome steps configured on domain activities. Routines write item
//! properties, move viewpoints, or queue follow-up requests against other
//! items; the follow-ups run after the primary transaction commits, each in
//! its own transaction.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

use crate::error::{invalid_data, Result};
use crate::events::{paths, Viewpoint};
use crate::models::{prop_str, ItemId, PropertyMap};
use crate::workflow::context::{EngineContext, FollowUpRequest, RequestScope};

/// Stock routine names, registered by default
pub const WRITE_PROPERTY: &str = "WriteProperty";
pub const ASSIGN_VIEWPOINT: &str = "AssignViewpoint";
pub const QUEUE_REQUEST: &str = "QueueRequest";

/// An administrative routine run inside a transition request
#[async_trait]
pub trait PredefinedStep: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether the routine applies to a step with these properties
    fn applicable(&self, _properties: &PropertyMap) -> bool {
        true
    }

    /// Perform the side effect; the returned value replaces the payload
    async fn run(
        &self,
        ctx: &EngineContext,
        scope: &mut RequestScope,
        properties: &PropertyMap,
        payload: Value,
    ) -> Result<Value>;
}

/// Routine names configured on an activity, run when an outcome is supplied
pub fn outcome_steps(properties: &PropertyMap) -> Vec<String> {
    match properties.get("OutcomeSteps") {
        Some(Value::Array(names)) => names
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        Some(Value::String(list)) => list
            .split(',')
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

/// Shared table of routines, keyed by name
pub struct PredefinedRegistry {
    routines: DashMap<String, Arc<dyn PredefinedStep>>,
}

impl PredefinedRegistry {
    /// Create a registry preloaded with the stock routines
    pub fn new() -> Self {
        let registry = Self {
            routines: DashMap::new(),
        };
        registry.register(Arc::new(WritePropertyStep));
        registry.register(Arc::new(AssignViewpointStep));
        registry.register(Arc::new(QueueRequestStep));
        registry
    }

    pub fn register(&self, routine: Arc<dyn PredefinedStep>) {
        self.routines.insert(routine.name().to_string(), routine);
    }

    pub fn resolve(&self, name: &str) -> Option<Arc<dyn PredefinedStep>> {
        self.routines.get(name).map(|entry| Arc::clone(entry.value()))
    }
}

impl Default for PredefinedRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn required_str<'a>(payload: &'a Value, field: &str, routine: &str) -> Result<&'a str> {
    payload
        .get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| invalid_data(format!("Routine '{routine}' needs a '{field}' field")))
}

/// Writes one item property: payload `{ "name": ..., "value": ... }`
pub struct WritePropertyStep;

#[async_trait]
impl PredefinedStep for WritePropertyStep {
    fn name(&self) -> &'static str {
        WRITE_PROPERTY
    }

    async fn run(
        &self,
        ctx: &EngineContext,
        scope: &mut RequestScope,
        _properties: &PropertyMap,
        payload: Value,
    ) -> Result<Value> {
        let name = required_str(&payload, "name", WRITE_PROPERTY)?;
        let value = payload
            .get("value")
            .cloned()
            .ok_or_else(|| invalid_data(format!("Routine '{WRITE_PROPERTY}' needs a 'value' field")))?;
        ctx.store
            .put(scope.item, &paths::property(name), value, &scope.txn)
            .await?;
        debug!(item = %scope.item, property = name, "Wrote item property");
        Ok(payload)
    }
}

/// Moves a named viewpoint: payload `{ "schema": ..., "view": ..., "event": n }`
pub struct AssignViewpointStep;

#[async_trait]
impl PredefinedStep for AssignViewpointStep {
    fn name(&self) -> &'static str {
        ASSIGN_VIEWPOINT
    }

    async fn run(
        &self,
        ctx: &EngineContext,
        scope: &mut RequestScope,
        _properties: &PropertyMap,
        payload: Value,
    ) -> Result<Value> {
        let schema = required_str(&payload, "schema", ASSIGN_VIEWPOINT)?;
        let view = required_str(&payload, "view", ASSIGN_VIEWPOINT)?;
        let event_id = payload
            .get("event")
            .and_then(Value::as_u64)
            .ok_or_else(|| {
                invalid_data(format!("Routine '{ASSIGN_VIEWPOINT}' needs an 'event' field"))
            })?;
        let viewpoint = Viewpoint {
            schema: schema.to_string(),
            view: view.to_string(),
            event_id,
            updated_at: Utc::now(),
        };
        ctx.store
            .put(
                scope.item,
                &paths::viewpoint(schema, view),
                serde_json::to_value(&viewpoint)?,
                &scope.txn,
            )
            .await?;
        Ok(payload)
    }
}

/// Queues a transition request against another item, drained after commit:
/// payload `{ "item": ..., "agent": ..., "step_path": ..., "transition_id": ..., "payload": ... }`
pub struct QueueRequestStep;

#[async_trait]
impl PredefinedStep for QueueRequestStep {
    fn name(&self) -> &'static str {
        QUEUE_REQUEST
    }

    async fn run(
        &self,
        ctx: &EngineContext,
        scope: &mut RequestScope,
        _properties: &PropertyMap,
        payload: Value,
    ) -> Result<Value> {
        let item: ItemId = serde_json::from_value(
            payload
                .get("item")
                .cloned()
                .ok_or_else(|| invalid_data(format!("Routine '{QUEUE_REQUEST}' needs an 'item' field")))?,
        )?;
        let agent_name = required_str(&payload, "agent", QUEUE_REQUEST)?;
        let step_path = required_str(&payload, "step_path", QUEUE_REQUEST)?;
        let transition_id = payload
            .get("transition_id")
            .and_then(Value::as_i64)
            .ok_or_else(|| {
                invalid_data(format!("Routine '{QUEUE_REQUEST}' needs a 'transition_id' field"))
            })? as i32;
        let agent = ctx.directory.agent_by_name(agent_name).await?;
        scope.queue_followup(FollowUpRequest {
            agent,
            item,
            step_path: step_path.to_string(),
            transition_id,
            payload: payload.get("payload").cloned(),
            attachment: None,
        });
        debug!(target_item = %item, step = step_path, "Queued follow-up request");
        Ok(payload)
    }
}

/// The routine a predefined-container step runs as its transition hook
pub fn routine_of(properties: &PropertyMap) -> Option<&str> {
    prop_str(properties, "Routine")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_stock_routines_registered() {
        let registry = PredefinedRegistry::new();
        assert!(registry.resolve(WRITE_PROPERTY).is_some());
        assert!(registry.resolve(ASSIGN_VIEWPOINT).is_some());
        assert!(registry.resolve(QUEUE_REQUEST).is_some());
        assert!(registry.resolve("Missing").is_none());
    }

    #[test]
    fn test_outcome_steps_from_array_and_string() {
        let mut props = PropertyMap::new();
        props.insert("OutcomeSteps".to_string(), json!(["WriteProperty"]));
        assert_eq!(outcome_steps(&props), vec!["WriteProperty".to_string()]);

        props.insert(
            "OutcomeSteps".to_string(),
            json!("WriteProperty, AssignViewpoint"),
        );
        assert_eq!(
            outcome_steps(&props),
            vec!["WriteProperty".to_string(), "AssignViewpoint".to_string()]
        );

        assert!(outcome_steps(&PropertyMap::new()).is_empty());
    }

    #[test]
    fn test_required_field_errors() {
        let err = required_str(&json!({}), "name", WRITE_PROPERTY).unwrap_err();
        assert!(err.to_string().contains("'name'"));
    }
}
