//! Stage trait, dynamic dispatch wrapper, and stage registry.

use std::collections::HashMap;

use async_trait::async_trait;

use slidecast_types::{Result, RunState, StageId, StateField, StateUpdate};

// ---------------------------------------------------------------------------
// Stage trait
// ---------------------------------------------------------------------------

/// One unit of the workflow: reads the run state and returns a partial update.
#[async_trait]
pub trait Stage: Send + Sync {
    fn id(&self) -> StageId;

    /// Fields of the run state this stage consults.
    fn reads(&self) -> &'static [StateField];

    /// Fields this stage is allowed to write. The executor rejects any other.
    fn writes(&self) -> &'static [StateField];

    async fn execute(&self, state: &RunState) -> Result<StateUpdate>;
}

// ---------------------------------------------------------------------------
// DynStage: object-safe wrapper
// ---------------------------------------------------------------------------

pub struct DynStage(Box<dyn Stage>);

impl DynStage {
    pub fn new(stage: impl Stage + 'static) -> Self {
        Self(Box::new(stage))
    }

    pub fn id(&self) -> StageId {
        self.0.id()
    }

    pub fn reads(&self) -> &'static [StateField] {
        self.0.reads()
    }

    pub fn writes(&self) -> &'static [StateField] {
        self.0.writes()
    }

    pub async fn execute(&self, state: &RunState) -> Result<StateUpdate> {
        self.0.execute(state).await
    }

    /// Fields in `update` that this stage did not declare.
    pub fn undeclared_writes(&self, update: &StateUpdate) -> Vec<StateField> {
        let allowed = self.writes();
        update
            .touched_fields()
            .into_iter()
            .filter(|f| !allowed.contains(f))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// StageRegistry
// ---------------------------------------------------------------------------

pub struct StageRegistry {
    stages: HashMap<StageId, DynStage>,
}

impl StageRegistry {
    pub fn new() -> Self {
        Self {
            stages: HashMap::new(),
        }
    }

    /// Register a stage, replacing any previous stage with the same id.
    pub fn register(&mut self, stage: impl Stage + 'static) {
        let id = stage.id();
        self.stages.insert(id, DynStage::new(stage));
    }

    pub fn get(&self, id: StageId) -> Option<&DynStage> {
        self.stages.get(&id)
    }

    pub fn has(&self, id: StageId) -> bool {
        self.stages.contains_key(&id)
    }

    /// Registered stage ids in graph order.
    pub fn ids(&self) -> Vec<StageId> {
        let mut ids: Vec<StageId> = self.stages.keys().copied().collect();
        ids.sort();
        ids
    }
}

impl Default for StageRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct OutlineEcho;

    #[async_trait]
    impl Stage for OutlineEcho {
        fn id(&self) -> StageId {
            StageId::Outline
        }
        fn reads(&self) -> &'static [StateField] {
            &[StateField::Topic]
        }
        fn writes(&self) -> &'static [StateField] {
            &[StateField::Outline]
        }
        async fn execute(&self, state: &RunState) -> Result<StateUpdate> {
            Ok(StateUpdate::new().outline(state.topic.clone().unwrap_or_default()))
        }
    }

    #[tokio::test]
    async fn registry_register_and_execute() {
        let mut registry = StageRegistry::new();
        registry.register(OutlineEcho);

        assert!(registry.has(StageId::Outline));
        assert!(!registry.has(StageId::Video));
        assert_eq!(registry.ids(), vec![StageId::Outline]);

        let state = RunState::new(slidecast_types::RunMode::OutlineOnly).with_topic("Rivers");
        let stage = registry.get(StageId::Outline).unwrap();
        let update = stage.execute(&state).await.unwrap();
        assert_eq!(update.outline.as_deref(), Some("Rivers"));
        assert!(stage.undeclared_writes(&update).is_empty());
    }

    #[test]
    fn undeclared_writes_are_reported() {
        let stage = DynStage::new(OutlineEcho);
        let update = StateUpdate::new()
            .outline("ok")
            .video("/tmp/out.mp4");
        assert_eq!(stage.undeclared_writes(&update), vec![StateField::Video]);
    }
}
