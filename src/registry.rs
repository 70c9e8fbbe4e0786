use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::entity::{EntityId, EntityKind, TrackedEntity};
use crate::error::{ExperimentError, Result};
use crate::types::{Pose, Vec3};

/// How an entity is placed into a scene
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EntitySpec {
    /// Scene-authored identity; allocated by the registry when absent
    #[serde(default)]
    pub id: Option<EntityId>,
    pub name: String,
    #[serde(default)]
    pub pose: Pose,
    #[serde(default)]
    pub hidden_on_start: bool,
    #[serde(default = "static_kind")]
    pub kind: EntityKind,
}

fn static_kind() -> EntityKind {
    EntityKind::Static
}

impl EntitySpec {
    pub fn new(id: u32, name: &str, position: Vec3) -> Self {
        Self {
            id: Some(EntityId(id)),
            name: name.to_string(),
            pose: Pose::at(position),
            hidden_on_start: false,
            kind: EntityKind::Static,
        }
    }

    pub fn with_kind(mut self, kind: EntityKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn hidden(mut self) -> Self {
        self.hidden_on_start = true;
        self
    }
}

/// The controlled avatar plus every tracked entity of one scene
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SceneDescription {
    pub name: String,
    pub avatar: EntitySpec,
    #[serde(default)]
    pub entities: Vec<EntitySpec>,
}

/// Characters that would split a CSV field or a file path
const RESERVED_NAME_CHARS: &[char] = &[',', '/', '\\', '\n', '\r'];

/// True when `name` can be written into a log row or used as a file name
pub fn is_safe_name(name: &str) -> bool {
    !name.contains(RESERVED_NAME_CHARS)
}

/// `name` with every reserved character replaced by `_`
pub fn sanitize_name(name: &str) -> String {
    name.replace(RESERVED_NAME_CHARS, "_")
}

/// Owns all live entities of the loaded scene, keyed by ID
pub struct EntityRegistry {
    entities: BTreeMap<EntityId, TrackedEntity>,
    next_id: u32,
    avatar: Option<EntityId>,
    scene: Option<String>,
}

impl Default for EntityRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl EntityRegistry {
    pub fn new() -> Self {
        Self {
            entities: BTreeMap::new(),
            next_id: 0,
            avatar: None,
            scene: None,
        }
    }

    pub fn allocate_id(&mut self) -> EntityId {
        let id = EntityId(self.next_id);
        self.next_id += 1;
        id
    }

    /// Add an entity. A duplicate identity is refused and the registry is unchanged.
    pub fn register(&mut self, spec: &EntitySpec) -> Result<EntityId> {
        if !is_safe_name(&spec.name) {
            return Err(ExperimentError::Configuration(format!(
                "entity name {:?} contains a reserved character",
                spec.name
            )));
        }
        let id = match spec.id {
            Some(id) => {
                if self.entities.contains_key(&id) {
                    return Err(ExperimentError::InvariantViolation(format!(
                        "entity ID {} already registered (refusing {:?})",
                        id, spec.name
                    )));
                }
                self.next_id = self.next_id.max(id.0 + 1);
                id
            }
            None => self.allocate_id(),
        };
        let mut entity = TrackedEntity::new(id, spec.name.clone(), spec.pose, spec.kind.clone());
        entity.visible = !spec.hidden_on_start;
        self.entities.insert(id, entity);
        Ok(id)
    }

    /// Replace the current scene. Duplicates are logged and skipped; the
    /// avatar must register or the scene is rejected.
    pub fn load_scene(&mut self, scene: &SceneDescription) -> Result<()> {
        self.entities.clear();
        self.avatar = None;
        let avatar = self.register(&scene.avatar)?;
        self.avatar = Some(avatar);
        for spec in &scene.entities {
            if let Err(e) = self.register(spec) {
                log::warn!("Scene {}: {}", scene.name, e);
            }
        }
        self.scene = Some(scene.name.clone());
        log::info!(
            "Loaded scene {} with {} entities (avatar {})",
            scene.name,
            self.entities.len(),
            avatar
        );
        Ok(())
    }

    pub fn scene_name(&self) -> Option<&str> {
        self.scene.as_deref()
    }

    pub fn avatar_id(&self) -> Option<EntityId> {
        self.avatar
    }

    pub fn avatar_mut(&mut self) -> Option<&mut TrackedEntity> {
        let id = self.avatar?;
        self.entities.get_mut(&id)
    }

    pub fn get(&self, id: EntityId) -> Option<&TrackedEntity> {
        self.entities.get(&id)
    }

    pub fn get_mut(&mut self, id: EntityId) -> Option<&mut TrackedEntity> {
        self.entities.get_mut(&id)
    }

    /// Like get_mut but a missing entity is an error
    pub fn require_mut(&mut self, id: EntityId) -> Result<&mut TrackedEntity> {
        self.entities
            .get_mut(&id)
            .ok_or(ExperimentError::UnknownEntity(id))
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.entities.contains_key(&id)
    }

    pub fn position(&self, id: EntityId) -> Option<Vec3> {
        self.entities.get(&id).map(|e| e.pose.position)
    }

    pub fn distance(&self, a: EntityId, b: EntityId) -> Option<f64> {
        Some((self.position(a)? - self.position(b)?).norm())
    }

    pub fn ids(&self) -> Vec<EntityId> {
        self.entities.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TrackedEntity> {
        self.entities.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut TrackedEntity> {
        self.entities.values_mut()
    }

    /// Snapshot of every pose, for steering that reads other entities
    pub fn poses(&self) -> BTreeMap<EntityId, Pose> {
        self.entities.iter().map(|(id, e)| (*id, e.pose)).collect()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}
