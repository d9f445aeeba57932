//! GraphBrain adapter (§4.2).

use std::collections::{HashMap, HashSet, VecDeque};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::BrainError;
use crate::packet::{Entity, RelationshipKind};
use crate::packet::Relationship as PacketRelationship;

use super::{Ack, EntityId, Health};

/// A neighborhood returned by `Neighbors()` (§4.2).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Subgraph {
    pub entities: Vec<Entity>,
    pub relationships: Vec<PacketRelationship>,
}

/// A path returned by `ShortestPath()`, as the ordered chain of entities
/// it visits and the relationship kind linking each consecutive pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Path {
    pub entities: Vec<EntityId>,
    pub relationships: Vec<RelationshipKind>,
}

#[async_trait]
pub trait GraphBrain: Send + Sync {
    async fn upsert_entities(&self, entities: &[Entity]) -> Result<Vec<EntityId>, BrainError>;

    async fn upsert_relationships(
        &self,
        relationships: &[PacketRelationship],
    ) -> Result<Ack, BrainError>;

    async fn neighbors(
        &self,
        entity: &EntityId,
        depth: u32,
        rel_filter: Option<&[RelationshipKind]>,
    ) -> Result<Subgraph, BrainError>;

    async fn shortest_path(
        &self,
        from: &EntityId,
        to: &EntityId,
        rel_filter: Option<&[RelationshipKind]>,
    ) -> Result<Option<Path>, BrainError>;

    async fn find_by_property(
        &self,
        entity_type: &str,
        property: &str,
        value: &Value,
    ) -> Result<Vec<EntityId>, BrainError>;

    async fn health(&self) -> Health;
}

/// In-memory GraphBrain standing in for the externally owned property
/// graph engine (§1 Non-goals). Entities are identified by natural key
/// `(type, name)`; a second upsert of the same key merges properties and
/// keeps the higher of the two confidences, logging provenance is left to
/// the router's ingest history.
pub struct InMemoryGraphBrain {
    entities: DashMap<EntityId, Entity>,
    // adjacency keyed by source entity, each edge recorded once per direction
    // it was asserted (edges are directed; `Neighbors` walks outbound only,
    // matching the source->target orientation of `Relationship`, §3).
    edges: DashMap<EntityId, Vec<PacketRelationship>>,
    fault: Mutex<Option<BrainError>>,
}

impl Default for InMemoryGraphBrain {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryGraphBrain {
    pub fn new() -> Self {
        Self {
            entities: DashMap::new(),
            edges: DashMap::new(),
            fault: Mutex::new(None),
        }
    }

    pub fn inject_fault(&self, fault: Option<BrainError>) {
        *self.fault.lock() = fault;
    }

    fn take_fault(&self) -> Option<BrainError> {
        self.fault.lock().clone()
    }

    fn matches_filter(kind: RelationshipKind, filter: Option<&[RelationshipKind]>) -> bool {
        match filter {
            Some(kinds) => kinds.contains(&kind),
            None => true,
        }
    }
}

#[async_trait]
impl GraphBrain for InMemoryGraphBrain {
    async fn upsert_entities(&self, entities: &[Entity]) -> Result<Vec<EntityId>, BrainError> {
        if let Some(fault) = self.take_fault() {
            return Err(fault);
        }
        let mut ids = Vec::with_capacity(entities.len());
        for entity in entities {
            let id = entity.entity_ref();
            self.entities
                .entry(id.clone())
                .and_modify(|existing| {
                    existing.properties.extend(entity.properties.clone());
                    if entity.confidence > existing.confidence {
                        existing.confidence = entity.confidence;
                    }
                })
                .or_insert_with(|| entity.clone());
            ids.push(id);
        }
        Ok(ids)
    }

    async fn upsert_relationships(
        &self,
        relationships: &[PacketRelationship],
    ) -> Result<Ack, BrainError> {
        if let Some(fault) = self.take_fault() {
            return Err(fault);
        }
        for rel in relationships {
            self.edges
                .entry(rel.source_ref.clone())
                .or_default()
                .push(rel.clone());
        }
        Ok(Ack)
    }

    async fn neighbors(
        &self,
        entity: &EntityId,
        depth: u32,
        rel_filter: Option<&[RelationshipKind]>,
    ) -> Result<Subgraph, BrainError> {
        if let Some(fault) = self.take_fault() {
            return Err(fault);
        }
        let mut visited: HashSet<EntityId> = HashSet::new();
        visited.insert(entity.clone());
        let mut frontier = vec![entity.clone()];
        let mut out_entities = Vec::new();
        let mut out_relationships = Vec::new();

        for _ in 0..depth {
            let mut next_frontier = Vec::new();
            for node in &frontier {
                let Some(edges) = self.edges.get(node) else {
                    continue;
                };
                for rel in edges.value() {
                    if !Self::matches_filter(rel.relationship, rel_filter) {
                        continue;
                    }
                    out_relationships.push(rel.clone());
                    if visited.insert(rel.target_ref.clone()) {
                        next_frontier.push(rel.target_ref.clone());
                    }
                }
            }
            frontier = next_frontier;
            if frontier.is_empty() {
                break;
            }
        }

        for id in &visited {
            if let Some(e) = self.entities.get(id) {
                out_entities.push(e.value().clone());
            }
        }

        Ok(Subgraph {
            entities: out_entities,
            relationships: out_relationships,
        })
    }

    async fn shortest_path(
        &self,
        from: &EntityId,
        to: &EntityId,
        rel_filter: Option<&[RelationshipKind]>,
    ) -> Result<Option<Path>, BrainError> {
        if let Some(fault) = self.take_fault() {
            return Err(fault);
        }
        if from == to {
            return Ok(Some(Path {
                entities: vec![from.clone()],
                relationships: vec![],
            }));
        }

        let mut visited: HashSet<EntityId> = HashSet::new();
        visited.insert(from.clone());
        let mut queue: VecDeque<EntityId> = VecDeque::new();
        queue.push_back(from.clone());
        let mut came_from: HashMap<EntityId, (EntityId, RelationshipKind)> = HashMap::new();

        while let Some(node) = queue.pop_front() {
            let Some(edges) = self.edges.get(&node) else {
                continue;
            };
            for rel in edges.value() {
                if !Self::matches_filter(rel.relationship, rel_filter) {
                    continue;
                }
                if visited.insert(rel.target_ref.clone()) {
                    came_from.insert(rel.target_ref.clone(), (node.clone(), rel.relationship));
                    if &rel.target_ref == to {
                        let mut entities = vec![to.clone()];
                        let mut kinds = Vec::new();
                        let mut cursor = to.clone();
                        while let Some((prev, kind)) = came_from.get(&cursor) {
                            entities.push(prev.clone());
                            kinds.push(*kind);
                            cursor = prev.clone();
                        }
                        entities.reverse();
                        kinds.reverse();
                        return Ok(Some(Path {
                            entities,
                            relationships: kinds,
                        }));
                    }
                    queue.push_back(rel.target_ref.clone());
                }
            }
        }
        Ok(None)
    }

    async fn find_by_property(
        &self,
        entity_type: &str,
        property: &str,
        value: &Value,
    ) -> Result<Vec<EntityId>, BrainError> {
        if let Some(fault) = self.take_fault() {
            return Err(fault);
        }
        let matches = self
            .entities
            .iter()
            .filter(|entry| {
                let id = entry.key();
                let type_name = serde_json::to_value(id.entity_type)
                    .ok()
                    .and_then(|v| v.as_str().map(str::to_string));
                if type_name.as_deref() != Some(entity_type) {
                    return false;
                }
                // "name" is the natural-key field on `Entity`, not a
                // user-supplied property, so match it directly (§3 "identity
                // is (type, name)").
                if property == "name" {
                    Some(&entry.value().name) == value.as_str().map(String::from).as_ref()
                } else {
                    entry.value().properties.get(property) == Some(value)
                }
            })
            .map(|entry| entry.key().clone())
            .collect();
        Ok(matches)
    }

    async fn health(&self) -> Health {
        match self.take_fault() {
            Some(e) => Health::unhealthy(e.to_string()),
            None => Health::healthy(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::EntityType;

    fn entity(name: &str) -> Entity {
        Entity {
            entity_type: EntityType::Person,
            name: name.to_string(),
            properties: HashMap::new(),
            confidence: 1.0,
        }
    }

    fn rel(from: &str, kind: RelationshipKind, to: &str) -> PacketRelationship {
        PacketRelationship {
            source_ref: entity(from).entity_ref(),
            relationship: kind,
            target_ref: entity(to).entity_ref(),
            properties: HashMap::new(),
            confidence: 1.0,
        }
    }

    #[tokio::test]
    async fn neighbors_respects_depth() {
        let brain = InMemoryGraphBrain::new();
        brain
            .upsert_entities(&[entity("a"), entity("b"), entity("c")])
            .await
            .unwrap();
        brain
            .upsert_relationships(&[
                rel("a", RelationshipKind::MemberOf, "b"),
                rel("b", RelationshipKind::MemberOf, "c"),
            ])
            .await
            .unwrap();

        let one_hop = brain
            .neighbors(&entity("a").entity_ref(), 1, None)
            .await
            .unwrap();
        assert_eq!(one_hop.entities.len(), 2); // a, b

        let two_hop = brain
            .neighbors(&entity("a").entity_ref(), 2, None)
            .await
            .unwrap();
        assert_eq!(two_hop.entities.len(), 3); // a, b, c
    }

    #[tokio::test]
    async fn shortest_path_finds_the_chain() {
        let brain = InMemoryGraphBrain::new();
        brain
            .upsert_entities(&[entity("a"), entity("b"), entity("c")])
            .await
            .unwrap();
        brain
            .upsert_relationships(&[
                rel("a", RelationshipKind::MemberOf, "b"),
                rel("b", RelationshipKind::MemberOf, "c"),
            ])
            .await
            .unwrap();

        let path = brain
            .shortest_path(&entity("a").entity_ref(), &entity("c").entity_ref(), None)
            .await
            .unwrap()
            .expect("path exists");
        assert_eq!(path.entities.len(), 3);
    }

    #[tokio::test]
    async fn shortest_path_returns_none_when_unreachable() {
        let brain = InMemoryGraphBrain::new();
        brain
            .upsert_entities(&[entity("a"), entity("b")])
            .await
            .unwrap();
        let path = brain
            .shortest_path(&entity("a").entity_ref(), &entity("b").entity_ref(), None)
            .await
            .unwrap();
        assert!(path.is_none());
    }

    #[tokio::test]
    async fn upsert_entities_merges_properties_on_repeat_key() {
        let brain = InMemoryGraphBrain::new();
        let mut e1 = entity("a");
        e1.properties.insert("role".into(), serde_json::json!("eng"));
        brain.upsert_entities(&[e1]).await.unwrap();

        let mut e2 = entity("a");
        e2.properties.insert("team".into(), serde_json::json!("core"));
        brain.upsert_entities(&[e2]).await.unwrap();

        let found = brain
            .find_by_property("Person", "role", &serde_json::json!("eng"))
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
    }
}
