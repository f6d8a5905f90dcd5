use std::collections::BTreeMap;

use dgw_core::{DgwError, EntityKey};
use tracing::{debug, warn};

use crate::entity::{Entity, EntityMaterial};

/// Outcome of dropping one reference to an entity.
#[derive(Debug)]
pub enum Release {
    Unknown,
    /// Still referenced; remaining count.
    Retained(u32),
    /// Last reference dropped; the caller owns cleanup.
    Removed(Entity),
}

/// Reference-counted entity registry plus group membership.
#[derive(Debug, Default)]
pub struct EntityTable {
    entities: BTreeMap<EntityKey, Entity>,
    groups: BTreeMap<u32, Vec<EntityKey>>,
}

impl EntityTable {
    /// Creates an entity, or bumps the reference count of an existing one.
    /// Returns true when a new entity was inserted.
    pub fn create_entity(&mut self, material: EntityMaterial) -> bool {
        if let Some(existing) = self.entities.get_mut(&material.key) {
            existing.ref_count += 1;
            debug!(
                "entity {} already exists, ref count {}",
                material.key, existing.ref_count
            );
            return false;
        }
        debug!("created entity {}", material.key);
        self.entities.insert(material.key, Entity::new(material));
        true
    }

    pub fn release(&mut self, key: &EntityKey) -> Release {
        let Some(entity) = self.entities.get_mut(key) else {
            return Release::Unknown;
        };
        entity.ref_count = entity.ref_count.saturating_sub(1);
        if entity.ref_count > 0 {
            return Release::Retained(entity.ref_count);
        }
        match self.entities.remove(key) {
            Some(entity) => Release::Removed(entity),
            None => Release::Unknown,
        }
    }

    pub fn get(&self, key: &EntityKey) -> Option<&Entity> {
        self.entities.get(key)
    }

    pub fn get_mut(&mut self, key: &EntityKey) -> Option<&mut Entity> {
        self.entities.get_mut(key)
    }

    pub fn contains(&self, key: &EntityKey) -> bool {
        self.entities.contains_key(key)
    }

    pub fn keys(&self) -> Vec<EntityKey> {
        self.entities.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Registers a group member list. Re-creating an existing group is a
    /// logged no-op returning `Ok(false)`.
    pub fn create_group(&mut self, group_id: u32, members: Vec<EntityKey>) -> Result<bool, DgwError> {
        if members.is_empty() {
            return Err(DgwError::InvalidInput("group needs at least one member"));
        }
        if self.groups.contains_key(&group_id) {
            warn!("group {} already exists", group_id);
            return Ok(false);
        }
        self.groups.insert(group_id, members);
        Ok(true)
    }

    pub fn delete_group(&mut self, group_id: u32) -> bool {
        self.groups.remove(&group_id).is_some()
    }

    /// Members of a group in registration order; empty if unknown.
    pub fn group_members(&self, group_id: u32) -> &[EntityKey] {
        self.groups
            .get(&group_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::{EntityTable, Release};
    use crate::entity::EntityMaterial;
    use dgw_core::{DgwError, EntityKey};

    #[test]
    fn repeated_create_counts_references() {
        let mut table = EntityTable::default();
        let key = EntityKey::recv_queue(3, 1);
        assert!(table.create_entity(EntityMaterial::new(key)));
        assert!(!table.create_entity(EntityMaterial::new(key)));
        assert_eq!(table.get(&key).map(|e| e.ref_count()), Some(2));

        assert!(matches!(table.release(&key), Release::Retained(1)));
        assert!(matches!(table.release(&key), Release::Removed(_)));
        assert!(matches!(table.release(&key), Release::Unknown));
        assert!(table.is_empty());
    }

    #[test]
    fn groups_keep_member_order() {
        let mut table = EntityTable::default();
        let a = EntityKey::recv_queue(1, 0);
        let b = EntityKey::recv_queue(2, 0);
        assert_eq!(table.create_group(7, vec![b, a]), Ok(true));
        assert_eq!(table.create_group(7, vec![a]), Ok(false));
        assert_eq!(table.group_members(7), &[b, a]);
        assert_eq!(
            table.create_group(8, Vec::new()),
            Err(DgwError::InvalidInput("group needs at least one member"))
        );
        assert!(table.delete_group(7));
        assert!(table.group_members(7).is_empty());
    }
}
