//! Primary tables and secondary indices over entities and aliases.
//!
//! The index is the in-memory image of durable state. It is only changed by
//! applying a [`ChangeSet`] whose records have already been committed to
//! storage, and each apply happens inside a single write-lock section so
//! readers see either none or all of an operation.

use crate::{
    errors::{CorrelationError, Result},
    types::{Alias, AliasKey, Entity},
};
use std::collections::HashMap;
use uuid::Uuid;
use zid_storage::{Batch, BatchExt, CF_ALIASES, CF_ENTITIES};

/// Records written and removed by one mutation
#[derive(Debug, Default, Clone)]
pub(crate) struct ChangeSet {
    pub put_entities: Vec<Entity>,
    pub delete_entities: Vec<Uuid>,
    pub put_aliases: Vec<Alias>,
    pub delete_aliases: Vec<Uuid>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.put_entities.is_empty()
            && self.delete_entities.is_empty()
            && self.put_aliases.is_empty()
            && self.delete_aliases.is_empty()
    }

    /// Stage every record in a storage batch
    pub fn write_to(&self, batch: &mut dyn Batch) -> zid_storage::Result<()> {
        for id in &self.delete_aliases {
            batch.delete(CF_ALIASES, id)?;
        }
        for id in &self.delete_entities {
            batch.delete(CF_ENTITIES, id)?;
        }
        for alias in &self.put_aliases {
            batch.put(CF_ALIASES, &alias.id, alias)?;
        }
        for entity in &self.put_entities {
            batch.put(CF_ENTITIES, &entity.id, entity)?;
        }
        Ok(())
    }
}

/// Entity and alias tables with lookup indices
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Index {
    entities: HashMap<Uuid, Entity>,
    aliases: HashMap<Uuid, Alias>,
    alias_keys: HashMap<AliasKey, Uuid>,
    entity_names: HashMap<String, Uuid>,
}

impl Index {
    /// Build an index from persisted records, rejecting invariant violations
    pub fn from_records(
        entities: impl IntoIterator<Item = Entity>,
        aliases: impl IntoIterator<Item = Alias>,
    ) -> Result<Self> {
        let mut index = Index::default();

        for entity in entities {
            if let Some(name) = &entity.name {
                if let Some(other) = index.entity_names.insert(name.clone(), entity.id) {
                    return Err(CorrelationError::CorruptState(format!(
                        "entities {} and {} share name {}",
                        other, entity.id, name
                    )));
                }
            }
            index.entities.insert(entity.id, entity);
        }

        for alias in aliases {
            if let Some(other) = index.alias_keys.insert(alias.key(), alias.id) {
                return Err(CorrelationError::CorruptState(format!(
                    "aliases {} and {} share key {}",
                    other,
                    alias.id,
                    alias.key()
                )));
            }
            index.aliases.insert(alias.id, alias);
        }

        index.check_invariants()?;
        Ok(index)
    }

    pub fn entity(&self, id: &Uuid) -> Option<&Entity> {
        self.entities.get(id)
    }

    pub fn alias(&self, id: &Uuid) -> Option<&Alias> {
        self.aliases.get(id)
    }

    pub fn alias_by_key(&self, key: &AliasKey) -> Option<&Alias> {
        self.alias_keys.get(key).and_then(|id| self.aliases.get(id))
    }

    pub fn entity_by_name(&self, name: &str) -> Option<&Entity> {
        self.entity_names
            .get(name)
            .and_then(|id| self.entities.get(id))
    }

    pub fn entities(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    pub fn aliases(&self) -> impl Iterator<Item = &Alias> {
        self.aliases.values()
    }

    /// Aliases owned by an entity, skipping dangling IDs
    pub fn aliases_of<'a>(&'a self, entity: &'a Entity) -> impl Iterator<Item = &'a Alias> {
        entity.aliases.iter().filter_map(move |id| self.aliases.get(id))
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    pub fn alias_count(&self) -> usize {
        self.aliases.len()
    }

    /// Apply committed changes: removals first, then writes
    pub(crate) fn apply(&mut self, changes: ChangeSet) {
        for id in changes.delete_aliases {
            if let Some(alias) = self.aliases.remove(&id) {
                self.remove_alias_key(&alias);
            }
        }

        for id in changes.delete_entities {
            if let Some(entity) = self.entities.remove(&id) {
                self.remove_entity_name(&entity);
            }
        }

        for alias in changes.put_aliases {
            if let Some(previous) = self.aliases.get(&alias.id).cloned() {
                self.remove_alias_key(&previous);
            }
            self.alias_keys.insert(alias.key(), alias.id);
            self.aliases.insert(alias.id, alias);
        }

        for entity in changes.put_entities {
            if let Some(previous) = self.entities.get(&entity.id).cloned() {
                self.remove_entity_name(&previous);
            }
            if let Some(name) = &entity.name {
                self.entity_names.insert(name.clone(), entity.id);
            }
            self.entities.insert(entity.id, entity);
        }
    }

    fn remove_alias_key(&mut self, alias: &Alias) {
        let key = alias.key();
        if self.alias_keys.get(&key) == Some(&alias.id) {
            self.alias_keys.remove(&key);
        }
    }

    fn remove_entity_name(&mut self, entity: &Entity) {
        if let Some(name) = &entity.name {
            if self.entity_names.get(name) == Some(&entity.id) {
                self.entity_names.remove(name);
            }
        }
    }

    /// Verify alias key uniqueness, referential integrity and name uniqueness
    pub fn check_invariants(&self) -> Result<()> {
        let corrupt = |msg: String| Err(CorrelationError::CorruptState(msg));

        if self.alias_keys.len() != self.aliases.len() {
            return corrupt(format!(
                "{} alias keys indexed for {} aliases",
                self.alias_keys.len(),
                self.aliases.len()
            ));
        }

        for alias in self.aliases.values() {
            if self.alias_keys.get(&alias.key()) != Some(&alias.id) {
                return corrupt(format!("alias {} missing from key index", alias.id));
            }
            match self.entities.get(&alias.canonical_id) {
                None => {
                    return corrupt(format!(
                        "alias {} references missing entity {}",
                        alias.id, alias.canonical_id
                    ))
                }
                Some(owner) if !owner.aliases.contains(&alias.id) => {
                    return corrupt(format!(
                        "entity {} does not list its alias {}",
                        owner.id, alias.id
                    ))
                }
                Some(_) => {}
            }
        }

        let mut named = 0;
        for entity in self.entities.values() {
            for alias_id in &entity.aliases {
                match self.aliases.get(alias_id) {
                    Some(alias) if alias.canonical_id == entity.id => {}
                    _ => {
                        return corrupt(format!(
                            "entity {} lists foreign or missing alias {}",
                            entity.id, alias_id
                        ))
                    }
                }
            }
            if let Some(name) = &entity.name {
                named += 1;
                if self.entity_names.get(name) != Some(&entity.id) {
                    return corrupt(format!("entity {} missing from name index", entity.id));
                }
            }
        }

        if named != self.entity_names.len() {
            return corrupt(format!(
                "{} names indexed for {} named entities",
                self.entity_names.len(),
                named
            ));
        }

        Ok(())
    }
}
