//! Keepers that own the entities a session has retrieved.
//!
//! Every entity handed out by a session is either still owned by the cache
//! ([`Fetched::Cached`], shared with later lookups and tied to the structural
//! generation it was read in) or released to the caller ([`Fetched::Owned`],
//! which the cache no longer references). Releasing is how a caller keeps a
//! search result across directory changes.

use std::collections::HashMap;
use std::sync::Arc;

// ids released to callers are kept in a compressed bitmap
use roaring::RoaringTreemap;

use crate::construct::{
    Assignment, Directory, DirectoryTree, Entity, Id, IdHasher, ROOT_ID, RunRange, TypeTable,
    Variation,
};
use crate::error::{CcdbError, Result};

/// Entities of one kind a cache keeps before it starts dropping old ones.
pub const DEFAULT_CACHE_CAPACITY: usize = 10_000;

/// Holds one kind of entity by identity.
#[derive(Debug)]
pub struct Keeper<T: Entity> {
    kept: HashMap<Id, Arc<T>, IdHasher>,
    released: RoaringTreemap,
    capacity: Option<usize>,
}
impl<T: Entity> Keeper<T> {
    pub fn new() -> Self {
        Self {
            kept: HashMap::default(),
            released: RoaringTreemap::new(),
            capacity: None,
        }
    }
    /// A keeper that drops an arbitrary entry to make room once `capacity`
    /// entities are kept. Callers holding a dropped entity keep their `Arc`.
    pub fn bounded(capacity: usize) -> Self {
        Self {
            capacity: Some(capacity.max(1)),
            ..Self::new()
        }
    }
    fn make_room(&mut self, id: Id) {
        if let Some(capacity) = self.capacity {
            if self.kept.len() >= capacity && !self.kept.contains_key(&id) {
                let victim = self.kept.keys().next().copied();
                if let Some(victim) = victim {
                    self.kept.remove(&victim);
                }
            }
        }
    }
    /// Stores the entity, replacing any earlier copy since the backend is
    /// authoritative. Returns the kept entity and whether the id was known.
    pub fn keep(&mut self, entity: T) -> (Arc<T>, bool) {
        let id = entity.id();
        self.make_room(id);
        let keepsake = Arc::new(entity);
        let previously_kept = self.kept.insert(id, Arc::clone(&keepsake)).is_some();
        self.released.remove(id);
        (keepsake, previously_kept)
    }
    pub fn keep_arc(&mut self, entity: Arc<T>) -> Arc<T> {
        self.make_room(entity.id());
        self.released.remove(entity.id());
        self.kept.insert(entity.id(), Arc::clone(&entity));
        entity
    }
    pub fn get(&self, id: Id) -> Option<Arc<T>> {
        self.kept.get(&id).map(Arc::clone)
    }
    /// The first kept entity matching `found`.
    pub fn find(&self, found: impl Fn(&T) -> bool) -> Option<Arc<T>> {
        self.kept.values().find(|v| found(v)).map(Arc::clone)
    }
    /// Drops the cache's reference; the caller holds the only remaining one.
    pub fn release(&mut self, id: Id) -> Option<Arc<T>> {
        let released = self.kept.remove(&id);
        if released.is_some() {
            self.released.insert(id);
        }
        released
    }
    pub fn is_owned(&self, id: Id) -> bool {
        self.kept.contains_key(&id)
    }
    pub fn was_released(&self, id: Id) -> bool {
        self.released.contains(id)
    }
    /// Drops the entity and forgets that it was ever released.
    pub fn evict(&mut self, id: Id) -> Option<Arc<T>> {
        self.released.remove(id);
        self.kept.remove(&id)
    }
    pub fn retain(&mut self, keep: impl Fn(&T) -> bool) {
        self.kept.retain(|_, v| keep(v));
    }
    pub fn clear(&mut self) {
        self.kept.clear();
    }
    /// Clears the kept entities and the released ids.
    pub fn reset(&mut self) {
        self.kept.clear();
        self.released.clear();
    }
    pub fn len(&self) -> usize {
        self.kept.len()
    }
    pub fn released_len(&self) -> u64 {
        self.released.len()
    }
    pub fn is_empty(&self) -> bool {
        self.kept.is_empty()
    }
}
impl<T: Entity> Default for Keeper<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// An entity handed out by a session.
#[derive(Debug, Clone)]
pub enum Fetched<T> {
    /// Owned by the cache; valid while the structure stays at `generation`.
    Cached { value: Arc<T>, generation: u64 },
    /// Released to the caller; never goes stale.
    Owned(Arc<T>),
}
impl<T> Fetched<T> {
    /// The entity, without a staleness check.
    pub fn value(&self) -> &Arc<T> {
        match self {
            Fetched::Cached { value, .. } | Fetched::Owned(value) => value,
        }
    }
    pub fn is_cached(&self) -> bool {
        matches!(self, Fetched::Cached { .. })
    }
    pub fn generation(&self) -> Option<u64> {
        match self {
            Fetched::Cached { generation, .. } => Some(*generation),
            Fetched::Owned(_) => None,
        }
    }
    pub fn into_arc(self) -> Arc<T> {
        match self {
            Fetched::Cached { value, .. } | Fetched::Owned(value) => value,
        }
    }
}

/// Gives the cache a keeper per entity kind.
pub trait Cacheable: Entity + Sized {
    fn keeper(cache: &ObjectCache) -> &Keeper<Self>;
    fn keeper_mut(cache: &mut ObjectCache) -> &mut Keeper<Self>;
}
macro_rules! cacheable {
    ($t:ty, $field:ident) => {
        impl Cacheable for $t {
            fn keeper(cache: &ObjectCache) -> &Keeper<Self> {
                &cache.$field
            }
            fn keeper_mut(cache: &mut ObjectCache) -> &mut Keeper<Self> {
                &mut cache.$field
            }
        }
    };
}
cacheable!(Directory, directories);
cacheable!(TypeTable, type_tables);
cacheable!(RunRange, run_ranges);
cacheable!(Variation, variations);
cacheable!(Assignment, assignments);

#[derive(Debug)]
pub struct ObjectCache {
    tree: Arc<DirectoryTree>,
    directories: Keeper<Directory>,
    type_tables: Keeper<TypeTable>,
    run_ranges: Keeper<RunRange>,
    variations: Keeper<Variation>,
    assignments: Keeper<Assignment>,
    /// Type tables of a directory, by name, as last read in full.
    listings: HashMap<Id, Vec<Id>, IdHasher>,
}

impl ObjectCache {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CACHE_CAPACITY)
    }
    /// Directories follow the tree; every other kind is bounded by `capacity`.
    pub fn with_capacity(capacity: usize) -> Self {
        let mut cache = Self {
            tree: Arc::new(DirectoryTree::empty()),
            directories: Keeper::new(),
            type_tables: Keeper::bounded(capacity),
            run_ranges: Keeper::bounded(capacity),
            variations: Keeper::bounded(capacity),
            assignments: Keeper::bounded(capacity),
            listings: HashMap::default(),
        };
        cache.adopt_tree_directories();
        cache
    }
    pub fn generation(&self) -> u64 {
        self.tree.generation()
    }
    pub fn tree(&self) -> Arc<DirectoryTree> {
        Arc::clone(&self.tree)
    }
    fn adopt_tree_directories(&mut self) {
        self.directories.clear();
        for directory in self.tree.iter() {
            self.directories.keep_arc(Arc::clone(directory));
        }
    }
    /// Installs a freshly built tree. Everything that depends on the old
    /// structure is dropped; released entities are untouched.
    pub fn invalidate_structure(&mut self, tree: DirectoryTree) {
        tracing::debug!(
            from = self.tree.generation(),
            to = tree.generation(),
            directories = tree.len(),
            "swapping directory tree"
        );
        self.tree = Arc::new(tree);
        self.type_tables.clear();
        self.listings.clear();
        // assignments hold their type table, so they go along with it
        self.assignments.clear();
        self.adopt_tree_directories();
    }
    /// The generation a rebuilt tree should carry.
    pub fn next_generation(&self) -> u64 {
        self.tree.generation() + 1
    }

    pub fn keep<T: Cacheable>(&mut self, entity: T) -> Arc<T> {
        T::keeper_mut(self).keep(entity).0
    }
    pub fn get<T: Cacheable>(&self, id: Id) -> Option<Arc<T>> {
        T::keeper(self).get(id)
    }
    pub fn find<T: Cacheable>(&self, found: impl Fn(&T) -> bool) -> Option<Arc<T>> {
        T::keeper(self).find(found)
    }
    /// Remembers the complete set of type tables of `directory`.
    pub fn record_listing(&mut self, directory: Id, tables: &[Arc<TypeTable>]) {
        self.listings.insert(directory, tables.iter().map(|t| t.id()).collect());
    }
    /// The type tables of `directory` when every one of them is still kept.
    pub fn listing(&self, directory: Id) -> Option<Vec<Arc<TypeTable>>> {
        self.listings
            .get(&directory)?
            .iter()
            .map(|id| self.type_tables.get(*id))
            .collect()
    }
    /// Forgets every listing; the next listing reads the backend again.
    pub fn forget_listings(&mut self) {
        self.listings.clear();
    }
    pub fn evict<T: Cacheable>(&mut self, id: Id) -> Option<Arc<T>> {
        T::keeper_mut(self).evict(id)
    }
    pub fn retain<T: Cacheable>(&mut self, keep: impl Fn(&T) -> bool) {
        T::keeper_mut(self).retain(keep)
    }
    pub fn len<T: Cacheable>(&self) -> usize {
        T::keeper(self).len()
    }
    /// Tags a cache-owned entity with the current generation.
    pub fn fetched<T: Cacheable>(&self, value: Arc<T>) -> Fetched<T> {
        Fetched::Cached {
            value,
            generation: self.generation(),
        }
    }
    /// Hands responsibility for `id` to the caller.
    pub fn release_ownership<T: Cacheable>(&mut self, id: Id) -> Option<Arc<T>> {
        if T::STRUCTURAL && id == ROOT_ID {
            // the root is part of every tree and stays shared
            return T::keeper(self).get(id);
        }
        T::keeper_mut(self).release(id)
    }
    /// Lets the cache share an entity again.
    pub fn acquire_ownership<T: Cacheable>(&mut self, value: Arc<T>) -> Result<Arc<T>> {
        if T::STRUCTURAL && !self.structure_knows(&*value)? {
            return Err(CcdbError::StaleHandle(format!(
                "{} #{} is not part of the current directory tree",
                T::KIND,
                value.id()
            )));
        }
        Ok(T::keeper_mut(self).keep_arc(value))
    }
    pub fn is_owned<T: Cacheable>(&self, id: Id) -> bool {
        T::keeper(self).is_owned(id)
    }
    pub fn was_released<T: Cacheable>(&self, id: Id) -> bool {
        T::keeper(self).was_released(id)
    }
    /// The entity behind a handle, or `StaleHandle` when a cached structural
    /// handle predates the current tree.
    pub fn check<T: Cacheable>(&self, fetched: &Fetched<T>) -> Result<Arc<T>> {
        match fetched {
            Fetched::Owned(value) => Ok(Arc::clone(value)),
            Fetched::Cached { value, generation } => {
                if T::STRUCTURAL && value.id() != ROOT_ID && *generation != self.generation() {
                    Err(CcdbError::StaleHandle(format!(
                        "{} #{} was obtained at structure generation {}, now {}",
                        T::KIND,
                        value.id(),
                        generation,
                        self.generation()
                    )))
                } else {
                    Ok(Arc::clone(value))
                }
            }
        }
    }
    fn structure_knows<T: Entity>(&self, value: &T) -> Result<bool> {
        let any: &dyn std::any::Any = value;
        if let Some(directory) = any.downcast_ref::<Directory>() {
            return Ok(self.tree.get(directory.id()).is_some_and(|d| d.path() == directory.path()));
        }
        if let Some(table) = any.downcast_ref::<TypeTable>() {
            return Ok(self.tree.get(table.directory_id()).is_some());
        }
        Err(CcdbError::Internal(format!("{} is not a structural entity", T::KIND)))
    }
    pub fn clear(&mut self) {
        self.type_tables.reset();
        self.run_ranges.reset();
        self.variations.reset();
        self.assignments.reset();
        self.listings.clear();
        self.adopt_tree_directories();
    }
}

impl Default for ObjectCache {
    fn default() -> Self {
        Self::new()
    }
}
