//! The public face of the store: one backend connection, its cache, its
//! directory tree and its error log, all behind one lock.
//!
//! Every operation
//! * clears the error log,
//! * builds a [`CallContext`] from the session's [`CallOptions`],
//! * does its work, and
//! * records a failure in the error log before returning it.
//!
//! Directory changes rebuild the tree from the backend and swap it in while
//! the lock is held, so no caller observes a partly built tree. Handles
//! obtained before the swap report [`CcdbError::StaleHandle`] unless they were
//! released to the caller first.

use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, info, warn};

use crate::backend::{BackendPort, MemoryBackend};
use crate::cache::{Cacheable, Fetched, ObjectCache};
use crate::construct::{
    Assignment, Column, Directory, DirectoryTree, Id, Paging, ROOT_ID, RunNumber, RunRange,
    TypeTable, Variation, Wildcard, combine_path, normalize_path,
};
use crate::error::{CcdbError, ErrorLog, ErrorRecord, Result};
use crate::interface::{CallContext, CallOptions};
use crate::persist::SqliteBackend;
use crate::request::Request;
use crate::resolve::{AssignmentQuery, NewAssignment, Query, Resolved, Resolver};
use crate::settings::Settings;

struct SessionState {
    backend: Box<dyn BackendPort>,
    cache: ObjectCache,
    errors: ErrorLog,
    options: CallOptions,
    default_variation: String,
    user_name: String,
    /// Set when a committed directory change could not be followed by a
    /// rebuild; the next operation rebuilds first.
    tree_dirty: bool,
}

impl SessionState {
    fn resolver<'a>(&'a mut self, ctx: &'a CallContext) -> Resolver<'a> {
        Resolver::new(&mut *self.backend, &mut self.cache, ctx, &self.default_variation)
    }
    /// Reads the directories again and swaps in the new tree.
    fn rebuild_tree(&mut self, ctx: &CallContext) -> Result<()> {
        let records = self.backend.fetch_directory_tree(ctx)?;
        let tree = DirectoryTree::build(self.cache.next_generation(), records)?;
        self.cache.invalidate_structure(tree);
        self.tree_dirty = false;
        Ok(())
    }
    /// Follows a committed directory change. The write already happened, so
    /// the rebuild ignores the deadline and cancellation of the operation.
    fn settle_tree(&mut self, ctx: &CallContext) -> Result<()> {
        self.tree_dirty = true;
        self.rebuild_tree(&CallContext::unbounded(ctx.operation()))
    }
    fn directory(&self, path: &str) -> Result<Arc<Directory>> {
        self.cache
            .tree()
            .by_path(path)
            .ok_or_else(|| CcdbError::not_found(format!("directory {}", normalize_path(path))))
    }
    fn placed(&mut self, mut table: TypeTable) -> Fetched<TypeTable> {
        let tree = self.cache.tree();
        let directory = tree.path_of(table.directory_id()).unwrap_or("/");
        table.set_path(combine_path(directory, table.name()));
        let kept = self.cache.keep(table);
        self.cache.fetched(kept)
    }
    fn type_table(&mut self, ctx: &CallContext, path: &str, load_columns: bool) -> Result<Fetched<TypeTable>> {
        let table = self.resolver(ctx).type_table(path, load_columns)?;
        Ok(self.cache.fetched(table))
    }
    fn variation(&mut self, ctx: &CallContext, name: &str) -> Result<Arc<Variation>> {
        self.resolver(ctx).variation(Some(name))
    }
    /// Drops the cached table and every cached assignment of it.
    fn forget_type_table(&mut self, id: Id) {
        self.cache.forget_listings();
        self.cache.evict::<TypeTable>(id);
        self.cache.retain::<Assignment>(|a| a.type_table().id() != id);
    }
}

pub struct Session {
    state: Mutex<SessionState>,
}

impl Session {
    /// Wraps a connected backend. The tree is read and the default variation
    /// created when it does not exist yet.
    pub fn new(backend: Box<dyn BackendPort>, settings: &Settings) -> Result<Self> {
        let mut state = SessionState {
            backend,
            cache: ObjectCache::with_capacity(settings.cache_capacity),
            errors: ErrorLog::new(settings.error_capacity),
            options: settings.call_options(),
            default_variation: settings.default_variation.clone(),
            user_name: settings.user_name.clone(),
            tree_dirty: false,
        };
        let ctx = state.options.context("connect");
        state.rebuild_tree(&ctx)?;
        if state.backend.fetch_variation(&ctx, &state.default_variation)?.is_none() {
            let variation = Variation::new(&state.default_variation, "default variation")?;
            state.backend.create_variation(&ctx, &variation)?;
            info!(variation = %state.default_variation, "default variation created");
        }
        info!(
            backend = state.backend.name(),
            user = %state.user_name,
            directories = state.cache.tree().len(),
            "session opened"
        );
        Ok(Self {
            state: Mutex::new(state),
        })
    }
    /// Picks a backend from `settings.connection`.
    pub fn open(settings: &Settings) -> Result<Self> {
        let connection = settings.connection.trim();
        let backend: Box<dyn BackendPort> = if connection == "memory" {
            Box::new(MemoryBackend::new())
        } else if connection == "sqlite::memory:" {
            Box::new(SqliteBackend::in_memory()?)
        } else if let Some(path) = connection.strip_prefix("sqlite://") {
            Box::new(SqliteBackend::open(path)?)
        } else {
            return Err(CcdbError::Connection(format!("unsupported connection string '{}'", connection)));
        };
        Self::new(backend, settings)
    }
    /// A session over a fresh in-memory backend with default settings.
    pub fn in_memory() -> Result<Self> {
        Self::new(Box::new(MemoryBackend::new()), &Settings::default())
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        // a panic while holding the lock leaves the state usable
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
    fn run<T>(
        &self,
        operation: &'static str,
        work: impl FnOnce(&mut SessionState, &CallContext) -> Result<T>,
    ) -> Result<T> {
        let mut guard = self.lock();
        let state = &mut *guard;
        state.errors.clear();
        let ctx = state.options.context(operation);
        let result = ctx.check().and_then(|_| {
            if state.backend.is_connected() {
                if state.tree_dirty {
                    warn!(operation, "rebuilding the directory tree left behind by an earlier change");
                    state.rebuild_tree(&ctx)?;
                }
                work(state, &ctx)
            } else {
                Err(CcdbError::Connection(format!("{} backend is disconnected", state.backend.name())))
            }
        });
        if let Err(error) = &result {
            let module = format!("{}::{}", state.backend.name(), operation);
            debug!(module = %module, code = error.code(), %error, "operation failed");
            state.errors.record(&module, error);
        }
        result
    }

    // ------------- Connection -------------
    pub fn backend_name(&self) -> &'static str {
        self.lock().backend.name()
    }
    pub fn is_connected(&self) -> bool {
        self.lock().backend.is_connected()
    }
    pub fn disconnect(&self) {
        let mut state = self.lock();
        state.backend.disconnect();
        state.cache.clear();
    }
    pub fn set_call_options(&self, options: CallOptions) {
        self.lock().options = options;
    }
    pub fn call_options(&self) -> CallOptions {
        self.lock().options.clone()
    }
    pub fn default_variation(&self) -> String {
        self.lock().default_variation.clone()
    }
    pub fn user_name(&self) -> String {
        self.lock().user_name.clone()
    }

    // ------------- Errors -------------
    /// The most recent error of the last operation.
    pub fn last_error(&self) -> Option<ErrorRecord> {
        self.lock().errors.last().cloned()
    }
    pub fn errors(&self) -> Vec<ErrorRecord> {
        self.lock().errors.records()
    }
    pub fn error_count(&self) -> usize {
        self.lock().errors.len()
    }

    // ------------- Ownership -------------
    /// The entity behind a handle, or `StaleHandle` when the tree changed
    /// since a cached structural handle was obtained.
    pub fn checked<T: Cacheable>(&self, handle: &Fetched<T>) -> Result<Arc<T>> {
        self.run("check", |state, _| state.cache.check(handle))
    }
    /// Hands the entity to the caller; it survives later structural changes.
    pub fn release_ownership<T: Cacheable>(&self, handle: Fetched<T>) -> Result<Fetched<T>> {
        self.run("release_ownership", |state, _| {
            let value = state.cache.check(&handle)?;
            state.cache.release_ownership::<T>(value.id());
            Ok(Fetched::Owned(value))
        })
    }
    pub fn release_all<T: Cacheable>(&self, handles: Vec<Fetched<T>>) -> Result<Vec<Fetched<T>>> {
        handles.into_iter().map(|h| self.release_ownership(h)).collect()
    }
    /// Gives the entity back to the cache, tagged with the current generation.
    pub fn acquire_ownership<T: Cacheable>(&self, handle: Fetched<T>) -> Result<Fetched<T>> {
        self.run("acquire_ownership", |state, _| {
            let value = match handle {
                Fetched::Owned(value) => state.cache.acquire_ownership(value)?,
                cached @ Fetched::Cached { .. } => state.cache.check(&cached)?,
            };
            Ok(state.cache.fetched(value))
        })
    }
    pub fn is_owned<T: Cacheable>(&self, id: Id) -> bool {
        self.lock().cache.is_owned::<T>(id)
    }

    // ------------- Directories -------------
    pub fn root_directory(&self) -> Fetched<Directory> {
        let state = self.lock();
        state.cache.fetched(state.cache.tree().root())
    }
    pub fn directory(&self, path: &str) -> Result<Fetched<Directory>> {
        self.run("directory", |state, _| {
            let directory = state.directory(path)?;
            Ok(state.cache.fetched(directory))
        })
    }
    pub fn subdirectories(&self, parent: &Fetched<Directory>) -> Result<Vec<Fetched<Directory>>> {
        self.run("subdirectories", |state, _| {
            let parent = state.cache.check(parent)?;
            let tree = state.cache.tree();
            Ok(tree
                .children(parent.id())
                .into_iter()
                .map(|d| state.cache.fetched(d))
                .collect())
        })
    }
    /// Directories whose name matches `pattern`, below `parent` when given,
    /// in path order.
    pub fn search_directories(
        &self,
        pattern: &str,
        parent: Option<&str>,
        paging: Paging,
    ) -> Result<Vec<Fetched<Directory>>> {
        self.run("search_directories", |state, _| {
            let pattern = Wildcard::new(pattern)?;
            let tree = state.cache.tree();
            let scope: Option<Vec<Id>> = match parent {
                Some(path) => Some(tree.descendants(state.directory(path)?.id())),
                None => None,
            };
            let mut found: Vec<Arc<Directory>> = tree
                .iter()
                .filter(|d| !d.is_root() && pattern.is_match(d.name()))
                .filter(|d| scope.as_ref().is_none_or(|s| s.contains(&d.id())))
                .cloned()
                .collect();
            found.sort_by(|a, b| a.path().cmp(b.path()));
            Ok(paging
                .apply(found)
                .into_iter()
                .map(|d| state.cache.fetched(d))
                .collect())
        })
    }
    /// Creates `name` below `parent` and swaps in the rebuilt tree.
    pub fn make_directory(&self, name: &str, parent: &str, comment: &str) -> Result<Fetched<Directory>> {
        self.run("make_directory", |state, ctx| {
            let parent = state.directory(parent)?;
            let directory = Directory::new(name, parent.id(), comment)?;
            let id = state.backend.create_directory(ctx, &directory)?;
            state.settle_tree(ctx)?;
            info!(path = %combine_path(parent.path(), name), id, "directory created");
            let created = state
                .cache
                .tree()
                .get(id)
                .ok_or_else(|| CcdbError::Internal(format!("directory #{} missing after creation", id)))?;
            Ok(state.cache.fetched(created))
        })
    }
    /// Submits the staged name, comment and parent of a directory.
    pub fn update_directory(&self, directory: &Directory) -> Result<()> {
        self.run("update_directory", |state, ctx| {
            if directory.id() == ROOT_ID {
                return Err(CcdbError::invalid("the root directory cannot be changed"));
            }
            let tree = state.cache.tree();
            if tree.get(directory.id()).is_none() {
                return Err(CcdbError::StaleHandle(format!(
                    "directory #{} is not part of the current tree",
                    directory.id()
                )));
            }
            if tree.get(directory.parent_id()).is_none() {
                return Err(CcdbError::not_found(format!("directory #{}", directory.parent_id())));
            }
            if directory.parent_id() == directory.id() || tree.descendants(directory.id()).contains(&directory.parent_id()) {
                return Err(CcdbError::invalid("a directory cannot be moved below itself"));
            }
            state.backend.update_directory(ctx, directory)?;
            state.settle_tree(ctx)?;
            info!(id = directory.id(), name = directory.name(), "directory updated");
            Ok(())
        })
    }
    /// Fails with `Conflict` while the directory has subdirectories or tables.
    pub fn delete_directory(&self, path: &str) -> Result<()> {
        self.run("delete_directory", |state, ctx| {
            let directory = state.directory(path)?;
            if directory.is_root() {
                return Err(CcdbError::invalid("the root directory cannot be deleted"));
            }
            state.backend.delete_directory(ctx, directory.id())?;
            state.settle_tree(ctx)?;
            info!(path = directory.path(), "directory deleted");
            Ok(())
        })
    }
    /// Deletes the directory with everything below it, including assignments.
    pub fn recursive_delete_directory(&self, path: &str) -> Result<()> {
        self.run("recursive_delete_directory", |state, ctx| {
            let directory = state.directory(path)?;
            if directory.is_root() {
                return Err(CcdbError::invalid("the root directory cannot be deleted"));
            }
            warn!(path = directory.path(), "recursively deleting directory");
            state.backend.recursive_delete_directory(ctx, directory.id())?;
            state.settle_tree(ctx)?;
            Ok(())
        })
    }

    // ------------- Type tables -------------
    pub fn type_table(&self, path: &str, load_columns: bool) -> Result<Fetched<TypeTable>> {
        self.run("type_table", |state, ctx| state.type_table(ctx, path, load_columns))
    }
    /// Type tables of the directory at `path`, by name. A directory listed
    /// before is served from the cache while all of its tables are kept.
    pub fn type_tables(&self, path: &str, load_columns: bool) -> Result<Vec<Fetched<TypeTable>>> {
        self.run("type_tables", |state, ctx| {
            let directory = state.directory(path)?;
            let listed = state
                .cache
                .listing(directory.id())
                .filter(|tables| !load_columns || tables.iter().all(|t| t.columns_loaded()));
            if let Some(tables) = listed {
                return Ok(tables.into_iter().map(|t| state.cache.fetched(t)).collect());
            }
            let tables: Vec<Fetched<TypeTable>> = state
                .backend
                .fetch_type_tables(ctx, directory.id(), load_columns)?
                .into_iter()
                .map(|t| state.placed(t))
                .collect();
            let kept: Vec<Arc<TypeTable>> = tables.iter().map(|t| Arc::clone(t.value())).collect();
            state.cache.record_listing(directory.id(), &kept);
            Ok(tables)
        })
    }
    /// Type tables whose name matches `pattern`, within `directory` when given.
    pub fn search_type_tables(
        &self,
        pattern: &str,
        directory: Option<&str>,
        load_columns: bool,
        paging: Paging,
    ) -> Result<Vec<Fetched<TypeTable>>> {
        self.run("search_type_tables", |state, ctx| {
            let pattern = Wildcard::new(pattern)?;
            let directory = match directory {
                Some(path) => Some(state.directory(path)?.id()),
                None => None,
            };
            let tables = state
                .backend
                .search_type_tables(ctx, &pattern, directory, load_columns, paging)?;
            Ok(tables.into_iter().map(|t| state.placed(t)).collect())
        })
    }
    pub fn count_type_tables(&self, path: &str) -> Result<usize> {
        self.run("count_type_tables", |state, ctx| {
            let directory = state.directory(path)?;
            state.backend.count_type_tables(ctx, directory.id())
        })
    }
    /// Columns of a table, read from the backend unless already loaded.
    pub fn load_columns(&self, table: &Fetched<TypeTable>) -> Result<Vec<Column>> {
        self.run("load_columns", |state, ctx| {
            let table = state.cache.check(table)?;
            if table.columns_loaded() {
                return Ok(table.columns().to_vec());
            }
            let columns = state.backend.fetch_columns(ctx, table.id())?;
            if let Some(kept) = state.cache.get::<TypeTable>(table.id()) {
                let mut loaded = (*kept).clone();
                loaded.set_columns(columns.clone());
                state.cache.keep(loaded);
            }
            Ok(columns)
        })
    }
    /// Columns are `(name, type)` pairs; unknown type names become doubles.
    pub fn create_type_table(
        &self,
        name: &str,
        directory: &str,
        n_rows: usize,
        columns: &[(&str, &str)],
        comment: &str,
    ) -> Result<Fetched<TypeTable>> {
        self.run("create_type_table", |state, ctx| {
            let parent = state.directory(directory)?;
            let table = TypeTable::new(name, parent.id(), n_rows, columns, comment)?;
            let id = state.backend.create_type_table(ctx, &table)?;
            state.cache.forget_listings();
            let stored = state
                .backend
                .fetch_type_table_by_id(ctx, id, true)?
                .ok_or_else(|| CcdbError::Internal(format!("type table #{} missing after creation", id)))?;
            let placed = state.placed(stored);
            info!(path = placed.value().path(), rows = n_rows, columns = columns.len(), "type table created");
            Ok(placed)
        })
    }
    /// Submits the staged name, comment and directory of a type table.
    pub fn update_type_table(&self, table: &TypeTable) -> Result<()> {
        self.run("update_type_table", |state, ctx| {
            if state.cache.tree().get(table.directory_id()).is_none() {
                return Err(CcdbError::not_found(format!("directory #{}", table.directory_id())));
            }
            state.backend.update_type_table(ctx, table)?;
            state.forget_type_table(table.id());
            info!(id = table.id(), name = table.name(), "type table updated");
            Ok(())
        })
    }
    /// Fails with `Conflict` while the table has assignments.
    pub fn delete_type_table(&self, path: &str) -> Result<()> {
        self.run("delete_type_table", |state, ctx| {
            let table = state.type_table(ctx, path, false)?.into_arc();
            state.backend.delete_type_table(ctx, table.id())?;
            state.forget_type_table(table.id());
            info!(path = table.path(), "type table deleted");
            Ok(())
        })
    }
    pub fn recursive_delete_type_table(&self, path: &str) -> Result<()> {
        self.run("recursive_delete_type_table", |state, ctx| {
            let table = state.type_table(ctx, path, false)?.into_arc();
            warn!(path = table.path(), "recursively deleting type table");
            state.backend.recursive_delete_type_table(ctx, table.id())?;
            state.forget_type_table(table.id());
            Ok(())
        })
    }

    // ------------- Run ranges -------------
    /// Run ranges used by the table at `path`, for one variation when given.
    pub fn run_ranges(&self, path: &str, variation: Option<&str>, paging: Paging) -> Result<Vec<Arc<RunRange>>> {
        self.run("run_ranges", |state, ctx| {
            let table = state.type_table(ctx, path, false)?.into_arc();
            let variation = match variation {
                Some(name) => Some(state.variation(ctx, name)?.id()),
                None => None,
            };
            let ranges = state.backend.fetch_run_ranges(ctx, table.id(), variation, paging)?;
            Ok(ranges.into_iter().map(|r| state.cache.keep(r)).collect())
        })
    }
    pub fn run_range(&self, min: RunNumber, max: RunNumber, name: Option<&str>) -> Result<Arc<RunRange>> {
        self.run("run_range", |state, ctx| {
            let range = state
                .backend
                .fetch_run_range(ctx, min, max, name)?
                .ok_or_else(|| CcdbError::not_found(format!("run range [{}, {}]", min, max)))?;
            Ok(state.cache.keep(range))
        })
    }
    pub fn run_range_by_name(&self, name: &str) -> Result<Arc<RunRange>> {
        self.run("run_range_by_name", |state, ctx| {
            let range = state
                .backend
                .fetch_run_range_by_name(ctx, name)?
                .ok_or_else(|| CcdbError::not_found(format!("run range '{}'", name)))?;
            Ok(state.cache.keep(range))
        })
    }
    pub fn get_or_create_run_range(&self, min: RunNumber, max: RunNumber) -> Result<Arc<RunRange>> {
        self.run("get_or_create_run_range", |state, ctx| {
            state.resolver(ctx).get_or_create_run_range(min, max)
        })
    }
    pub fn create_run_range(&self, min: RunNumber, max: RunNumber, name: Option<&str>, comment: &str) -> Result<Arc<RunRange>> {
        self.run("create_run_range", |state, ctx| {
            let range = RunRange::new(min, max, name, comment)?;
            let id = state.backend.create_run_range(ctx, &range)?;
            let stored = state
                .backend
                .fetch_run_range_by_id(ctx, id)?
                .ok_or_else(|| CcdbError::Internal(format!("run range #{} missing after creation", id)))?;
            info!(run_range = %stored, "run range created");
            Ok(state.cache.keep(stored))
        })
    }
    /// Submits staged bounds and comment.
    pub fn update_run_range(&self, run_range: &RunRange) -> Result<()> {
        self.run("update_run_range", |state, ctx| {
            state.backend.update_run_range(ctx, run_range)?;
            state.cache.evict::<RunRange>(run_range.id());
            state.cache.retain::<Assignment>(|a| a.run_range().id() != run_range.id());
            Ok(())
        })
    }
    /// Fails with `Conflict` while assignments use the range.
    pub fn delete_run_range(&self, id: Id) -> Result<()> {
        self.run("delete_run_range", |state, ctx| {
            state.backend.delete_run_range(ctx, id)?;
            state.cache.evict::<RunRange>(id);
            Ok(())
        })
    }
    pub fn recursive_delete_run_range(&self, id: Id) -> Result<()> {
        self.run("recursive_delete_run_range", |state, ctx| {
            warn!(id, "recursively deleting run range");
            state.backend.recursive_delete_run_range(ctx, id)?;
            state.cache.evict::<RunRange>(id);
            state.cache.retain::<Assignment>(|a| a.run_range().id() != id);
            Ok(())
        })
    }

    // ------------- Variations -------------
    /// Variations used by the table at `path`, for one run when given.
    pub fn variations(&self, path: &str, run: Option<RunNumber>, paging: Paging) -> Result<Vec<Arc<Variation>>> {
        self.run("variations", |state, ctx| {
            let table = state.type_table(ctx, path, false)?.into_arc();
            let variations = state.backend.fetch_variations(ctx, table.id(), run, paging)?;
            Ok(variations.into_iter().map(|v| state.cache.keep(v)).collect())
        })
    }
    pub fn all_variations(&self) -> Result<Vec<Arc<Variation>>> {
        self.run("all_variations", |state, ctx| {
            let variations = state.backend.fetch_all_variations(ctx)?;
            Ok(variations.into_iter().map(|v| state.cache.keep(v)).collect())
        })
    }
    pub fn variation(&self, name: &str) -> Result<Arc<Variation>> {
        self.run("variation", |state, ctx| state.variation(ctx, name))
    }
    pub fn create_variation(&self, name: &str, comment: &str) -> Result<Arc<Variation>> {
        self.run("create_variation", |state, ctx| {
            let variation = Variation::new(name, comment)?;
            state.backend.create_variation(ctx, &variation)?;
            info!(variation = name, "variation created");
            state.variation(ctx, name)
        })
    }
    /// Submits a staged name and comment.
    pub fn update_variation(&self, variation: &Variation) -> Result<()> {
        self.run("update_variation", |state, ctx| {
            let stored = state
                .backend
                .fetch_variation_by_id(ctx, variation.id())?
                .ok_or_else(|| CcdbError::not_found(format!("variation #{}", variation.id())))?;
            if stored.name() == state.default_variation && variation.name() != stored.name() {
                return Err(CcdbError::invalid("the default variation cannot be renamed"));
            }
            state.backend.update_variation(ctx, variation)?;
            state.cache.evict::<Variation>(variation.id());
            state.cache.retain::<Assignment>(|a| a.variation().id() != variation.id());
            Ok(())
        })
    }
    /// Fails with `Conflict` while any assignment references the variation.
    pub fn delete_variation(&self, name: &str) -> Result<()> {
        self.run("delete_variation", |state, ctx| {
            if name == state.default_variation {
                return Err(CcdbError::invalid("the default variation cannot be deleted"));
            }
            let variation = state.variation(ctx, name)?;
            state.backend.delete_variation(ctx, variation.id())?;
            state.cache.evict::<Variation>(variation.id());
            info!(variation = name, "variation deleted");
            Ok(())
        })
    }
    pub fn recursive_delete_variation(&self, name: &str) -> Result<()> {
        self.run("recursive_delete_variation", |state, ctx| {
            if name == state.default_variation {
                return Err(CcdbError::invalid("the default variation cannot be deleted"));
            }
            let variation = state.variation(ctx, name)?;
            warn!(variation = name, "recursively deleting variation");
            state.backend.recursive_delete_variation(ctx, variation.id())?;
            state.cache.evict::<Variation>(variation.id());
            state.cache.retain::<Assignment>(|a| a.variation().id() != variation.id());
            Ok(())
        })
    }

    // ------------- Assignments -------------
    pub fn resolve(&self, query: &Query) -> Result<Resolved> {
        self.run("resolve", |state, ctx| state.resolver(ctx).resolve(query))
    }
    /// Resolves a `path[:run[:variation[:time]]]` request string.
    pub fn resolve_request(&self, request: &str) -> Result<Resolved> {
        self.run("resolve_request", |state, ctx| {
            let request: Request = request.parse()?;
            state.resolver(ctx).resolve(&Query::from(request))
        })
    }
    pub fn assignments(&self, path: &str, query: &AssignmentQuery) -> Result<Vec<Arc<Assignment>>> {
        self.run("assignments", |state, ctx| state.resolver(ctx).assignments(path, query))
    }
    pub fn count_assignments(&self, path: &str, query: &AssignmentQuery) -> Result<usize> {
        self.run("count_assignments", |state, ctx| state.resolver(ctx).count_assignments(path, query))
    }
    pub fn assignment(&self, id: Id) -> Result<Arc<Assignment>> {
        self.run("assignment", |state, ctx| {
            if let Some(kept) = state.cache.get::<Assignment>(id) {
                return Ok(kept);
            }
            let record = state
                .backend
                .fetch_assignment_by_id(ctx, id)?
                .ok_or_else(|| CcdbError::not_found(format!("assignment #{}", id)))?;
            let stored = state
                .backend
                .fetch_type_table_by_id(ctx, record.type_table_id, false)?
                .ok_or_else(|| CcdbError::Internal(format!("assignment #{} refers to a missing type table", id)))?;
            let table = state.placed(stored).into_arc();
            state.resolver(ctx).assemble(&table, record)
        })
    }
    /// Validates the whole assignment before anything is written.
    pub fn create_assignment(&self, new: &NewAssignment) -> Result<Arc<Assignment>> {
        self.run("create_assignment", |state, ctx| {
            let created = state.resolver(ctx).create_assignment(new);
            if let Err(error) = &created {
                warn!(path = %new.path, %error, "assignment rejected");
            }
            created
        })
    }
    /// Only the comment of an assignment can change.
    pub fn update_assignment(&self, id: Id, comment: &str) -> Result<()> {
        self.run("update_assignment", |state, ctx| {
            state.backend.update_assignment(ctx, id, comment)?;
            state.cache.evict::<Assignment>(id);
            Ok(())
        })
    }
    pub fn delete_assignment(&self, id: Id) -> Result<()> {
        self.run("delete_assignment", |state, ctx| {
            warn!(id, "deleting assignment");
            state.backend.delete_assignment(ctx, id)?;
            state.cache.evict::<Assignment>(id);
            Ok(())
        })
    }
}
