//! The capability interface every storage adapter implements, plus an
//! in-memory adapter.
//!
//! The resolver and the session are written once against [`BackendPort`];
//! adapters decide how rows are kept. Adapters are expected to:
//! * call [`CallContext::check`] before doing any work;
//! * make every write, including recursive deletes, atomic;
//! * refuse plain deletes that would orphan dependents with `Conflict`;
//! * hand out strictly increasing creation times for assignments.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, TimeDelta, Utc};

use crate::construct::{
    Column, Directory, Id, Paging, ROOT_ID, RunNumber, RunRange, SortOrder, TypeTable, Variation,
    Wildcard,
};
use crate::error::{CcdbError, Result};
use crate::interface::CallContext;

/// An assignment as stored: references by identity, blob as text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssignmentRecord {
    pub id: Id,
    pub type_table_id: Id,
    pub run_range_id: Id,
    pub variation_id: Id,
    pub version: u32,
    pub created: DateTime<Utc>,
    pub comment: String,
    pub blob: String,
}

/// Everything needed to store a new assignment. The backend assigns the
/// identity, the version and (unless given) the creation time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssignmentDraft {
    pub type_table_id: Id,
    pub run_range_id: Id,
    pub variation_id: Id,
    pub created: Option<DateTime<Utc>>,
    pub comment: String,
    pub blob: String,
}

/// Selection of assignments of one type table.
///
/// `run_min`/`run_max` select assignments whose run range covers the whole
/// window, so `run(r)` selects the ranges containing run `r`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssignmentFilter {
    pub type_table: Id,
    pub run_min: Option<RunNumber>,
    pub run_max: Option<RunNumber>,
    pub run_range_name: Option<String>,
    pub variation: Option<Id>,
    pub begin_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub sort: SortOrder,
    pub paging: Paging,
}
impl AssignmentFilter {
    pub fn for_table(type_table: Id) -> Self {
        Self {
            type_table,
            ..Self::default()
        }
    }
    pub fn run(mut self, run: RunNumber) -> Self {
        self.run_min = Some(run);
        self.run_max = Some(run);
        self
    }
    pub fn runs(mut self, min: RunNumber, max: RunNumber) -> Self {
        self.run_min = Some(min);
        self.run_max = Some(max);
        self
    }
    pub fn run_range_name(mut self, name: &str) -> Self {
        self.run_range_name = Some(name.to_string());
        self
    }
    pub fn variation(mut self, variation: Id) -> Self {
        self.variation = Some(variation);
        self
    }
    pub fn between(mut self, begin: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Self {
        self.begin_time = begin;
        self.end_time = end;
        self
    }
    pub fn sort(mut self, sort: SortOrder) -> Self {
        self.sort = sort;
        self
    }
    pub fn paging(mut self, paging: Paging) -> Self {
        self.paging = paging;
        self
    }
    /// Everything except the run range and the paging, which need the range row.
    pub fn accepts(&self, record: &AssignmentRecord, run_range: &RunRange) -> bool {
        record.type_table_id == self.type_table
            && self.variation.is_none_or(|v| v == record.variation_id)
            && self.begin_time.is_none_or(|t| record.created >= t)
            && self.end_time.is_none_or(|t| record.created <= t)
            && run_range.covers(
                self.run_min.unwrap_or(run_range.min()),
                self.run_max.unwrap_or(run_range.max()),
            )
            && self
                .run_range_name
                .as_deref()
                .is_none_or(|n| run_range.name() == Some(n))
    }
}

/// Creation time for a new row: now, truncated to microseconds, and always
/// after `last` so that creation order and time order agree.
pub fn next_timestamp(last: Option<DateTime<Utc>>) -> DateTime<Utc> {
    let now = Utc::now();
    let now = DateTime::from_timestamp_micros(now.timestamp_micros()).unwrap_or(now);
    match last {
        Some(last) if last >= now => last + TimeDelta::microseconds(1),
        _ => now,
    }
}

pub trait BackendPort: Send {
    /// Short adapter name used in log lines.
    fn name(&self) -> &'static str;
    fn is_connected(&self) -> bool;
    fn disconnect(&mut self);

    // ------------- Directories -------------
    /// All stored directories; the root is implied and not part of the result.
    fn fetch_directory_tree(&mut self, ctx: &CallContext) -> Result<Vec<Directory>>;
    fn create_directory(&mut self, ctx: &CallContext, directory: &Directory) -> Result<Id>;
    fn update_directory(&mut self, ctx: &CallContext, directory: &Directory) -> Result<()>;
    fn delete_directory(&mut self, ctx: &CallContext, id: Id) -> Result<()>;
    /// Deletes the directory, everything below it and all their data.
    fn recursive_delete_directory(&mut self, ctx: &CallContext, id: Id) -> Result<()>;

    // ------------- Type tables -------------
    fn fetch_type_tables(&mut self, ctx: &CallContext, directory: Id, load_columns: bool) -> Result<Vec<TypeTable>>;
    fn fetch_type_table(&mut self, ctx: &CallContext, directory: Id, name: &str, load_columns: bool) -> Result<Option<TypeTable>>;
    fn fetch_type_table_by_id(&mut self, ctx: &CallContext, id: Id, load_columns: bool) -> Result<Option<TypeTable>>;
    fn search_type_tables(
        &mut self,
        ctx: &CallContext,
        pattern: &Wildcard,
        directory: Option<Id>,
        load_columns: bool,
        paging: Paging,
    ) -> Result<Vec<TypeTable>>;
    fn fetch_columns(&mut self, ctx: &CallContext, type_table: Id) -> Result<Vec<Column>>;
    fn count_type_tables(&mut self, ctx: &CallContext, directory: Id) -> Result<usize>;
    fn create_type_table(&mut self, ctx: &CallContext, table: &TypeTable) -> Result<Id>;
    /// Changes name, comment and directory only; the shape is fixed.
    fn update_type_table(&mut self, ctx: &CallContext, table: &TypeTable) -> Result<()>;
    fn delete_type_table(&mut self, ctx: &CallContext, id: Id) -> Result<()>;
    fn recursive_delete_type_table(&mut self, ctx: &CallContext, id: Id) -> Result<()>;

    // ------------- Run ranges -------------
    /// Run ranges used by assignments of a table, optionally for one variation.
    fn fetch_run_ranges(
        &mut self,
        ctx: &CallContext,
        type_table: Id,
        variation: Option<Id>,
        paging: Paging,
    ) -> Result<Vec<RunRange>>;
    fn fetch_run_range(&mut self, ctx: &CallContext, min: RunNumber, max: RunNumber, name: Option<&str>) -> Result<Option<RunRange>>;
    fn fetch_run_range_by_name(&mut self, ctx: &CallContext, name: &str) -> Result<Option<RunRange>>;
    fn fetch_run_range_by_id(&mut self, ctx: &CallContext, id: Id) -> Result<Option<RunRange>>;
    fn create_run_range(&mut self, ctx: &CallContext, run_range: &RunRange) -> Result<Id>;
    fn update_run_range(&mut self, ctx: &CallContext, run_range: &RunRange) -> Result<()>;
    fn delete_run_range(&mut self, ctx: &CallContext, id: Id) -> Result<()>;
    fn recursive_delete_run_range(&mut self, ctx: &CallContext, id: Id) -> Result<()>;

    // ------------- Variations -------------
    /// Variations used by assignments of a table, optionally for one run.
    fn fetch_variations(
        &mut self,
        ctx: &CallContext,
        type_table: Id,
        run: Option<RunNumber>,
        paging: Paging,
    ) -> Result<Vec<Variation>>;
    fn fetch_all_variations(&mut self, ctx: &CallContext) -> Result<Vec<Variation>>;
    fn fetch_variation(&mut self, ctx: &CallContext, name: &str) -> Result<Option<Variation>>;
    fn fetch_variation_by_id(&mut self, ctx: &CallContext, id: Id) -> Result<Option<Variation>>;
    fn create_variation(&mut self, ctx: &CallContext, variation: &Variation) -> Result<Id>;
    fn update_variation(&mut self, ctx: &CallContext, variation: &Variation) -> Result<()>;
    fn delete_variation(&mut self, ctx: &CallContext, id: Id) -> Result<()>;
    fn recursive_delete_variation(&mut self, ctx: &CallContext, id: Id) -> Result<()>;

    // ------------- Assignments -------------
    fn fetch_assignments(&mut self, ctx: &CallContext, filter: &AssignmentFilter) -> Result<Vec<AssignmentRecord>>;
    /// Number of matches, ignoring the filter's paging.
    fn count_assignments(&mut self, ctx: &CallContext, filter: &AssignmentFilter) -> Result<usize>;
    fn fetch_assignment_by_id(&mut self, ctx: &CallContext, id: Id) -> Result<Option<AssignmentRecord>>;
    /// Stores the draft with the next version of its (table, run range, variation) triple.
    fn create_assignment(&mut self, ctx: &CallContext, draft: &AssignmentDraft) -> Result<AssignmentRecord>;
    fn update_assignment(&mut self, ctx: &CallContext, id: Id, comment: &str) -> Result<()>;
    fn delete_assignment(&mut self, ctx: &CallContext, id: Id) -> Result<()>;
}

// ------------- Memory -------------
/// Keeps everything in ordered maps. Useful for tests and for short-lived
/// sessions that import calibration text and resolve against it.
#[derive(Debug)]
pub struct MemoryBackend {
    connected: bool,
    next_id: Id,
    last_created: Option<DateTime<Utc>>,
    directories: BTreeMap<Id, Directory>,
    type_tables: BTreeMap<Id, TypeTable>,
    run_ranges: BTreeMap<Id, RunRange>,
    variations: BTreeMap<Id, Variation>,
    assignments: BTreeMap<Id, AssignmentRecord>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            connected: true,
            next_id: ROOT_ID,
            last_created: None,
            directories: BTreeMap::new(),
            type_tables: BTreeMap::new(),
            run_ranges: BTreeMap::new(),
            variations: BTreeMap::new(),
            assignments: BTreeMap::new(),
        }
    }
    fn begin(&self, ctx: &CallContext) -> Result<()> {
        if !self.connected {
            return Err(CcdbError::Connection(String::from("memory backend is disconnected")));
        }
        ctx.check()
    }
    fn generate(&mut self) -> Id {
        self.next_id += 1;
        self.next_id
    }
    fn with_columns(&self, table: &TypeTable, load_columns: bool) -> TypeTable {
        let mut table = table.clone();
        if !load_columns {
            // what a row-only read would return: shape known, columns not loaded
            table = TypeTable::restore(
                table.id(),
                table.directory_id(),
                table.name().to_string(),
                table.n_rows(),
                table.n_columns(),
                table.comment().to_string(),
                table.created(),
                table.modified(),
            );
        }
        table
    }
    fn assignment_ids_where(&self, predicate: impl Fn(&AssignmentRecord) -> bool) -> Vec<Id> {
        self.assignments
            .values()
            .filter(|a| predicate(a))
            .map(|a| a.id)
            .collect()
    }
    fn matching(&self, filter: &AssignmentFilter) -> Vec<&AssignmentRecord> {
        let mut found: Vec<&AssignmentRecord> = self
            .assignments
            .values()
            .filter(|a| {
                self.run_ranges
                    .get(&a.run_range_id)
                    .is_some_and(|r| filter.accepts(a, r))
            })
            .collect();
        match filter.sort {
            SortOrder::CreatedDesc => found.sort_by(|a, b| (b.created, b.id).cmp(&(a.created, a.id))),
            SortOrder::CreatedAsc => found.sort_by(|a, b| (a.created, a.id).cmp(&(b.created, b.id))),
        }
        found
    }
    fn require_directory(&self, id: Id) -> Result<()> {
        if id == ROOT_ID || self.directories.contains_key(&id) {
            Ok(())
        } else {
            Err(CcdbError::not_found(format!("directory #{}", id)))
        }
    }
    fn directory_name_taken(&self, parent: Id, name: &str, except: Id) -> bool {
        self.directories
            .values()
            .any(|d| d.parent_id() == parent && d.name() == name && d.id() != except)
    }
    fn table_name_taken(&self, directory: Id, name: &str, except: Id) -> bool {
        self.type_tables
            .values()
            .any(|t| t.directory_id() == directory && t.name() == name && t.id() != except)
    }
    fn subtree(&self, id: Id) -> BTreeSet<Id> {
        let mut found = BTreeSet::from([id]);
        let mut grew = true;
        while grew {
            let before = found.len();
            for d in self.directories.values() {
                if found.contains(&d.parent_id()) {
                    found.insert(d.id());
                }
            }
            grew = found.len() != before;
        }
        found
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl BackendPort for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }
    fn is_connected(&self) -> bool {
        self.connected
    }
    fn disconnect(&mut self) {
        self.connected = false;
    }

    fn fetch_directory_tree(&mut self, ctx: &CallContext) -> Result<Vec<Directory>> {
        self.begin(ctx)?;
        Ok(self.directories.values().cloned().collect())
    }
    fn create_directory(&mut self, ctx: &CallContext, directory: &Directory) -> Result<Id> {
        self.begin(ctx)?;
        self.require_directory(directory.parent_id())?;
        if self.directory_name_taken(directory.parent_id(), directory.name(), ROOT_ID) {
            return Err(CcdbError::conflict(format!("directory '{}' already exists", directory.name())));
        }
        let id = self.generate();
        let stored = Directory::restore(
            id,
            directory.parent_id(),
            directory.name().to_string(),
            directory.comment().to_string(),
            directory.created(),
            directory.modified(),
        );
        self.directories.insert(id, stored);
        Ok(id)
    }
    fn update_directory(&mut self, ctx: &CallContext, directory: &Directory) -> Result<()> {
        self.begin(ctx)?;
        if !self.directories.contains_key(&directory.id()) {
            return Err(CcdbError::not_found(format!("directory #{}", directory.id())));
        }
        self.require_directory(directory.parent_id())?;
        if self.subtree(directory.id()).contains(&directory.parent_id()) {
            return Err(CcdbError::invalid("a directory cannot be moved below itself"));
        }
        if self.directory_name_taken(directory.parent_id(), directory.name(), directory.id()) {
            return Err(CcdbError::conflict(format!("directory '{}' already exists", directory.name())));
        }
        let mut stored = directory.clone();
        stored.touch();
        self.directories.insert(directory.id(), stored);
        Ok(())
    }
    fn delete_directory(&mut self, ctx: &CallContext, id: Id) -> Result<()> {
        self.begin(ctx)?;
        if !self.directories.contains_key(&id) {
            return Err(CcdbError::not_found(format!("directory #{}", id)));
        }
        if self.directories.values().any(|d| d.parent_id() == id) {
            return Err(CcdbError::conflict(format!("directory #{} has subdirectories", id)));
        }
        if self.type_tables.values().any(|t| t.directory_id() == id) {
            return Err(CcdbError::conflict(format!("directory #{} has type tables", id)));
        }
        self.directories.remove(&id);
        Ok(())
    }
    fn recursive_delete_directory(&mut self, ctx: &CallContext, id: Id) -> Result<()> {
        self.begin(ctx)?;
        if !self.directories.contains_key(&id) {
            return Err(CcdbError::not_found(format!("directory #{}", id)));
        }
        let directories = self.subtree(id);
        let tables: BTreeSet<Id> = self
            .type_tables
            .values()
            .filter(|t| directories.contains(&t.directory_id()))
            .map(|t| t.id())
            .collect();
        for assignment in self.assignment_ids_where(|a| tables.contains(&a.type_table_id)) {
            self.assignments.remove(&assignment);
        }
        self.type_tables.retain(|id, _| !tables.contains(id));
        self.directories.retain(|id, _| !directories.contains(id));
        Ok(())
    }

    fn fetch_type_tables(&mut self, ctx: &CallContext, directory: Id, load_columns: bool) -> Result<Vec<TypeTable>> {
        self.begin(ctx)?;
        let mut tables: Vec<TypeTable> = self
            .type_tables
            .values()
            .filter(|t| t.directory_id() == directory)
            .map(|t| self.with_columns(t, load_columns))
            .collect();
        tables.sort_by(|a, b| a.name().cmp(b.name()));
        Ok(tables)
    }
    fn fetch_type_table(&mut self, ctx: &CallContext, directory: Id, name: &str, load_columns: bool) -> Result<Option<TypeTable>> {
        self.begin(ctx)?;
        Ok(self
            .type_tables
            .values()
            .find(|t| t.directory_id() == directory && t.name() == name)
            .map(|t| self.with_columns(t, load_columns)))
    }
    fn fetch_type_table_by_id(&mut self, ctx: &CallContext, id: Id, load_columns: bool) -> Result<Option<TypeTable>> {
        self.begin(ctx)?;
        Ok(self.type_tables.get(&id).map(|t| self.with_columns(t, load_columns)))
    }
    fn search_type_tables(
        &mut self,
        ctx: &CallContext,
        pattern: &Wildcard,
        directory: Option<Id>,
        load_columns: bool,
        paging: Paging,
    ) -> Result<Vec<TypeTable>> {
        self.begin(ctx)?;
        let mut tables: Vec<&TypeTable> = self
            .type_tables
            .values()
            .filter(|t| directory.is_none_or(|d| t.directory_id() == d) && pattern.is_match(t.name()))
            .collect();
        tables.sort_by(|a, b| (a.name(), a.id()).cmp(&(b.name(), b.id())));
        Ok(paging
            .apply(tables)
            .into_iter()
            .map(|t| self.with_columns(t, load_columns))
            .collect())
    }
    fn fetch_columns(&mut self, ctx: &CallContext, type_table: Id) -> Result<Vec<Column>> {
        self.begin(ctx)?;
        self.type_tables
            .get(&type_table)
            .map(|t| t.columns().to_vec())
            .ok_or_else(|| CcdbError::not_found(format!("type table #{}", type_table)))
    }
    fn count_type_tables(&mut self, ctx: &CallContext, directory: Id) -> Result<usize> {
        self.begin(ctx)?;
        Ok(self.type_tables.values().filter(|t| t.directory_id() == directory).count())
    }
    fn create_type_table(&mut self, ctx: &CallContext, table: &TypeTable) -> Result<Id> {
        self.begin(ctx)?;
        self.require_directory(table.directory_id())?;
        if self.table_name_taken(table.directory_id(), table.name(), 0) {
            return Err(CcdbError::conflict(format!("type table '{}' already exists", table.name())));
        }
        let id = self.generate();
        let mut stored = TypeTable::restore(
            id,
            table.directory_id(),
            table.name().to_string(),
            table.n_rows(),
            table.n_columns(),
            table.comment().to_string(),
            table.created(),
            table.modified(),
        );
        stored.set_columns(table.columns().to_vec());
        self.type_tables.insert(id, stored);
        Ok(id)
    }
    fn update_type_table(&mut self, ctx: &CallContext, table: &TypeTable) -> Result<()> {
        self.begin(ctx)?;
        self.require_directory(table.directory_id())?;
        if self.table_name_taken(table.directory_id(), table.name(), table.id()) {
            return Err(CcdbError::conflict(format!("type table '{}' already exists", table.name())));
        }
        let stored = self
            .type_tables
            .get_mut(&table.id())
            .ok_or_else(|| CcdbError::not_found(format!("type table #{}", table.id())))?;
        stored.set_name(table.name())?;
        stored.set_comment(table.comment());
        stored.set_directory_id(table.directory_id());
        stored.touch();
        Ok(())
    }
    fn delete_type_table(&mut self, ctx: &CallContext, id: Id) -> Result<()> {
        self.begin(ctx)?;
        if !self.type_tables.contains_key(&id) {
            return Err(CcdbError::not_found(format!("type table #{}", id)));
        }
        if self.assignments.values().any(|a| a.type_table_id == id) {
            return Err(CcdbError::conflict(format!("type table #{} has assignments", id)));
        }
        self.type_tables.remove(&id);
        Ok(())
    }
    fn recursive_delete_type_table(&mut self, ctx: &CallContext, id: Id) -> Result<()> {
        self.begin(ctx)?;
        if self.type_tables.remove(&id).is_none() {
            return Err(CcdbError::not_found(format!("type table #{}", id)));
        }
        self.assignments.retain(|_, a| a.type_table_id != id);
        Ok(())
    }

    fn fetch_run_ranges(
        &mut self,
        ctx: &CallContext,
        type_table: Id,
        variation: Option<Id>,
        paging: Paging,
    ) -> Result<Vec<RunRange>> {
        self.begin(ctx)?;
        let used: BTreeSet<Id> = self
            .assignments
            .values()
            .filter(|a| a.type_table_id == type_table && variation.is_none_or(|v| v == a.variation_id))
            .map(|a| a.run_range_id)
            .collect();
        let mut ranges: Vec<&RunRange> = used.iter().filter_map(|id| self.run_ranges.get(id)).collect();
        ranges.sort_by_key(|r| (r.min(), r.max(), r.id()));
        Ok(paging.apply(ranges).into_iter().cloned().collect())
    }
    fn fetch_run_range(&mut self, ctx: &CallContext, min: RunNumber, max: RunNumber, name: Option<&str>) -> Result<Option<RunRange>> {
        self.begin(ctx)?;
        let name = name.filter(|n| !n.is_empty());
        Ok(self
            .run_ranges
            .values()
            .find(|r| r.min() == min && r.max() == max && r.name() == name)
            .cloned())
    }
    fn fetch_run_range_by_name(&mut self, ctx: &CallContext, name: &str) -> Result<Option<RunRange>> {
        self.begin(ctx)?;
        Ok(self.run_ranges.values().find(|r| r.name() == Some(name)).cloned())
    }
    fn fetch_run_range_by_id(&mut self, ctx: &CallContext, id: Id) -> Result<Option<RunRange>> {
        self.begin(ctx)?;
        Ok(self.run_ranges.get(&id).cloned())
    }
    fn create_run_range(&mut self, ctx: &CallContext, run_range: &RunRange) -> Result<Id> {
        self.begin(ctx)?;
        if let Some(name) = run_range.name() {
            if self.run_ranges.values().any(|r| r.name() == Some(name)) {
                return Err(CcdbError::conflict(format!("run range '{}' already exists", name)));
            }
        }
        let id = self.generate();
        let stored = RunRange::restore(
            id,
            run_range.name().map(str::to_string),
            run_range.min(),
            run_range.max(),
            run_range.comment().to_string(),
            run_range.created(),
        );
        self.run_ranges.insert(id, stored);
        Ok(id)
    }
    fn update_run_range(&mut self, ctx: &CallContext, run_range: &RunRange) -> Result<()> {
        self.begin(ctx)?;
        let stored = self
            .run_ranges
            .get_mut(&run_range.id())
            .ok_or_else(|| CcdbError::not_found(format!("run range #{}", run_range.id())))?;
        stored.set_bounds(run_range.min(), run_range.max())?;
        stored.set_comment(run_range.comment());
        Ok(())
    }
    fn delete_run_range(&mut self, ctx: &CallContext, id: Id) -> Result<()> {
        self.begin(ctx)?;
        if !self.run_ranges.contains_key(&id) {
            return Err(CcdbError::not_found(format!("run range #{}", id)));
        }
        if self.assignments.values().any(|a| a.run_range_id == id) {
            return Err(CcdbError::conflict(format!("run range #{} has assignments", id)));
        }
        self.run_ranges.remove(&id);
        Ok(())
    }
    fn recursive_delete_run_range(&mut self, ctx: &CallContext, id: Id) -> Result<()> {
        self.begin(ctx)?;
        if self.run_ranges.remove(&id).is_none() {
            return Err(CcdbError::not_found(format!("run range #{}", id)));
        }
        self.assignments.retain(|_, a| a.run_range_id != id);
        Ok(())
    }

    fn fetch_variations(
        &mut self,
        ctx: &CallContext,
        type_table: Id,
        run: Option<RunNumber>,
        paging: Paging,
    ) -> Result<Vec<Variation>> {
        self.begin(ctx)?;
        let used: BTreeSet<Id> = self
            .assignments
            .values()
            .filter(|a| a.type_table_id == type_table)
            .filter(|a| {
                run.is_none_or(|run| {
                    self.run_ranges
                        .get(&a.run_range_id)
                        .is_some_and(|r| r.contains(run))
                })
            })
            .map(|a| a.variation_id)
            .collect();
        let mut variations: Vec<&Variation> = used.iter().filter_map(|id| self.variations.get(id)).collect();
        variations.sort_by(|a, b| a.name().cmp(b.name()));
        Ok(paging.apply(variations).into_iter().cloned().collect())
    }
    fn fetch_all_variations(&mut self, ctx: &CallContext) -> Result<Vec<Variation>> {
        self.begin(ctx)?;
        let mut variations: Vec<Variation> = self.variations.values().cloned().collect();
        variations.sort_by(|a, b| a.name().cmp(b.name()));
        Ok(variations)
    }
    fn fetch_variation(&mut self, ctx: &CallContext, name: &str) -> Result<Option<Variation>> {
        self.begin(ctx)?;
        Ok(self.variations.values().find(|v| v.name() == name).cloned())
    }
    fn fetch_variation_by_id(&mut self, ctx: &CallContext, id: Id) -> Result<Option<Variation>> {
        self.begin(ctx)?;
        Ok(self.variations.get(&id).cloned())
    }
    fn create_variation(&mut self, ctx: &CallContext, variation: &Variation) -> Result<Id> {
        self.begin(ctx)?;
        if self.variations.values().any(|v| v.name() == variation.name()) {
            return Err(CcdbError::conflict(format!("variation '{}' already exists", variation.name())));
        }
        let id = self.generate();
        let stored = Variation::restore(
            id,
            variation.name().to_string(),
            variation.comment().to_string(),
            variation.created(),
        );
        self.variations.insert(id, stored);
        Ok(id)
    }
    fn update_variation(&mut self, ctx: &CallContext, variation: &Variation) -> Result<()> {
        self.begin(ctx)?;
        if self
            .variations
            .values()
            .any(|v| v.name() == variation.name() && v.id() != variation.id())
        {
            return Err(CcdbError::conflict(format!("variation '{}' already exists", variation.name())));
        }
        let stored = self
            .variations
            .get_mut(&variation.id())
            .ok_or_else(|| CcdbError::not_found(format!("variation #{}", variation.id())))?;
        stored.set_name(variation.name())?;
        stored.set_comment(variation.comment());
        Ok(())
    }
    fn delete_variation(&mut self, ctx: &CallContext, id: Id) -> Result<()> {
        self.begin(ctx)?;
        if !self.variations.contains_key(&id) {
            return Err(CcdbError::not_found(format!("variation #{}", id)));
        }
        if self.assignments.values().any(|a| a.variation_id == id) {
            return Err(CcdbError::conflict(format!("variation #{} has assignments", id)));
        }
        self.variations.remove(&id);
        Ok(())
    }
    fn recursive_delete_variation(&mut self, ctx: &CallContext, id: Id) -> Result<()> {
        self.begin(ctx)?;
        if self.variations.remove(&id).is_none() {
            return Err(CcdbError::not_found(format!("variation #{}", id)));
        }
        self.assignments.retain(|_, a| a.variation_id != id);
        Ok(())
    }

    fn fetch_assignments(&mut self, ctx: &CallContext, filter: &AssignmentFilter) -> Result<Vec<AssignmentRecord>> {
        self.begin(ctx)?;
        let found = self.matching(filter);
        Ok(filter.paging.apply(found).into_iter().cloned().collect())
    }
    fn count_assignments(&mut self, ctx: &CallContext, filter: &AssignmentFilter) -> Result<usize> {
        self.begin(ctx)?;
        Ok(self.matching(filter).len())
    }
    fn fetch_assignment_by_id(&mut self, ctx: &CallContext, id: Id) -> Result<Option<AssignmentRecord>> {
        self.begin(ctx)?;
        Ok(self.assignments.get(&id).cloned())
    }
    fn create_assignment(&mut self, ctx: &CallContext, draft: &AssignmentDraft) -> Result<AssignmentRecord> {
        self.begin(ctx)?;
        if !self.type_tables.contains_key(&draft.type_table_id) {
            return Err(CcdbError::not_found(format!("type table #{}", draft.type_table_id)));
        }
        if !self.run_ranges.contains_key(&draft.run_range_id) {
            return Err(CcdbError::not_found(format!("run range #{}", draft.run_range_id)));
        }
        if !self.variations.contains_key(&draft.variation_id) {
            return Err(CcdbError::not_found(format!("variation #{}", draft.variation_id)));
        }
        let version = self
            .assignments
            .values()
            .filter(|a| {
                a.type_table_id == draft.type_table_id
                    && a.run_range_id == draft.run_range_id
                    && a.variation_id == draft.variation_id
            })
            .map(|a| a.version)
            .max()
            .unwrap_or(0)
            + 1;
        let created = draft.created.unwrap_or_else(|| next_timestamp(self.last_created));
        // explicit times may lie ahead; later automatic times must still follow them
        self.last_created = self.last_created.max(Some(created));
        let record = AssignmentRecord {
            id: self.generate(),
            type_table_id: draft.type_table_id,
            run_range_id: draft.run_range_id,
            variation_id: draft.variation_id,
            version,
            created,
            comment: draft.comment.clone(),
            blob: draft.blob.clone(),
        };
        self.assignments.insert(record.id, record.clone());
        Ok(record)
    }
    fn update_assignment(&mut self, ctx: &CallContext, id: Id, comment: &str) -> Result<()> {
        self.begin(ctx)?;
        let stored = self
            .assignments
            .get_mut(&id)
            .ok_or_else(|| CcdbError::not_found(format!("assignment #{}", id)))?;
        stored.comment = comment.to_string();
        Ok(())
    }
    fn delete_assignment(&mut self, ctx: &CallContext, id: Id) -> Result<()> {
        self.begin(ctx)?;
        self.assignments
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| CcdbError::not_found(format!("assignment #{}", id)))
    }
}
