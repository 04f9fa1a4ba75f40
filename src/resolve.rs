//! Answers "which assignment applies" for a path, run, variation and an
//! optional time or version, and validates new assignments before they are
//! written.
//!
//! The resolver is written once against [`BackendPort`] and shares the
//! session's [`ObjectCache`]; it never holds on to either beyond one call.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::backend::{AssignmentDraft, AssignmentFilter, AssignmentRecord, BackendPort};
use crate::cache::ObjectCache;
use crate::construct::{
    Assignment, Column, INFINITE_RUN, Id, Paging, RunNumber, RunRange, SortOrder, TypeTable,
    Variation, extract_directory, extract_object_name, normalize_path,
};
use crate::error::{CcdbError, Result};
use crate::interface::CallContext;
use crate::request::Request;
use crate::table::Table;

/// Which of the candidate assignments to pick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Selector {
    /// Greatest creation time, ties broken by the greatest version.
    #[default]
    Latest,
    /// Greatest creation time not after the given time.
    AsOf(DateTime<Utc>),
    /// Exactly this version.
    Version(u32),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub path: String,
    pub run: RunNumber,
    pub variation: Option<String>,
    pub selector: Selector,
    pub load_columns: bool,
}
impl Query {
    pub fn new(path: &str, run: RunNumber) -> Self {
        Self {
            path: normalize_path(path),
            run,
            variation: None,
            selector: Selector::Latest,
            load_columns: false,
        }
    }
    pub fn variation(mut self, variation: &str) -> Self {
        self.variation = Some(variation.to_string());
        self
    }
    pub fn as_of(mut self, time: DateTime<Utc>) -> Self {
        self.selector = Selector::AsOf(time);
        self
    }
    pub fn version(mut self, version: u32) -> Self {
        self.selector = Selector::Version(version);
        self
    }
    pub fn with_columns(mut self) -> Self {
        self.load_columns = true;
        self
    }
}
impl From<Request> for Query {
    fn from(request: Request) -> Self {
        let mut query = Query::new(&request.path, request.run_or_default());
        query.variation = request.variation;
        if let Some(time) = request.time {
            query.selector = Selector::AsOf(time);
        }
        query
    }
}

/// The selected assignment, with column metadata when it was asked for.
#[derive(Debug, Clone)]
pub struct Resolved {
    assignment: Arc<Assignment>,
    columns: Option<Vec<Column>>,
}
impl Resolved {
    pub fn assignment(&self) -> &Arc<Assignment> {
        &self.assignment
    }
    pub fn columns(&self) -> Option<&[Column]> {
        self.columns.as_deref()
    }
    pub fn version(&self) -> u32 {
        self.assignment.version()
    }
    pub fn table(&self) -> Result<&Table> {
        self.assignment.table()
    }
    /// A serializable summary, used by the binary to print results.
    pub fn report(&self) -> Result<Report> {
        Ok(Report {
            path: self.assignment.type_table().path().to_string(),
            run_range: self.assignment.run_range().to_string(),
            variation: self.assignment.variation().name().to_string(),
            version: self.assignment.version(),
            created: self.assignment.created(),
            comment: self.assignment.comment().to_string(),
            columns: self.columns.clone(),
            rows: self.assignment.table()?.to_rows(),
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub path: String,
    pub run_range: String,
    pub variation: String,
    pub version: u32,
    pub created: DateTime<Utc>,
    pub comment: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub columns: Option<Vec<Column>>,
    pub rows: Vec<Vec<String>>,
}

/// Listing of the assignments of one type table. Variation is given by name
/// and resolved like in [`Query`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssignmentQuery {
    pub run_min: Option<RunNumber>,
    pub run_max: Option<RunNumber>,
    pub run_range_name: Option<String>,
    pub variation: Option<String>,
    pub begin_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub sort: SortOrder,
    pub paging: Paging,
}
impl AssignmentQuery {
    pub fn new() -> Self {
        Self::default()
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
    pub fn variation(mut self, variation: &str) -> Self {
        self.variation = Some(variation.to_string());
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
}

/// Picks one record out of the assignments whose run range contains the run.
pub fn select<'c>(candidates: &'c [AssignmentRecord], selector: &Selector) -> Option<&'c AssignmentRecord> {
    match selector {
        Selector::Version(version) => candidates.iter().find(|a| a.version == *version),
        Selector::AsOf(time) => candidates
            .iter()
            .filter(|a| a.created <= *time)
            .max_by_key(|a| (a.created, a.version)),
        Selector::Latest => candidates.iter().max_by_key(|a| (a.created, a.version)),
    }
}

// ------------- Write path -------------
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RangeTarget {
    /// Reuses the unnamed range with these bounds, creating it when missing.
    Bounds { min: RunNumber, max: RunNumber },
    /// An existing named range.
    Named(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssignmentData {
    Rows(Vec<Vec<String>>),
    /// Calibration text, paged by the type table's shape.
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAssignment {
    pub path: String,
    pub data: AssignmentData,
    pub run_range: RangeTarget,
    pub variation: Option<String>,
    pub comment: String,
    pub created: Option<DateTime<Utc>>,
}
impl NewAssignment {
    pub fn from_rows(path: &str, rows: Vec<Vec<String>>) -> Self {
        Self::with_data(path, AssignmentData::Rows(rows))
    }
    pub fn from_text(path: &str, text: &str) -> Self {
        Self::with_data(path, AssignmentData::Text(text.to_string()))
    }
    fn with_data(path: &str, data: AssignmentData) -> Self {
        Self {
            path: normalize_path(path),
            data,
            run_range: RangeTarget::Bounds {
                min: 0,
                max: INFINITE_RUN,
            },
            variation: None,
            comment: String::new(),
            created: None,
        }
    }
    pub fn runs(mut self, min: RunNumber, max: RunNumber) -> Self {
        self.run_range = RangeTarget::Bounds { min, max };
        self
    }
    pub fn named_run_range(mut self, name: &str) -> Self {
        self.run_range = RangeTarget::Named(name.to_string());
        self
    }
    pub fn variation(mut self, variation: &str) -> Self {
        self.variation = Some(variation.to_string());
        self
    }
    pub fn comment(mut self, comment: &str) -> Self {
        self.comment = comment.to_string();
        self
    }
    /// Stores the assignment with an explicit creation time, as when importing history.
    pub fn created(mut self, created: DateTime<Utc>) -> Self {
        self.created = Some(created);
        self
    }
    /// Checks the data against the table's shape and returns it as a blob.
    fn blob_for(&self, table: &TypeTable) -> Result<String> {
        let parsed = match &self.data {
            AssignmentData::Rows(rows) => {
                if rows.len() != table.n_rows() {
                    return Err(CcdbError::invalid(format!(
                        "{} expects {} rows but {} were given",
                        self.path,
                        table.n_rows(),
                        rows.len()
                    )));
                }
                if let Some((i, row)) = rows.iter().enumerate().find(|(_, r)| r.len() != table.n_columns()) {
                    return Err(CcdbError::invalid(format!(
                        "{} expects {} columns but row {} has {}",
                        self.path,
                        table.n_columns(),
                        i,
                        row.len()
                    )));
                }
                Table::from_rows(rows)?
            }
            AssignmentData::Text(text) => Table::parse(text, table.n_rows(), table.n_columns())
                .map_err(|e| CcdbError::invalid(format!("{}: {}", self.path, e)))?,
        };
        parsed.encode()
    }
}

// ------------- Resolver -------------
pub struct Resolver<'a> {
    backend: &'a mut dyn BackendPort,
    cache: &'a mut ObjectCache,
    ctx: &'a CallContext,
    default_variation: &'a str,
}

impl<'a> Resolver<'a> {
    pub fn new(
        backend: &'a mut dyn BackendPort,
        cache: &'a mut ObjectCache,
        ctx: &'a CallContext,
        default_variation: &'a str,
    ) -> Self {
        Self {
            backend,
            cache,
            ctx,
            default_variation,
        }
    }
    /// The type table at `path`, placed in the current tree. The backend is
    /// read only when the cache lacks the table or its requested columns.
    pub fn type_table(&mut self, path: &str, load_columns: bool) -> Result<Arc<TypeTable>> {
        let tree = self.cache.tree();
        let directory_path = extract_directory(path);
        let directory = tree
            .by_path(&directory_path)
            .ok_or_else(|| CcdbError::not_found(format!("directory {}", directory_path)))?;
        let name = extract_object_name(path);
        let cached = self.cache.find::<TypeTable>(|t| {
            t.directory_id() == directory.id() && t.name() == name && (!load_columns || t.columns_loaded())
        });
        if let Some(table) = cached {
            return Ok(table);
        }
        let mut table = self
            .backend
            .fetch_type_table(self.ctx, directory.id(), &name, load_columns)?
            .ok_or_else(|| CcdbError::not_found(format!("type table {}", normalize_path(path))))?;
        table.set_path(normalize_path(path));
        Ok(self.cache.keep(table))
    }
    pub fn variation(&mut self, name: Option<&str>) -> Result<Arc<Variation>> {
        let name = name.unwrap_or(self.default_variation);
        if let Some(variation) = self.cache.find::<Variation>(|v| v.name() == name) {
            return Ok(variation);
        }
        let variation = self
            .backend
            .fetch_variation(self.ctx, name)?
            .ok_or_else(|| CcdbError::not_found(format!("variation '{}'", name)))?;
        Ok(self.cache.keep(variation))
    }
    fn run_range(&mut self, id: Id) -> Result<Arc<RunRange>> {
        if let Some(range) = self.cache.get::<RunRange>(id) {
            return Ok(range);
        }
        let range = self
            .backend
            .fetch_run_range_by_id(self.ctx, id)?
            .ok_or_else(|| CcdbError::Internal(format!("assignment refers to a missing run range #{}", id)))?;
        Ok(self.cache.keep(range))
    }
    /// Assignments of the table and variation whose run range contains `run`.
    pub fn candidates(&mut self, table: &TypeTable, variation: &Variation, run: RunNumber) -> Result<Vec<AssignmentRecord>> {
        let filter = AssignmentFilter::for_table(table.id()).run(run).variation(variation.id());
        self.backend.fetch_assignments(self.ctx, &filter)
    }
    /// Turns a stored record into an assignment sharing the cached entities.
    pub fn assemble(&mut self, table: &Arc<TypeTable>, record: AssignmentRecord) -> Result<Arc<Assignment>> {
        if let Some(kept) = self.cache.get::<Assignment>(record.id) {
            return Ok(kept);
        }
        let run_range = self.run_range(record.run_range_id)?;
        let variation = match self.cache.get::<Variation>(record.variation_id) {
            Some(variation) => variation,
            None => {
                let variation = self
                    .backend
                    .fetch_variation_by_id(self.ctx, record.variation_id)?
                    .ok_or_else(|| {
                        CcdbError::Internal(format!("assignment refers to a missing variation #{}", record.variation_id))
                    })?;
                self.cache.keep(variation)
            }
        };
        let assignment = Assignment::new(
            record.id,
            Arc::clone(table),
            run_range,
            variation,
            record.version,
            record.created,
            record.comment,
            record.blob,
        );
        Ok(self.cache.keep(assignment))
    }
    pub fn resolve(&mut self, query: &Query) -> Result<Resolved> {
        let table = self.type_table(&query.path, query.load_columns)?;
        let variation = self.variation(query.variation.as_deref())?;
        let candidates = self.candidates(&table, &variation, query.run)?;
        debug!(
            path = %query.path,
            run = query.run,
            variation = variation.name(),
            candidates = candidates.len(),
            "resolving"
        );
        if candidates.is_empty() {
            return Err(CcdbError::not_found(format!(
                "no assignment of {} for run {} in variation '{}'",
                query.path,
                query.run,
                variation.name()
            )));
        }
        let record = select(&candidates, &query.selector).cloned().ok_or_else(|| {
            CcdbError::not_found(match query.selector {
                Selector::Version(v) => format!("version {} of {} for run {}", v, query.path, query.run),
                Selector::AsOf(t) => format!("assignment of {} for run {} as of {}", query.path, query.run, t),
                Selector::Latest => format!("assignment of {} for run {}", query.path, query.run),
            })
        })?;
        debug!(assignment = record.id, version = record.version, "selected");
        let assignment = self.assemble(&table, record)?;
        let columns = if query.load_columns {
            if table.columns_loaded() {
                Some(table.columns().to_vec())
            } else {
                Some(self.backend.fetch_columns(self.ctx, table.id())?)
            }
        } else {
            None
        };
        Ok(Resolved { assignment, columns })
    }
    fn filter_for(&mut self, table: &TypeTable, query: &AssignmentQuery) -> Result<AssignmentFilter> {
        let mut filter = AssignmentFilter::for_table(table.id())
            .between(query.begin_time, query.end_time)
            .sort(query.sort)
            .paging(query.paging);
        filter.run_min = query.run_min;
        filter.run_max = query.run_max;
        filter.run_range_name = query.run_range_name.clone();
        if let Some(name) = query.variation.as_deref() {
            filter.variation = Some(self.variation(Some(name))?.id());
        }
        Ok(filter)
    }
    pub fn assignments(&mut self, path: &str, query: &AssignmentQuery) -> Result<Vec<Arc<Assignment>>> {
        let table = self.type_table(path, false)?;
        let filter = self.filter_for(&table, query)?;
        let records = self.backend.fetch_assignments(self.ctx, &filter)?;
        records.into_iter().map(|r| self.assemble(&table, r)).collect()
    }
    pub fn count_assignments(&mut self, path: &str, query: &AssignmentQuery) -> Result<usize> {
        let table = self.type_table(path, false)?;
        let filter = self.filter_for(&table, query)?;
        self.backend.count_assignments(self.ctx, &filter)
    }
    /// Gets the unnamed range with these bounds, creating it when missing.
    pub fn get_or_create_run_range(&mut self, min: RunNumber, max: RunNumber) -> Result<Arc<RunRange>> {
        let fresh = RunRange::new(min, max, None, "")?;
        if let Some(range) = self.backend.fetch_run_range(self.ctx, min, max, None)? {
            return Ok(self.cache.keep(range));
        }
        let id = self.backend.create_run_range(self.ctx, &fresh)?;
        warn!(min, max, id, "run range created implicitly");
        let range = self
            .backend
            .fetch_run_range_by_id(self.ctx, id)?
            .ok_or_else(|| CcdbError::Internal(format!("run range #{} vanished after creation", id)))?;
        Ok(self.cache.keep(range))
    }
    /// Validates everything, then stores the assignment with the next version
    /// of its (table, run range, variation) triple.
    pub fn create_assignment(&mut self, new: &NewAssignment) -> Result<Arc<Assignment>> {
        let table = self.type_table(&new.path, false)?;
        let variation = self.variation(new.variation.as_deref())?;
        let blob = new.blob_for(&table)?;
        let run_range = match &new.run_range {
            RangeTarget::Named(name) => {
                let range = self
                    .backend
                    .fetch_run_range_by_name(self.ctx, name)?
                    .ok_or_else(|| CcdbError::not_found(format!("run range '{}'", name)))?;
                self.cache.keep(range)
            }
            RangeTarget::Bounds { min, max } => {
                if min > max {
                    return Err(CcdbError::invalid(format!("run range [{}, {}] has min above max", min, max)));
                }
                self.get_or_create_run_range(*min, *max)?
            }
        };
        let draft = AssignmentDraft {
            type_table_id: table.id(),
            run_range_id: run_range.id(),
            variation_id: variation.id(),
            created: new.created,
            comment: new.comment.clone(),
            blob,
        };
        let record = self.backend.create_assignment(self.ctx, &draft)?;
        info!(
            path = %new.path,
            run_range = %run_range,
            variation = variation.name(),
            version = record.version,
            "assignment created"
        );
        self.assemble(&table, record)
    }
}
