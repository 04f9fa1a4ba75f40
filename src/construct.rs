use std::sync::{Arc, OnceLock};

// used to keep the one-to-one mapping between directory paths and their identities
use bimap::BiMap;

// other indexes use HashMap
use core::hash::BuildHasherDefault;
use seahash::SeaHasher;
use std::collections::HashMap;

// used to print out readable forms of a construct
use std::fmt;

// used for timestamps in the database
use chrono::{DateTime, Utc};

use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;

// our own stuff that we need
use crate::datatype::ColumnType;
use crate::error::{CcdbError, Result};
use crate::table::Table;

// ------------- Identity -------------
pub type Id = u64;
pub type RunNumber = i64;

pub type IdHasher = BuildHasherDefault<SeaHasher>;

/// The root directory is never stored, it is implied by every tree.
pub const ROOT_ID: Id = 0;
pub const ROOT_PATH: &str = "/";
pub const DEFAULT_VARIATION: &str = "default";
/// Upper bound used for "all runs from here on".
pub const INFINITE_RUN: RunNumber = i32::MAX as RunNumber;

lazy_static! {
    static ref NAME: Regex = Regex::new(r"^[A-Za-z0-9_\-]+$").unwrap();
}

/// Directories, type tables and columns share one naming rule.
pub fn validate_name(name: &str) -> bool {
    NAME.is_match(name)
}

fn require_name(what: &str, name: &str) -> Result<()> {
    if validate_name(name) {
        Ok(())
    } else {
        Err(CcdbError::invalid(format!(
            "{} name '{}' may only contain letters, digits, '_' and '-'",
            what, name
        )))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Directory,
    TypeTable,
    RunRange,
    Variation,
    Assignment,
}
impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            EntityKind::Directory => "directory",
            EntityKind::TypeTable => "type table",
            EntityKind::RunRange => "run range",
            EntityKind::Variation => "variation",
            EntityKind::Assignment => "assignment",
        };
        write!(f, "{}", name)
    }
}

pub trait Entity: fmt::Debug + Send + Sync + 'static {
    const KIND: EntityKind;
    /// Entities whose identity depends on the directory structure go stale
    /// when the tree is rebuilt.
    const STRUCTURAL: bool;
    fn id(&self) -> Id;
}

// ------------- Paths -------------
/// Makes a path absolute and removes empty segments and trailing slashes.
pub fn normalize_path(path: &str) -> String {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    format!("/{}", segments.join("/"))
}
/// In `/dir/subdir/object` returns `/dir/subdir`.
pub fn extract_directory(path: &str) -> String {
    let path = normalize_path(path);
    match path.rfind('/') {
        Some(0) | None => ROOT_PATH.to_string(),
        Some(i) => path[..i].to_string(),
    }
}
/// In `/dir/subdir/object` returns `object`.
pub fn extract_object_name(path: &str) -> String {
    let path = normalize_path(path);
    path.rsplit('/').next().unwrap_or_default().to_string()
}
pub fn combine_path(left: &str, right: &str) -> String {
    normalize_path(&format!("{}/{}", left, right))
}

// ------------- Search -------------
/// Name pattern where `*` matches any sequence and `?` any single character.
#[derive(Debug, Clone)]
pub struct Wildcard {
    pattern: String,
    regex: Regex,
}
impl Wildcard {
    pub fn new(pattern: &str) -> Result<Self> {
        let mut expression = String::from("^");
        for c in pattern.chars() {
            match c {
                '*' => expression.push_str(".*"),
                '?' => expression.push('.'),
                _ => expression.push_str(&regex::escape(&c.to_string())),
            }
        }
        expression.push('$');
        let regex = Regex::new(&expression)
            .map_err(|e| CcdbError::invalid(format!("pattern '{}': {}", pattern, e)))?;
        Ok(Self {
            pattern: pattern.to_string(),
            regex,
        })
    }
    pub fn is_match(&self, name: &str) -> bool {
        self.regex.is_match(name)
    }
    pub fn as_str(&self) -> &str {
        &self.pattern
    }
}

/// `take == 0` means everything from `start_with` on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Paging {
    pub take: usize,
    pub start_with: usize,
}
impl Paging {
    pub fn all() -> Self {
        Self::default()
    }
    pub fn new(take: usize, start_with: usize) -> Self {
        Self { take, start_with }
    }
    pub fn apply<T>(&self, items: impl IntoIterator<Item = T>) -> Vec<T> {
        let items = items.into_iter().skip(self.start_with);
        if self.take == 0 {
            items.collect()
        } else {
            items.take(self.take).collect()
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortOrder {
    #[default]
    CreatedDesc,
    CreatedAsc,
}

// ------------- Directory -------------
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Directory {
    id: Id,
    parent_id: Id,
    name: String,
    path: String,
    children: Vec<Id>,
    comment: String,
    created: DateTime<Utc>,
    modified: DateTime<Utc>,
}

impl Directory {
    /// A directory that is not yet stored; the backend assigns its identity.
    pub fn new(name: &str, parent_id: Id, comment: &str) -> Result<Self> {
        require_name("directory", name)?;
        let now = Utc::now();
        Ok(Self {
            id: ROOT_ID,
            parent_id,
            name: name.to_string(),
            path: String::new(),
            children: Vec::new(),
            comment: comment.to_string(),
            created: now,
            modified: now,
        })
    }
    /// Used by backends when reading stored directories.
    pub fn restore(
        id: Id,
        parent_id: Id,
        name: String,
        comment: String,
        created: DateTime<Utc>,
        modified: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            parent_id,
            name,
            path: String::new(),
            children: Vec::new(),
            comment,
            created,
            modified,
        }
    }
    fn root() -> Self {
        let epoch = DateTime::<Utc>::UNIX_EPOCH;
        Self {
            id: ROOT_ID,
            parent_id: ROOT_ID,
            name: String::new(),
            path: ROOT_PATH.to_string(),
            children: Vec::new(),
            comment: String::from("root directory"),
            created: epoch,
            modified: epoch,
        }
    }
    pub fn id(&self) -> Id {
        self.id
    }
    /// The parent is referenced by identity only; the root is its own parent.
    pub fn parent_id(&self) -> Id {
        self.parent_id
    }
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn path(&self) -> &str {
        &self.path
    }
    pub fn children(&self) -> &[Id] {
        &self.children
    }
    pub fn comment(&self) -> &str {
        &self.comment
    }
    pub fn created(&self) -> DateTime<Utc> {
        self.created
    }
    pub fn modified(&self) -> DateTime<Utc> {
        self.modified
    }
    pub fn is_root(&self) -> bool {
        self.id == ROOT_ID
    }
    // staged changes, submitted through Session::update_directory
    pub fn set_name(&mut self, name: &str) -> Result<()> {
        require_name("directory", name)?;
        self.name = name.to_string();
        Ok(())
    }
    pub fn set_comment(&mut self, comment: &str) {
        self.comment = comment.to_string();
    }
    pub fn set_parent_id(&mut self, parent_id: Id) {
        self.parent_id = parent_id;
    }
    pub(crate) fn touch(&mut self) {
        self.modified = Utc::now();
    }
}
impl Entity for Directory {
    const KIND: EntityKind = EntityKind::Directory;
    const STRUCTURAL: bool = true;
    fn id(&self) -> Id {
        self.id
    }
}
impl fmt::Display for Directory {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.path)
    }
}

/// Arena holding one snapshot of the directory structure. A structural change
/// never edits a tree in place: a new arena is built and swapped in, and
/// handles carry the generation they were taken from.
#[derive(Debug)]
pub struct DirectoryTree {
    generation: u64,
    nodes: Vec<Arc<Directory>>,
    index: HashMap<Id, usize, IdHasher>,
    paths: BiMap<String, Id>,
}

impl DirectoryTree {
    pub fn build(generation: u64, records: Vec<Directory>) -> Result<Self> {
        let mut by_parent: HashMap<Id, Vec<Directory>, IdHasher> = HashMap::default();
        let total = records.len();
        for record in records {
            if record.id == ROOT_ID {
                return Err(CcdbError::Internal(String::from(
                    "a stored directory uses the root identity",
                )));
            }
            by_parent.entry(record.parent_id).or_default().push(record);
        }
        let mut tree = Self {
            generation,
            nodes: Vec::with_capacity(total + 1),
            index: HashMap::default(),
            paths: BiMap::new(),
        };
        // depth first from the root, so parents are always placed first
        let mut pending = vec![Directory::root()];
        while let Some(mut directory) = pending.pop() {
            let mut children = by_parent.remove(&directory.id).unwrap_or_default();
            children.sort_by(|a, b| a.name.cmp(&b.name));
            directory.children = children.iter().map(|c| c.id).collect();
            for child in children.iter_mut() {
                child.path = combine_path(&directory.path, &child.name);
            }
            let (id, path) = (directory.id, directory.path.clone());
            if tree.paths.contains_left(&path) {
                return Err(CcdbError::Internal(format!("duplicate directory path {}", path)));
            }
            tree.index.insert(id, tree.nodes.len());
            tree.paths.insert(path, id);
            tree.nodes.push(Arc::new(directory));
            pending.extend(children.into_iter().rev());
        }
        if !by_parent.is_empty() {
            let orphans: usize = by_parent.values().map(|v| v.len()).sum();
            tracing::warn!(orphans, "directories without a reachable parent were skipped");
        }
        Ok(tree)
    }
    pub fn empty() -> Self {
        let root = Directory::root();
        let mut paths = BiMap::new();
        paths.insert(root.path.clone(), ROOT_ID);
        let mut index = HashMap::default();
        index.insert(ROOT_ID, 0);
        Self {
            generation: 0,
            nodes: vec![Arc::new(root)],
            index,
            paths,
        }
    }
    pub fn generation(&self) -> u64 {
        self.generation
    }
    pub fn root(&self) -> Arc<Directory> {
        Arc::clone(&self.nodes[0])
    }
    pub fn get(&self, id: Id) -> Option<Arc<Directory>> {
        self.index.get(&id).map(|i| Arc::clone(&self.nodes[*i]))
    }
    pub fn by_path(&self, path: &str) -> Option<Arc<Directory>> {
        self.paths
            .get_by_left(&normalize_path(path))
            .and_then(|id| self.get(*id))
    }
    pub fn path_of(&self, id: Id) -> Option<&str> {
        self.paths.get_by_right(&id).map(|p| p.as_str())
    }
    pub fn children(&self, id: Id) -> Vec<Arc<Directory>> {
        self.get(id)
            .map(|d| d.children.iter().filter_map(|c| self.get(*c)).collect())
            .unwrap_or_default()
    }
    /// Identities of everything below `id`, deepest first.
    pub fn descendants(&self, id: Id) -> Vec<Id> {
        let mut found = Vec::new();
        let mut pending = vec![id];
        while let Some(current) = pending.pop() {
            if let Some(directory) = self.get(current) {
                for child in directory.children.iter() {
                    found.push(*child);
                    pending.push(*child);
                }
            }
        }
        found.reverse();
        found
    }
    /// Every directory, root first, parents before children.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Directory>> {
        self.nodes.iter()
    }
    pub fn len(&self) -> usize {
        self.nodes.len()
    }
    pub fn is_empty(&self) -> bool {
        self.nodes.len() <= 1
    }
}

// ------------- Column -------------
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Column {
    name: String,
    column_type: ColumnType,
    order: usize,
}
impl Column {
    pub fn new(name: &str, column_type: ColumnType, order: usize) -> Result<Self> {
        require_name("column", name)?;
        Ok(Self {
            name: name.to_string(),
            column_type,
            order,
        })
    }
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn column_type(&self) -> ColumnType {
        self.column_type
    }
    pub fn order(&self) -> usize {
        self.order
    }
}

// ------------- TypeTable -------------
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TypeTable {
    id: Id,
    directory_id: Id,
    name: String,
    path: String,
    n_rows: usize,
    n_columns: usize,
    columns: Vec<Column>,
    columns_loaded: bool,
    comment: String,
    created: DateTime<Utc>,
    modified: DateTime<Utc>,
}

impl TypeTable {
    /// Column pairs are `(name, type)`; unknown type names become doubles.
    pub fn new(
        name: &str,
        directory_id: Id,
        n_rows: usize,
        columns: &[(&str, &str)],
        comment: &str,
    ) -> Result<Self> {
        require_name("type table", name)?;
        if n_rows == 0 {
            return Err(CcdbError::invalid(format!("type table '{}' needs at least one row", name)));
        }
        if columns.is_empty() {
            return Err(CcdbError::invalid(format!("type table '{}' needs at least one column", name)));
        }
        let mut built = Vec::with_capacity(columns.len());
        for (order, (column, column_type)) in columns.iter().enumerate() {
            if built.iter().any(|c: &Column| c.name == *column) {
                return Err(CcdbError::invalid(format!(
                    "type table '{}' has the column '{}' twice",
                    name, column
                )));
            }
            built.push(Column::new(column, ColumnType::from_name(column_type), order)?);
        }
        let now = Utc::now();
        Ok(Self {
            id: 0,
            directory_id,
            name: name.to_string(),
            path: String::new(),
            n_rows,
            n_columns: built.len(),
            columns: built,
            columns_loaded: true,
            comment: comment.to_string(),
            created: now,
            modified: now,
        })
    }
    /// Used by backends when reading stored tables; columns are attached later.
    #[allow(clippy::too_many_arguments)]
    pub fn restore(
        id: Id,
        directory_id: Id,
        name: String,
        n_rows: usize,
        n_columns: usize,
        comment: String,
        created: DateTime<Utc>,
        modified: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            directory_id,
            name,
            path: String::new(),
            n_rows,
            n_columns,
            columns: Vec::new(),
            columns_loaded: false,
            comment,
            created,
            modified,
        }
    }
    pub fn id(&self) -> Id {
        self.id
    }
    pub fn directory_id(&self) -> Id {
        self.directory_id
    }
    pub fn name(&self) -> &str {
        &self.name
    }
    /// Full path; empty until the table has been placed in a directory tree.
    pub fn path(&self) -> &str {
        &self.path
    }
    pub fn n_rows(&self) -> usize {
        self.n_rows
    }
    pub fn n_columns(&self) -> usize {
        self.n_columns
    }
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }
    pub fn columns_loaded(&self) -> bool {
        self.columns_loaded
    }
    pub fn comment(&self) -> &str {
        &self.comment
    }
    pub fn created(&self) -> DateTime<Utc> {
        self.created
    }
    pub fn modified(&self) -> DateTime<Utc> {
        self.modified
    }
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }
    // staged changes, submitted through Session::update_type_table
    pub fn set_name(&mut self, name: &str) -> Result<()> {
        require_name("type table", name)?;
        self.name = name.to_string();
        Ok(())
    }
    pub fn set_comment(&mut self, comment: &str) {
        self.comment = comment.to_string();
    }
    pub fn set_directory_id(&mut self, directory_id: Id) {
        self.directory_id = directory_id;
    }
    pub fn set_columns(&mut self, mut columns: Vec<Column>) {
        columns.sort_by_key(|c| c.order);
        self.n_columns = columns.len();
        self.columns = columns;
        self.columns_loaded = true;
    }
    pub(crate) fn set_path(&mut self, path: String) {
        self.path = path;
    }
    pub(crate) fn touch(&mut self) {
        self.modified = Utc::now();
    }
}
impl Entity for TypeTable {
    const KIND: EntityKind = EntityKind::TypeTable;
    const STRUCTURAL: bool = true;
    fn id(&self) -> Id {
        self.id
    }
}
impl fmt::Display for TypeTable {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} ({}x{})", self.path, self.n_rows, self.n_columns)
    }
}

// ------------- RunRange -------------
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunRange {
    id: Id,
    name: Option<String>,
    min: RunNumber,
    max: RunNumber,
    comment: String,
    created: DateTime<Utc>,
}

impl RunRange {
    pub fn new(min: RunNumber, max: RunNumber, name: Option<&str>, comment: &str) -> Result<Self> {
        if min > max {
            return Err(CcdbError::invalid(format!("run range [{}, {}] has min above max", min, max)));
        }
        let name = name.filter(|n| !n.is_empty());
        Ok(Self {
            id: 0,
            name: name.map(str::to_string),
            min,
            max,
            comment: comment.to_string(),
            created: Utc::now(),
        })
    }
    pub fn restore(
        id: Id,
        name: Option<String>,
        min: RunNumber,
        max: RunNumber,
        comment: String,
        created: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            name: name.filter(|n| !n.is_empty()),
            min,
            max,
            comment,
            created,
        }
    }
    pub fn id(&self) -> Id {
        self.id
    }
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
    pub fn min(&self) -> RunNumber {
        self.min
    }
    pub fn max(&self) -> RunNumber {
        self.max
    }
    pub fn comment(&self) -> &str {
        &self.comment
    }
    pub fn created(&self) -> DateTime<Utc> {
        self.created
    }
    pub fn contains(&self, run: RunNumber) -> bool {
        self.min <= run && run <= self.max
    }
    pub fn covers(&self, min: RunNumber, max: RunNumber) -> bool {
        self.min <= min && max <= self.max
    }
    // staged changes, submitted through Session::update_run_range
    pub fn set_bounds(&mut self, min: RunNumber, max: RunNumber) -> Result<()> {
        if min > max {
            return Err(CcdbError::invalid(format!("run range [{}, {}] has min above max", min, max)));
        }
        self.min = min;
        self.max = max;
        Ok(())
    }
    pub fn set_comment(&mut self, comment: &str) {
        self.comment = comment.to_string();
    }
}
impl Entity for RunRange {
    const KIND: EntityKind = EntityKind::RunRange;
    const STRUCTURAL: bool = false;
    fn id(&self) -> Id {
        self.id
    }
}
impl fmt::Display for RunRange {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{} [{}, {}]", name, self.min, self.max),
            None => write!(f, "[{}, {}]", self.min, self.max),
        }
    }
}

// ------------- Variation -------------
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Variation {
    id: Id,
    name: String,
    comment: String,
    created: DateTime<Utc>,
}

impl Variation {
    pub fn new(name: &str, comment: &str) -> Result<Self> {
        require_name("variation", name)?;
        Ok(Self {
            id: 0,
            name: name.to_string(),
            comment: comment.to_string(),
            created: Utc::now(),
        })
    }
    pub fn restore(id: Id, name: String, comment: String, created: DateTime<Utc>) -> Self {
        Self {
            id,
            name,
            comment,
            created,
        }
    }
    pub fn id(&self) -> Id {
        self.id
    }
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn comment(&self) -> &str {
        &self.comment
    }
    pub fn created(&self) -> DateTime<Utc> {
        self.created
    }
    // staged changes, submitted through Session::update_variation
    pub fn set_name(&mut self, name: &str) -> Result<()> {
        require_name("variation", name)?;
        self.name = name.to_string();
        Ok(())
    }
    pub fn set_comment(&mut self, comment: &str) {
        self.comment = comment.to_string();
    }
}
impl Entity for Variation {
    const KIND: EntityKind = EntityKind::Variation;
    const STRUCTURAL: bool = false;
    fn id(&self) -> Id {
        self.id
    }
}
impl fmt::Display for Variation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

// ------------- Assignment -------------
/// One immutable, versioned block of calibration data. The referenced
/// table, run range and variation are shared with the cache.
#[derive(Debug, Clone)]
pub struct Assignment {
    id: Id,
    type_table: Arc<TypeTable>,
    run_range: Arc<RunRange>,
    variation: Arc<Variation>,
    version: u32,
    created: DateTime<Utc>,
    comment: String,
    blob: String,
    // parsed on first access
    table: OnceLock<Table>,
}

impl Assignment {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: Id,
        type_table: Arc<TypeTable>,
        run_range: Arc<RunRange>,
        variation: Arc<Variation>,
        version: u32,
        created: DateTime<Utc>,
        comment: String,
        blob: String,
    ) -> Self {
        Self {
            id,
            type_table,
            run_range,
            variation,
            version,
            created,
            comment,
            blob,
            table: OnceLock::new(),
        }
    }
    pub fn id(&self) -> Id {
        self.id
    }
    pub fn type_table(&self) -> Arc<TypeTable> {
        Arc::clone(&self.type_table)
    }
    pub fn run_range(&self) -> Arc<RunRange> {
        Arc::clone(&self.run_range)
    }
    pub fn variation(&self) -> Arc<Variation> {
        Arc::clone(&self.variation)
    }
    pub fn version(&self) -> u32 {
        self.version
    }
    pub fn created(&self) -> DateTime<Utc> {
        self.created
    }
    pub fn comment(&self) -> &str {
        &self.comment
    }
    pub fn blob(&self) -> &str {
        &self.blob
    }
    /// The blob as a table shaped by the type table, parsed once and kept.
    pub fn table(&self) -> Result<&Table> {
        if let Some(table) = self.table.get() {
            return Ok(table);
        }
        let parsed = Table::parse(&self.blob, self.type_table.n_rows(), self.type_table.n_columns())
            .map_err(|e| {
                CcdbError::Internal(format!(
                    "assignment {} of {} holds a malformed blob: {}",
                    self.id, self.type_table.path(), e
                ))
            })?;
        Ok(self.table.get_or_init(|| parsed))
    }
    pub fn is_parsed(&self) -> bool {
        self.table.get().is_some()
    }
}
impl Entity for Assignment {
    const KIND: EntityKind = EntityKind::Assignment;
    const STRUCTURAL: bool = false;
    fn id(&self) -> Id {
        self.id
    }
}
impl fmt::Display for Assignment {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} {} {} v{} @ {}",
            self.type_table.path(),
            self.run_range,
            self.variation,
            self.version,
            self.created.format("%Y-%m-%d %H:%M:%S%.6f")
        )
    }
}
