// used for persistence
use rusqlite::{Connection, OptionalExtension, Row, Transaction, params};

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::backend::{AssignmentDraft, AssignmentFilter, AssignmentRecord, BackendPort, next_timestamp};
use crate::construct::{
    Column, Directory, Id, Paging, ROOT_ID, RunNumber, RunRange, SortOrder, TypeTable, Variation,
    Wildcard,
};
use crate::datatype::ColumnType;
use crate::error::{CcdbError, Result};
use crate::interface::CallContext;

// SQLite integers are signed, identities travel as i64
fn sql_id(id: Id) -> i64 {
    id as i64
}
fn from_sql_id(id: i64) -> Id {
    id as Id
}
fn micros(time: DateTime<Utc>) -> i64 {
    time.timestamp_micros()
}
fn from_micros(column: usize, value: i64) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::from_timestamp_micros(value).ok_or(rusqlite::Error::IntegralValueOutOfRange(column, value))
}
fn limit(paging: Paging) -> (i64, i64) {
    let take = if paging.take == 0 { -1 } else { paging.take as i64 };
    (take, paging.start_with as i64)
}

const SCHEMA: &str = "
    create table if not exists Directory (
        Directory_Identity integer not null,
        Parent_Identity integer not null,
        Name text not null,
        Comment text not null,
        Created integer not null,
        Modified integer not null,
        constraint referenceable_Directory_Identity primary key (
            Directory_Identity
        ),
        constraint unique_Name_within_Parent unique (
            Parent_Identity,
            Name
        )
    );
    create table if not exists TypeTable (
        TypeTable_Identity integer not null,
        Directory_Identity integer not null,
        Name text not null,
        Rows integer not null,
        Columns integer not null,
        Comment text not null,
        Created integer not null,
        Modified integer not null,
        constraint referenceable_TypeTable_Identity primary key (
            TypeTable_Identity
        ),
        constraint unique_Name_within_Directory unique (
            Directory_Identity,
            Name
        )
    );
    create table if not exists TypeColumn (
        TypeTable_Identity integer not null,
        Ordinal integer not null,
        Name text not null,
        ColumnType text not null,
        constraint TypeColumn_of_TypeTable foreign key (
            TypeTable_Identity
        ) references TypeTable(TypeTable_Identity),
        constraint unique_Ordinal_within_TypeTable primary key (
            TypeTable_Identity,
            Ordinal
        ),
        constraint unique_Name_within_TypeTable unique (
            TypeTable_Identity,
            Name
        )
    );
    create table if not exists RunRange (
        RunRange_Identity integer not null,
        Name text null,
        RunMin integer not null,
        RunMax integer not null,
        Comment text not null,
        Created integer not null,
        constraint referenceable_RunRange_Identity primary key (
            RunRange_Identity
        ),
        constraint unique_RunRange_Name unique (
            Name
        )
    );
    create table if not exists Variation (
        Variation_Identity integer not null,
        Name text not null,
        Comment text not null,
        Created integer not null,
        constraint referenceable_Variation_Identity primary key (
            Variation_Identity
        ),
        constraint unique_Variation_Name unique (
            Name
        )
    );
    create table if not exists Assignment (
        Assignment_Identity integer not null,
        TypeTable_Identity integer not null,
        RunRange_Identity integer not null,
        Variation_Identity integer not null,
        Version integer not null,
        Created integer not null,
        Comment text not null,
        Blob text not null,
        constraint Assignment_of_TypeTable foreign key (
            TypeTable_Identity
        ) references TypeTable(TypeTable_Identity),
        constraint Assignment_for_RunRange foreign key (
            RunRange_Identity
        ) references RunRange(RunRange_Identity),
        constraint Assignment_in_Variation foreign key (
            Variation_Identity
        ) references Variation(Variation_Identity),
        constraint referenceable_Assignment_Identity primary key (
            Assignment_Identity
        ),
        constraint unique_Version unique (
            TypeTable_Identity,
            RunRange_Identity,
            Variation_Identity,
            Version
        )
    );
    create index if not exists Assignment_by_TypeTable_Variation on Assignment (
        TypeTable_Identity,
        Variation_Identity,
        Created
    );
";

const ASSIGNMENT_COLUMNS: &str = "
    a.Assignment_Identity,
    a.TypeTable_Identity,
    a.RunRange_Identity,
    a.Variation_Identity,
    a.Version,
    a.Created,
    a.Comment,
    a.Blob
";

const ASSIGNMENT_FILTER: &str = "
    from Assignment a
    join RunRange r
    on r.RunRange_Identity = a.RunRange_Identity
    where a.TypeTable_Identity = ?1
    and (?2 is null or r.RunMin <= ?2)
    and (?3 is null or r.RunMax >= ?3)
    and (?4 is null or r.Name = ?4)
    and (?5 is null or a.Variation_Identity = ?5)
    and (?6 is null or a.Created >= ?6)
    and (?7 is null or a.Created <= ?7)
";

// ------------- Row readers -------------
fn directory_from(row: &Row) -> rusqlite::Result<Directory> {
    Ok(Directory::restore(
        from_sql_id(row.get(0)?),
        from_sql_id(row.get(1)?),
        row.get(2)?,
        row.get(3)?,
        from_micros(4, row.get(4)?)?,
        from_micros(5, row.get(5)?)?,
    ))
}
fn type_table_from(row: &Row) -> rusqlite::Result<TypeTable> {
    let n_rows: i64 = row.get(3)?;
    let n_columns: i64 = row.get(4)?;
    Ok(TypeTable::restore(
        from_sql_id(row.get(0)?),
        from_sql_id(row.get(1)?),
        row.get(2)?,
        n_rows as usize,
        n_columns as usize,
        row.get(5)?,
        from_micros(6, row.get(6)?)?,
        from_micros(7, row.get(7)?)?,
    ))
}
fn run_range_from(row: &Row) -> rusqlite::Result<RunRange> {
    Ok(RunRange::restore(
        from_sql_id(row.get(0)?),
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        from_micros(5, row.get(5)?)?,
    ))
}
fn variation_from(row: &Row) -> rusqlite::Result<Variation> {
    Ok(Variation::restore(
        from_sql_id(row.get(0)?),
        row.get(1)?,
        row.get(2)?,
        from_micros(3, row.get(3)?)?,
    ))
}
fn assignment_from(row: &Row) -> rusqlite::Result<AssignmentRecord> {
    Ok(AssignmentRecord {
        id: from_sql_id(row.get(0)?),
        type_table_id: from_sql_id(row.get(1)?),
        run_range_id: from_sql_id(row.get(2)?),
        variation_id: from_sql_id(row.get(3)?),
        version: row.get(4)?,
        created: from_micros(5, row.get(5)?)?,
        comment: row.get(6)?,
        blob: row.get(7)?,
    })
}

const TYPE_TABLE_COLUMNS: &str = "
    TypeTable_Identity, Directory_Identity, Name, Rows, Columns, Comment, Created, Modified
";
const RUN_RANGE_COLUMNS: &str = "
    r.RunRange_Identity, r.Name, r.RunMin, r.RunMax, r.Comment, r.Created
";
const VARIATION_COLUMNS: &str = "
    v.Variation_Identity, v.Name, v.Comment, v.Created
";

// ------------- Persistence -------------
/// Stores everything in one SQLite database.
pub struct SqliteBackend {
    connection: Option<Connection>,
    location: String,
}

impl SqliteBackend {
    pub fn open(path: &str) -> Result<Self> {
        Self::prepare(Connection::open(path)?, path)
    }
    pub fn in_memory() -> Result<Self> {
        Self::prepare(Connection::open_in_memory()?, ":memory:")
    }
    fn prepare(connection: Connection, location: &str) -> Result<Self> {
        // The "STRICT" keyword introduced in 3.37.0 breaks JDBC connections, which makes
        // debugging using an external tool like DBeaver impossible
        connection.execute_batch("pragma foreign_keys = on;")?;
        connection.execute_batch(SCHEMA)?;
        info!(location, "sqlite backend ready");
        Ok(Self {
            connection: Some(connection),
            location: location.to_string(),
        })
    }
    pub fn location(&self) -> &str {
        &self.location
    }
    fn begin(&mut self, ctx: &CallContext) -> Result<&mut Connection> {
        ctx.check()?;
        self.connection
            .as_mut()
            .ok_or_else(|| CcdbError::Connection(String::from("sqlite backend is disconnected")))
    }
    fn columns_of(connection: &Connection, type_table: Id) -> Result<Vec<Column>> {
        let mut statement = connection.prepare_cached(
            "
            select Name, ColumnType, Ordinal
                from TypeColumn
                where TypeTable_Identity = ?
                order by Ordinal
            ",
        )?;
        let raw = statement
            .query_map(params![sql_id(type_table)], |row| {
                let ordinal: i64 = row.get(2)?;
                Ok((row.get::<_, String>(0)?, row.get::<_, ColumnType>(1)?, ordinal as usize))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        raw.into_iter()
            .map(|(name, column_type, order)| Column::new(&name, column_type, order))
            .collect()
    }
    fn attach_columns(connection: &Connection, mut table: TypeTable, load_columns: bool) -> Result<TypeTable> {
        if load_columns {
            let columns = Self::columns_of(connection, table.id())?;
            table.set_columns(columns);
        }
        Ok(table)
    }
    fn tables_where(
        connection: &Connection,
        condition: &str,
        parameter: Option<i64>,
        load_columns: bool,
    ) -> Result<Vec<TypeTable>> {
        let mut statement = connection.prepare_cached(&format!(
            "select {} from TypeTable where {} order by Name, TypeTable_Identity",
            TYPE_TABLE_COLUMNS, condition
        ))?;
        let tables = statement
            .query_map(params![parameter], type_table_from)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        tables
            .into_iter()
            .map(|t| Self::attach_columns(connection, t, load_columns))
            .collect()
    }
    fn count(connection: &Connection, sql: &str, id: Id) -> Result<i64> {
        Ok(connection.query_row(sql, params![sql_id(id)], |r| r.get(0))?)
    }
    fn require(connection: &Connection, what: &str, sql: &str, id: Id) -> Result<()> {
        if Self::count(connection, sql, id)? == 0 {
            Err(CcdbError::not_found(format!("{} #{}", what, id)))
        } else {
            Ok(())
        }
    }
    fn require_directory(connection: &Connection, id: Id) -> Result<()> {
        if id == ROOT_ID {
            return Ok(());
        }
        Self::require(
            connection,
            "directory",
            "select count(*) from Directory where Directory_Identity = ?",
            id,
        )
    }
    /// The directory and everything below it.
    fn subtree(connection: &Connection, id: Id) -> Result<Vec<Id>> {
        let mut statement = connection.prepare_cached(
            "
            with recursive Below(Directory_Identity) as (
                select ?
                union
                select d.Directory_Identity
                    from Directory d
                    join Below b
                    on d.Parent_Identity = b.Directory_Identity
            )
            select Directory_Identity from Below
            ",
        )?;
        let ids = statement
            .query_map(params![sql_id(id)], |r| r.get::<_, i64>(0))?
            .map(|r| r.map(from_sql_id))
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(ids)
    }
    fn delete_tables(transaction: &Transaction, tables: &[Id]) -> Result<()> {
        for table in tables {
            transaction.execute("delete from Assignment where TypeTable_Identity = ?", params![sql_id(*table)])?;
            transaction.execute("delete from TypeColumn where TypeTable_Identity = ?", params![sql_id(*table)])?;
            transaction.execute("delete from TypeTable where TypeTable_Identity = ?", params![sql_id(*table)])?;
        }
        Ok(())
    }
    fn assignment_sql(filter: &AssignmentFilter, head: &str, paged: bool) -> String {
        let order = match filter.sort {
            SortOrder::CreatedDesc => "order by a.Created desc, a.Assignment_Identity desc",
            SortOrder::CreatedAsc => "order by a.Created asc, a.Assignment_Identity asc",
        };
        if paged {
            format!("select {} {} {} limit ?8 offset ?9", head, ASSIGNMENT_FILTER, order)
        } else {
            format!("select {} {}", head, ASSIGNMENT_FILTER)
        }
    }
}

impl BackendPort for SqliteBackend {
    fn name(&self) -> &'static str {
        "sqlite"
    }
    fn is_connected(&self) -> bool {
        self.connection.is_some()
    }
    fn disconnect(&mut self) {
        if self.connection.take().is_some() {
            info!(location = %self.location, "sqlite backend disconnected");
        }
    }

    fn fetch_directory_tree(&mut self, ctx: &CallContext) -> Result<Vec<Directory>> {
        let connection = self.begin(ctx)?;
        let mut statement = connection.prepare_cached(
            "
            select Directory_Identity, Parent_Identity, Name, Comment, Created, Modified
                from Directory
            ",
        )?;
        let directories = statement
            .query_map([], directory_from)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        debug!(directories = directories.len(), "directory rows read");
        Ok(directories)
    }
    fn create_directory(&mut self, ctx: &CallContext, directory: &Directory) -> Result<Id> {
        let connection = self.begin(ctx)?;
        Self::require_directory(connection, directory.parent_id())?;
        let taken = connection
            .query_row(
                "select Directory_Identity from Directory where Parent_Identity = ? and Name = ?",
                params![sql_id(directory.parent_id()), directory.name()],
                |r| r.get::<_, i64>(0),
            )
            .optional()?;
        if taken.is_some() {
            return Err(CcdbError::conflict(format!("directory '{}' already exists", directory.name())));
        }
        connection.execute(
            "
            insert into Directory (
                Parent_Identity,
                Name,
                Comment,
                Created,
                Modified
            ) values (?, ?, ?, ?, ?)
            ",
            params![
                sql_id(directory.parent_id()),
                directory.name(),
                directory.comment(),
                micros(directory.created()),
                micros(directory.modified())
            ],
        )?;
        Ok(from_sql_id(connection.last_insert_rowid()))
    }
    fn update_directory(&mut self, ctx: &CallContext, directory: &Directory) -> Result<()> {
        let connection = self.begin(ctx)?;
        Self::require(
            connection,
            "directory",
            "select count(*) from Directory where Directory_Identity = ?",
            directory.id(),
        )?;
        Self::require_directory(connection, directory.parent_id())?;
        if Self::subtree(connection, directory.id())?.contains(&directory.parent_id()) {
            return Err(CcdbError::invalid("a directory cannot be moved below itself"));
        }
        connection.execute(
            "
            update Directory
                set Parent_Identity = ?, Name = ?, Comment = ?, Modified = ?
                where Directory_Identity = ?
            ",
            params![
                sql_id(directory.parent_id()),
                directory.name(),
                directory.comment(),
                micros(Utc::now()),
                sql_id(directory.id())
            ],
        )?;
        Ok(())
    }
    fn delete_directory(&mut self, ctx: &CallContext, id: Id) -> Result<()> {
        let connection = self.begin(ctx)?;
        let transaction = connection.transaction()?;
        Self::require(
            &transaction,
            "directory",
            "select count(*) from Directory where Directory_Identity = ?",
            id,
        )?;
        if Self::count(&transaction, "select count(*) from Directory where Parent_Identity = ?", id)? > 0 {
            return Err(CcdbError::conflict(format!("directory #{} has subdirectories", id)));
        }
        if Self::count(&transaction, "select count(*) from TypeTable where Directory_Identity = ?", id)? > 0 {
            return Err(CcdbError::conflict(format!("directory #{} has type tables", id)));
        }
        transaction.execute("delete from Directory where Directory_Identity = ?", params![sql_id(id)])?;
        transaction.commit()?;
        Ok(())
    }
    fn recursive_delete_directory(&mut self, ctx: &CallContext, id: Id) -> Result<()> {
        let connection = self.begin(ctx)?;
        let transaction = connection.transaction()?;
        Self::require(
            &transaction,
            "directory",
            "select count(*) from Directory where Directory_Identity = ?",
            id,
        )?;
        let directories = Self::subtree(&transaction, id)?;
        for directory in directories.iter() {
            ctx.check()?;
            let tables: Vec<Id> = Self::tables_where(&transaction, "Directory_Identity = ?", Some(sql_id(*directory)), false)?
                .iter()
                .map(|t| t.id())
                .collect();
            Self::delete_tables(&transaction, &tables)?;
            transaction.execute("delete from Directory where Directory_Identity = ?", params![sql_id(*directory)])?;
        }
        transaction.commit()?;
        info!(directory = id, removed = directories.len(), "directory subtree deleted");
        Ok(())
    }

    fn fetch_type_tables(&mut self, ctx: &CallContext, directory: Id, load_columns: bool) -> Result<Vec<TypeTable>> {
        let connection = self.begin(ctx)?;
        Self::tables_where(connection, "Directory_Identity = ?", Some(sql_id(directory)), load_columns)
    }
    fn fetch_type_table(&mut self, ctx: &CallContext, directory: Id, name: &str, load_columns: bool) -> Result<Option<TypeTable>> {
        let connection = self.begin(ctx)?;
        let table = connection
            .prepare_cached(&format!(
                "select {} from TypeTable where Directory_Identity = ? and Name = ?",
                TYPE_TABLE_COLUMNS
            ))?
            .query_row(params![sql_id(directory), name], type_table_from)
            .optional()?;
        table.map(|t| Self::attach_columns(connection, t, load_columns)).transpose()
    }
    fn fetch_type_table_by_id(&mut self, ctx: &CallContext, id: Id, load_columns: bool) -> Result<Option<TypeTable>> {
        let connection = self.begin(ctx)?;
        let table = connection
            .prepare_cached(&format!(
                "select {} from TypeTable where TypeTable_Identity = ?",
                TYPE_TABLE_COLUMNS
            ))?
            .query_row(params![sql_id(id)], type_table_from)
            .optional()?;
        table.map(|t| Self::attach_columns(connection, t, load_columns)).transpose()
    }
    fn search_type_tables(
        &mut self,
        ctx: &CallContext,
        pattern: &Wildcard,
        directory: Option<Id>,
        load_columns: bool,
        paging: Paging,
    ) -> Result<Vec<TypeTable>> {
        let connection = self.begin(ctx)?;
        let candidates = Self::tables_where(
            connection,
            "(?1 is null or Directory_Identity = ?1)",
            directory.map(sql_id),
            false,
        )?;
        let found = paging.apply(candidates.into_iter().filter(|t| pattern.is_match(t.name())));
        found
            .into_iter()
            .map(|t| Self::attach_columns(connection, t, load_columns))
            .collect()
    }
    fn fetch_columns(&mut self, ctx: &CallContext, type_table: Id) -> Result<Vec<Column>> {
        let connection = self.begin(ctx)?;
        Self::require(
            connection,
            "type table",
            "select count(*) from TypeTable where TypeTable_Identity = ?",
            type_table,
        )?;
        Self::columns_of(connection, type_table)
    }
    fn count_type_tables(&mut self, ctx: &CallContext, directory: Id) -> Result<usize> {
        let connection = self.begin(ctx)?;
        Ok(Self::count(connection, "select count(*) from TypeTable where Directory_Identity = ?", directory)? as usize)
    }
    fn create_type_table(&mut self, ctx: &CallContext, table: &TypeTable) -> Result<Id> {
        let connection = self.begin(ctx)?;
        let transaction = connection.transaction()?;
        Self::require_directory(&transaction, table.directory_id())?;
        let taken = transaction
            .query_row(
                "select TypeTable_Identity from TypeTable where Directory_Identity = ? and Name = ?",
                params![sql_id(table.directory_id()), table.name()],
                |r| r.get::<_, i64>(0),
            )
            .optional()?;
        if taken.is_some() {
            return Err(CcdbError::conflict(format!("type table '{}' already exists", table.name())));
        }
        transaction.execute(
            "
            insert into TypeTable (
                Directory_Identity,
                Name,
                Rows,
                Columns,
                Comment,
                Created,
                Modified
            ) values (?, ?, ?, ?, ?, ?, ?)
            ",
            params![
                sql_id(table.directory_id()),
                table.name(),
                table.n_rows() as i64,
                table.n_columns() as i64,
                table.comment(),
                micros(table.created()),
                micros(table.modified())
            ],
        )?;
        let id = from_sql_id(transaction.last_insert_rowid());
        {
            let mut add_column = transaction.prepare_cached(
                "
                insert into TypeColumn (
                    TypeTable_Identity,
                    Ordinal,
                    Name,
                    ColumnType
                ) values (?, ?, ?, ?)
                ",
            )?;
            for column in table.columns() {
                add_column.execute(params![sql_id(id), column.order() as i64, column.name(), column.column_type()])?;
            }
        }
        transaction.commit()?;
        Ok(id)
    }
    fn update_type_table(&mut self, ctx: &CallContext, table: &TypeTable) -> Result<()> {
        let connection = self.begin(ctx)?;
        Self::require(
            connection,
            "type table",
            "select count(*) from TypeTable where TypeTable_Identity = ?",
            table.id(),
        )?;
        Self::require_directory(connection, table.directory_id())?;
        connection.execute(
            "
            update TypeTable
                set Directory_Identity = ?, Name = ?, Comment = ?, Modified = ?
                where TypeTable_Identity = ?
            ",
            params![
                sql_id(table.directory_id()),
                table.name(),
                table.comment(),
                micros(Utc::now()),
                sql_id(table.id())
            ],
        )?;
        Ok(())
    }
    fn delete_type_table(&mut self, ctx: &CallContext, id: Id) -> Result<()> {
        let connection = self.begin(ctx)?;
        let transaction = connection.transaction()?;
        Self::require(
            &transaction,
            "type table",
            "select count(*) from TypeTable where TypeTable_Identity = ?",
            id,
        )?;
        if Self::count(&transaction, "select count(*) from Assignment where TypeTable_Identity = ?", id)? > 0 {
            return Err(CcdbError::conflict(format!("type table #{} has assignments", id)));
        }
        Self::delete_tables(&transaction, &[id])?;
        transaction.commit()?;
        Ok(())
    }
    fn recursive_delete_type_table(&mut self, ctx: &CallContext, id: Id) -> Result<()> {
        let connection = self.begin(ctx)?;
        let transaction = connection.transaction()?;
        Self::require(
            &transaction,
            "type table",
            "select count(*) from TypeTable where TypeTable_Identity = ?",
            id,
        )?;
        Self::delete_tables(&transaction, &[id])?;
        transaction.commit()?;
        Ok(())
    }

    fn fetch_run_ranges(
        &mut self,
        ctx: &CallContext,
        type_table: Id,
        variation: Option<Id>,
        paging: Paging,
    ) -> Result<Vec<RunRange>> {
        let connection = self.begin(ctx)?;
        let (take, skip) = limit(paging);
        let mut statement = connection.prepare_cached(&format!(
            "
            select distinct {}
                from RunRange r
                join Assignment a
                on a.RunRange_Identity = r.RunRange_Identity
                where a.TypeTable_Identity = ?1
                and (?2 is null or a.Variation_Identity = ?2)
                order by r.RunMin, r.RunMax, r.RunRange_Identity
                limit ?3 offset ?4
            ",
            RUN_RANGE_COLUMNS
        ))?;
        let ranges = statement
            .query_map(params![sql_id(type_table), variation.map(sql_id), take, skip], run_range_from)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(ranges)
    }
    fn fetch_run_range(&mut self, ctx: &CallContext, min: RunNumber, max: RunNumber, name: Option<&str>) -> Result<Option<RunRange>> {
        let connection = self.begin(ctx)?;
        let name = name.filter(|n| !n.is_empty());
        let range = connection
            .prepare_cached(&format!(
                "
                select {}
                    from RunRange r
                    where r.RunMin = ?1 and r.RunMax = ?2
                    and ((?3 is null and r.Name is null) or r.Name = ?3)
                    order by r.RunRange_Identity
                    limit 1
                ",
                RUN_RANGE_COLUMNS
            ))?
            .query_row(params![min, max, name], run_range_from)
            .optional()?;
        Ok(range)
    }
    fn fetch_run_range_by_name(&mut self, ctx: &CallContext, name: &str) -> Result<Option<RunRange>> {
        let connection = self.begin(ctx)?;
        let range = connection
            .prepare_cached(&format!("select {} from RunRange r where r.Name = ?", RUN_RANGE_COLUMNS))?
            .query_row(params![name], run_range_from)
            .optional()?;
        Ok(range)
    }
    fn fetch_run_range_by_id(&mut self, ctx: &CallContext, id: Id) -> Result<Option<RunRange>> {
        let connection = self.begin(ctx)?;
        let range = connection
            .prepare_cached(&format!("select {} from RunRange r where r.RunRange_Identity = ?", RUN_RANGE_COLUMNS))?
            .query_row(params![sql_id(id)], run_range_from)
            .optional()?;
        Ok(range)
    }
    fn create_run_range(&mut self, ctx: &CallContext, run_range: &RunRange) -> Result<Id> {
        let connection = self.begin(ctx)?;
        if let Some(name) = run_range.name() {
            let taken = connection
                .query_row("select count(*) from RunRange where Name = ?", params![name], |r| r.get::<_, i64>(0))?;
            if taken > 0 {
                return Err(CcdbError::conflict(format!("run range '{}' already exists", name)));
            }
        }
        connection.execute(
            "
            insert into RunRange (
                Name,
                RunMin,
                RunMax,
                Comment,
                Created
            ) values (?, ?, ?, ?, ?)
            ",
            params![
                run_range.name(),
                run_range.min(),
                run_range.max(),
                run_range.comment(),
                micros(run_range.created())
            ],
        )?;
        Ok(from_sql_id(connection.last_insert_rowid()))
    }
    fn update_run_range(&mut self, ctx: &CallContext, run_range: &RunRange) -> Result<()> {
        let connection = self.begin(ctx)?;
        let changed = connection.execute(
            "update RunRange set RunMin = ?, RunMax = ?, Comment = ? where RunRange_Identity = ?",
            params![run_range.min(), run_range.max(), run_range.comment(), sql_id(run_range.id())],
        )?;
        if changed == 0 {
            return Err(CcdbError::not_found(format!("run range #{}", run_range.id())));
        }
        Ok(())
    }
    fn delete_run_range(&mut self, ctx: &CallContext, id: Id) -> Result<()> {
        let connection = self.begin(ctx)?;
        let transaction = connection.transaction()?;
        Self::require(
            &transaction,
            "run range",
            "select count(*) from RunRange where RunRange_Identity = ?",
            id,
        )?;
        if Self::count(&transaction, "select count(*) from Assignment where RunRange_Identity = ?", id)? > 0 {
            return Err(CcdbError::conflict(format!("run range #{} has assignments", id)));
        }
        transaction.execute("delete from RunRange where RunRange_Identity = ?", params![sql_id(id)])?;
        transaction.commit()?;
        Ok(())
    }
    fn recursive_delete_run_range(&mut self, ctx: &CallContext, id: Id) -> Result<()> {
        let connection = self.begin(ctx)?;
        let transaction = connection.transaction()?;
        Self::require(
            &transaction,
            "run range",
            "select count(*) from RunRange where RunRange_Identity = ?",
            id,
        )?;
        transaction.execute("delete from Assignment where RunRange_Identity = ?", params![sql_id(id)])?;
        transaction.execute("delete from RunRange where RunRange_Identity = ?", params![sql_id(id)])?;
        transaction.commit()?;
        Ok(())
    }

    fn fetch_variations(
        &mut self,
        ctx: &CallContext,
        type_table: Id,
        run: Option<RunNumber>,
        paging: Paging,
    ) -> Result<Vec<Variation>> {
        let connection = self.begin(ctx)?;
        let (take, skip) = limit(paging);
        let mut statement = connection.prepare_cached(&format!(
            "
            select distinct {}
                from Variation v
                join Assignment a
                on a.Variation_Identity = v.Variation_Identity
                join RunRange r
                on r.RunRange_Identity = a.RunRange_Identity
                where a.TypeTable_Identity = ?1
                and (?2 is null or (r.RunMin <= ?2 and r.RunMax >= ?2))
                order by v.Name
                limit ?3 offset ?4
            ",
            VARIATION_COLUMNS
        ))?;
        let variations = statement
            .query_map(params![sql_id(type_table), run, take, skip], variation_from)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(variations)
    }
    fn fetch_all_variations(&mut self, ctx: &CallContext) -> Result<Vec<Variation>> {
        let connection = self.begin(ctx)?;
        let mut statement =
            connection.prepare_cached(&format!("select {} from Variation v order by v.Name", VARIATION_COLUMNS))?;
        let variations = statement
            .query_map([], variation_from)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(variations)
    }
    fn fetch_variation(&mut self, ctx: &CallContext, name: &str) -> Result<Option<Variation>> {
        let connection = self.begin(ctx)?;
        let variation = connection
            .prepare_cached(&format!("select {} from Variation v where v.Name = ?", VARIATION_COLUMNS))?
            .query_row(params![name], variation_from)
            .optional()?;
        Ok(variation)
    }
    fn fetch_variation_by_id(&mut self, ctx: &CallContext, id: Id) -> Result<Option<Variation>> {
        let connection = self.begin(ctx)?;
        let variation = connection
            .prepare_cached(&format!("select {} from Variation v where v.Variation_Identity = ?", VARIATION_COLUMNS))?
            .query_row(params![sql_id(id)], variation_from)
            .optional()?;
        Ok(variation)
    }
    fn create_variation(&mut self, ctx: &CallContext, variation: &Variation) -> Result<Id> {
        let connection = self.begin(ctx)?;
        let taken = connection
            .query_row("select count(*) from Variation where Name = ?", params![variation.name()], |r| {
                r.get::<_, i64>(0)
            })?;
        if taken > 0 {
            return Err(CcdbError::conflict(format!("variation '{}' already exists", variation.name())));
        }
        connection.execute(
            "
            insert into Variation (
                Name,
                Comment,
                Created
            ) values (?, ?, ?)
            ",
            params![variation.name(), variation.comment(), micros(variation.created())],
        )?;
        Ok(from_sql_id(connection.last_insert_rowid()))
    }
    fn update_variation(&mut self, ctx: &CallContext, variation: &Variation) -> Result<()> {
        let connection = self.begin(ctx)?;
        let changed = connection.execute(
            "update Variation set Name = ?, Comment = ? where Variation_Identity = ?",
            params![variation.name(), variation.comment(), sql_id(variation.id())],
        )?;
        if changed == 0 {
            return Err(CcdbError::not_found(format!("variation #{}", variation.id())));
        }
        Ok(())
    }
    fn delete_variation(&mut self, ctx: &CallContext, id: Id) -> Result<()> {
        let connection = self.begin(ctx)?;
        let transaction = connection.transaction()?;
        Self::require(
            &transaction,
            "variation",
            "select count(*) from Variation where Variation_Identity = ?",
            id,
        )?;
        if Self::count(&transaction, "select count(*) from Assignment where Variation_Identity = ?", id)? > 0 {
            return Err(CcdbError::conflict(format!("variation #{} has assignments", id)));
        }
        transaction.execute("delete from Variation where Variation_Identity = ?", params![sql_id(id)])?;
        transaction.commit()?;
        Ok(())
    }
    fn recursive_delete_variation(&mut self, ctx: &CallContext, id: Id) -> Result<()> {
        let connection = self.begin(ctx)?;
        let transaction = connection.transaction()?;
        Self::require(
            &transaction,
            "variation",
            "select count(*) from Variation where Variation_Identity = ?",
            id,
        )?;
        transaction.execute("delete from Assignment where Variation_Identity = ?", params![sql_id(id)])?;
        transaction.execute("delete from Variation where Variation_Identity = ?", params![sql_id(id)])?;
        transaction.commit()?;
        Ok(())
    }

    fn fetch_assignments(&mut self, ctx: &CallContext, filter: &AssignmentFilter) -> Result<Vec<AssignmentRecord>> {
        let connection = self.begin(ctx)?;
        let (take, skip) = limit(filter.paging);
        let mut statement = connection.prepare_cached(&Self::assignment_sql(filter, ASSIGNMENT_COLUMNS, true))?;
        let records = statement
            .query_map(
                params![
                    sql_id(filter.type_table),
                    filter.run_min,
                    filter.run_max,
                    filter.run_range_name.as_deref(),
                    filter.variation.map(sql_id),
                    filter.begin_time.map(micros),
                    filter.end_time.map(micros),
                    take,
                    skip
                ],
                assignment_from,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }
    fn count_assignments(&mut self, ctx: &CallContext, filter: &AssignmentFilter) -> Result<usize> {
        let connection = self.begin(ctx)?;
        let count: i64 = connection
            .prepare_cached(&Self::assignment_sql(filter, "count(*)", false))?
            .query_row(
                params![
                    sql_id(filter.type_table),
                    filter.run_min,
                    filter.run_max,
                    filter.run_range_name.as_deref(),
                    filter.variation.map(sql_id),
                    filter.begin_time.map(micros),
                    filter.end_time.map(micros)
                ],
                |r| r.get(0),
            )?;
        Ok(count as usize)
    }
    fn fetch_assignment_by_id(&mut self, ctx: &CallContext, id: Id) -> Result<Option<AssignmentRecord>> {
        let connection = self.begin(ctx)?;
        let record = connection
            .prepare_cached(&format!(
                "select {} from Assignment a where a.Assignment_Identity = ?",
                ASSIGNMENT_COLUMNS
            ))?
            .query_row(params![sql_id(id)], assignment_from)
            .optional()?;
        Ok(record)
    }
    fn create_assignment(&mut self, ctx: &CallContext, draft: &AssignmentDraft) -> Result<AssignmentRecord> {
        let connection = self.begin(ctx)?;
        let transaction = connection.transaction()?;
        Self::require(
            &transaction,
            "type table",
            "select count(*) from TypeTable where TypeTable_Identity = ?",
            draft.type_table_id,
        )?;
        Self::require(
            &transaction,
            "run range",
            "select count(*) from RunRange where RunRange_Identity = ?",
            draft.run_range_id,
        )?;
        Self::require(
            &transaction,
            "variation",
            "select count(*) from Variation where Variation_Identity = ?",
            draft.variation_id,
        )?;
        let version: u32 = transaction.query_row(
            "
            select coalesce(max(Version), 0) + 1
                from Assignment
                where TypeTable_Identity = ? and RunRange_Identity = ? and Variation_Identity = ?
            ",
            params![
                sql_id(draft.type_table_id),
                sql_id(draft.run_range_id),
                sql_id(draft.variation_id)
            ],
            |r| r.get(0),
        )?;
        let created = match draft.created {
            Some(created) => created,
            None => {
                let last: Option<i64> = transaction.query_row("select max(Created) from Assignment", [], |r| r.get(0))?;
                let last = last.map(|l| from_micros(0, l)).transpose()?;
                next_timestamp(last)
            }
        };
        transaction.execute(
            "
            insert into Assignment (
                TypeTable_Identity,
                RunRange_Identity,
                Variation_Identity,
                Version,
                Created,
                Comment,
                Blob
            ) values (?, ?, ?, ?, ?, ?, ?)
            ",
            params![
                sql_id(draft.type_table_id),
                sql_id(draft.run_range_id),
                sql_id(draft.variation_id),
                version,
                micros(created),
                draft.comment,
                draft.blob
            ],
        )?;
        let id = from_sql_id(transaction.last_insert_rowid());
        transaction.commit()?;
        Ok(AssignmentRecord {
            id,
            type_table_id: draft.type_table_id,
            run_range_id: draft.run_range_id,
            variation_id: draft.variation_id,
            version,
            created,
            comment: draft.comment.clone(),
            blob: draft.blob.clone(),
        })
    }
    fn update_assignment(&mut self, ctx: &CallContext, id: Id, comment: &str) -> Result<()> {
        let connection = self.begin(ctx)?;
        let changed = connection.execute(
            "update Assignment set Comment = ? where Assignment_Identity = ?",
            params![comment, sql_id(id)],
        )?;
        if changed == 0 {
            return Err(CcdbError::not_found(format!("assignment #{}", id)));
        }
        Ok(())
    }
    fn delete_assignment(&mut self, ctx: &CallContext, id: Id) -> Result<()> {
        let connection = self.begin(ctx)?;
        let changed = connection.execute("delete from Assignment where Assignment_Identity = ?", params![sql_id(id)])?;
        if changed == 0 {
            return Err(CcdbError::not_found(format!("assignment #{}", id)));
        }
        Ok(())
    }
}
