use ccdb::construct::Paging;
use ccdb::error::CcdbError;
use ccdb::resolve::{AssignmentQuery, NewAssignment, Query};
use ccdb::session::Session;

const TABLE: &str = "/calib/gains";

fn prepared() -> Session {
    let session = Session::in_memory().expect("session");
    session.make_directory("calib", "/", "").expect("directory");
    session
        .create_type_table("gains", "/calib", 2, &[("channel", "int"), ("gain", "double")], "")
        .expect("type table");
    session
}

fn rows(cells: &[&[&str]]) -> Vec<Vec<String>> {
    cells
        .iter()
        .map(|r| r.iter().map(|c| c.to_string()).collect())
        .collect()
}

fn nothing_written(session: &Session) -> bool {
    session.count_assignments(TABLE, &AssignmentQuery::new()).expect("count") == 0
}

#[test]
fn wrong_row_count_is_rejected() {
    let session = prepared();
    let result = session.create_assignment(&NewAssignment::from_rows(TABLE, rows(&[&["1", "0.5"]])));
    assert!(matches!(result, Err(CcdbError::ValidationFailed(_))));
    assert!(nothing_written(&session));
}

#[test]
fn wrong_column_count_is_rejected() {
    let session = prepared();
    let result = session.create_assignment(&NewAssignment::from_rows(
        TABLE,
        rows(&[&["1", "0.5"], &["2", "0.6", "extra"]]),
    ));
    assert!(matches!(result, Err(CcdbError::ValidationFailed(_))));
    let result = session.create_assignment(&NewAssignment::from_text(TABLE, "1 0.5 2"));
    assert!(matches!(result, Err(CcdbError::ValidationFailed(_))));
    assert!(nothing_written(&session));
}

#[test]
fn unknown_targets_write_nothing() {
    let session = prepared();
    let data = "1 0.5\n2 0.6";
    let missing_table = session.create_assignment(&NewAssignment::from_text("/calib/nothing", data));
    assert!(matches!(missing_table, Err(CcdbError::NotFound(_))));
    let missing_variation = session.create_assignment(&NewAssignment::from_text(TABLE, data).variation("nope"));
    assert!(matches!(missing_variation, Err(CcdbError::NotFound(_))));
    let missing_range = session.create_assignment(&NewAssignment::from_text(TABLE, data).named_run_range("nope"));
    assert!(matches!(missing_range, Err(CcdbError::NotFound(_))));
    let inverted = session.create_assignment(&NewAssignment::from_text(TABLE, data).runs(10, 5));
    assert!(matches!(inverted, Err(CcdbError::ValidationFailed(_))));
    assert!(nothing_written(&session));
    // the rejected bounds did not leave a run range behind
    assert!(matches!(session.run_range(10, 5, None), Err(CcdbError::NotFound(_))));
}

#[test]
fn unwritable_cells_are_rejected() {
    let session = prepared();
    let result = session.create_assignment(&NewAssignment::from_rows(
        TABLE,
        rows(&[&["1", "0.5"], &["2", "ends with \\"]]),
    ));
    assert!(matches!(result, Err(CcdbError::ValidationFailed(_))));
    assert!(nothing_written(&session));
}

#[test]
fn cells_round_trip_through_the_blob() {
    let session = prepared();
    let written = rows(&[&["1", "John Smith"], &["", "say \"hi\" #1"]]);
    session
        .create_assignment(&NewAssignment::from_rows(TABLE, written.clone()))
        .expect("assignment");
    let resolved = session.resolve(&Query::new(TABLE, 7)).expect("resolve");
    assert_eq!(resolved.table().expect("table").to_rows(), written);
}

#[test]
fn bounds_reuse_one_unnamed_range() {
    let session = prepared();
    let first = session
        .create_assignment(&NewAssignment::from_text(TABLE, "1 0.5\n2 0.6").runs(10, 20).comment("first"))
        .expect("first");
    let second = session
        .create_assignment(&NewAssignment::from_text(TABLE, "1 0.7\n2 0.8").runs(10, 20))
        .expect("second");
    assert_eq!(first.run_range().id(), second.run_range().id());
    assert_eq!(second.version(), 2);
    assert_eq!(first.comment(), "first");
    let range = session.run_range(10, 20, None).expect("implicit range");
    assert_eq!(range.id(), first.run_range().id());
    assert_eq!(session.run_ranges(TABLE, None, Paging::all()).expect("ranges").len(), 1);
    assert_eq!(session.get_or_create_run_range(10, 20).expect("existing").id(), range.id());
}

#[test]
fn named_run_ranges() {
    let session = prepared();
    let named = session.create_run_range(100, 200, Some("period-1"), "first period").expect("range");
    assert_eq!(session.run_range_by_name("period-1").expect("by name").id(), named.id());
    let duplicate = session.create_run_range(0, 1, Some("period-1"), "");
    assert!(matches!(duplicate, Err(CcdbError::Conflict(_))));

    let assignment = session
        .create_assignment(&NewAssignment::from_text(TABLE, "1 0.5\n2 0.6").named_run_range("period-1"))
        .expect("assignment");
    assert_eq!(assignment.run_range().name(), Some("period-1"));
    assert_eq!(assignment.version(), 1);
    assert!(session.resolve(&Query::new(TABLE, 150)).is_ok());
    assert!(session.resolve(&Query::new(TABLE, 99)).is_err());
}

#[test]
fn explicit_creation_time() {
    let session = prepared();
    let past = chrono::DateTime::parse_from_rfc3339("2020-01-01T00:00:00Z")
        .expect("time")
        .with_timezone(&chrono::Utc);
    let imported = session
        .create_assignment(&NewAssignment::from_text(TABLE, "1 0.5\n2 0.6").created(past))
        .expect("imported");
    assert_eq!(imported.created(), past);
    let fresh = session
        .create_assignment(&NewAssignment::from_text(TABLE, "1 0.7\n2 0.8"))
        .expect("fresh");
    let then = session
        .resolve(&Query::new(TABLE, 0).as_of(past + chrono::TimeDelta::days(1)))
        .expect("as of 2020");
    assert_eq!(then.assignment().id(), imported.id());
    assert_eq!(session.resolve(&Query::new(TABLE, 0)).expect("latest").assignment().id(), fresh.id());
}

#[test]
fn comments_can_change() {
    let session = prepared();
    let assignment = session
        .create_assignment(&NewAssignment::from_text(TABLE, "1 0.5\n2 0.6").comment("draft"))
        .expect("assignment");
    session.update_assignment(assignment.id(), "final").expect("update");
    assert_eq!(session.assignment(assignment.id()).expect("reread").comment(), "final");
    assert!(matches!(session.update_assignment(9999, "x"), Err(CcdbError::NotFound(_))));
}

#[test]
fn type_table_rules() {
    let session = prepared();
    let duplicate = session.create_type_table("gains", "/calib", 1, &[("a", "int")], "");
    assert!(matches!(duplicate, Err(CcdbError::Conflict(_))));
    let nowhere = session.create_type_table("other", "/missing", 1, &[("a", "int")], "");
    assert!(matches!(nowhere, Err(CcdbError::NotFound(_))));
    let bad_column = session.create_type_table("other", "/calib", 1, &[("a b", "int")], "");
    assert!(matches!(bad_column, Err(CcdbError::ValidationFailed(_))));

    let table = session.type_table(TABLE, false).expect("table");
    assert!(!table.value().columns_loaded());
    let columns = session.load_columns(&table).expect("columns");
    assert_eq!(columns.len(), 2);
    assert_eq!(columns[1].name(), "gain");
    assert_eq!(session.count_type_tables("/calib").expect("count"), 1);
    assert_eq!(session.type_tables("/calib", true).expect("tables")[0].value().columns().len(), 2);
}
