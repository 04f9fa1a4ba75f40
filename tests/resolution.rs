use chrono::TimeDelta;

use ccdb::construct::{Paging, SortOrder};
use ccdb::error::CcdbError;
use ccdb::resolve::{AssignmentQuery, NewAssignment, Query};
use ccdb::session::Session;
use ccdb::settings::Settings;

const TABLE: &str = "/test/test_vars/test_table";

fn prepared() -> Session {
    prepared_on("memory")
}

fn prepared_on(connection: &str) -> Session {
    let settings = Settings {
        connection: connection.to_string(),
        ..Settings::default()
    };
    let session = Session::open(&settings).expect("session");
    session.make_directory("test", "/", "").expect("directory");
    session.make_directory("test_vars", "/test", "").expect("subdirectory");
    session
        .create_type_table(
            "test_table",
            "/test/test_vars",
            2,
            &[("x", "double"), ("y", "int"), ("name", "string")],
            "test constants",
        )
        .expect("type table");
    session
}

#[test]
fn version_time_and_latest() {
    let session = prepared();
    let v1 = session
        .create_assignment(&NewAssignment::from_text(TABLE, "1.0 2 a\n3.0 4 b").runs(0, 100))
        .expect("v1");
    let v2 = session
        .create_assignment(&NewAssignment::from_text(TABLE, "5.0 6 c\n7.0 8 d").runs(0, 100))
        .expect("v2");
    assert_eq!(v1.version(), 1);
    assert_eq!(v2.version(), 2);
    assert!(v2.created() > v1.created());

    let first = session.resolve(&Query::new(TABLE, 50).version(1)).expect("by version");
    assert_eq!(first.table().expect("table").value::<f64>(0, 0).expect("x"), 1.0);

    let then = session.resolve(&Query::new(TABLE, 50).as_of(v1.created())).expect("by time");
    assert_eq!(then.version(), 1);
    assert_eq!(then.table().expect("table").cell(1, 2), Some("b"));

    let latest = session.resolve(&Query::new(TABLE, 50)).expect("latest");
    assert_eq!(latest.version(), 2);
    assert_eq!(latest.table().expect("table").value::<i32>(1, 1).expect("y"), 8);

    let missing = session.resolve(&Query::new(TABLE, 50).version(3));
    assert!(matches!(missing, Err(CcdbError::NotFound(_))));
    let before = session.resolve(&Query::new(TABLE, 50).as_of(v1.created() - TimeDelta::seconds(1)));
    assert!(matches!(before, Err(CcdbError::NotFound(_))));
}

#[test]
fn resolution_is_deterministic() {
    let session = prepared();
    for i in 0..5 {
        session
            .create_assignment(&NewAssignment::from_text(TABLE, &format!("{i} {i} v{i}\n{i} {i} w{i}")).runs(0, 10))
            .expect("assignment");
    }
    let a = session.resolve(&Query::new(TABLE, 5)).expect("first");
    let b = session.resolve(&Query::new(TABLE, 5)).expect("second");
    assert_eq!(a.assignment().id(), b.assignment().id());
    assert_eq!(a.version(), 5);
    assert_eq!(a.table().expect("table").cell(0, 2), Some("v4"));
}

#[test]
fn run_bounds_are_inclusive() {
    let session = prepared();
    session
        .create_assignment(&NewAssignment::from_text(TABLE, "1 1 a\n2 2 b").runs(10, 20))
        .expect("assignment");
    assert!(session.resolve(&Query::new(TABLE, 10)).is_ok());
    assert!(session.resolve(&Query::new(TABLE, 20)).is_ok());
    assert!(matches!(session.resolve(&Query::new(TABLE, 21)), Err(CcdbError::NotFound(_))));
    assert!(matches!(session.resolve(&Query::new(TABLE, 9)), Err(CcdbError::NotFound(_))));
}

#[test]
fn later_overlapping_range_wins() {
    let session = prepared();
    session
        .create_assignment(&NewAssignment::from_text(TABLE, "1 1 wide\n1 1 wide").runs(0, 100))
        .expect("wide");
    session
        .create_assignment(&NewAssignment::from_text(TABLE, "2 2 narrow\n2 2 narrow").runs(50, 150))
        .expect("narrow");
    let inside = session.resolve(&Query::new(TABLE, 75)).expect("overlap");
    assert_eq!(inside.table().expect("table").cell(0, 2), Some("narrow"));
    let outside = session.resolve(&Query::new(TABLE, 25)).expect("wide only");
    assert_eq!(outside.table().expect("table").cell(0, 2), Some("wide"));
    // each triple is versioned on its own
    assert_eq!(inside.version(), 1);
    assert_eq!(outside.version(), 1);
}

#[test]
fn variations_are_separate_tracks() {
    let session = prepared();
    session.create_variation("mc", "simulation").expect("variation");
    session
        .create_assignment(&NewAssignment::from_text(TABLE, "1 1 data\n1 1 data"))
        .expect("default");
    session
        .create_assignment(&NewAssignment::from_text(TABLE, "2 2 sim\n2 2 sim").variation("mc"))
        .expect("mc");

    let data = session.resolve(&Query::new(TABLE, 1000)).expect("default");
    assert_eq!(data.assignment().variation().name(), "default");
    assert_eq!(data.table().expect("table").cell(0, 2), Some("data"));
    let sim = session.resolve(&Query::new(TABLE, 1000).variation("mc")).expect("mc");
    assert_eq!(sim.table().expect("table").cell(0, 2), Some("sim"));

    let unknown = session.resolve(&Query::new(TABLE, 1000).variation("nope"));
    assert!(matches!(unknown, Err(CcdbError::NotFound(_))));
    let used: Vec<String> = session
        .variations(TABLE, Some(5), Paging::all())
        .expect("variations")
        .iter()
        .map(|v| v.name().to_string())
        .collect();
    assert_eq!(used.len(), 2);
    assert!(used.contains(&String::from("mc")));
}

#[test]
fn unknown_paths() {
    let session = prepared();
    let missing_table = session.resolve(&Query::new("/test/test_vars/nothing", 1));
    assert!(matches!(missing_table, Err(CcdbError::NotFound(_))));
    let missing_directory = session.resolve(&Query::new("/nowhere/test_table", 1));
    assert!(matches!(missing_directory, Err(CcdbError::NotFound(_))));
    // a table without assignments
    assert!(matches!(session.resolve(&Query::new(TABLE, 1)), Err(CcdbError::NotFound(_))));
}

#[test]
fn columns_on_request() {
    let session = prepared();
    session
        .create_assignment(&NewAssignment::from_text(TABLE, "1.5 2 \"a b\"\n3.5 4 c"))
        .expect("assignment");
    let plain = session.resolve(&Query::new(TABLE, 0)).expect("plain");
    assert!(plain.columns().is_none());
    let described = session.resolve(&Query::new(TABLE, 0).with_columns()).expect("described");
    let columns = described.columns().expect("columns");
    let names: Vec<&str> = columns.iter().map(|c| c.name()).collect();
    assert_eq!(names, vec!["x", "y", "name"]);
    let table = described.table().expect("table");
    let map = table.row_map(0, columns).expect("row");
    assert_eq!(map.get("name").map(String::as_str), Some("a b"));

    let report = described.report().expect("report");
    assert_eq!(report.path, TABLE);
    assert_eq!(report.rows[1], vec!["3.5", "4", "c"]);
}

#[test]
fn request_strings() {
    let session = prepared();
    session.create_variation("mc", "").expect("variation");
    session
        .create_assignment(&NewAssignment::from_text(TABLE, "1 1 a\n1 1 a").runs(0, 100))
        .expect("default");
    session
        .create_assignment(&NewAssignment::from_text(TABLE, "2 2 b\n2 2 b").runs(0, 100).variation("mc"))
        .expect("mc");
    let resolved = session.resolve_request(&format!("{}:50", TABLE)).expect("run only");
    assert_eq!(resolved.table().expect("table").cell(0, 2), Some("a"));
    let resolved = session.resolve_request(&format!("{}::mc", TABLE)).expect("variation only");
    assert_eq!(resolved.table().expect("table").cell(0, 2), Some("b"));
    let resolved = session.resolve_request(&format!("{}:50:mc:2999", TABLE)).expect("with time");
    assert_eq!(resolved.version(), 1);
    let early = session.resolve_request(&format!("{}:50:mc:2000", TABLE));
    assert!(matches!(early, Err(CcdbError::NotFound(_))));
    let garbage = session.resolve_request(&format!("{}:fifty", TABLE));
    assert!(matches!(garbage, Err(CcdbError::Parse { .. })));
}

#[test]
fn listing_assignments() {
    let session = prepared();
    session.create_run_range(0, 999, Some("all"), "").expect("named range");
    for i in 0..3 {
        session
            .create_assignment(&NewAssignment::from_text(TABLE, &format!("{i} 0 a\n{i} 0 b")).runs(0, 10))
            .expect("assignment");
    }
    session
        .create_assignment(&NewAssignment::from_text(TABLE, "9 0 a\n9 0 b").named_run_range("all"))
        .expect("named");

    let all = session.assignments(TABLE, &AssignmentQuery::new()).expect("all");
    assert_eq!(all.len(), 4);
    assert!(all.windows(2).all(|w| w[0].created() >= w[1].created()));
    let oldest_first = session
        .assignments(TABLE, &AssignmentQuery::new().sort(SortOrder::CreatedAsc))
        .expect("ascending");
    assert_eq!(oldest_first[0].version(), 1);
    assert_eq!(oldest_first[0].run_range().max(), 10);

    let page = session
        .assignments(TABLE, &AssignmentQuery::new().paging(Paging::new(2, 1)))
        .expect("page");
    assert_eq!(page.len(), 2);
    assert_eq!(session.count_assignments(TABLE, &AssignmentQuery::new().paging(Paging::new(1, 0))).expect("count"), 4);
    assert_eq!(session.count_assignments(TABLE, &AssignmentQuery::new().run(500)).expect("count"), 1);
    assert_eq!(
        session.count_assignments(TABLE, &AssignmentQuery::new().run_range_name("all")).expect("count"),
        1
    );

    let ranges = session.run_ranges(TABLE, None, Paging::all()).expect("ranges");
    assert_eq!(ranges.len(), 2);
    let by_id = session.assignment(all[0].id()).expect("by id");
    assert_eq!(by_id.id(), all[0].id());
}

#[test]
fn blobs_are_parsed_once() {
    let session = prepared();
    let created = session
        .create_assignment(&NewAssignment::from_text(TABLE, "1 2 a\n3 4 b"))
        .expect("assignment");
    let resolved = session.resolve(&Query::new(TABLE, 0)).expect("resolve");
    assert!(std::sync::Arc::ptr_eq(resolved.assignment(), &created));
    let table = resolved.table().expect("table");
    assert!(resolved.assignment().is_parsed());
    assert!(std::ptr::eq(table, resolved.table().expect("again")));
}

#[test]
fn automatic_times_follow_explicit_future_times() {
    for connection in ["memory", "sqlite::memory:"] {
        let session = prepared_on(connection);
        let ahead = chrono::Utc::now() + TimeDelta::days(1);
        let v1 = session
            .create_assignment(&NewAssignment::from_text(TABLE, "1 2 a\n3 4 b").created(ahead))
            .expect("v1");
        let v2 = session
            .create_assignment(&NewAssignment::from_text(TABLE, "5 6 c\n7 8 d"))
            .expect("v2");
        assert!(v2.created() > v1.created(), "{connection}");
        let latest = session.resolve(&Query::new(TABLE, 0)).expect("latest");
        assert_eq!(latest.assignment().id(), v2.id(), "{connection}");
    }
}
