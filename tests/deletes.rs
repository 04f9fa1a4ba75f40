use ccdb::error::CcdbError;
use ccdb::resolve::{AssignmentQuery, NewAssignment, Query};
use ccdb::session::Session;

const TABLE: &str = "/test/test_vars/test_table";

fn prepared() -> Session {
    let session = Session::in_memory().expect("session");
    session.make_directory("test", "/", "").expect("directory");
    session.make_directory("test_vars", "/test", "").expect("subdirectory");
    session
        .create_type_table("test_table", "/test/test_vars", 1, &[("v", "double")], "")
        .expect("type table");
    session.create_variation("mc", "").expect("variation");
    session
}

#[test]
fn variation_in_use_cannot_be_deleted() {
    let session = prepared();
    session
        .create_assignment(&NewAssignment::from_text(TABLE, "1.0").variation("mc"))
        .expect("assignment");
    assert!(matches!(session.delete_variation("mc"), Err(CcdbError::Conflict(_))));
    assert!(session.variation("mc").is_ok());

    session.create_variation("unused", "").expect("variation");
    session.delete_variation("unused").expect("delete");
    assert!(matches!(session.variation("unused"), Err(CcdbError::NotFound(_))));
}

#[test]
fn recursive_variation_delete_takes_its_assignments() {
    let session = prepared();
    session
        .create_assignment(&NewAssignment::from_text(TABLE, "1.0").variation("mc"))
        .expect("mc");
    session.create_assignment(&NewAssignment::from_text(TABLE, "2.0")).expect("default");
    session.recursive_delete_variation("mc").expect("delete");
    assert!(matches!(session.variation("mc"), Err(CcdbError::NotFound(_))));
    assert_eq!(session.count_assignments(TABLE, &AssignmentQuery::new()).expect("count"), 1);
    assert!(session.resolve(&Query::new(TABLE, 0)).is_ok());
}

#[test]
fn default_variation_is_protected() {
    let session = prepared();
    assert!(matches!(session.delete_variation("default"), Err(CcdbError::ValidationFailed(_))));
    assert!(matches!(
        session.recursive_delete_variation("default"),
        Err(CcdbError::ValidationFailed(_))
    ));
    let mut renamed = (*session.variation("default").expect("default")).clone();
    renamed.set_name("other").expect("name");
    assert!(matches!(session.update_variation(&renamed), Err(CcdbError::ValidationFailed(_))));

    let mut mc = (*session.variation("mc").expect("mc")).clone();
    mc.set_comment("simulation");
    session.update_variation(&mc).expect("comment");
    assert_eq!(session.variation("mc").expect("mc").comment(), "simulation");
    let names: Vec<String> = session
        .all_variations()
        .expect("all")
        .iter()
        .map(|v| v.name().to_string())
        .collect();
    assert!(names.contains(&String::from("default")));
    assert!(names.contains(&String::from("mc")));
}

#[test]
fn directories_with_content() {
    let session = prepared();
    session.create_assignment(&NewAssignment::from_text(TABLE, "1.0")).expect("assignment");
    assert!(matches!(session.delete_directory("/test"), Err(CcdbError::Conflict(_))));
    assert!(matches!(session.delete_directory("/test/test_vars"), Err(CcdbError::Conflict(_))));
    assert!(matches!(session.delete_directory("/"), Err(CcdbError::ValidationFailed(_))));
    assert!(matches!(
        session.recursive_delete_directory("/"),
        Err(CcdbError::ValidationFailed(_))
    ));

    session.recursive_delete_directory("/test").expect("recursive delete");
    assert!(matches!(session.directory("/test"), Err(CcdbError::NotFound(_))));
    assert!(matches!(session.directory("/test/test_vars"), Err(CcdbError::NotFound(_))));
    assert!(matches!(session.resolve(&Query::new(TABLE, 0)), Err(CcdbError::NotFound(_))));
    // the name is free again
    session.make_directory("test", "/", "").expect("recreate");
}

#[test]
fn type_tables_with_assignments() {
    let session = prepared();
    let assignment = session.create_assignment(&NewAssignment::from_text(TABLE, "1.0")).expect("assignment");
    assert!(matches!(session.delete_type_table(TABLE), Err(CcdbError::Conflict(_))));
    session.delete_assignment(assignment.id()).expect("delete assignment");
    assert!(matches!(session.assignment(assignment.id()), Err(CcdbError::NotFound(_))));
    session.delete_type_table(TABLE).expect("delete table");
    assert!(matches!(session.type_table(TABLE, false), Err(CcdbError::NotFound(_))));

    session
        .create_type_table("test_table", "/test/test_vars", 1, &[("v", "double")], "")
        .expect("recreate");
    session.create_assignment(&NewAssignment::from_text(TABLE, "2.0")).expect("assignment");
    session.recursive_delete_type_table(TABLE).expect("recursive delete");
    assert_eq!(session.count_type_tables("/test/test_vars").expect("count"), 0);
}

#[test]
fn run_ranges_with_assignments() {
    let session = prepared();
    let assignment = session
        .create_assignment(&NewAssignment::from_text(TABLE, "1.0").runs(5, 6))
        .expect("assignment");
    let range = assignment.run_range().id();
    assert!(matches!(session.delete_run_range(range), Err(CcdbError::Conflict(_))));
    session.recursive_delete_run_range(range).expect("recursive delete");
    assert!(matches!(session.run_range(5, 6, None), Err(CcdbError::NotFound(_))));
    assert!(matches!(session.resolve(&Query::new(TABLE, 5)), Err(CcdbError::NotFound(_))));

    let spare = session.create_run_range(1, 2, None, "").expect("range");
    session.delete_run_range(spare.id()).expect("delete");
    assert!(matches!(session.delete_run_range(spare.id()), Err(CcdbError::NotFound(_))));
}

#[test]
fn run_range_bounds_can_change() {
    let session = prepared();
    let assignment = session
        .create_assignment(&NewAssignment::from_text(TABLE, "1.0").runs(0, 10))
        .expect("assignment");
    let mut range = (*assignment.run_range()).clone();
    range.set_bounds(0, 20).expect("bounds");
    session.update_run_range(&range).expect("update");
    assert!(session.resolve(&Query::new(TABLE, 15)).is_ok());
}
