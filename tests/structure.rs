use ccdb::construct::{Directory, Paging, TypeTable};
use ccdb::error::CcdbError;
use ccdb::resolve::{NewAssignment, Query};
use ccdb::session::Session;

fn prepared() -> Session {
    let session = Session::in_memory().expect("session");
    session.make_directory("test", "/", "").expect("directory");
    session.make_directory("test_vars", "/test", "").expect("subdirectory");
    session.make_directory("other_vars", "/test", "").expect("subdirectory");
    for name in ["test_table", "test_table2", "misc"] {
        session
            .create_type_table(name, "/test/test_vars", 1, &[("v", "int")], "")
            .expect("type table");
    }
    session
}

#[test]
fn tree_navigation() {
    let session = prepared();
    let root = session.root_directory();
    assert!(root.value().is_root());
    assert_eq!(root.value().path(), "/");
    let test = session.directory("/test").expect("directory");
    let children = session.subdirectories(&test).expect("children");
    let mut names: Vec<String> = children.iter().map(|d| d.value().name().to_string()).collect();
    names.sort();
    assert_eq!(names, vec!["other_vars", "test_vars"]);
    assert_eq!(session.directory("/test/test_vars/").expect("trailing slash").value().path(), "/test/test_vars");
    assert!(matches!(session.directory("/nothing"), Err(CcdbError::NotFound(_))));
}

#[test]
fn directory_names_and_duplicates() {
    let session = prepared();
    assert!(matches!(
        session.make_directory("bad name", "/", ""),
        Err(CcdbError::ValidationFailed(_))
    ));
    assert!(matches!(session.make_directory("test", "/", ""), Err(CcdbError::Conflict(_))));
    assert!(matches!(session.make_directory("x", "/missing", ""), Err(CcdbError::NotFound(_))));
    // the same name is fine under another parent
    assert!(session.make_directory("test", "/test", "").is_ok());
}

#[test]
fn cached_handles_go_stale_after_a_directory_change() {
    let session = prepared();
    let root = session.root_directory();
    let test = session.directory("/test").expect("directory");
    let table = session.type_table("/test/test_vars/test_table", false).expect("table");
    assert!(session.checked(&test).is_ok());

    session.make_directory("new_dir", "/", "").expect("new directory");

    assert!(matches!(session.checked(&test), Err(CcdbError::StaleHandle(_))));
    assert!(matches!(session.subdirectories(&test), Err(CcdbError::StaleHandle(_))));
    assert!(matches!(session.checked(&table), Err(CcdbError::StaleHandle(_))));
    assert!(matches!(session.load_columns(&table), Err(CcdbError::StaleHandle(_))));
    assert_eq!(session.last_error().map(|e| e.code()), Some(50));
    // the root belongs to every tree
    assert!(session.checked(&root).is_ok());
    // fetching again gives a fresh handle
    let fresh = session.directory("/test").expect("again");
    assert!(session.checked(&fresh).is_ok());
}

#[test]
fn released_handles_survive() {
    let session = prepared();
    let found = session
        .search_type_tables("test_*", None, false, Paging::all())
        .expect("search");
    assert_eq!(found.len(), 2);
    assert!(found.iter().all(|t| t.is_cached()));
    let owned = session.release_all(found).expect("release");
    assert!(owned.iter().all(|t| !t.is_cached()));
    let id = owned[0].value().id();
    assert!(!session.is_owned::<TypeTable>(id));

    session.make_directory("new_dir", "/", "").expect("new directory");
    for table in &owned {
        let table = session.checked(table).expect("owned handle");
        assert!(table.name().starts_with("test_"));
    }

    // handing it back to the cache tags it with the new generation
    let first = owned.into_iter().next().expect("first");
    let back = session.acquire_ownership(first).expect("acquire");
    assert!(back.is_cached());
    assert!(session.is_owned::<TypeTable>(id));
    assert!(session.checked(&back).is_ok());
}

#[test]
fn acquiring_a_vanished_directory_is_stale() {
    let session = prepared();
    let doomed = session.directory("/test/other_vars").expect("directory");
    let owned = session.release_ownership(doomed).expect("release");
    session.delete_directory("/test/other_vars").expect("delete");
    assert!(session.checked(&owned).is_ok());
    assert!(matches!(session.acquire_ownership(owned), Err(CcdbError::StaleHandle(_))));
}

#[test]
fn searching_directories() {
    let session = prepared();
    let all_vars = session.search_directories("*_vars", None, Paging::all()).expect("search");
    let paths: Vec<&str> = all_vars.iter().map(|d| d.value().path()).collect();
    assert_eq!(paths, vec!["/test/other_vars", "/test/test_vars"]);
    let below = session.search_directories("*", Some("/test"), Paging::new(1, 1)).expect("paged");
    assert_eq!(below.len(), 1);
    assert_eq!(below[0].value().path(), "/test/test_vars");
    let in_dir = session
        .search_type_tables("*", Some("/test/test_vars"), true, Paging::new(2, 0))
        .expect("tables");
    assert_eq!(in_dir.len(), 2);
    assert_eq!(in_dir[0].value().name(), "misc");
    assert_eq!(in_dir[0].value().path(), "/test/test_vars/misc");
}

#[test]
fn renaming_and_moving_directories() {
    let session = prepared();
    session
        .create_assignment(&NewAssignment::from_text("/test/test_vars/test_table", "42"))
        .expect("assignment");
    let mut renamed: Directory = (**session.directory("/test/test_vars").expect("directory").value()).clone();
    renamed.set_name("renamed_vars").expect("name");
    session.update_directory(&renamed).expect("rename");
    assert!(matches!(session.directory("/test/test_vars"), Err(CcdbError::NotFound(_))));
    let resolved = session
        .resolve(&Query::new("/test/renamed_vars/test_table", 1))
        .expect("resolve under new path");
    assert_eq!(resolved.table().expect("table").value::<i32>(0, 0).expect("v"), 42);
    assert_eq!(resolved.assignment().type_table().path(), "/test/renamed_vars/test_table");

    let test = session.directory("/test").expect("test").value().id();
    let mut looped: Directory = (**session.directory("/test").expect("directory").value()).clone();
    let child = session.directory("/test/renamed_vars").expect("child").value().id();
    looped.set_parent_id(child);
    assert!(matches!(session.update_directory(&looped), Err(CcdbError::ValidationFailed(_))));

    let mut moved: Directory = (**session.directory("/test/other_vars").expect("directory").value()).clone();
    moved.set_parent_id(0);
    session.update_directory(&moved).expect("move to root");
    assert_eq!(session.directory("/other_vars").expect("moved").value().parent_id(), 0);
    assert!(session.directory("/test").expect("test").value().id() == test);

    let root = (**session.root_directory().value()).clone();
    assert!(matches!(session.update_directory(&root), Err(CcdbError::ValidationFailed(_))));
}

#[test]
fn moving_type_tables() {
    let session = prepared();
    let mut table: TypeTable = (**session.type_table("/test/test_vars/misc", false).expect("table").value()).clone();
    let target = session.directory("/test/other_vars").expect("directory").value().id();
    table.set_directory_id(target);
    table.set_comment("moved");
    session.update_type_table(&table).expect("move");
    assert!(matches!(session.type_table("/test/test_vars/misc", false), Err(CcdbError::NotFound(_))));
    let moved = session.type_table("/test/other_vars/misc", false).expect("moved");
    assert_eq!(moved.value().comment(), "moved");
    assert_eq!(session.count_type_tables("/test/test_vars").expect("count"), 2);
}
