use ccdb::construct::{
    Paging, RunRange, TypeTable, Wildcard, combine_path, extract_directory, extract_object_name,
    normalize_path, validate_name,
};
use ccdb::datatype::{ColumnType, Value};
use ccdb::error::CcdbError;
use ccdb::table::Table;

#[test]
fn names() {
    assert!(validate_name("test_table"));
    assert!(validate_name("ECAL-gains_2"));
    assert!(!validate_name(""));
    assert!(!validate_name("has space"));
    assert!(!validate_name("a/b"));
    assert!(!validate_name("tab\there"));
    assert!(!validate_name("bell\u{7}"));
    assert!(!validate_name("dot.ted"));
}

#[test]
fn paths() {
    assert_eq!(normalize_path("test//test_vars/"), "/test/test_vars");
    assert_eq!(normalize_path(""), "/");
    assert_eq!(extract_directory("/test/test_vars/test_table"), "/test/test_vars");
    assert_eq!(extract_directory("/test_table"), "/");
    assert_eq!(extract_object_name("/test/test_vars/test_table"), "test_table");
    assert_eq!(combine_path("/", "test"), "/test");
    assert_eq!(combine_path("/test/", "/test_vars"), "/test/test_vars");
}

#[test]
fn wildcards_and_paging() {
    let pattern = Wildcard::new("test_*").expect("pattern");
    assert!(pattern.is_match("test_table"));
    assert!(!pattern.is_match("my_test_table"));
    let single = Wildcard::new("t?st").expect("pattern");
    assert!(single.is_match("test"));
    assert!(!single.is_match("teest"));
    // regex characters are literal
    assert!(!Wildcard::new("a.c").expect("pattern").is_match("abc"));

    let items: Vec<i32> = (0..10).collect();
    assert_eq!(Paging::all().apply(items.clone()).len(), 10);
    assert_eq!(Paging::new(3, 2).apply(items.clone()), vec![2, 3, 4]);
    assert_eq!(Paging::new(0, 8).apply(items), vec![8, 9]);
}

#[test]
fn unknown_column_types_become_double() {
    assert_eq!(ColumnType::from_name("int"), ColumnType::Int);
    assert_eq!(ColumnType::from_name("ULONG"), ColumnType::ULong);
    assert_eq!(ColumnType::from_name(""), ColumnType::Double);
    assert_eq!(ColumnType::from_name("float128"), ColumnType::Double);

    let table = TypeTable::new("t", 1, 2, &[("a", "mystery"), ("b", "string")], "").expect("table");
    assert_eq!(table.columns()[0].column_type(), ColumnType::Double);
    assert_eq!(table.column("b").map(|c| c.order()), Some(1));
}

#[test]
fn type_table_shape_is_validated() {
    assert!(matches!(
        TypeTable::new("t", 1, 0, &[("a", "int")], ""),
        Err(CcdbError::ValidationFailed(_))
    ));
    assert!(matches!(TypeTable::new("t", 1, 1, &[], ""), Err(CcdbError::ValidationFailed(_))));
    assert!(matches!(
        TypeTable::new("t", 1, 1, &[("a", "int"), ("a", "int")], ""),
        Err(CcdbError::ValidationFailed(_))
    ));
    assert!(matches!(
        TypeTable::new("bad name", 1, 1, &[("a", "int")], ""),
        Err(CcdbError::ValidationFailed(_))
    ));
}

#[test]
fn run_ranges_are_inclusive() {
    let range = RunRange::new(10, 20, None, "").expect("range");
    assert!(range.contains(10));
    assert!(range.contains(20));
    assert!(!range.contains(21));
    assert!(range.covers(12, 20));
    assert!(!range.covers(5, 15));
    assert!(RunRange::new(20, 10, None, "").is_err());
}

#[test]
fn typed_cells() {
    let table = Table::parse("1 -2 3.5 true yes\n0 7 1e3 FALSE \"two words\"", 2, 5).expect("table");
    assert_eq!(table.value::<i32>(0, 1).expect("int"), -2);
    assert_eq!(table.value::<u32>(1, 1).expect("uint"), 7);
    assert_eq!(table.value::<f64>(1, 2).expect("double"), 1000.0);
    assert!(table.value::<bool>(0, 3).expect("bool"));
    assert!(!table.value::<bool>(1, 3).expect("bool"));
    assert!(!table.value::<bool>(1, 0).expect("bool"));
    assert_eq!(table.value::<String>(1, 4).expect("string"), "two words");
    assert!(matches!(table.value::<bool>(0, 4), Err(CcdbError::Parse { .. })));
    assert!(matches!(table.value::<u32>(0, 1), Err(CcdbError::Parse { .. })));
    assert!(matches!(table.value::<i32>(2, 0), Err(CcdbError::NotFound(_))));

    let schema = TypeTable::new(
        "t",
        1,
        2,
        &[("a", "int"), ("b", "int"), ("c", "double"), ("d", "bool"), ("e", "string")],
        "",
    )
    .expect("schema");
    let row = table.typed_row(0, schema.columns()).expect("row");
    assert_eq!(row[0], Value::Int(1));
    assert_eq!(row[2], Value::Double(3.5));
    assert_eq!(row[3], Value::Bool(true));
    assert_eq!(row[4], Value::String(String::from("yes")));
    let named = table.row_map(1, schema.columns()).expect("map");
    assert_eq!(named.get("e").map(String::as_str), Some("two words"));
}

#[test]
fn wrong_cell_count_is_rejected() {
    assert!(matches!(Table::parse("1 2 3", 2, 2), Err(CcdbError::ValidationFailed(_))));
    assert!(matches!(Table::parse("1 2", 1, 0), Err(CcdbError::ValidationFailed(_))));
}
