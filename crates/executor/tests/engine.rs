//! End-to-end scenarios through the engine.

use common::{DbError, Rid};
use pretty_assertions::assert_eq;
use testsupport::{name_id_record, name_id_schema, write_page_file, ScratchDb, DB_NAME};
use types::{CompareOp, FieldValue, Value};

fn pairs(raw: &[(&str, &str)]) -> Vec<(String, String)> {
    raw.iter()
        .map(|(a, b)| (a.to_string(), b.to_string()))
        .collect()
}

fn int_rows(db: &mut ScratchDb, rel: &str) -> Vec<i32> {
    db.engine
        .scan_rows(rel)
        .unwrap()
        .rows
        .iter()
        .map(|row| match row[0] {
            Value::Int(v) => v,
            ref other => panic!("expected int, got {other:?}"),
        })
        .collect()
}

/// Statistics of one relation: (num_recs, recs_per_page, num_pages).
fn rel_stats(db: &mut ScratchDb, rel: &str) -> (i32, i32, i32) {
    let info = db.engine.relation_info(rel).unwrap();
    (info.num_recs, info.recs_per_page, info.num_pages)
}

#[test]
fn duplicate_tuples_are_rejected() {
    let mut db = ScratchDb::new();
    db.engine
        .create("r", &pairs(&[("a", "i"), ("b", "s10")]))
        .unwrap();
    db.engine
        .insert("r", &pairs(&[("a", "5"), ("b", "hi")]))
        .unwrap();
    let err = db
        .engine
        .insert("r", &pairs(&[("a", "5"), ("b", "hi")]))
        .unwrap_err();
    assert!(matches!(err, DbError::DupRow));

    let batch = db.engine.scan_rows("r").unwrap();
    assert_eq!(batch.columns, vec!["a", "b"]);
    assert_eq!(
        batch.rows,
        vec![vec![Value::Int(5), Value::Str("hi".into())]]
    );
}

#[test]
fn predicate_delete_reports_its_count() {
    let mut db = ScratchDb::new();
    db.engine.create("r", &pairs(&[("x", "i")])).unwrap();
    for v in ["-3", "7", "0"] {
        db.engine.insert("r", &pairs(&[("x", v)])).unwrap();
    }
    let deleted = db.engine.delete("r", "x", CompareOp::Ge, "0").unwrap();
    assert_eq!(deleted, 2);
    assert_eq!(int_rows(&mut db, "r"), vec![-3]);
}

#[test]
fn forty_nine_rows_fill_three_pages() {
    let mut db = ScratchDb::new();
    db.engine.create("s", &name_id_schema()).unwrap();
    for i in 0..49 {
        db.engine
            .insert(
                "s",
                &pairs(&[("name", &format!("student{i}")), ("id", &i.to_string())]),
            )
            .unwrap();
    }
    // 24-byte records: floor((512-16)/24) = 20 per page.
    assert_eq!(rel_stats(&mut db, "s"), (49, 20, 3));

    // Inserts persist the relcat row eagerly, so scanning the catalog
    // itself shows the same count.
    let batch = db.engine.scan_rows("relcat").unwrap();
    let name_col = batch.columns.iter().position(|c| c == "relName").unwrap();
    let recs_col = batch.columns.iter().position(|c| c == "numRecs").unwrap();
    let row = batch
        .rows
        .iter()
        .find(|r| matches!(&r[name_col], Value::Str(s) if s == "s"))
        .expect("relcat row for s");
    assert_eq!(row[recs_col], Value::Int(49));
}

#[test]
fn projection_collapses_exact_duplicates() {
    let mut db = ScratchDb::new();
    db.engine
        .create("r", &pairs(&[("x", "i"), ("y", "i")]))
        .unwrap();
    db.engine
        .insert("r", &pairs(&[("x", "1"), ("y", "2")]))
        .unwrap();
    db.engine
        .insert("r", &pairs(&[("x", "1"), ("y", "3")]))
        .unwrap();
    db.engine
        .project("p", "r", &["x".to_string()])
        .unwrap();
    assert_eq!(int_rows(&mut db, "p"), vec![1]);
}

#[test]
fn projection_reorders_and_repacks_fields() {
    let mut db = ScratchDb::new();
    db.engine.create("r", &name_id_schema()).unwrap();
    db.engine
        .insert("r", &pairs(&[("name", "ada"), ("id", "1")]))
        .unwrap();
    db.engine
        .project("p", "r", &["id".to_string(), "name".to_string()])
        .unwrap();
    let batch = db.engine.scan_rows("p").unwrap();
    assert_eq!(batch.columns, vec!["id", "name"]);
    assert_eq!(
        batch.rows,
        vec![vec![Value::Int(1), Value::Str("ada".into())]]
    );
}

#[test]
fn select_preserves_rid_visit_order() {
    let mut db = ScratchDb::new();
    db.engine.create("r", &pairs(&[("x", "i")])).unwrap();
    for v in ["-3", "7", "0", "5"] {
        db.engine.insert("r", &pairs(&[("x", v)])).unwrap();
    }
    db.engine
        .select("t", "r", "x", CompareOp::Ge, "0")
        .unwrap();
    assert_eq!(int_rows(&mut db, "t"), vec![7, 0, 5]);
}

#[test]
fn select_rejects_an_existing_destination() {
    let mut db = ScratchDb::new();
    db.engine.create("r", &pairs(&[("x", "i")])).unwrap();
    let err = db
        .engine
        .select("r", "r", "x", CompareOp::Eq, "1")
        .unwrap_err();
    assert!(matches!(err, DbError::RelExists(_)));
}

#[test]
fn select_with_bad_literal_creates_nothing() {
    let mut db = ScratchDb::new();
    db.engine.create("r", &pairs(&[("x", "i")])).unwrap();
    let err = db
        .engine
        .select("t", "r", "x", CompareOp::Eq, "abc")
        .unwrap_err();
    assert!(matches!(err, DbError::InvalidValue { .. }));
    assert!(!db.engine.relation_names().unwrap().contains(&"t".to_string()));
}

#[test]
fn join_concatenates_matching_tuples() {
    let mut db = ScratchDb::new();
    db.engine
        .create("emp", &pairs(&[("name", "s8"), ("dept", "i")]))
        .unwrap();
    db.engine
        .create("depts", &pairs(&[("dept", "i"), ("label", "s8")]))
        .unwrap();
    for (name, dept) in [("ada", "1"), ("grace", "2"), ("alan", "1")] {
        db.engine
            .insert("emp", &pairs(&[("name", name), ("dept", dept)]))
            .unwrap();
    }
    for (dept, label) in [("1", "eng"), ("2", "math"), ("3", "idle")] {
        db.engine
            .insert("depts", &pairs(&[("dept", dept), ("label", label)]))
            .unwrap();
    }
    db.engine
        .join("staffed", "emp", "dept", "depts", "dept")
        .unwrap();

    let batch = db.engine.scan_rows("staffed").unwrap();
    assert_eq!(batch.columns, vec!["name", "dept", "label"]);
    assert_eq!(
        batch.rows,
        vec![
            vec![
                Value::Str("ada".into()),
                Value::Int(1),
                Value::Str("eng".into())
            ],
            vec![
                Value::Str("grace".into()),
                Value::Int(2),
                Value::Str("math".into())
            ],
            vec![
                Value::Str("alan".into()),
                Value::Int(1),
                Value::Str("eng".into())
            ],
        ]
    );
}

#[test]
fn join_requires_compatible_types() {
    let mut db = ScratchDb::new();
    db.engine.create("a", &pairs(&[("k", "i")])).unwrap();
    db.engine.create("b", &pairs(&[("k", "s4")])).unwrap();
    let err = db.engine.join("c", "a", "k", "b", "k").unwrap_err();
    assert!(matches!(err, DbError::IncompatibleTypes));
}

#[test]
fn index_flag_survives_reopen_and_tracks_keys() {
    let mut db = ScratchDb::new();
    db.engine.create("r", &pairs(&[("x", "i")])).unwrap();
    db.engine.build_index("r", "x").unwrap();
    for v in ["4", "2", "9"] {
        db.engine.insert("r", &pairs(&[("x", v)])).unwrap();
    }

    db.engine.close_db().unwrap();
    db.engine.open_db(DB_NAME).unwrap();

    let batch = db.engine.scan_rows("attrcat").unwrap();
    let rel_col = batch.columns.iter().position(|c| c == "relName").unwrap();
    let attr_col = batch.columns.iter().position(|c| c == "attrName").unwrap();
    let row = batch
        .rows
        .iter()
        .find(|r| {
            matches!(&r[rel_col], Value::Str(s) if s == "r")
                && matches!(&r[attr_col], Value::Str(s) if s == "x")
        })
        .expect("attrcat row for r.x");
    let col = |name: &str| {
        let i = batch.columns.iter().position(|c| c == name).unwrap();
        row[i].clone()
    };
    assert_eq!(col("hasIndex"), Value::Int(1));
    assert_eq!(col("nKeys"), Value::Int(3));

    // The tree itself answers searches after reopen.
    let mut tree = btree::BpTree::open(&db.db_dir(), "r", "x").unwrap();
    let hit = tree
        .search_first(CompareOp::Eq, &FieldValue::Int(9))
        .unwrap();
    assert_eq!(hit, Some(Rid::new(0, 2)));
}

#[test]
fn delete_removes_index_keys() {
    let mut db = ScratchDb::new();
    db.engine.create("r", &pairs(&[("x", "i")])).unwrap();
    db.engine.build_index("r", "x").unwrap();
    for v in ["1", "2", "3"] {
        db.engine.insert("r", &pairs(&[("x", v)])).unwrap();
    }
    assert_eq!(db.engine.delete("r", "x", CompareOp::Eq, "2").unwrap(), 1);

    let mut tree = btree::BpTree::open(&db.db_dir(), "r", "x").unwrap();
    assert_eq!(
        tree.search_first(CompareOp::Eq, &FieldValue::Int(2)).unwrap(),
        None
    );
    assert_eq!(tree.scan_all().unwrap().len(), 2);
}

#[test]
fn index_rules_are_enforced() {
    let mut db = ScratchDb::new();
    db.engine.create("r", &pairs(&[("x", "i")])).unwrap();
    db.engine.insert("r", &pairs(&[("x", "1")])).unwrap();
    assert!(matches!(
        db.engine.build_index("r", "x").unwrap_err(),
        DbError::IndexNonEmpty(_)
    ));

    db.engine.create("empty", &pairs(&[("x", "i")])).unwrap();
    db.engine.build_index("empty", "x").unwrap();
    assert!(matches!(
        db.engine.build_index("empty", "x").unwrap_err(),
        DbError::IndexExists { .. }
    ));
    db.engine.drop_index("empty", Some("x")).unwrap();
    assert!(matches!(
        db.engine.drop_index("empty", Some("x")).unwrap_err(),
        DbError::IndexNotFound { .. }
    ));
    assert!(matches!(
        db.engine.build_index("relcat", "relName").unwrap_err(),
        DbError::CatalogImmutable(_)
    ));
}

#[test]
fn load_ingests_page_formatted_files() {
    let mut db = ScratchDb::new();
    db.engine.create("s", &name_id_schema()).unwrap();

    let recs: Vec<Vec<u8>> = (0..49)
        .map(|i| name_id_record(&format!("student{i}"), i))
        .collect();
    let dump = db.db_dir().join("dump.pages");
    write_page_file(&dump, 24, &recs);

    db.engine.load("s", "dump.pages").unwrap();
    assert_eq!(rel_stats(&mut db, "s"), (49, 20, 3));
    let batch = db.engine.scan_rows("s").unwrap();
    assert_eq!(batch.rows.len(), 49);
    assert_eq!(
        batch.rows[48],
        vec![Value::Str("student48".into()), Value::Int(48)]
    );

    // A second load must fail: the relation is no longer empty.
    assert!(matches!(
        db.engine.load("s", "dump.pages").unwrap_err(),
        DbError::LoadNonEmpty(_)
    ));

    // The lazily persisted stats survive a close and reopen.
    db.engine.close_db().unwrap();
    db.engine.open_db(DB_NAME).unwrap();
    assert_eq!(rel_stats(&mut db, "s"), (49, 20, 3));
}

#[test]
fn load_rolls_back_on_bad_magic() {
    let mut db = ScratchDb::new();
    db.engine.create("s", &name_id_schema()).unwrap();

    let recs: Vec<Vec<u8>> = (0..30).map(|i| name_id_record("x", i)).collect();
    let dump = db.db_dir().join("dump.pages");
    write_page_file(&dump, 24, &recs);
    // Corrupt the magic of the second page.
    let mut bytes = std::fs::read(&dump).unwrap();
    bytes[common::PAGE_SIZE + 3] = b'X';
    std::fs::write(&dump, &bytes).unwrap();

    assert!(matches!(
        db.engine.load("s", "dump.pages").unwrap_err(),
        DbError::PageMagic { .. }
    ));
    assert_eq!(rel_stats(&mut db, "s"), (0, 20, 0));

    // The rollback leaves the relation loadable again.
    let good: Vec<Vec<u8>> = (0..5).map(|i| name_id_record("y", i)).collect();
    let dump2 = db.db_dir().join("good.pages");
    write_page_file(&dump2, 24, &good);
    db.engine.load("s", "good.pages").unwrap();
    assert_eq!(rel_stats(&mut db, "s"), (5, 20, 1));
}

#[test]
fn load_rejects_partial_pages() {
    let mut db = ScratchDb::new();
    db.engine.create("s", &name_id_schema()).unwrap();
    let dump = db.db_dir().join("short.pages");
    std::fs::write(&dump, vec![0u8; 100]).unwrap();
    assert!(matches!(
        db.engine.load("s", "short.pages").unwrap_err(),
        DbError::InvalidFileSize(100)
    ));
}

#[test]
fn destroy_removes_files_and_catalog_rows() {
    let mut db = ScratchDb::new();
    db.engine.create("r", &name_id_schema()).unwrap();
    db.engine.build_index("r", "id").unwrap();
    assert!(db.db_dir().join("r").exists());
    assert!(db.db_dir().join("r.fmap").exists());
    assert!(db.db_dir().join("r.id.bpidx").exists());

    db.engine.destroy("r").unwrap();
    assert!(!db.db_dir().join("r").exists());
    assert!(!db.db_dir().join("r.fmap").exists());
    assert!(!db.db_dir().join("r.id.bpidx").exists());
    assert!(!db.engine.relation_names().unwrap().contains(&"r".to_string()));
    assert!(db.engine.attribute_names("r").unwrap().is_empty());

    // The name is reusable immediately.
    db.engine.create("r", &pairs(&[("z", "f")])).unwrap();
    assert_eq!(db.engine.attribute_names("r").unwrap(), vec!["z"]);
}

#[test]
fn catalogs_reject_direct_modification() {
    let mut db = ScratchDb::new();
    assert!(matches!(
        db.engine.insert("relcat", &pairs(&[("relName", "x")])),
        Err(DbError::CatalogImmutable(_))
    ));
    assert!(matches!(
        db.engine.delete("attrcat", "relName", CompareOp::Eq, "r"),
        Err(DbError::CatalogImmutable(_))
    ));
    assert!(matches!(
        db.engine.destroy("relcat"),
        Err(DbError::CatalogImmutable(_))
    ));
}

#[test]
fn create_validates_schemas() {
    let mut db = ScratchDb::new();
    assert!(matches!(
        db.engine.create("r", &pairs(&[("a", "i"), ("a", "f")])),
        Err(DbError::DupAttr(_))
    ));
    assert!(matches!(
        db.engine.create("r", &pairs(&[("a", "x")])),
        Err(DbError::InvalidFormat(_))
    ));
    assert!(matches!(
        db.engine.create("r", &pairs(&[("a", "s0")])),
        Err(DbError::StrLenInvalid(_))
    ));
    assert!(matches!(
        db.engine.create("averyveryverylongrelname", &pairs(&[("a", "i")])),
        Err(DbError::RelNameTooLong(_))
    ));
    // Ten s50 attributes exceed the 496-byte page body.
    let wide: Vec<(String, String)> = (0..10)
        .map(|i| (format!("a{i}"), "s50".to_string()))
        .collect();
    assert!(matches!(
        db.engine.create("r", &wide),
        Err(DbError::RecTooLong { .. })
    ));
    db.engine.create("r", &pairs(&[("a", "i")])).unwrap();
    assert!(matches!(
        db.engine.create("r", &pairs(&[("a", "i")])),
        Err(DbError::RelExists(_))
    ));

    // Exactly the page body (9 * s50 + s46 = 496 bytes) still fits,
    // leaving one record per page.
    let mut exact: Vec<(String, String)> = (0..9)
        .map(|i| (format!("b{i}"), "s50".to_string()))
        .collect();
    exact.push(("tail".to_string(), "s46".to_string()));
    db.engine.create("wide", &exact).unwrap();
    let info = db.engine.relation_info("wide").unwrap();
    assert_eq!(info.rec_length, 496);
    assert_eq!(info.recs_per_page, 1);
}

#[test]
fn float_fields_use_tolerant_comparison() {
    let mut db = ScratchDb::new();
    db.engine.create("r", &pairs(&[("f", "f")])).unwrap();
    db.engine.insert("r", &pairs(&[("f", "1.5")])).unwrap();
    db.engine.insert("r", &pairs(&[("f", "-0.25")])).unwrap();
    assert_eq!(db.engine.delete("r", "f", CompareOp::Gt, "0").unwrap(), 1);
    let batch = db.engine.scan_rows("r").unwrap();
    assert_eq!(batch.rows, vec![vec![Value::Float(-0.25)]]);
}

#[test]
fn database_lifecycle_guards() {
    let mut db = ScratchDb::new();
    assert!(matches!(
        db.engine.open_db(DB_NAME).unwrap_err(),
        DbError::DbNotClosed
    ));
    assert!(matches!(
        db.engine.create_db(DB_NAME).unwrap_err(),
        DbError::DbExists(_)
    ));
    db.engine.close_db().unwrap();
    assert!(matches!(
        db.engine.create("r", &pairs(&[("a", "i")])).unwrap_err(),
        DbError::DbNotOpen
    ));
    assert!(matches!(
        db.engine.open_db("nosuchdb").unwrap_err(),
        DbError::DbNotFound(_)
    ));
    assert!(matches!(
        db.engine.open_db("bad-name!").unwrap_err(),
        DbError::DbPathInvalid(_)
    ));

    db.engine.destroy_db(DB_NAME).unwrap();
    assert!(!db.data_root().join(DB_NAME).exists());
    assert!(matches!(
        db.engine.destroy_db(DB_NAME).unwrap_err(),
        DbError::DbNotFound(_)
    ));
}

#[test]
fn unmentioned_attributes_default_to_zero() {
    let mut db = ScratchDb::new();
    db.engine.create("r", &name_id_schema()).unwrap();
    db.engine.insert("r", &pairs(&[("id", "7")])).unwrap();
    let batch = db.engine.scan_rows("r").unwrap();
    assert_eq!(batch.rows, vec![vec![Value::Str("".into()), Value::Int(7)]]);
}
