use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::Path;

use propensity::{
    competition_file_url, format_preview, read_csv_table, run_query_display_results, unzip_all,
    ColumnOverride, CsvDataset, DatasetError, QueryExecutor, SqliteExecutor, Value,
    COMPETITION_FILES, DEFAULT_COMPETITION,
};
use tempfile::tempdir;
use zip::write::SimpleFileOptions;

const FIXTURE_DIR: &str = "tests/fixtures/hm";

fn write_zip(path: &Path, entry: &str, body: &str) {
    let file = fs::File::create(path).expect("zip file should be created");
    let mut zip = zip::ZipWriter::new(file);
    zip.start_file(entry, SimpleFileOptions::default())
        .expect("zip entry should be created");
    zip.write_all(body.as_bytes())
        .expect("zip data should be written");
    zip.finish().expect("zip should finalize");
}

#[test]
fn competition_files_load_as_named_tables() {
    let mut executor = SqliteExecutor::open_in_memory().expect("in-memory sqlite should open");
    let files = COMPETITION_FILES.iter().map(|f| f.to_string()).collect();
    let names = CsvDataset::new(FIXTURE_DIR, files)
        .load(&mut executor)
        .expect("fixtures should load");

    assert_eq!(names, vec!["articles", "customers", "transactions"]);

    let counts = executor
        .execute(
            "SELECT
                (SELECT COUNT(*) FROM articles) AS articles,
                (SELECT COUNT(*) FROM customers) AS customers,
                (SELECT COUNT(*) FROM transactions) AS transactions",
        )
        .expect("count query should run");
    assert_eq!(
        counts.rows[0],
        vec![Value::Integer(3), Value::Integer(4), Value::Integer(8)]
    );
}

#[test]
fn overrides_keep_article_ids_and_dates_as_text() {
    let mut overrides = propensity::default_schema_overrides();
    assert_eq!(overrides.get("t_dat"), Some(&ColumnOverride::Date));
    assert_eq!(overrides.get("article_id"), Some(&ColumnOverride::Utf8));

    let table = read_csv_table(
        &Path::new(FIXTURE_DIR).join("transactions_train.csv"),
        &overrides,
    )
    .expect("transactions should parse");
    let first = &table.rows[0];
    assert_eq!(first[0], Value::Text("2020-09-15".to_string()));
    assert_eq!(first[2], Value::Text("0663713001".to_string()));
    assert_eq!(first[3], Value::Real(0.01));
    assert_eq!(first[4], Value::Integer(2));

    overrides.clear();
    let inferred = read_csv_table(
        &Path::new(FIXTURE_DIR).join("transactions_train.csv"),
        &overrides,
    )
    .expect("transactions should parse without overrides");
    assert_eq!(inferred.rows[0][2], Value::Integer(663_713_001));
}

#[test]
fn custom_overrides_replace_the_defaults_when_loading() {
    let mut executor = SqliteExecutor::open_in_memory().expect("in-memory sqlite should open");
    let overrides = HashMap::from([("age".to_string(), ColumnOverride::Utf8)]);
    CsvDataset::new(FIXTURE_DIR, vec!["customers.csv".to_string()])
        .with_overrides(overrides)
        .load(&mut executor)
        .expect("customers should load");

    let table = executor
        .execute("SELECT customer_id, typeof(age) AS age_type FROM customers ORDER BY customer_id")
        .expect("query should run");
    assert_eq!(
        table.lookup("customer_id", "cust_a", "age_type"),
        Some(&Value::Text("text".to_string()))
    );
    assert_eq!(
        table.lookup("customer_id", "cust_c", "age_type"),
        Some(&Value::Text("null".to_string()))
    );

    let mut executor = SqliteExecutor::open_in_memory().expect("in-memory sqlite should open");
    CsvDataset::new(FIXTURE_DIR, vec!["articles.csv".to_string()])
        .with_overrides(HashMap::new())
        .load(&mut executor)
        .expect("articles should load");
    let ids = executor
        .execute("SELECT article_id FROM articles ORDER BY article_id")
        .expect("query should run");
    assert_eq!(ids.rows[0], vec![Value::Integer(108_775_015)]);
}

#[test]
fn empty_cells_become_null() {
    let table = read_csv_table(
        &Path::new(FIXTURE_DIR).join("customers.csv"),
        &propensity::default_schema_overrides(),
    )
    .expect("customers should parse");
    let fn_idx = table.column_index("FN").expect("FN column");
    assert_eq!(table.rows[1][fn_idx], Value::Null);
    assert_eq!(table.rows[0][fn_idx], Value::Integer(1));
}

#[test]
fn malformed_dates_are_reported_with_their_column() {
    let temp = tempdir().expect("temp dir should be created");
    let path = temp.path().join("transactions_train.csv");
    fs::write(&path, "t_dat,customer_id\n2020/09/15,cust_a\n").expect("fixture should write");

    let err = read_csv_table(&path, &propensity::default_schema_overrides())
        .expect_err("slash dates should be rejected");
    match err {
        DatasetError::ParseField { field, value } => {
            assert_eq!(field, "t_dat");
            assert_eq!(value, "2020/09/15");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn unzip_all_extracts_every_archive_into_destination() {
    let temp = tempdir().expect("temp dir should be created");
    let zips = temp.path().join("zips");
    let out = temp.path().join("csv");
    fs::create_dir_all(&zips).expect("zip dir should be created");

    let customers = fs::read_to_string(Path::new(FIXTURE_DIR).join("customers.csv"))
        .expect("fixture should exist");
    write_zip(&zips.join("customers.csv.zip"), "customers.csv", &customers);
    write_zip(&zips.join("articles.csv.zip"), "articles.csv", "article_id\n0108775015\n");
    fs::write(zips.join("notes.txt"), "not an archive").expect("notes should write");

    let extracted = unzip_all(&zips, &out).expect("archives should extract");
    assert_eq!(extracted, vec![out.join("articles.csv"), out.join("customers.csv")]);
    assert_eq!(
        fs::read_to_string(out.join("customers.csv")).expect("extracted file"),
        customers
    );

    let mut executor = SqliteExecutor::open_in_memory().expect("in-memory sqlite should open");
    CsvDataset::new(&out, vec!["customers.csv".to_string()])
        .load(&mut executor)
        .expect("extracted CSV should load");
    let table = run_query_display_results(&executor, "SELECT customer_id FROM customers")
        .expect("query should run");
    assert_eq!(table.len(), 4);
}

#[test]
fn preview_is_bounded() {
    let mut executor = SqliteExecutor::open_in_memory().expect("in-memory sqlite should open");
    CsvDataset::new(FIXTURE_DIR, vec!["transactions_train.csv".to_string()])
        .load(&mut executor)
        .expect("transactions should load");
    let table = executor
        .execute("SELECT * FROM transactions")
        .expect("query should run");

    let preview = format_preview(&table, 3);
    assert!(preview.starts_with("shape: (8, 5)\n"));
    assert!(preview.contains("t_dat\tcustomer_id\tarticle_id\tprice\tsales_channel_id"));
    assert!(preview.contains("5 more rows"));
    assert_eq!(preview.lines().count(), 1 + 1 + 3 + 1);
}

#[test]
fn download_url_targets_competition_file() {
    assert_eq!(
        competition_file_url(DEFAULT_COMPETITION, "customers.csv"),
        "https://www.kaggle.com/api/v1/competitions/data/download/h-and-m-personalized-fashion-recommendations/customers.csv"
    );
}
