use super::common::{name, Fixture};
use aplfs::vfs::{FileType, NfsError, Vfs as _};

#[tokio::test]
async fn readme_is_a_static_regular_file() {
    let fixture = Fixture::new();
    let lookup = fixture.adapter.lookup(&fixture.root(), &name("README.txt")).await.unwrap();
    assert_eq!(lookup.object_attr.file_type, FileType::Regular);
    assert!(lookup.object_attr.size > 0);
}

#[tokio::test]
async fn dataset_directory_is_reachable_two_ways() {
    let fixture = Fixture::new();
    let root = fixture.root();

    let via_top_level = fixture.adapter.lookup(&root, &name("logs")).await.unwrap();
    assert_eq!(via_top_level.object_attr.file_type, FileType::Directory);

    let datasets_dir = fixture.adapter.lookup(&root, &name("datasets")).await.unwrap();
    let via_datasets = fixture.adapter.lookup(&datasets_dir.handle, &name("logs")).await.unwrap();
    assert_eq!(via_datasets.object_attr.file_type, FileType::Directory);
}

#[tokio::test]
async fn unknown_dataset_is_noent() {
    let fixture = Fixture::new();
    let err = fixture.adapter.lookup(&fixture.root(), &name("nonexistent")).await.unwrap_err();
    assert_eq!(err, NfsError::NoEnt);
}

#[tokio::test]
async fn reading_schema_csv_runs_getschema_against_upstream() {
    let fixture = Fixture::new();
    let dataset = fixture.adapter.lookup(&fixture.root(), &name("logs")).await.unwrap();
    let schema = fixture.adapter.lookup(&dataset.handle, &name("schema.csv")).await.unwrap();

    let read = fixture.adapter.read(&schema.handle, 0, 4096).await.unwrap();
    let text = String::from_utf8(read.data).unwrap();
    assert!(text.contains("status"), "schema.csv was: {text}");
}

#[tokio::test]
async fn reading_a_field_histogram_is_readable_text() {
    let fixture = Fixture::new();
    let dataset = fixture.adapter.lookup(&fixture.root(), &name("logs")).await.unwrap();
    let fields = fixture.adapter.lookup(&dataset.handle, &name("fields")).await.unwrap();
    let duration = fixture.adapter.lookup(&fields.handle, &name("duration_ms")).await.unwrap();
    let histogram = fixture.adapter.lookup(&duration.handle, &name("histogram.csv")).await.unwrap();

    let read = fixture.adapter.read(&histogram.handle, 0, 4096).await.unwrap();
    assert!(read.eof);
}

#[tokio::test]
async fn opening_a_directory_for_read_is_rejected() {
    let fixture = Fixture::new();
    let err = fixture.adapter.read(&fixture.root(), 0, 16).await.unwrap_err();
    assert_eq!(err, NfsError::IsDir);
}
