use super::common::{name, zero_size_attr, Fixture};
use aplfs::vfs::{CreateMode, NfsError, Vfs as _, WriteMode};

async fn slot_handle(fixture: &Fixture, slot: &str) -> aplfs::vfs::FileHandle {
    let queries = fixture.adapter.lookup(&fixture.root(), &name("_queries")).await.unwrap();
    let entry = fixture.adapter.lookup(&queries.handle, &name(slot)).await.unwrap();
    entry.handle
}

#[tokio::test]
async fn write_then_read_round_trips_the_query_text() {
    let fixture = Fixture::new();
    let slot = slot_handle(&fixture, "demo").await;

    let apl = fixture
        .adapter
        .create(&slot, &name("apl"), CreateMode::Unchecked { attr: zero_size_attr() })
        .await
        .unwrap();

    let text = b"['logs'] | where status == 'ok' | take 5";
    fixture.adapter.write(&apl.handle, 0, text, WriteMode::FileSync).await.unwrap();

    let read = fixture.adapter.read(&apl.handle, 0, 4096).await.unwrap();
    assert_eq!(read.data, text);
    assert!(read.eof);
}

#[tokio::test]
async fn write_past_current_length_zero_fills_the_gap() {
    let fixture = Fixture::new();
    let slot = slot_handle(&fixture, "sparse").await;
    let apl = fixture.adapter.create(&slot, &name("apl"), CreateMode::Unchecked { attr: zero_size_attr() }).await.unwrap();

    fixture.adapter.write(&apl.handle, 0, b"abc", WriteMode::FileSync).await.unwrap();
    fixture.adapter.write(&apl.handle, 6, b"xyz", WriteMode::FileSync).await.unwrap();

    let read = fixture.adapter.read(&apl.handle, 0, 64).await.unwrap();
    assert_eq!(read.data, b"abc\0\0\0xyz");
}

#[tokio::test]
async fn result_ndjson_requires_a_non_empty_slot() {
    let fixture = Fixture::new();
    let entry = fixture.adapter.lookup(&slot_handle(&fixture, "empty").await, &name("result.ndjson")).await.unwrap();
    let err = fixture.adapter.read(&entry.handle, 0, 4096).await.unwrap_err();
    assert_eq!(err, NfsError::Inval);
}

#[tokio::test]
async fn result_error_always_returns_a_json_envelope() {
    let fixture = Fixture::new();
    let slot = slot_handle(&fixture, "broken").await;
    let apl = fixture.adapter.create(&slot, &name("apl"), CreateMode::Unchecked { attr: zero_size_attr() }).await.unwrap();
    fixture.adapter.write(&apl.handle, 0, b"['logs'] | take 1", WriteMode::FileSync).await.unwrap();

    let envelope = fixture.adapter.lookup(&slot, &name("result.error")).await.unwrap();
    let read = fixture.adapter.read(&envelope.handle, 0, 8192).await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&read.data).unwrap();
    assert_eq!(body["apl"], "['logs'] | take 1");
    assert_eq!(body["ok"], true);
}

#[tokio::test]
async fn stats_json_carries_the_original_apl_and_upstream_status() {
    let fixture = Fixture::new();
    let slot = slot_handle(&fixture, "stats").await;
    let apl = fixture.adapter.create(&slot, &name("apl"), CreateMode::Unchecked { attr: zero_size_attr() }).await.unwrap();
    fixture.adapter.write(&apl.handle, 0, b"['logs'] | take 1", WriteMode::FileSync).await.unwrap();

    let stats = fixture.adapter.lookup(&slot, &name("stats.json")).await.unwrap();
    let read = fixture.adapter.read(&stats.handle, 0, 8192).await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&read.data).unwrap();
    assert_eq!(body["apl"], "['logs'] | take 1");
    assert_eq!(body["status"]["rowsExamined"], 1);
}

#[tokio::test]
async fn zero_size_set_attr_truncates_the_slot() {
    let fixture = Fixture::new();
    let slot = slot_handle(&fixture, "truncate-me").await;
    let apl = fixture.adapter.create(&slot, &name("apl"), CreateMode::Unchecked { attr: zero_size_attr() }).await.unwrap();
    fixture.adapter.write(&apl.handle, 0, b"not empty", WriteMode::FileSync).await.unwrap();

    fixture.adapter.set_attr(&apl.handle, zero_size_attr(), aplfs::vfs::SetAttrGuard::None).await.unwrap();

    let read = fixture.adapter.read(&apl.handle, 0, 64).await.unwrap();
    assert!(read.data.is_empty());
}

#[tokio::test]
async fn removing_apl_deletes_the_slot() {
    let fixture = Fixture::new();
    let slot = slot_handle(&fixture, "removable").await;
    let apl = fixture.adapter.create(&slot, &name("apl"), CreateMode::Unchecked { attr: zero_size_attr() }).await.unwrap();
    fixture.adapter.write(&apl.handle, 0, b"data", WriteMode::FileSync).await.unwrap();

    fixture.adapter.remove(&slot, &name("apl")).await.expect("remove succeeds");

    let queries = fixture.adapter.lookup(&fixture.root(), &name("_queries")).await.unwrap();
    let entries = fixture.adapter.read_dir(&queries.handle, aplfs::vfs::DirectoryCookie(0), aplfs::vfs::CookieVerifier([0; 8]), 4096).await.unwrap();
    assert!(entries.entries.iter().all(|e| e.name.0 != "removable"));
}

#[tokio::test]
async fn removing_a_slot_directory_removes_its_query() {
    let fixture = Fixture::new();
    let queries = fixture.adapter.lookup(&fixture.root(), &name("_queries")).await.unwrap();
    let slot = fixture.adapter.lookup(&queries.handle, &name("rmdir-me")).await.unwrap();
    let apl = fixture.adapter.create(&slot.handle, &name("apl"), CreateMode::Unchecked { attr: zero_size_attr() }).await.unwrap();
    fixture.adapter.write(&apl.handle, 0, b"data", WriteMode::FileSync).await.unwrap();

    fixture.adapter.remove_dir(&queries.handle, &name("rmdir-me")).await.expect("remove_dir succeeds");

    let entries = fixture.adapter.read_dir(&queries.handle, aplfs::vfs::DirectoryCookie(0), aplfs::vfs::CookieVerifier([0; 8]), 4096).await.unwrap();
    assert!(entries.entries.iter().all(|e| e.name.0 != "rmdir-me"));
}

#[tokio::test]
async fn rename_and_symlink_are_not_supported_on_query_slots() {
    let fixture = Fixture::new();
    let queries = fixture.adapter.lookup(&fixture.root(), &name("_queries")).await.unwrap();

    let err = fixture
        .adapter
        .rename(&queries.handle, &name("a"), &queries.handle, &name("b"))
        .await
        .unwrap_err();
    assert_eq!(err, NfsError::NotSupp);

    let err = fixture
        .adapter
        .make_symlink(&queries.handle, &name("link"), &aplfs::vfs::SymlinkTarget("a".to_string()), zero_size_attr())
        .await
        .unwrap_err();
    assert_eq!(err, NfsError::NotSupp);
}
