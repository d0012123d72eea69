use super::common::{name, Fixture};
use aplfs::vfs::{CookieVerifier, DirectoryCookie, Vfs as _};

#[tokio::test]
async fn root_lists_reserved_entries_and_datasets() {
    let fixture = Fixture::new();
    let listing = fixture.adapter.read_dir(&fixture.root(), DirectoryCookie(0), CookieVerifier([0; 8]), 4096).await.unwrap();

    let names: Vec<String> = listing.entries.iter().map(|e| e.name.0.clone()).collect();
    for expected in ["README.txt", "examples", "datasets", "_presets", "_queries", "logs"] {
        assert!(names.contains(&expected.to_string()), "missing {expected} in {names:?}");
    }
    assert!(listing.eof);
}

#[tokio::test]
async fn read_dir_plus_on_datasets_hands_back_handles_and_attrs() {
    let fixture = Fixture::new();
    let datasets = fixture.adapter.lookup(&fixture.root(), &name("datasets")).await.unwrap();

    let listing = fixture
        .adapter
        .read_dir_plus(&datasets.handle, DirectoryCookie(0), CookieVerifier([0; 8]), 4096, 16)
        .await
        .unwrap();

    let logs_entry = listing.entries.iter().find(|e| e.name.0 == "logs").expect("logs dataset listed");
    assert!(logs_entry.handle.is_some());
    assert_eq!(logs_entry.attr.unwrap().file_type, aplfs::vfs::FileType::Directory);
}

#[tokio::test]
async fn read_dir_resumes_with_a_small_byte_budget() {
    let fixture = Fixture::new();
    let root = fixture.root();

    let first = fixture.adapter.read_dir(&root, DirectoryCookie(0), CookieVerifier([0; 8]), 64).await.unwrap();
    assert!(!first.entries.is_empty());
    let last_cookie = first.entries.last().unwrap().cookie;

    let second = fixture.adapter.read_dir(&root, last_cookie, first.cookie_verifier, 4096).await.unwrap();
    assert!(second.entries.iter().all(|e| e.cookie.0 > last_cookie.0));
}

#[tokio::test]
async fn read_dir_rejects_a_mismatched_cookie_verifier() {
    let fixture = Fixture::new();
    let root = fixture.root();
    let err = fixture
        .adapter
        .read_dir(&root, DirectoryCookie(1), CookieVerifier([0xAB; 8]), 4096)
        .await
        .unwrap_err();
    assert_eq!(err, aplfs::vfs::NfsError::BadCookie);
}

#[tokio::test]
async fn presets_dir_lists_the_core_pack() {
    let fixture = Fixture::new();
    let presets = fixture.adapter.lookup(&fixture.root(), &name("_presets")).await.unwrap();
    let listing = fixture.adapter.read_dir(&presets.handle, DirectoryCookie(0), CookieVerifier([0; 8]), 4096).await.unwrap();
    assert!(listing.entries.iter().any(|e| e.name.0 == "recent.json"));
}
