use super::common::{name, Fixture};
use aplfs::vfs::{AccessMask, Vfs as _};

#[tokio::test]
async fn access_grants_lookup_and_execute_on_directories() {
    let fixture = Fixture::new();
    let mut mask = AccessMask::empty();
    mask.insert(AccessMask::LOOKUP);
    mask.insert(AccessMask::EXECUTE);
    mask.insert(AccessMask::MODIFY);

    let result = fixture.adapter.access(&fixture.root(), mask).await.unwrap();
    assert!(result.granted.contains(AccessMask::LOOKUP));
    assert!(result.granted.contains(AccessMask::EXECUTE));
    assert!(!result.granted.contains(AccessMask::MODIFY));
}

#[tokio::test]
async fn access_grants_modify_and_delete_on_query_slots() {
    let fixture = Fixture::new();
    let queries = fixture.adapter.lookup(&fixture.root(), &name("_queries")).await.unwrap();
    let slot = fixture.adapter.lookup(&queries.handle, &name("editable")).await.unwrap();
    let apl = fixture.adapter.lookup(&slot.handle, &name("apl")).await.unwrap();

    let mut mask = AccessMask::empty();
    mask.insert(AccessMask::MODIFY);
    mask.insert(AccessMask::DELETE);
    let result = fixture.adapter.access(&apl.handle, mask).await.unwrap();
    assert!(result.granted.contains(AccessMask::MODIFY));
    assert!(result.granted.contains(AccessMask::DELETE));
}

#[tokio::test]
async fn fs_stat_and_fs_info_report_sane_defaults() {
    let fixture = Fixture::new();
    let root = fixture.root();

    let stat = fixture.adapter.fs_stat(&root).await.unwrap();
    assert_eq!(stat.total_bytes, u64::MAX);

    let info = fixture.adapter.fs_info(&root).await.unwrap();
    assert!(info.read_max >= info.read_pref);
    assert!(info.properties.contains(aplfs::vfs::FsProperties::HOMOGENEOUS));
}

#[tokio::test]
async fn path_conf_reports_max_name_length() {
    let fixture = Fixture::new();
    let conf = fixture.adapter.path_conf(&fixture.root()).await.unwrap();
    assert_eq!(conf.max_name, aplfs::vfs::MAX_NAME_LEN as u32);
    assert!(conf.no_trunc);
}

#[tokio::test]
async fn get_attr_on_a_stale_handle_fails() {
    let fixture = Fixture::new();
    let bogus = aplfs::vfs::FileHandle(9999u64.to_le_bytes().to_vec());
    let err = fixture.adapter.get_attr(&bogus).await.unwrap_err();
    assert_eq!(err, aplfs::vfs::NfsError::Stale);
}
