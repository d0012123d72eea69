//! Binds the typed VFS node graph to the NFSv3 [`vfs::Vfs`] trait: hands out opaque
//! 8-byte file handles for node identities, translates [`NodeError`] into the matching
//! `NfsError`, and enforces read-only access outside `/_queries/<slot>/apl`.

use crate::nodes::fs::Fs;
use crate::nodes::{Node, NodeError};
use crate::vfs::{
    AccessMask, AccessResult, CommitResult, CookieVerifier, CreateMode, CreatedNode, DirectoryCookie, DirectoryEntry,
    DirectoryPlusEntry, FileAttr, FileHandle, FileName, FileTime, FileType, FsInfo, FsProperties, FsStat, LinkResult,
    LookupResult, NfsError, PathConfig, ReadDirPlusResult, ReadDirResult, ReadResult, RemovalResult, RenameResult,
    SetAttr, SetAttrGuard, SpecialNode, StableVerifier, SymlinkTarget, Vfs, VfsResult, WccData, WriteMode, WriteResult,
    MAX_NAME_LEN,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;

const ROOT_ID: u64 = 1;
const ENTRY_ESTIMATE_BYTES: u32 = 64;

/// Maps node identities to handle ids and back. A node's [`Node::path_key`] is its
/// identity: the same logical path always maps to the same id for the life of the
/// adapter, so re-lookups of an already-seen path don't mint a new handle.
struct HandleTable {
    next_id: u64,
    nodes: HashMap<u64, Node>,
    index: HashMap<String, u64>,
}

impl HandleTable {
    fn new() -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(ROOT_ID, Node::Root);
        let mut index = HashMap::new();
        index.insert(Node::Root.path_key(), ROOT_ID);
        Self { next_id: ROOT_ID + 1, nodes, index }
    }

    fn ensure_entry(&mut self, node: Node) -> u64 {
        let key = node.path_key();
        if let Some(&id) = self.index.get(&key) {
            return id;
        }
        let id = self.next_id;
        self.next_id += 1;
        self.index.insert(key, id);
        self.nodes.insert(id, node);
        id
    }

    fn get(&self, id: u64) -> Option<Node> {
        self.nodes.get(&id).cloned()
    }
}

/// Implements NFSv3 over the node graph. Holds the process-wide [`Fs`] subsystems and
/// the handle table mapping file handles to node identities.
pub struct NfsAdapter {
    fs: Arc<Fs>,
    table: Mutex<HandleTable>,
    verifier: StableVerifier,
    started_at: FileTime,
}

impl NfsAdapter {
    pub fn new(fs: Arc<Fs>) -> Self {
        let seed = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
        Self {
            fs,
            table: Mutex::new(HandleTable::new()),
            verifier: StableVerifier((seed.as_nanos() as u64).to_le_bytes()),
            started_at: FileTime { seconds: seed.as_secs() as i64, nanos: seed.subsec_nanos() },
        }
    }

    pub fn root_handle(&self) -> FileHandle {
        Self::encode_handle(ROOT_ID)
    }

    fn encode_handle(id: u64) -> FileHandle {
        FileHandle(id.to_le_bytes().to_vec())
    }

    fn decode_handle(handle: &FileHandle) -> VfsResult<u64> {
        let bytes: [u8; 8] = handle.0.as_slice().try_into().map_err(|_| NfsError::BadHandle)?;
        Ok(u64::from_le_bytes(bytes))
    }

    async fn resolve(&self, handle: &FileHandle) -> VfsResult<(u64, Node)> {
        let id = Self::decode_handle(handle)?;
        let table = self.table.lock().await;
        let node = table.get(id).ok_or(NfsError::Stale)?;
        Ok((id, node))
    }

    async fn ensure_entry(&self, node: Node) -> u64 {
        self.table.lock().await.ensure_entry(node)
    }

    fn cookie_verifier(&self) -> CookieVerifier {
        CookieVerifier(self.verifier.0)
    }

    fn verify_cookie(&self, provided: CookieVerifier) -> VfsResult<()> {
        if provided.0 == [0; 8] || provided == self.cookie_verifier() {
            Ok(())
        } else {
            Err(NfsError::BadCookie)
        }
    }

    async fn attr_for(&self, id: u64, node: &Node) -> VfsResult<FileAttr> {
        let info = node.stat(&self.fs).await.map_err(map_node_error)?;
        let (file_type, mode, nlink) = if info.is_dir {
            (FileType::Directory, 0o755, 2)
        } else if info.writable {
            (FileType::Regular, 0o644, 1)
        } else {
            (FileType::Regular, 0o444, 1)
        };
        let size = info.size.unwrap_or(0);
        Ok(FileAttr {
            file_type,
            mode,
            nlink,
            uid: 0,
            gid: 0,
            size,
            used: size.div_ceil(512) * 512,
            device: None,
            fsid: 1,
            fileid: id,
            atime: self.started_at,
            mtime: self.started_at,
            ctime: self.started_at,
        })
    }
}

fn map_node_error(err: NodeError) -> NfsError {
    match err {
        NodeError::NotFound => NfsError::NoEnt,
        NodeError::NotDir => NfsError::NotDir,
        NodeError::IsDir => NfsError::IsDir,
        NodeError::ReadOnly => NfsError::RoFs,
        NodeError::Invalid(_) => NfsError::Inval,
        NodeError::Io(_) => NfsError::Io,
    }
}

fn digest_from_attr(attr: &FileAttr) -> crate::vfs::AttrDigest {
    crate::vfs::AttrDigest { size: attr.size, mtime: attr.mtime, ctime: attr.ctime }
}

#[async_trait]
impl Vfs for NfsAdapter {
    async fn null(&self) -> VfsResult<()> {
        Ok(())
    }

    async fn get_attr(&self, handle: &FileHandle) -> VfsResult<FileAttr> {
        let (id, node) = self.resolve(handle).await?;
        self.attr_for(id, &node).await
    }

    async fn set_attr(&self, handle: &FileHandle, attr: SetAttr, guard: SetAttrGuard) -> VfsResult<WccData> {
        let (id, node) = self.resolve(handle).await?;
        let before = self.attr_for(id, &node).await?;
        if let SetAttrGuard::Check { ctime } = guard {
            if before.ctime != ctime {
                return Err(NfsError::NotSync);
            }
        }

        let Node::AplFile { slot } = &node else {
            if attr.size.is_some() || attr.mode.is_some() || attr.uid.is_some() || attr.gid.is_some() {
                return Err(NfsError::RoFs);
            }
            return Ok(WccData { before: Some(digest_from_attr(&before)), after: Some(before) });
        };

        if let Some(size) = attr.size {
            if size == 0 {
                self.fs.query_store.truncate(slot).await.map_err(|e| map_node_error(e.into()))?;
            } else {
                return Err(NfsError::NotSupp);
            }
        }

        let after = self.attr_for(id, &node).await?;
        Ok(WccData { before: Some(digest_from_attr(&before)), after: Some(after) })
    }

    async fn lookup(&self, parent: &FileHandle, name: &FileName) -> VfsResult<LookupResult> {
        let (parent_id, parent_node) = self.resolve(parent).await?;
        let child = parent_node.lookup(&self.fs, &name.0).await.map_err(map_node_error)?;
        let child_id = self.ensure_entry(child.clone()).await;
        let object_attr = self.attr_for(child_id, &child).await?;
        let directory_attr = self.attr_for(parent_id, &parent_node).await.ok();
        Ok(LookupResult { handle: Self::encode_handle(child_id), object_attr, directory_attr })
    }

    async fn access(&self, handle: &FileHandle, mask: AccessMask) -> VfsResult<AccessResult> {
        let (id, node) = self.resolve(handle).await?;
        let info = node.stat(&self.fs).await.map_err(map_node_error)?;

        let mut granted = AccessMask::empty();
        if mask.contains(AccessMask::READ) {
            granted.insert(AccessMask::READ);
        }
        if info.is_dir && mask.contains(AccessMask::LOOKUP) {
            granted.insert(AccessMask::LOOKUP);
        }
        if info.is_dir && mask.contains(AccessMask::EXECUTE) {
            granted.insert(AccessMask::EXECUTE);
        }
        if info.writable {
            if mask.contains(AccessMask::MODIFY) {
                granted.insert(AccessMask::MODIFY);
            }
            if mask.contains(AccessMask::EXTEND) {
                granted.insert(AccessMask::EXTEND);
            }
        }
        let removable = matches!(node, Node::AplFile { .. } | Node::QueryEntryDir { .. });
        if removable && mask.contains(AccessMask::DELETE) {
            granted.insert(AccessMask::DELETE);
        }

        let attr = self.attr_for(id, &node).await.ok();
        Ok(AccessResult { granted, file_attr: attr })
    }

    async fn read_link(&self, _handle: &FileHandle) -> VfsResult<(SymlinkTarget, Option<FileAttr>)> {
        Err(NfsError::NotSupp)
    }

    async fn read(&self, handle: &FileHandle, offset: u64, count: u32) -> VfsResult<ReadResult> {
        let (id, node) = self.resolve(handle).await?;
        if node.is_dir() {
            return Err(NfsError::IsDir);
        }
        let bytes = node.open(&self.fs).await.map_err(map_node_error)?;
        let len = bytes.len() as u64;
        let start = std::cmp::min(offset, len) as usize;
        let end = std::cmp::min(offset.saturating_add(count as u64), len) as usize;
        let data = bytes[start..end].to_vec();
        let eof = offset + data.len() as u64 >= len;
        let attr = self.attr_for(id, &node).await.ok();
        Ok(ReadResult { data, eof, file_attr: attr })
    }

    async fn write(&self, handle: &FileHandle, offset: u64, data: &[u8], mode: WriteMode) -> VfsResult<WriteResult> {
        let (id, node) = self.resolve(handle).await?;
        let Node::AplFile { slot } = &node else {
            return Err(NfsError::RoFs);
        };

        let mut buf = self.fs.query_store.read(slot).await.map_err(|e| map_node_error(e.into()))?;
        let end = offset as usize + data.len();
        if buf.len() < end {
            buf.resize(end, 0);
        }
        buf[offset as usize..end].copy_from_slice(data);
        self.fs.query_store.write_whole(slot, &buf).await.map_err(|e| map_node_error(e.into()))?;

        let attr = self.attr_for(id, &node).await.ok();
        Ok(WriteResult { count: data.len() as u32, committed: mode, verifier: self.verifier, file_attr: attr })
    }

    async fn create(&self, parent: &FileHandle, name: &FileName, mode: CreateMode) -> VfsResult<CreatedNode> {
        let (_, parent_node) = self.resolve(parent).await?;
        let child = parent_node.lookup(&self.fs, &name.0).await.map_err(map_node_error)?;
        if child.is_dir() {
            return Err(NfsError::IsDir);
        }
        if !child.is_writable() {
            return Err(NfsError::RoFs);
        }

        if let CreateMode::Unchecked { attr } | CreateMode::Guarded { attr, .. } = &mode {
            if attr.size == Some(0) {
                if let Node::AplFile { slot } = &child {
                    self.fs.query_store.truncate(slot).await.map_err(|e| map_node_error(e.into()))?;
                }
            }
        }

        let id = self.ensure_entry(child.clone()).await;
        let attr = self.attr_for(id, &child).await?;
        Ok(CreatedNode { handle: Self::encode_handle(id), attr, directory_wcc: WccData { before: None, after: None } })
    }

    async fn make_dir(&self, _parent: &FileHandle, _name: &FileName, _attr: SetAttr) -> VfsResult<CreatedNode> {
        // Query slot directories come into being on first write of `apl`, not via MKDIR.
        Err(NfsError::RoFs)
    }

    async fn make_symlink(
        &self,
        _parent: &FileHandle,
        _name: &FileName,
        _target: &SymlinkTarget,
        _attr: SetAttr,
    ) -> VfsResult<CreatedNode> {
        Err(NfsError::NotSupp)
    }

    async fn make_node(&self, _parent: &FileHandle, _name: &FileName, _node: SpecialNode) -> VfsResult<CreatedNode> {
        Err(NfsError::NotSupp)
    }

    async fn remove(&self, parent: &FileHandle, name: &FileName) -> VfsResult<RemovalResult> {
        let (_, parent_node) = self.resolve(parent).await?;
        if let Node::QueryEntryDir { slot } = &parent_node {
            if name.0 == "apl" {
                self.fs.query_store.remove(slot).await.map_err(|e| map_node_error(e.into()))?;
                return Ok(RemovalResult { directory_wcc: WccData { before: None, after: None } });
            }
        }
        Err(NfsError::RoFs)
    }

    async fn remove_dir(&self, parent: &FileHandle, name: &FileName) -> VfsResult<RemovalResult> {
        let (_, parent_node) = self.resolve(parent).await?;
        if matches!(parent_node, Node::QueriesDir) {
            self.fs.query_store.remove(&name.0).await.map_err(|e| map_node_error(e.into()))?;
            return Ok(RemovalResult { directory_wcc: WccData { before: None, after: None } });
        }
        Err(NfsError::NotSupp)
    }

    async fn rename(
        &self,
        _from_parent: &FileHandle,
        _from_name: &FileName,
        _to_parent: &FileHandle,
        _to_name: &FileName,
    ) -> VfsResult<RenameResult> {
        Err(NfsError::NotSupp)
    }

    async fn link(&self, _source: &FileHandle, _new_parent: &FileHandle, _new_name: &FileName) -> VfsResult<LinkResult> {
        Err(NfsError::NotSupp)
    }

    async fn read_dir(
        &self,
        handle: &FileHandle,
        cookie: DirectoryCookie,
        verifier: CookieVerifier,
        max_bytes: u32,
    ) -> VfsResult<ReadDirResult> {
        if cookie.0 != 0 {
            self.verify_cookie(verifier)?;
        }
        let (id, node) = self.resolve(handle).await?;
        if !node.is_dir() {
            return Err(NfsError::NotDir);
        }
        let directory_attr = self.attr_for(id, &node).await.ok();
        let names = node.read_dir(&self.fs).await.map_err(map_node_error)?;

        let budget = if max_bytes == 0 { usize::MAX } else { std::cmp::max(1, (max_bytes / ENTRY_ESTIMATE_BYTES) as usize) };
        let mut remaining = budget;
        let mut entries = Vec::new();
        for name in &names {
            if remaining == 0 {
                break;
            }
            let child = node.lookup(&self.fs, name).await.map_err(map_node_error)?;
            let child_id = self.ensure_entry(child).await;
            if cookie.0 != 0 && child_id <= cookie.0 {
                continue;
            }
            entries.push(DirectoryEntry { cookie: DirectoryCookie(child_id), name: FileName(name.clone()), fileid: child_id });
            remaining -= 1;
        }

        Ok(ReadDirResult { directory_attr, cookie_verifier: self.cookie_verifier(), entries, eof: remaining > 0 })
    }

    async fn read_dir_plus(
        &self,
        handle: &FileHandle,
        cookie: DirectoryCookie,
        verifier: CookieVerifier,
        max_bytes: u32,
        max_handles: u32,
    ) -> VfsResult<ReadDirPlusResult> {
        if cookie.0 != 0 {
            self.verify_cookie(verifier)?;
        }
        let (id, node) = self.resolve(handle).await?;
        if !node.is_dir() {
            return Err(NfsError::NotDir);
        }
        let directory_attr = self.attr_for(id, &node).await.ok();
        let names = node.read_dir(&self.fs).await.map_err(map_node_error)?;

        let byte_budget = if max_bytes == 0 { usize::MAX } else { std::cmp::max(1, (max_bytes / ENTRY_ESTIMATE_BYTES) as usize) };
        let handle_budget = if max_handles == 0 { usize::MAX } else { max_handles as usize };
        let mut remaining = std::cmp::min(byte_budget, handle_budget);
        let mut entries = Vec::new();
        for name in &names {
            if remaining == 0 {
                break;
            }
            let child = node.lookup(&self.fs, name).await.map_err(map_node_error)?;
            let child_id = self.ensure_entry(child.clone()).await;
            if cookie.0 != 0 && child_id <= cookie.0 {
                continue;
            }
            let child_attr = self.attr_for(child_id, &child).await.ok();
            entries.push(DirectoryPlusEntry {
                cookie: DirectoryCookie(child_id),
                name: FileName(name.clone()),
                fileid: child_id,
                handle: Some(Self::encode_handle(child_id)),
                attr: child_attr,
            });
            remaining -= 1;
        }

        Ok(ReadDirPlusResult { directory_attr, cookie_verifier: self.cookie_verifier(), entries, eof: remaining > 0 })
    }

    async fn fs_stat(&self, handle: &FileHandle) -> VfsResult<FsStat> {
        let (id, node) = self.resolve(handle).await?;
        let attr = self.attr_for(id, &node).await.ok();
        // The upstream query service, not a local disk, backs this filesystem: report
        // the conventional "don't know, assume plenty" values NFS clients expect.
        Ok(FsStat {
            total_bytes: u64::MAX,
            free_bytes: u64::MAX,
            available_bytes: u64::MAX,
            total_files: u64::MAX,
            free_files: u64::MAX,
            available_files: u64::MAX,
            invarsec: 0,
            file_attr: attr,
        })
    }

    async fn fs_info(&self, handle: &FileHandle) -> VfsResult<FsInfo> {
        let (id, node) = self.resolve(handle).await?;
        let attr = self.attr_for(id, &node).await.ok();
        let mut properties = FsProperties::empty();
        properties.insert(FsProperties::HOMOGENEOUS);
        Ok(FsInfo {
            read_max: 1 << 20,
            read_pref: 64 << 10,
            read_multiple: 1,
            write_max: 1 << 20,
            write_pref: 64 << 10,
            write_multiple: 1,
            directory_pref: 4 << 10,
            max_file_size: u64::MAX,
            time_delta: FileTime { seconds: 1, nanos: 0 },
            properties,
            file_attr: attr,
        })
    }

    async fn path_conf(&self, handle: &FileHandle) -> VfsResult<PathConfig> {
        let (id, node) = self.resolve(handle).await?;
        let attr = self.attr_for(id, &node).await.ok();
        Ok(PathConfig {
            file_attr: attr,
            max_link: 1,
            max_name: MAX_NAME_LEN as u32,
            no_trunc: true,
            chown_restricted: true,
            case_insensitive: false,
            case_preserving: true,
        })
    }

    async fn commit(&self, handle: &FileHandle, _offset: u64, _count: u32) -> VfsResult<CommitResult> {
        let (id, node) = self.resolve(handle).await?;
        let attr = self.attr_for(id, &node).await.ok();
        Ok(CommitResult { file_attr: attr, verifier: self.verifier })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler;
    use crate::executor::{ExecOptions, Executor, Limits};
    use crate::metadata::{DatasetCache, FieldCache};
    use crate::query_store::QueryStore;
    use crate::upstream::{Dataset, Error as UpstreamError, Field, QueryClient, QueryResult};
    use async_trait::async_trait as atrait;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    struct FakeClient;

    #[atrait]
    impl QueryClient for FakeClient {
        async fn query_apl(&self, _ctx: &CancellationToken, _apl: &str) -> Result<QueryResult, UpstreamError> {
            Ok(QueryResult { tables: vec![] })
        }
        async fn list_datasets(&self, _ctx: &CancellationToken) -> Result<Vec<Dataset>, UpstreamError> {
            Ok(vec![Dataset { name: "logs".to_string(), description: None, created_by: None, created_at: None }])
        }
        async fn list_fields(&self, _ctx: &CancellationToken, _dataset: &str) -> Result<Vec<Field>, UpstreamError> {
            Ok(vec![])
        }
    }

    fn test_adapter() -> NfsAdapter {
        let client: Arc<dyn QueryClient> = Arc::new(FakeClient);
        let cache = Arc::new(crate::cache::Cache::new(crate::cache::Config {
            ttl: None,
            max_entries: None,
            max_bytes: None,
            disk_dir: None,
        }));
        let limits =
            Limits { max_in_memory_bytes: 1 << 20, max_cache_bytes: None, temp_dir: std::env::temp_dir(), default_row_cap: 0, default_range: "1h".to_string() };
        let executor = Arc::new(Executor::new(client.clone(), cache, limits));
        let datasets = Arc::new(DatasetCache::new(client.clone(), Duration::ZERO, None));
        let fields = Arc::new(FieldCache::new(client.clone(), Duration::ZERO, None));
        let query_store = Arc::new(QueryStore::new(std::env::temp_dir().join(format!("aplfs-test-{:?}", std::thread::current().id()))));
        let fs = Arc::new(Fs::new(client, executor, datasets, fields, query_store, compiler::Options::default(), 100));
        NfsAdapter::new(fs)
    }

    #[tokio::test]
    async fn root_handle_resolves_to_a_directory() {
        let adapter = test_adapter();
        let attr = adapter.get_attr(&adapter.root_handle()).await.unwrap();
        assert_eq!(attr.file_type, FileType::Directory);
    }

    #[tokio::test]
    async fn lookup_of_unknown_name_is_noent() {
        let adapter = test_adapter();
        let err = adapter.lookup(&adapter.root_handle(), &FileName("nope".to_string())).await.unwrap_err();
        assert_eq!(err, NfsError::NoEnt);
    }

    #[tokio::test]
    async fn write_then_read_round_trips_through_a_query_slot() {
        let adapter = test_adapter();
        let queries = adapter.lookup(&adapter.root_handle(), &FileName("_queries".to_string())).await.unwrap();
        let slot = adapter.lookup(&queries.handle, &FileName("demo".to_string())).await.unwrap();
        let apl_lookup = adapter.lookup(&slot.handle, &FileName("apl".to_string())).await.unwrap();
        let created = adapter
            .create(&slot.handle, &FileName("apl".to_string()), CreateMode::Unchecked { attr: SetAttr { mode: None, uid: None, gid: None, size: Some(0), atime: crate::vfs::SetTime::DontChange, mtime: crate::vfs::SetTime::DontChange } })
            .await
            .unwrap();
        assert_eq!(created.handle, apl_lookup.handle);

        let text = b"['logs'] | take 5";
        adapter.write(&created.handle, 0, text, WriteMode::FileSync).await.unwrap();
        let read = adapter.read(&created.handle, 0, 4096).await.unwrap();
        assert_eq!(read.data, text);
        assert!(read.eof);
    }

    #[tokio::test]
    async fn access_denies_modify_on_read_only_nodes() {
        let adapter = test_adapter();
        let readme = adapter.lookup(&adapter.root_handle(), &FileName("README.txt".to_string())).await.unwrap();
        let result = adapter.access(&readme.handle, AccessMask::READ).await.unwrap();
        assert!(result.granted.contains(AccessMask::READ));
        let result = adapter.access(&readme.handle, AccessMask::MODIFY).await.unwrap();
        assert!(!result.granted.contains(AccessMask::MODIFY));
    }
}
