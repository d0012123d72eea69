#[path = "queries_fs/common.rs"]
mod common;
#[path = "queries_fs/directory_listing.rs"]
mod directory_listing;
#[path = "queries_fs/lookup_read.rs"]
mod lookup_read;
#[path = "queries_fs/metadata_ops.rs"]
mod metadata_ops;
#[path = "queries_fs/query_slot.rs"]
mod query_slot;
