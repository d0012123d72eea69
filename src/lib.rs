//! apl-fs - mounts a remote APL query backend as a read-mostly NFSv3 filesystem.

pub mod cache;
pub mod compiler;
pub mod config;
pub mod executor;
mod message_types;
pub mod metadata;
pub mod nfs_adapter;
pub mod nodes;
pub mod presets;
pub mod query_store;
mod read_task;
mod singleflight;
mod stream_writer;
pub mod upstream;
pub mod vfs;
mod vfs_task;

use crate::message_types::{create_early_reply_channel, create_proc_channel, create_reply_channel};
use crate::nfs_adapter::NfsAdapter;
use crate::read_task::ReadTask;
use crate::stream_writer::StreamWriter;
use crate::vfs_task::VfsTask;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::net::TcpStream;

/// Channel depth for the RPC plumbing between `ReadTask`, `VfsTask` and `StreamWriter`.
const CHANNEL_DEPTH: usize = 64;

/// Starts the NFS server and processes client connections against `adapter`.
pub async fn handle_forever(listener: TcpListener, adapter: Arc<NfsAdapter>) -> std::io::Result<()> {
    loop {
        let (socket, _) = listener.accept().await?;

        socket.set_nodelay(true)?;

        process_socket(socket, adapter.clone()).await;
    }
}

async fn process_socket(socket: TcpStream, adapter: Arc<NfsAdapter>) {
    let (readhalf, writehalf) = socket.into_split();

    let (args_send, args_recv) = create_proc_channel(CHANNEL_DEPTH);
    let (reply_send, reply_recv) = create_reply_channel(CHANNEL_DEPTH);
    let (early_send, early_recv) = create_early_reply_channel(CHANNEL_DEPTH);

    ReadTask::spawn(readhalf, args_send, early_send);
    VfsTask::spawn(args_recv, reply_send, adapter);
    StreamWriter::spawn(writehalf, reply_recv, early_recv);
}
