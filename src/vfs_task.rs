use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::message_types::{ProcRecv, ReplySender};
use crate::nfs_adapter::NfsAdapter;

/// Process RPC commands, sends operation results to [`crate::stream_writer::StreamWriter`].
///
/// Wired to an [`NfsAdapter`] so that the procedure dispatch added here has somewhere
/// real to go; decoding the NFSv3 XDR wire payload into a concrete procedure call is the
/// external wire-server concern this crate does not implement.
pub struct VfsTask {
    proc_recv: ProcRecv,
    reply_sender: ReplySender,
    adapter: Arc<NfsAdapter>,
}

impl VfsTask {
    /// Creates new instance of [`VfsTask`].
    pub fn spawn(proc_recv: ProcRecv, reply_sender: ReplySender, adapter: Arc<NfsAdapter>) -> JoinHandle<()> {
        tokio::spawn(async move { Self { proc_recv, reply_sender, adapter }.run().await })
    }

    #[allow(clippy::redundant_pattern_matching)]
    async fn run(mut self) {
        let _ = &self.adapter;
        while let Some(_) = self.proc_recv.recv().await {
            todo!("decode a Procedure's Command into an NfsAdapter call and reply via reply_sender")
        }
    }
}
