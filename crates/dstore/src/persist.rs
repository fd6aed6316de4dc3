//! Saving subtrees to files and loading them back.
//!
//! Files use the wire grammar: one `DOCUMENT` wrapper holding the saved
//! roots. Loading merges the records into the store exactly as if a peer had
//! sent them, then moves the roots under the requested parent.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info};

use dstore_core::NodeId;
use dstore_store::{DataStore, Tree};
use dstore_sync::{
    Generator, GeneratorConfig, Parsed, Parser, PeerState, RecordReader, SyncError,
    TransferLedger,
};

use crate::error::Result;

/// Write `root` and up to `depth` levels below it to `path`.
pub async fn save_tree(store: &DataStore, root: &NodeId, path: &Path, depth: u32) -> Result<()> {
    let chunks = {
        let tree = store.read();
        tree.get(root)?;
        let mut generator = Generator::new(GeneratorConfig::default(), Arc::new(TransferLedger::new()));
        generator.generate_document(&tree, &NodeId::random(), std::slice::from_ref(root), depth);
        generator.take_output()
    };
    let mut out = Vec::with_capacity(chunks.iter().map(|c| c.len()).sum());
    for chunk in &chunks {
        out.extend_from_slice(chunk);
    }
    tokio::fs::write(path, &out).await?;
    info!("saved {} to {} ({} bytes)", root, path.display(), out.len());
    Ok(())
}

/// Merge the file at `path` into `store` under `parent`. Returns the ids of
/// the top-level nodes read.
pub async fn load_tree(store: &Arc<DataStore>, parent: &NodeId, path: &Path) -> Result<Vec<NodeId>> {
    store.read().get(parent)?;
    let bytes = tokio::fs::read(path).await?;
    let mut reader = RecordReader::new(&bytes[..]);
    let mut parser = Parser::new(Arc::clone(store), Arc::new(PeerState::new()));

    let mut loaded = Vec::new();
    loop {
        match parser.parse_document(&mut reader).await {
            Ok(Parsed::Document { id, roots }) => {
                store.modify(|tree| adopt(tree, &id, &roots, parent))?;
                loaded.extend(roots);
            }
            Ok(other) => debug!("ignoring {:?} in {}", other, path.display()),
            Err(SyncError::ConnectionLost) => break,
            Err(e) => return Err(e.into()),
        }
    }
    info!("loaded {} nodes from {}", loaded.len(), path.display());
    Ok(loaded)
}

/// Move the roots of a parsed wrapper under `parent` and drop the wrapper.
fn adopt(tree: &mut Tree, wrapper: &NodeId, roots: &[NodeId], parent: &NodeId) -> Result<()> {
    for root in roots {
        let owned_by_wrapper = tree.get(root)?.parent() == Some(wrapper);
        if owned_by_wrapper {
            tree.reparent(root, parent)?;
        } else {
            tree.link(parent, root)?;
        }
    }
    tree.remove_object(wrapper)?;
    Ok(())
}
