//! Transaction scope guard

use crate::error::OgmResult;
use crate::graph::{GraphStore, TxId};
use std::fmt;
use std::sync::Arc;
use tracing::warn;

/// An open transaction on the calling thread
///
/// Dropping the guard without calling [`commit`](Self::commit) rolls the
/// transaction back. Guards created while another is open on the same thread
/// join the outer transaction: committing the inner one does nothing, rolling
/// it back dooms the outer one.
#[must_use = "dropping a transaction rolls it back"]
pub struct Transaction {
    store: Arc<dyn GraphStore>,
    id: TxId,
    finished: bool,
}

impl Transaction {
    pub(crate) fn begin(store: Arc<dyn GraphStore>) -> OgmResult<Self> {
        let id = store.begin_tx()?;
        Ok(Self {
            store,
            id,
            finished: false,
        })
    }

    pub fn id(&self) -> TxId {
        self.id
    }

    /// Commit. Fails with a listener failure if a lifecycle listener vetoed,
    /// in which case the changes are already rolled back.
    pub fn commit(mut self) -> OgmResult<()> {
        self.finished = true;
        self.store.commit(self.id)?;
        Ok(())
    }

    pub fn rollback(mut self) -> OgmResult<()> {
        self.finished = true;
        self.store.rollback(self.id)?;
        Ok(())
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.finished || !self.store.is_open() {
            return;
        }
        if let Err(err) = self.store.rollback(self.id) {
            warn!("Rollback of abandoned transaction {} failed: {}", self.id, err);
        }
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("finished", &self.finished)
            .finish()
    }
}
