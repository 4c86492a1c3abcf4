//! Hook for an external search index
//!
//! The store does not index anything itself. A provider can be given an
//! [`IndexFeed`] that receives the journal of every committed transaction
//! and is asked to rebuild when a workspace's index directory is missing.

use crate::error::RepositoryResult;
use crate::journal::JournalEntry;
use crate::session::Session;

pub trait IndexFeed: Send + Sync {
    /// Called after each commit that wrote at least one journal entry
    fn transaction_committed(
        &self,
        workspace: &str,
        transaction_id: &str,
        entries: &[JournalEntry],
    ) -> RepositoryResult<()>;

    /// Re-index a whole workspace, reading through a system session
    fn rebuild(&self, workspace: &str, session: &Session) -> RepositoryResult<()>;
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use parking_lot::Mutex;

    /// Records what it was told
    #[derive(Default)]
    pub struct RecordingFeed {
        pub committed: Mutex<Vec<(String, String, usize)>>,
        pub rebuilt: Mutex<Vec<String>>,
    }

    impl IndexFeed for RecordingFeed {
        fn transaction_committed(
            &self,
            workspace: &str,
            transaction_id: &str,
            entries: &[JournalEntry],
        ) -> RepositoryResult<()> {
            self.committed.lock().push((
                workspace.to_string(),
                transaction_id.to_string(),
                entries.len(),
            ));
            Ok(())
        }

        fn rebuild(&self, workspace: &str, session: &Session) -> RepositoryResult<()> {
            session.root_node()?;
            self.rebuilt.lock().push(workspace.to_string());
            Ok(())
        }
    }
}
