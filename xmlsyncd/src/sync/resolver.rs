use std::sync::Arc;

use tracing::{info, warn};

use crate::remote::{FolderRef, RemoteError, RemoteStore};
use crate::session::Session;

/// Find-or-create for the destination folder.
pub struct FolderResolver {
    remote: Arc<dyn RemoteStore>,
}

impl FolderResolver {
    pub fn new(remote: Arc<dyn RemoteStore>) -> Self {
        Self { remote }
    }

    /// Returns the first existing folder named `name`, creating one at the
    /// drive root when none exists. Duplicates are left alone.
    pub async fn resolve(&self, session: &Session, name: &str) -> Result<FolderRef, RemoteError> {
        let mut matches = self.remote.list_folders(session, name).await?;
        if matches.len() > 1 {
            warn!(
                folder = name,
                count = matches.len(),
                chosen = %matches[0].id,
                "several folders share the destination name, using the first"
            );
        }
        if !matches.is_empty() {
            return Ok(matches.swap_remove(0));
        }

        let folder = self.remote.create_folder(session, name, None).await?;
        info!(folder = name, id = %folder.id, "created destination folder");
        Ok(folder)
    }
}
