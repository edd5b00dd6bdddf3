//! Filesystem watch on one mailbox directory.

use notify::event::ModifyKind;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;

use crate::error::Result;
use crate::protocol::mailbox::is_message_file;

/// Watches a mailbox directory and forwards paths of arriving message files.
///
/// Queue files are written to a hidden temp file and renamed into place, so
/// an arrival shows up as a create or a rename-to event. Hidden and non-JSON
/// paths are dropped. The same file can be reported more than once.
pub struct MailboxWatcher {
    dir: PathBuf,
    // Watching stops when this is dropped
    _watcher: RecommendedWatcher,
}

impl MailboxWatcher {
    pub fn start(dir: &Path) -> Result<(Self, mpsc::UnboundedReceiver<PathBuf>)> {
        let (tx, rx) = mpsc::unbounded_channel();

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                if !is_arrival(&event.kind) {
                    return;
                }
                for path in event.paths.into_iter().filter(|p| is_message_file(p)) {
                    // Receiver gone means monitoring stopped
                    let _ = tx.send(path);
                }
            }
            Err(e) => tracing::warn!("Mailbox watch error: {}", e),
        })?;
        watcher.watch(dir, RecursiveMode::NonRecursive)?;

        tracing::info!("File watcher started for {}", dir.display());

        Ok((
            Self {
                dir: dir.to_path_buf(),
                _watcher: watcher,
            },
            rx,
        ))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl std::fmt::Debug for MailboxWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MailboxWatcher").field("dir", &self.dir).finish()
    }
}

fn is_arrival(kind: &EventKind) -> bool {
    matches!(kind, EventKind::Create(_) | EventKind::Modify(ModifyKind::Name(_)))
}
