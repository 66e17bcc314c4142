use std::collections::{HashMap, VecDeque};

use davbridge_core::{DavClient, EntryKind, RemoteEntry};
use log::warn;

/// Flat map from a path *relative to the indexed root* to its remote
/// metadata. The root itself is not an entry.
pub type RemoteIndex = HashMap<String, RemoteEntry>;

/// Walks the remote tree under `root` breadth-first, one PROPFIND per
/// folder, and flattens it into a [`RemoteIndex`].
///
/// Keys come from each entry's href-derived path, not its displayname;
/// servers may report a displayname that differs from the path basename.
///
/// A folder that fails to list is skipped along with its subtree; the
/// failure is logged and reported in the returned warnings instead of
/// aborting the walk.
pub async fn build_index(client: &DavClient, root: &str) -> (RemoteIndex, Vec<String>) {
    let mut index = RemoteIndex::new();
    let mut warnings = Vec::new();
    let root = root.trim_matches('/');
    let prefix = format!("{root}/");
    // Queue of remote folder paths under the dav root, pending a listing.
    let mut queue: VecDeque<String> = VecDeque::new();
    queue.push_back(root.to_string());

    while let Some(remote) = queue.pop_front() {
        let entries = match client.list_folder(&remote).await {
            Ok(entries) => entries,
            Err(err) => {
                warn!("indexing {remote}: {err}");
                warnings.push(format!("error: list {remote}: {err}"));
                continue;
            }
        };
        for entry in entries {
            let rel = if root.is_empty() {
                entry.path.clone()
            } else {
                entry
                    .path
                    .strip_prefix(&prefix)
                    .unwrap_or(&entry.path)
                    .to_string()
            };
            if entry.kind == EntryKind::Folder {
                queue.push_back(entry.path.clone());
            }
            index.insert(rel, entry);
        }
    }

    (index, warnings)
}
