use std::collections::HashSet;
use std::fs::Metadata;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use davbridge_core::{DavClient, DavError, EntryKind, RemoteEntry, Uploader};
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use log::{debug, info, warn};
use thiserror::Error;

use crate::index::{RemoteIndex, build_index};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("local root does not exist or is not a directory: {0}")]
    MissingLocalRoot(PathBuf),
    #[error("remote root {path} is unusable: {source}")]
    RemoteRoot {
        path: String,
        #[source]
        source: DavError,
    },
}

/// Tuning knobs for one sync run.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// File and directory names excluded from the walk, subtree included.
    pub skip_names: HashSet<String>,
    /// Files larger than this are reported as skipped instead of uploaded.
    pub max_file_size: Option<u64>,
}

impl Default for SyncOptions {
    fn default() -> Self {
        let skip_names = [
            ".git",
            ".svn",
            ".hg",
            ".DS_Store",
            "Thumbs.db",
            "node_modules",
            "__pycache__",
            ".venv",
            "target",
        ]
        .into_iter()
        .map(str::to_string)
        .collect();
        Self {
            skip_names,
            max_file_size: None,
        }
    }
}

/// One-way, additive mirror of a local directory onto the remote. Uploads
/// and folder creations only; nothing on the remote is ever deleted or
/// renamed. Per-entry failures are recorded in the run log and the walk
/// continues.
pub struct SyncEngine {
    client: DavClient,
    uploader: Uploader,
    options: SyncOptions,
}

impl SyncEngine {
    pub fn new(client: DavClient) -> Self {
        Self {
            uploader: Uploader::new(client.clone()),
            client,
            options: SyncOptions::default(),
        }
    }

    pub fn with_options(mut self, options: SyncOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_uploader(mut self, uploader: Uploader) -> Self {
        self.uploader = uploader;
        self
    }

    /// Mirrors `local_root` into `remote_root` and returns the run log, one
    /// line per action. Only two failures are fatal: a missing local root
    /// and a remote root that cannot be created or listed.
    pub async fn sync_directory(
        &self,
        local_root: &Path,
        remote_root: &str,
    ) -> Result<Vec<String>, SyncError> {
        if !local_root.is_dir() {
            return Err(SyncError::MissingLocalRoot(local_root.to_path_buf()));
        }
        let remote_root = remote_root.trim_matches('/').to_string();

        let mut log = Vec::new();
        match self.client.create_folder(&remote_root).await {
            Ok(true) => log.push(format!("created: {remote_root}")),
            Ok(false) => {}
            Err(source) => {
                return Err(SyncError::RemoteRoot {
                    path: remote_root,
                    source,
                });
            }
        }

        let (index, warnings) = build_index(&self.client, &remote_root).await;
        log.extend(warnings);
        debug!("indexed {} remote entries under {remote_root}", index.len());

        self.sync_tree(
            local_root.to_path_buf(),
            remote_root,
            String::new(),
            &index,
            &mut log,
        )
        .await;
        info!("sync finished: {} log lines", log.len());
        Ok(log)
    }

    fn sync_tree<'a>(
        &'a self,
        local: PathBuf,
        remote: String,
        rel: String,
        index: &'a RemoteIndex,
        log: &'a mut Vec<String>,
    ) -> BoxFuture<'a, ()> {
        async move {
            let (dirs, files) = match read_dir_sorted(&local).await {
                Ok(split) => split,
                Err(err) => {
                    warn!("reading {}: {err}", local.display());
                    log.push(format!("error: read {}: {err}", local.display()));
                    return;
                }
            };

            // Folders first so every file's parent exists before its PUT.
            for name in dirs {
                if self.options.skip_names.contains(&name) {
                    continue;
                }
                let child_rel = join_rel(&rel, &name);
                let child_remote = format!("{remote}/{name}");
                match index.get(&child_rel) {
                    Some(entry) if entry.kind == EntryKind::Folder => {}
                    Some(_) => {
                        log.push(format!(
                            "error: {child_remote}: a remote file blocks this folder"
                        ));
                        continue;
                    }
                    None => match self.client.create_folder(&child_remote).await {
                        Ok(true) => log.push(format!("created: {child_remote}")),
                        Ok(false) => {}
                        Err(err) => {
                            log.push(format!("error: {child_remote}: {err}"));
                            continue;
                        }
                    },
                }
                self.sync_tree(
                    local.join(&name),
                    child_remote,
                    child_rel,
                    index,
                    &mut *log,
                )
                .await;
            }

            for name in files {
                if self.options.skip_names.contains(&name) {
                    continue;
                }
                let child_rel = join_rel(&rel, &name);
                let child_remote = format!("{remote}/{name}");
                let local_path = local.join(&name);
                let meta = match tokio::fs::metadata(&local_path).await {
                    Ok(meta) => meta,
                    Err(err) => {
                        log.push(format!("error: {child_remote}: {err}"));
                        continue;
                    }
                };
                if let Some(limit) = self.options.max_file_size
                    && meta.len() > limit
                {
                    log.push(format!(
                        "skipped: {child_remote} ({} bytes exceeds limit)",
                        meta.len()
                    ));
                    continue;
                }
                if let Some(entry) = index.get(&child_rel) {
                    if entry.kind == EntryKind::Folder {
                        log.push(format!(
                            "error: {child_remote}: a remote folder blocks this file"
                        ));
                        continue;
                    }
                    if !needs_upload(&meta, entry) {
                        log.push(format!("skipped: {child_remote}"));
                        continue;
                    }
                }
                match self.uploader.upload_file(&local_path, &child_remote).await {
                    Ok(()) => log.push(format!("uploaded: {child_remote}")),
                    Err(err) => log.push(format!("error: {child_remote}: {err}")),
                }
            }
        }
        .boxed()
    }
}

/// Upload when the sizes differ or the local copy is strictly newer than the
/// remote one. An unreadable or missing remote timestamp counts as up to
/// date once the sizes match.
fn needs_upload(local: &Metadata, remote: &RemoteEntry) -> bool {
    if remote.size != Some(local.len()) {
        return true;
    }
    let Some(remote_mtime) = remote
        .last_modified
        .as_deref()
        .and_then(|raw| httpdate::parse_http_date(raw).ok())
    else {
        return false;
    };
    local
        .modified()
        .is_ok_and(|local_mtime: SystemTime| local_mtime > remote_mtime)
}

fn join_rel(rel: &str, name: &str) -> String {
    if rel.is_empty() {
        name.to_string()
    } else {
        format!("{rel}/{name}")
    }
}

/// Splits a directory's children into folder and file names, each sorted,
/// so runs over the same tree produce the same log order. Entries whose
/// names are not valid UTF-8 are skipped with a warning.
async fn read_dir_sorted(dir: &Path) -> std::io::Result<(Vec<String>, Vec<String>)> {
    let mut dirs = Vec::new();
    let mut files = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let Ok(name) = entry.file_name().into_string() else {
            warn!("skipping non-UTF-8 name in {}", dir.display());
            continue;
        };
        if entry.file_type().await?.is_dir() {
            dirs.push(name);
        } else {
            files.push(name);
        }
    }
    dirs.sort();
    files.sort();
    Ok((dirs, files))
}
