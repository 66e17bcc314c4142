use std::io;
use std::path::Path;
use std::time::Duration;

use percent_encoding::percent_decode_str;
use reqwest::{Client, Method, StatusCode, header};
use thiserror::Error;
use url::Url;

use crate::xml::{self, DavResponse, XmlError};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// PROPFIND body requesting the properties the bridge consumes. WebDAV verbs
/// beyond GET/PUT/POST require the body to actually reach the server; it is
/// always set explicitly on the request rather than left to client defaults.
const PROPFIND_PROPS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<d:propfind xmlns:d="DAV:" xmlns:oc="http://owncloud.org/ns">
  <d:prop>
    <d:displayname/>
    <d:getcontenttype/>
    <d:getcontentlength/>
    <d:getlastmodified/>
    <d:resourcetype/>
    <oc:fileid/>
  </d:prop>
</d:propfind>"#;

#[derive(Debug, Error)]
pub enum DavError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("base url cannot carry dav path segments")]
    InvalidBaseUrl,
    #[error("authentication rejected ({status})")]
    Auth { status: StatusCode },
    #[error("not found: {path}")]
    NotFound { path: String },
    #[error("{op} {path} returned {status}: {body}")]
    Status {
        op: &'static str,
        path: String,
        status: StatusCode,
        body: String,
    },
    #[error("protocol error: {0}")]
    Xml(#[from] XmlError),
    #[error("share response missing public token for {path}")]
    MissingShareToken { path: String },
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Connection settings for one remote account. Owned by the client once it
/// is constructed; the core never reads ambient configuration.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub base_url: String,
    pub username: String,
    pub password: String,
    pub timeout: Duration,
}

impl Credentials {
    pub fn new(
        base_url: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            username: username.into(),
            password: password.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Folder,
}

/// Metadata for one remote resource, produced from a multistatus response.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteEntry {
    /// Slash-separated path relative to the user's dav root.
    pub path: String,
    pub name: String,
    pub kind: EntryKind,
    pub size: Option<u64>,
    pub mime_type: Option<String>,
    /// Raw `getlastmodified` header string (RFC 1123).
    pub last_modified: Option<String>,
    pub id: Option<String>,
}

#[derive(Clone)]
pub struct DavClient {
    http: Client,
    base_url: Url,
    username: String,
    password: String,
}

impl DavClient {
    pub fn new(credentials: &Credentials) -> Result<Self, DavError> {
        let http = Client::builder().timeout(credentials.timeout).build()?;
        Ok(Self {
            http,
            base_url: Url::parse(credentials.base_url.trim_end_matches('/'))?,
            username: credentials.username.clone(),
            password: credentials.password.clone(),
        })
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub(crate) fn base_url(&self) -> &Url {
        &self.base_url
    }

    // ── URL builders ─────────────────────────────────────────────────────

    /// `{base}/remote.php/dav/files/{user}/{path}`. Each path segment is
    /// percent-encoded individually, preserving `/` separators.
    pub(crate) fn files_url(&self, path: &str, trailing_slash: bool) -> Result<Url, DavError> {
        self.dav_url(&["remote.php", "dav", "files"], path, trailing_slash)
    }

    /// `{base}/remote.php/dav/uploads/{user}/{session}[/{name}]`.
    pub(crate) fn uploads_url(
        &self,
        session_id: &str,
        chunk_name: Option<&str>,
    ) -> Result<Url, DavError> {
        let path = match chunk_name {
            Some(name) => format!("{session_id}/{name}"),
            None => session_id.to_string(),
        };
        self.dav_url(&["remote.php", "dav", "uploads"], &path, chunk_name.is_none())
    }

    fn dav_url(
        &self,
        prefix: &[&str],
        path: &str,
        trailing_slash: bool,
    ) -> Result<Url, DavError> {
        let mut url = self.base_url.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| DavError::InvalidBaseUrl)?;
            segments.pop_if_empty();
            segments.extend(prefix.iter().copied());
            segments.push(&self.username);
            segments.extend(path.split('/').filter(|s| !s.is_empty()));
            if trailing_slash {
                segments.push("");
            }
        }
        Ok(url)
    }

    // ── Public operations ────────────────────────────────────────────────

    /// Zero-depth probe of the user root. Success only on 207.
    pub async fn test_connection(&self) -> Result<(), DavError> {
        let response = self.propfind("", "0").await?;
        if response.status() == StatusCode::MULTI_STATUS {
            Ok(())
        } else {
            Err(map_failure("PROPFIND", "/", response).await)
        }
    }

    /// Depth-1 listing of `path`. The first multistatus response represents
    /// the queried collection itself and is excluded.
    pub async fn list_folder(&self, path: &str) -> Result<Vec<RemoteEntry>, DavError> {
        let responses = self.propfind_entries(path, "1").await?;
        Ok(responses
            .into_iter()
            .skip(1)
            .map(|r| self.entry_from_response(r))
            .collect())
    }

    /// Depth-0 probe returning exactly one entry.
    pub async fn get_info(&self, path: &str) -> Result<RemoteEntry, DavError> {
        let responses = self.propfind_entries(path, "0").await?;
        responses
            .into_iter()
            .next()
            .map(|r| self.entry_from_response(r))
            .ok_or_else(|| DavError::NotFound {
                path: path.to_string(),
            })
    }

    /// Create `path` and any missing ancestors, root-to-leaf. 405 means the
    /// collection already exists and counts as success. Returns whether the
    /// leaf collection was newly created.
    pub async fn create_folder(&self, path: &str) -> Result<bool, DavError> {
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let mut prefix = String::new();
        let mut created = false;
        for segment in segments {
            if !prefix.is_empty() {
                prefix.push('/');
            }
            prefix.push_str(segment);
            let url = self.files_url(&prefix, false)?;
            created = self.mkcol_absolute(url, &prefix).await?;
        }
        Ok(created)
    }

    /// Idempotent delete: 404 means the resource is already gone.
    pub async fn delete(&self, path: &str) -> Result<(), DavError> {
        let url = self.files_url(path, false)?;
        self.delete_absolute(url, path).await
    }

    pub async fn move_to(&self, from: &str, to: &str) -> Result<(), DavError> {
        let src = self.files_url(from, false)?;
        let dest = self.files_url(to, false)?;
        self.move_absolute(src, dest, from).await
    }

    /// GET the file at `path`. Success only on 200.
    pub async fn download(&self, path: &str) -> Result<Vec<u8>, DavError> {
        let url = self.files_url(path, false)?;
        let response = self.authed(self.http.get(url)).send().await?;
        if response.status() != StatusCode::OK {
            return Err(map_failure("GET", path, response).await);
        }
        Ok(response.bytes().await?.to_vec())
    }

    /// Download into a local file, creating missing parent directories.
    /// Write failures surface as the IO variant, distinct from transport
    /// failures.
    pub async fn download_to_file(&self, path: &str, local: &Path) -> Result<(), DavError> {
        let data = self.download(path).await?;
        if let Some(parent) = local.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(local, data).await?;
        Ok(())
    }

    /// Simple whole-body PUT.
    pub async fn put(&self, path: &str, data: Vec<u8>) -> Result<(), DavError> {
        let url = self.files_url(path, false)?;
        self.put_absolute(url, data, path).await
    }

    // ── Request plumbing shared with the upload engine ───────────────────

    pub(crate) async fn put_absolute(
        &self,
        url: Url,
        data: Vec<u8>,
        path: &str,
    ) -> Result<(), DavError> {
        let response = self
            .authed(self.http.put(url))
            .header(header::CONTENT_TYPE, "application/octet-stream")
            .body(data)
            .send()
            .await?;
        match response.status() {
            StatusCode::OK | StatusCode::CREATED | StatusCode::NO_CONTENT => Ok(()),
            _ => Err(map_failure("PUT", path, response).await),
        }
    }

    pub(crate) async fn mkcol_absolute(&self, url: Url, path: &str) -> Result<bool, DavError> {
        // MKCOL carries an explicit empty body; some stacks drop bodies for
        // verbs they do not special-case and the server answers 400.
        let response = self
            .authed(self.http.request(dav_method("MKCOL"), url))
            .body(Vec::new())
            .send()
            .await?;
        match response.status() {
            StatusCode::CREATED => Ok(true),
            StatusCode::METHOD_NOT_ALLOWED => Ok(false),
            _ => Err(map_failure("MKCOL", path, response).await),
        }
    }

    pub(crate) async fn move_absolute(
        &self,
        src: Url,
        dest: Url,
        path: &str,
    ) -> Result<(), DavError> {
        let response = self
            .authed(self.http.request(dav_method("MOVE"), src))
            .header("Destination", dest.as_str())
            .header("Overwrite", "T")
            .body(Vec::new())
            .send()
            .await?;
        match response.status() {
            StatusCode::CREATED | StatusCode::NO_CONTENT => Ok(()),
            _ => Err(map_failure("MOVE", path, response).await),
        }
    }

    pub(crate) async fn delete_absolute(&self, url: Url, path: &str) -> Result<(), DavError> {
        let response = self.authed(self.http.delete(url)).send().await?;
        let status = response.status();
        if status.is_success() || status == StatusCode::NOT_FOUND {
            Ok(())
        } else {
            Err(map_failure("DELETE", path, response).await)
        }
    }

    pub(crate) fn http_get(&self, url: Url) -> reqwest::RequestBuilder {
        self.http.get(url)
    }

    pub(crate) fn http_post(&self, url: Url) -> reqwest::RequestBuilder {
        self.http.post(url)
    }

    pub(crate) fn authed(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request
            .basic_auth(&self.username, Some(&self.password))
            .header("OCS-APIRequest", "true")
    }

    async fn propfind(&self, path: &str, depth: &str) -> Result<reqwest::Response, DavError> {
        // Depth-1 listings and the empty-path root probe address collections.
        let url = self.files_url(path, depth == "1" || path.is_empty())?;
        Ok(self
            .authed(self.http.request(dav_method("PROPFIND"), url))
            .header("Depth", depth)
            .header(header::CONTENT_TYPE, "application/xml; charset=utf-8")
            .body(PROPFIND_PROPS)
            .send()
            .await?)
    }

    async fn propfind_entries(
        &self,
        path: &str,
        depth: &str,
    ) -> Result<Vec<DavResponse>, DavError> {
        let response = self.propfind(path, depth).await?;
        if response.status() != StatusCode::MULTI_STATUS {
            return Err(map_failure("PROPFIND", path, response).await);
        }
        let text = response.text().await?;
        Ok(xml::parse_multistatus(&text)?)
    }

    fn entry_from_response(&self, response: DavResponse) -> RemoteEntry {
        let path = self.relative_path(&response.href);
        let name = match response.display_name {
            Some(name) if !name.is_empty() => name,
            _ => path.rsplit('/').next().unwrap_or_default().to_string(),
        };
        RemoteEntry {
            kind: if response.is_collection {
                EntryKind::Folder
            } else {
                EntryKind::File
            },
            size: response.content_length,
            mime_type: response.content_type,
            last_modified: response.last_modified,
            id: response.file_id,
            path,
            name,
        }
    }

    /// Reduce a multistatus href (absolute or server-relative, percent
    /// encoded) to a slash path relative to the user's dav root.
    fn relative_path(&self, href: &str) -> String {
        let path = match Url::parse(href) {
            Ok(url) => url.path().to_string(),
            Err(_) => href.to_string(),
        };
        let decoded = percent_decode_str(&path).decode_utf8_lossy().into_owned();
        let prefix = format!("/remote.php/dav/files/{}", self.username);
        let rest = decoded.strip_prefix(&prefix).unwrap_or(&decoded);
        rest.trim_matches('/').to_string()
    }
}

fn dav_method(name: &'static str) -> Method {
    Method::from_bytes(name.as_bytes()).expect("static dav verb")
}

pub(crate) async fn map_failure(
    op: &'static str,
    path: &str,
    response: reqwest::Response,
) -> DavError {
    let status = response.status();
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => DavError::Auth { status },
        StatusCode::NOT_FOUND => DavError::NotFound {
            path: path.to_string(),
        },
        _ => {
            let body = response.text().await.unwrap_or_default();
            DavError::Status {
                op,
                path: path.to_string(),
                status,
                body,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> DavClient {
        DavClient::new(&Credentials::new("https://cloud.test", "alice", "pw")).unwrap()
    }

    #[test]
    fn files_url_encodes_segments_individually() {
        let url = client().files_url("Docs/hello world.txt", false).unwrap();
        assert_eq!(
            url.as_str(),
            "https://cloud.test/remote.php/dav/files/alice/Docs/hello%20world.txt"
        );
    }

    #[test]
    fn files_url_listing_keeps_trailing_slash() {
        let url = client().files_url("Docs", true).unwrap();
        assert_eq!(
            url.as_str(),
            "https://cloud.test/remote.php/dav/files/alice/Docs/"
        );
    }

    #[test]
    fn uploads_url_addresses_session_and_chunk() {
        let c = client();
        let session = c.uploads_url("abc", None).unwrap();
        assert_eq!(
            session.as_str(),
            "https://cloud.test/remote.php/dav/uploads/alice/abc/"
        );
        let chunk = c.uploads_url("abc", Some("000000000000000-000000000000005")).unwrap();
        assert!(chunk.as_str().ends_with("/abc/000000000000000-000000000000005"));
    }

    #[test]
    fn relative_path_strips_prefix_and_decodes() {
        let c = client();
        assert_eq!(
            c.relative_path("/remote.php/dav/files/alice/Docs/a%20b.txt"),
            "Docs/a b.txt"
        );
        assert_eq!(c.relative_path("/remote.php/dav/files/alice/"), "");
        assert_eq!(
            c.relative_path("https://cloud.test/remote.php/dav/files/alice/x"),
            "x"
        );
    }

    #[test]
    fn base_url_trailing_slash_is_ignored() {
        let c = DavClient::new(&Credentials::new("https://cloud.test/", "u", "p")).unwrap();
        let url = c.files_url("a", false).unwrap();
        assert_eq!(url.as_str(), "https://cloud.test/remote.php/dav/files/u/a");
    }
}
