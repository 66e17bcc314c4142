use reqwest::header;
use serde::Deserialize;
use url::Url;

use crate::client::{DavClient, DavError, map_failure};

const SHARES_SEGMENTS: [&str; 7] = [
    "ocs",
    "v2.php",
    "apps",
    "files_sharing",
    "api",
    "v1",
    "shares",
];

/// OCS share type for a public link.
const PUBLIC_LINK: u8 = 3;

#[derive(Debug, Clone, Deserialize)]
pub struct Share {
    pub id: String,
    pub share_type: u8,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OcsEnvelope<T> {
    ocs: OcsBody<T>,
}

#[derive(Debug, Deserialize)]
struct OcsBody<T> {
    data: T,
}

impl DavClient {
    /// Return the existing public link share on `path`, or `None` when no
    /// public link exists. "No share" is not an error.
    pub async fn get_share(&self, path: &str) -> Result<Option<Share>, DavError> {
        let mut url = self.shares_url()?;
        url.query_pairs_mut()
            .append_pair("path", path)
            .append_pair("format", "json");
        let response = self
            .authed(self.http_get(url))
            .header(header::ACCEPT, "application/json")
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(map_failure("GET", path, response).await);
        }
        let envelope: OcsEnvelope<Vec<Share>> = response.json().await?;
        Ok(envelope
            .ocs
            .data
            .into_iter()
            .find(|share| share.share_type == PUBLIC_LINK))
    }

    /// Request a new public link share on `path`.
    pub async fn create_share(&self, path: &str) -> Result<Share, DavError> {
        let mut url = self.shares_url()?;
        url.query_pairs_mut().append_pair("format", "json");
        let form = [("path", path), ("shareType", "3")];
        let response = self
            .authed(self.http_post(url))
            .header(header::ACCEPT, "application/json")
            .form(&form)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(map_failure("POST", path, response).await);
        }
        let envelope: OcsEnvelope<Share> = response.json().await?;
        Ok(envelope.ocs.data)
    }

    /// Get-or-create a public link and derive the direct download URL from
    /// its token.
    pub async fn public_url(&self, path: &str) -> Result<String, DavError> {
        let share = match self.get_share(path).await? {
            Some(share) => share,
            None => self.create_share(path).await?,
        };
        let token = share.token.ok_or_else(|| DavError::MissingShareToken {
            path: path.to_string(),
        })?;
        let mut url = self.base_url().clone();
        url.path_segments_mut()
            .map_err(|_| DavError::InvalidBaseUrl)?
            .pop_if_empty()
            .extend(["s", token.as_str(), "download"]);
        Ok(url.to_string())
    }

    fn shares_url(&self) -> Result<Url, DavError> {
        let mut url = self.base_url().clone();
        url.path_segments_mut()
            .map_err(|_| DavError::InvalidBaseUrl)?
            .pop_if_empty()
            .extend(SHARES_SEGMENTS);
        Ok(url)
    }
}
