use quick_xml::Reader;
use quick_xml::events::Event;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum XmlError {
    #[error("xml parse error: {0}")]
    Parse(#[from] quick_xml::Error),
}

/// One `<response>` block of a WebDAV multistatus body, reduced to the
/// properties this crate cares about. Only properties carried by a propstat
/// block with a 2xx status are applied; servers report failed properties in
/// separate propstat blocks with a non-2xx status.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct DavResponse {
    pub href: String,
    pub display_name: Option<String>,
    pub content_length: Option<u64>,
    pub content_type: Option<String>,
    pub last_modified: Option<String>,
    pub file_id: Option<String>,
    pub is_collection: bool,
}

#[derive(Debug, Default)]
struct PropBlock {
    display_name: Option<String>,
    content_length: Option<u64>,
    content_type: Option<String>,
    last_modified: Option<String>,
    file_id: Option<String>,
    is_collection: bool,
    status_ok: bool,
}

impl PropBlock {
    fn apply_to(self, response: &mut DavResponse) {
        if self.display_name.is_some() {
            response.display_name = self.display_name;
        }
        if self.content_length.is_some() {
            response.content_length = self.content_length;
        }
        if self.content_type.is_some() {
            response.content_type = self.content_type;
        }
        if self.last_modified.is_some() {
            response.last_modified = self.last_modified;
        }
        if self.file_id.is_some() {
            response.file_id = self.file_id;
        }
        response.is_collection |= self.is_collection;
    }
}

/// Parse a WebDAV multistatus XML body into `DavResponse` entries.
///
/// Vendor namespace prefixes (`d:`, `D:`, `oc:`, `nc:`, ...) are stripped
/// before element names are matched.
pub fn parse_multistatus(xml: &str) -> Result<Vec<DavResponse>, XmlError> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut responses = Vec::new();
    let mut current: Option<DavResponse> = None;
    let mut pending = PropBlock::default();
    let mut in_propstat = false;
    let mut in_resourcetype = false;
    let mut current_tag: Option<String> = None;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(ref e) => {
                let local = local_name(e.name().as_ref());
                match local.as_str() {
                    "response" => {
                        current = Some(DavResponse::default());
                    }
                    "propstat" => {
                        in_propstat = true;
                        pending = PropBlock::default();
                    }
                    "resourcetype" => in_resourcetype = true,
                    "collection" if in_resourcetype => pending.is_collection = true,
                    "href" | "status" | "displayname" | "getcontenttype"
                    | "getcontentlength" | "getlastmodified" | "fileid" => {
                        current_tag = Some(local);
                    }
                    _ => {}
                }
            }
            Event::Empty(ref e) => {
                if local_name(e.name().as_ref()) == "collection" && in_resourcetype {
                    pending.is_collection = true;
                }
            }
            Event::Text(ref e) => {
                if let Some(ref tag) = current_tag {
                    let text = e.unescape()?.to_string();
                    match tag.as_str() {
                        "href" => {
                            if let Some(ref mut res) = current {
                                res.href = text;
                            }
                        }
                        "status" if in_propstat => {
                            pending.status_ok = status_is_success(&text);
                        }
                        "displayname" => pending.display_name = Some(text),
                        "getcontenttype" => pending.content_type = Some(text),
                        "getcontentlength" => pending.content_length = text.parse().ok(),
                        "getlastmodified" => pending.last_modified = Some(text),
                        "fileid" => pending.file_id = Some(text),
                        _ => {}
                    }
                }
            }
            Event::End(ref e) => {
                let local = local_name(e.name().as_ref());
                match local.as_str() {
                    "response" => {
                        if let Some(res) = current.take() {
                            responses.push(res);
                        }
                    }
                    "propstat" => {
                        in_propstat = false;
                        if pending.status_ok {
                            if let Some(ref mut res) = current {
                                std::mem::take(&mut pending).apply_to(res);
                            }
                        }
                    }
                    "resourcetype" => in_resourcetype = false,
                    _ => {
                        if current_tag.as_deref() == Some(&local) {
                            current_tag = None;
                        }
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(responses)
}

/// Extract the local name from a possibly-namespaced XML tag.
fn local_name(raw: &[u8]) -> String {
    let s = String::from_utf8_lossy(raw);
    match s.rfind(':') {
        Some(pos) => s[pos + 1..].to_string(),
        None => s.to_string(),
    }
}

/// `<d:status>` carries a status line such as `HTTP/1.1 200 OK`.
fn status_is_success(line: &str) -> bool {
    line.split_whitespace()
        .nth(1)
        .and_then(|code| code.parse::<u16>().ok())
        .is_some_and(|code| (200..300).contains(&code))
}
