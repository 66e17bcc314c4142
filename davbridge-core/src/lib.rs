mod client;
mod share;
mod upload;
mod xml;

pub use client::{Credentials, DavClient, DavError, EntryKind, RemoteEntry};
pub use share::Share;
pub use upload::{DEFAULT_CHUNK_SIZE, UploadError, Uploader};
pub use xml::{DavResponse, XmlError, parse_multistatus};
