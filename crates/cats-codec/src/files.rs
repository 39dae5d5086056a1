//! Files codec support: an owning handle over the temp files produced by
//! decoding a `Files` payload, and the encode/decode routines used by
//! [`crate::codec::FileCodec`].
//!
//! Temp-file ownership is modelled as a scoped RAII handle rather than
//! relying on destructor-time cleanup timing: each entry owns a
//! `tempfile::NamedTempFile`, which unlinks its backing path when dropped,
//! whether that drop happens on success, on an error path, or because the
//! connection closed mid-transfer.

use std::collections::BTreeMap;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use cats_core::headers::key;
use cats_core::Headers;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::codec::CodecError;

/// One entry to write when encoding a `Files` payload.
#[derive(Clone)]
pub enum FileSource {
    Path { key: String, name: String, mime: Option<String>, path: PathBuf },
    Bytes { key: String, name: String, mime: Option<String>, bytes: Vec<u8> },
}

impl FileSource {
    fn key(&self) -> &str {
        match self {
            FileSource::Path { key, .. } | FileSource::Bytes { key, .. } => key,
        }
    }

    fn name(&self) -> &str {
        match self {
            FileSource::Path { name, .. } | FileSource::Bytes { name, .. } => name,
        }
    }

    fn mime(&self) -> Option<&str> {
        match self {
            FileSource::Path { mime, .. } | FileSource::Bytes { mime, .. } => mime.as_deref(),
        }
    }

    fn len(&self) -> Result<u64, CodecError> {
        match self {
            FileSource::Path { path, .. } => Ok(std::fs::metadata(path)?.len()),
            FileSource::Bytes { bytes, .. } => Ok(bytes.len() as u64),
        }
    }

    fn write_into(&self, out: &mut impl Write) -> Result<(), CodecError> {
        match self {
            FileSource::Path { path, .. } => {
                let mut f = std::fs::File::open(path)?;
                std::io::copy(&mut f, out)?;
            }
            FileSource::Bytes { bytes, .. } => {
                out.write_all(bytes)?;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FileNode {
    key: String,
    name: String,
    size: u64,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    mime: Option<String>,
}

/// Encode: write every source's contents sequentially into one temp file,
/// honoring the `Offset` header (skip that many bytes across the whole
/// concatenation, as in `cats.v2.codecs.file.FileCodec.encode`), and stamp
/// `headers["Files"]` with each entry's `left` size — the already-offset-
/// adjusted remainder actually written, not its original size. `Offset`/
/// `Skip` are consumed here and cleared from `headers` afterward, since the
/// generic send path must not re-apply a truncation this codec already did.
pub fn encode_files(sources: &[FileSource], headers: &mut Headers) -> Result<Vec<u8>, CodecError> {
    let mut offset = headers.offset();
    let mut temp = NamedTempFile::new()?;
    let mut nodes = Vec::with_capacity(sources.len());

    for source in sources {
        let size = source.len()?;

        let written = if offset >= size {
            offset -= size;
            0
        } else if offset == 0 {
            source.write_into(&mut temp)?;
            size
        } else {
            // Skip `offset` bytes of this particular source, then copy the rest.
            let mut buf = Vec::new();
            match source {
                FileSource::Path { path, .. } => {
                    let mut f = std::fs::File::open(path)?;
                    f.seek(SeekFrom::Start(offset))?;
                    f.read_to_end(&mut buf)?;
                }
                FileSource::Bytes { bytes, .. } => {
                    buf.extend_from_slice(&bytes[offset as usize..]);
                }
            }
            temp.write_all(&buf)?;
            let left = size - offset;
            offset = 0;
            left
        };

        nodes.push(FileNode {
            key: source.key().to_string(),
            name: source.name().to_string(),
            size: written,
            mime: source.mime().map(str::to_string),
        });
    }

    let nodes_json = serde_json::to_value(&nodes).expect("FileNode is always JSON-representable");
    headers.insert_raw(key::FILES, nodes_json);
    headers.clear_offset();

    temp.flush()?;
    let mut bytes = Vec::new();
    temp.reopen()?.read_to_end(&mut bytes)?;
    Ok(bytes)
}

/// An owning handle over the temp files produced by decoding a `Files`
/// payload. Each file's backing path is unlinked when the corresponding
/// `NamedTempFile` drops.
pub struct Files {
    entries: BTreeMap<String, FileEntry>,
}

pub struct FileEntry {
    pub name: String,
    pub mime: Option<String>,
    pub size: u64,
    temp: NamedTempFile,
}

impl FileEntry {
    pub fn path(&self) -> &Path {
        self.temp.path()
    }
}

impl Files {
    pub fn get(&self, key: &str) -> Option<&FileEntry> {
        self.entries.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.entries.keys()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Decode: partition the incoming buffer according to `headers["Files"]`
/// node sizes, writing each slice to its own temp file.
pub fn decode_files(buf: &[u8], headers: &Headers) -> Result<Files, CodecError> {
    let nodes_value = headers
        .get(key::FILES)
        .ok_or_else(|| CodecError::MalformedFiles("missing Files header".to_string()))?;
    let nodes: Vec<FileNode> = serde_json::from_value(nodes_value.clone())
        .map_err(|e| CodecError::MalformedFiles(e.to_string()))?;

    let mut entries = BTreeMap::new();
    let mut cursor = 0usize;
    for node in nodes {
        let end = cursor + node.size as usize;
        if end > buf.len() {
            return Err(CodecError::MalformedFiles(format!(
                "file '{}' expects {} bytes but only {} remain",
                node.name,
                node.size,
                buf.len() - cursor
            )));
        }
        let slice = &buf[cursor..end];
        cursor = end;

        let mut temp = NamedTempFile::new()?;
        temp.write_all(slice)?;
        temp.flush()?;

        entries.insert(
            node.key,
            FileEntry { name: node.name, mime: node.mime, size: node.size, temp },
        );
    }

    Ok(Files { entries })
}
