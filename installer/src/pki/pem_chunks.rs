// PEM chunking / assembly
//
// A PEM body is split into labelled fragments small enough to print as QR payloads, and
// fragments scanned back (in any order) are reassembled into a single PEM document.
//
// Fragment payload format:
//   <label>;<1-based index>;<total>\n<body slice>

use base64::Engine;
use std::collections::BTreeMap;
use thiserror::Error;

/// Default per-fragment size used for printed backups.
pub const DEFAULT_FRAGMENT_SIZE: usize = 800;

pub const LABEL_ROOT_CERT: &str = "racine.cert";
pub const LABEL_ROOT_KEY: &str = "racine.cle";

const PEM_LINE_WIDTH: usize = 64;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChunkError {
    #[error("PEM body is empty")]
    EmptyBody,
    #[error("Fragment size must be greater than zero")]
    InvalidChunkSize,
    #[error("Malformed fragment header: '{0}'")]
    MalformedHeader(String),
    #[error("Fragment index {index} is out of range (total {total})")]
    IndexOutOfRange { index: usize, total: usize },
    #[error("Fragment label '{found}' does not match '{expected}'")]
    LabelMismatch { expected: String, found: String },
    #[error("Fragment total {found} does not match {expected}")]
    TotalMismatch { expected: usize, found: usize },
    #[error("Fragment {0} was already scanned with different content")]
    ConflictingDuplicate(usize),
    #[error("Missing fragments: {0:?}")]
    Missing(Vec<usize>),
    #[error("Unknown fragment label '{0}' (expected a .cert or .cle suffix)")]
    UnknownLabel(String),
    #[error("Assembled body is not valid base64")]
    InvalidBase64,
}

/// PEM armour picked from the fragment label suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PemKind {
    Certificate,
    EncryptedPrivateKey,
}

impl PemKind {
    pub fn from_label(label: &str) -> Result<Self, ChunkError> {
        if label.ends_with(".cert") {
            Ok(PemKind::Certificate)
        } else if label.ends_with(".cle") {
            Ok(PemKind::EncryptedPrivateKey)
        } else {
            Err(ChunkError::UnknownLabel(label.to_string()))
        }
    }

    pub fn tag(&self) -> &'static str {
        match self {
            PemKind::Certificate => "CERTIFICATE",
            PemKind::EncryptedPrivateKey => "ENCRYPTED PRIVATE KEY",
        }
    }
}

/// Strip the armour lines and join the remaining lines into one base64 string.
pub fn pem_body(pem: &str) -> String {
    let mut lines: Vec<&str> = pem.trim().lines().map(|l| l.trim()).collect();
    if lines.first().is_some_and(|l| l.starts_with("---")) {
        lines.remove(0);
    }
    if lines.last().is_some_and(|l| l.starts_with("---")) {
        lines.pop();
    }
    lines.concat()
}

/// Split a PEM document into `ceil(len / max_chunk_size)` labelled fragments.
///
/// The per-fragment size is stretched to `len / n + n` so the last fragment is not
/// disproportionately small. This can leave a trailing fragment empty, which is still emitted
/// so the announced total matches the number of payloads.
pub fn chunk(pem: &str, label: &str, max_chunk_size: usize) -> Result<Vec<String>, ChunkError> {
    if max_chunk_size == 0 {
        return Err(ChunkError::InvalidChunkSize);
    }
    let body = pem_body(pem);
    if body.is_empty() {
        return Err(ChunkError::EmptyBody);
    }

    let len = body.len();
    let n = len.div_ceil(max_chunk_size);
    let adjusted = len / n + n;

    let fragments = (0..n)
        .map(|i| {
            let start = (i * adjusted).min(len);
            let end = ((i + 1) * adjusted).min(len);
            format!("{};{};{}\n{}", label, i + 1, n, &body[start..end])
        })
        .collect();
    Ok(fragments)
}

/// Fragments collected so far for one label.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FragmentSet {
    label: Option<String>,
    total: Option<usize>,
    parts: BTreeMap<usize, String>,
}

impl FragmentSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn total(&self) -> Option<usize> {
        self.total
    }

    pub fn received(&self) -> usize {
        self.parts.len()
    }

    pub fn is_complete(&self) -> bool {
        matches!(self.total, Some(t) if t == self.parts.len())
    }

    /// Indices not yet received, in ascending order.
    pub fn missing(&self) -> Vec<usize> {
        match self.total {
            Some(total) => (1..=total)
                .filter(|i| !self.parts.contains_key(i))
                .collect(),
            None => Vec::new(),
        }
    }

    /// Add one scanned fragment payload.
    ///
    /// Re-scanning an identical fragment is a no-op. A fragment whose label or total disagrees
    /// with earlier ones, or that repeats an index with different content, is rejected and the
    /// set is left untouched.
    pub fn insert(&mut self, fragment: &str) -> Result<(), ChunkError> {
        let (label, index, total, body) = parse_fragment(fragment)?;

        if let Some(expected) = self.label.as_deref() {
            if expected != label {
                return Err(ChunkError::LabelMismatch {
                    expected: expected.to_string(),
                    found: label.to_string(),
                });
            }
        }
        if let Some(expected) = self.total {
            if expected != total {
                return Err(ChunkError::TotalMismatch {
                    expected,
                    found: total,
                });
            }
        }
        if let Some(existing) = self.parts.get(&index) {
            if existing != body {
                return Err(ChunkError::ConflictingDuplicate(index));
            }
            return Ok(());
        }

        self.label.get_or_insert_with(|| label.to_string());
        self.total.get_or_insert(total);
        self.parts.insert(index, body.to_string());
        Ok(())
    }

    /// Build a set from a list of payloads (e.g. the lines of an exported fragment file).
    pub fn from_fragments<'a, I>(fragments: I) -> Result<Self, ChunkError>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut set = Self::new();
        for f in fragments {
            set.insert(f)?;
        }
        Ok(set)
    }
}

fn parse_fragment(fragment: &str) -> Result<(&str, usize, usize, &str), ChunkError> {
    let fragment = fragment.trim_start();
    let (header, body) = fragment.split_once('\n').unwrap_or((fragment, ""));
    let header = header.trim_end_matches('\r');
    let body = body.trim();

    let mut fields = header.split(';');
    let (Some(label), Some(index), Some(total), None) =
        (fields.next(), fields.next(), fields.next(), fields.next())
    else {
        return Err(ChunkError::MalformedHeader(header.to_string()));
    };

    let label = label.trim();
    let index: usize = index
        .trim()
        .parse()
        .map_err(|_| ChunkError::MalformedHeader(header.to_string()))?;
    let total: usize = total
        .trim()
        .parse()
        .map_err(|_| ChunkError::MalformedHeader(header.to_string()))?;

    if label.is_empty() || total == 0 {
        return Err(ChunkError::MalformedHeader(header.to_string()));
    }
    if index == 0 || index > total {
        return Err(ChunkError::IndexOutOfRange { index, total });
    }

    Ok((label, index, total, body))
}

/// Reassemble a complete fragment set into a PEM document (LF line endings, 64 columns).
pub fn assemble(set: &FragmentSet) -> Result<String, ChunkError> {
    let (Some(label), Some(total)) = (set.label.as_deref(), set.total) else {
        return Err(ChunkError::EmptyBody);
    };
    let missing = set.missing();
    if !missing.is_empty() {
        return Err(ChunkError::Missing(missing));
    }
    let kind = PemKind::from_label(label)?;

    let body: String = (1..=total)
        .filter_map(|i| set.parts.get(&i))
        .map(String::as_str)
        .collect();
    if body.is_empty() {
        return Err(ChunkError::EmptyBody);
    }
    if base64::engine::general_purpose::STANDARD
        .decode(body.as_bytes())
        .is_err()
    {
        return Err(ChunkError::InvalidBase64);
    }

    Ok(wrap_pem(kind.tag(), &body))
}

/// Wrap a base64 body with PEM armour.
pub fn wrap_pem(tag: &str, body: &str) -> String {
    let mut out = format!("-----BEGIN {}-----\n", tag);
    let bytes = body.as_bytes();
    for line in bytes.chunks(PEM_LINE_WIDTH) {
        // body is ASCII base64, chunk boundaries are char boundaries
        out.push_str(&String::from_utf8_lossy(line));
        out.push('\n');
    }
    out.push_str(&format!("-----END {}-----\n", tag));
    out
}
