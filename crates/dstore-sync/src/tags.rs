//! Wire tags and record decoding.
//!
//! Every record is one tag line:
//!
//! ```text
//! <DataElement type="t" id="1" name="n" value="v" source="" sourceLocation="" refType="value" depth="2">
//! ```
//!
//! Attribute values are decoded by position, not by name, in the order of
//! [`Attr::ALL`]. The name of the reference slot only tells which
//! vocabulary the peer speaks.

use std::fmt;
use std::sync::OnceLock;

use tracing::info;

use dstore_core::{unescape, Attr, Attributes, NodeId, RefTag, RefType};

use crate::error::{Result, SyncError};

/// Record tag types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tag {
    DataElement,
    Buffer,
    File,
    FileAppend,
    FileBinary,
    FileAppendBinary,
    Class,
    RequestClass,
    Serialized,
}

impl Tag {
    pub const fn as_str(self) -> &'static str {
        match self {
            Tag::DataElement => "DataElement",
            Tag::Buffer => "Buffer",
            Tag::File => "File",
            Tag::FileAppend => "File.Append",
            Tag::FileBinary => "File.Binary",
            Tag::FileAppendBinary => "File.Append.Binary",
            Tag::Class => "Class",
            Tag::RequestClass => "RequestClass",
            Tag::Serialized => "Serialized",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "DataElement" => Tag::DataElement,
            "Buffer" => Tag::Buffer,
            "File" => Tag::File,
            "File.Append" => Tag::FileAppend,
            "File.Binary" => Tag::FileBinary,
            "File.Append.Binary" => Tag::FileAppendBinary,
            "Class" => Tag::Class,
            "RequestClass" => Tag::RequestClass,
            "Serialized" => Tag::Serialized,
            _ => return None,
        })
    }

    /// File envelope for the given mode.
    pub const fn file(append: bool, binary: bool) -> Self {
        match (append, binary) {
            (false, false) => Tag::File,
            (true, false) => Tag::FileAppend,
            (false, true) => Tag::FileBinary,
            (true, true) => Tag::FileAppendBinary,
        }
    }

    /// Whether the open tag announces a raw payload of `depth` bytes.
    pub fn is_envelope(self) -> bool {
        !matches!(self, Tag::DataElement | Tag::Buffer)
    }

    pub fn is_file(self) -> bool {
        matches!(
            self,
            Tag::File | Tag::FileAppend | Tag::FileBinary | Tag::FileAppendBinary
        )
    }

    pub fn is_append(self) -> bool {
        matches!(self, Tag::FileAppend | Tag::FileAppendBinary)
    }

    pub fn is_binary(self) -> bool {
        matches!(self, Tag::FileBinary | Tag::FileAppendBinary)
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What we have learned about the remote end.
#[derive(Debug, Default)]
pub struct PeerState {
    ref_tag: OnceLock<RefTag>,
}

impl PeerState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the vocabulary of a received record. Only the first call
    /// has any effect.
    pub fn observe(&self, tag: RefTag) {
        if self.ref_tag.set(tag).is_ok() {
            info!("peer uses {} attribute", tag.attribute_name());
        }
    }

    /// The peer's vocabulary, once known.
    pub fn ref_tag(&self) -> Option<RefTag> {
        self.ref_tag.get().copied()
    }
}

/// One decoded open tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagLine {
    pub tag: Tag,
    /// `(name, raw value)` pairs in wire order, values still escaped.
    pub pairs: Vec<(String, String)>,
    pub self_closing: bool,
}

impl TagLine {
    /// Decode `<Tag name="value" ...>` or `<Tag .../>`.
    pub fn parse(line: &str) -> Result<Self> {
        let line = line.trim();
        let body = line
            .strip_prefix('<')
            .filter(|b| !b.starts_with('/'))
            .ok_or_else(|| SyncError::Malformed(format!("not an open tag: {}", line)))?;

        let (body, self_closing) = if let Some(b) = body.strip_suffix("/>") {
            (b, true)
        } else if let Some(b) = body.strip_suffix('>') {
            (b, false)
        } else {
            return Err(SyncError::Malformed(format!("unterminated tag: {}", line)));
        };

        let (name, mut rest) = match body.find(char::is_whitespace) {
            Some(pos) => (&body[..pos], &body[pos..]),
            None => (body, ""),
        };
        let tag = Tag::from_name(name)
            .ok_or_else(|| SyncError::Malformed(format!("unknown tag: {}", name)))?;

        let mut pairs = Vec::new();
        loop {
            rest = rest.trim_start();
            if rest.is_empty() {
                break;
            }
            let eq = rest
                .find('=')
                .ok_or_else(|| SyncError::Malformed(format!("attribute without value in {}", line)))?;
            let attr_name = rest[..eq].trim().to_string();
            let after = rest[eq + 1..].trim_start();
            let quoted = after
                .strip_prefix('"')
                .ok_or_else(|| SyncError::Malformed(format!("unquoted attribute {}", attr_name)))?;
            let close = quoted
                .find('"')
                .ok_or_else(|| SyncError::Malformed(format!("unclosed quote in {}", attr_name)))?;
            pairs.push((attr_name, quoted[..close].to_string()));
            rest = &quoted[close + 1..];
        }

        Ok(Self {
            tag,
            pairs,
            self_closing,
        })
    }

    /// Raw value at the slot's position, or "" if absent.
    pub fn raw(&self, attr: Attr) -> &str {
        let pos = Attr::ALL.iter().position(|a| *a == attr).unwrap_or(0);
        self.pairs.get(pos).map(|(_, v)| v.as_str()).unwrap_or("")
    }

    /// Unescaped value at the slot's position.
    pub fn value(&self, attr: Attr) -> String {
        unescape(self.raw(attr)).into_owned()
    }

    /// Vocabulary of the reference slot, judged by its attribute name.
    pub fn ref_tag(&self) -> Option<RefTag> {
        self.pairs
            .get(6)
            .and_then(|(name, _)| RefTag::from_attribute_name(name))
    }

    /// Decode all slots.
    pub fn attributes(&self) -> Result<(Attributes, RefType)> {
        let ref_type = match self.raw(Attr::RefType) {
            "" => RefType::Value,
            token => RefType::from_token(token)
                .map_err(|e| SyncError::Malformed(e.to_string()))?,
        };
        let depth = Attributes::parse_depth(self.raw(Attr::Depth))
            .map_err(|e| SyncError::Malformed(e.to_string()))?;
        let attributes = Attributes {
            node_type: self.value(Attr::Type),
            id: NodeId::new(self.value(Attr::Id)),
            name: self.value(Attr::Name),
            value: self.value(Attr::Value),
            source: self.value(Attr::Source),
            source_location: self.value(Attr::SourceLocation),
            depth,
        };
        Ok((attributes, ref_type))
    }
}

/// Name of the tag closed by `line`, if it is a close tag.
pub fn close_tag(line: &str) -> Option<&str> {
    line.trim()
        .strip_prefix("</")
        .and_then(|rest| rest.strip_suffix('>'))
        .map(str::trim)
}
