//! validated names for documents held by an index.

use std::fmt;

/// A validated document type name.
///
/// Document types become directory names in the git backend, so they are
/// restricted to keep them safe as path components.
///
/// Valid names:
/// - 1-64 characters
/// - alphanumeric, underscores, hyphens only
/// - must start with a letter or underscore
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocType(String);

impl DocType {
    /// create a new DocType, validating the input
    pub fn new(name: impl Into<String>) -> Result<Self, InvalidNameError> {
        let name = name.into();
        Self::validate(&name)?;
        Ok(Self(name))
    }

    fn validate(name: &str) -> Result<(), InvalidNameError> {
        let first = name.chars().next().ok_or(InvalidNameError::Empty)?;

        if name.len() > 64 {
            return Err(InvalidNameError::TooLong(name.len()));
        }

        if !first.is_ascii_alphabetic() && first != '_' {
            return Err(InvalidNameError::InvalidStart(first));
        }

        for (i, c) in name.chars().enumerate() {
            if !c.is_ascii_alphanumeric() && c != '_' && c != '-' {
                return Err(InvalidNameError::InvalidCharacter { char: c, position: i });
            }
        }

        Ok(())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for DocType {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A validated document key.
///
/// keys are free-form (revision keys embed branch paths and timestamps),
/// but must be non-empty, at most 512 bytes and free of control characters.
/// the git backend escapes the few characters that cannot appear in a file name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocKey(String);

impl DocKey {
    pub const MAX_LEN: usize = 512;

    pub fn new(key: impl Into<String>) -> Result<Self, InvalidNameError> {
        let key = key.into();
        Self::validate(&key)?;
        Ok(Self(key))
    }

    fn validate(key: &str) -> Result<(), InvalidNameError> {
        if key.is_empty() {
            return Err(InvalidNameError::Empty);
        }

        if key.len() > Self::MAX_LEN {
            return Err(InvalidNameError::TooLong(key.len()));
        }

        if let Some((i, c)) = key.chars().enumerate().find(|(_, c)| c.is_control()) {
            return Err(InvalidNameError::InvalidCharacter { char: c, position: i });
        }

        Ok(())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    /// file name used for this key inside a type directory
    pub fn to_file_name(&self) -> String {
        let mut out = String::with_capacity(self.0.len() + 5);
        for (i, c) in self.0.chars().enumerate() {
            match c {
                '%' => out.push_str("%25"),
                '/' => out.push_str("%2F"),
                '.' if i == 0 => out.push_str("%2E"),
                _ => out.push(c),
            }
        }
        out.push_str(".json");
        out
    }

    /// inverse of [`DocKey::to_file_name`]; `None` for foreign files
    pub fn from_file_name(name: &str) -> Option<Self> {
        let stem = name.strip_suffix(".json")?;
        let mut out = String::with_capacity(stem.len());
        let mut chars = stem.chars();
        while let Some(c) = chars.next() {
            if c != '%' {
                out.push(c);
                continue;
            }
            let hex: String = chars.by_ref().take(2).collect();
            let byte = u8::from_str_radix(&hex, 16).ok()?;
            out.push(char::from(byte));
        }
        Self::new(out).ok()
    }
}

impl fmt::Display for DocKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for DocKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Location of a document: `{doc_type}/{encoded key}.json`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocPath {
    pub doc_type: DocType,
    pub key: DocKey,
}

impl DocPath {
    pub fn new(doc_type: &str, key: &str) -> Result<Self, InvalidNameError> {
        Ok(Self {
            doc_type: DocType::new(doc_type)?,
            key: DocKey::new(key)?,
        })
    }

    /// path of the blob inside the git tree
    pub fn as_string(&self) -> String {
        format!("{}/{}", self.doc_type, self.key.to_file_name())
    }
}

impl fmt::Display for DocPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.doc_type, self.key)
    }
}

/// error type for invalid document types and keys
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidNameError {
    Empty,
    TooLong(usize),
    InvalidStart(char),
    InvalidCharacter { char: char, position: usize },
}

impl fmt::Display for InvalidNameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "name cannot be empty"),
            Self::TooLong(len) => write!(f, "name too long: {} characters", len),
            Self::InvalidStart(c) => write!(f, "name cannot start with '{}'", c),
            Self::InvalidCharacter { char, position } => {
                write!(f, "invalid character {:?} at position {}", char, position)
            }
        }
    }
}

impl std::error::Error for InvalidNameError {}
