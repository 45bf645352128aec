//! Branch paths.
//!
//! A path is a slash separated list of branch names rooted at `MAIN`, e.g.
//! `MAIN/a/b`. Every name is 1-50 characters of `[A-Za-z0-9_-]`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidPathError {
    #[error("branch path cannot be empty")]
    Empty,

    #[error("branch path must start with MAIN, got '{0}'")]
    InvalidRoot(String),

    #[error("branch name '{name}' is invalid: {reason}")]
    InvalidName { name: String, reason: &'static str },

    #[error("branch path is {0} characters long, at most {max} are allowed", max = BranchPath::MAX_LEN)]
    TooLong(usize),
}

/// A validated, hierarchical branch path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BranchPath(String);

impl BranchPath {
    pub const MAIN: &'static str = "MAIN";
    pub const SEPARATOR: char = '/';
    pub const MAX_NAME_LEN: usize = 50;
    /// Revision index keys embed the full path, so depth is bounded by length.
    pub const MAX_LEN: usize = 255;

    /// the root branch
    pub fn main() -> Self {
        Self(Self::MAIN.to_string())
    }

    pub fn new(path: impl Into<String>) -> Result<Self, InvalidPathError> {
        let path = path.into();
        if path.is_empty() {
            return Err(InvalidPathError::Empty);
        }
        if path.len() > Self::MAX_LEN {
            return Err(InvalidPathError::TooLong(path.len()));
        }

        if path.split(Self::SEPARATOR).next() != Some(Self::MAIN) {
            return Err(InvalidPathError::InvalidRoot(path));
        }
        for name in path.split(Self::SEPARATOR).skip(1) {
            Self::validate_name(name)?;
        }
        Ok(Self(path))
    }

    /// Check a single branch name (one path segment).
    pub fn validate_name(name: &str) -> Result<(), InvalidPathError> {
        let invalid = |reason| InvalidPathError::InvalidName {
            name: name.to_string(),
            reason,
        };
        if name.is_empty() {
            return Err(invalid("empty"));
        }
        if name.len() > Self::MAX_NAME_LEN {
            return Err(invalid("longer than 50 characters"));
        }
        if !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(invalid("only letters, digits, '_' and '-' are allowed"));
        }
        Ok(())
    }

    pub fn child(&self, name: &str) -> Result<Self, InvalidPathError> {
        Self::validate_name(name)?;
        let path = format!("{}{}{}", self.0, Self::SEPARATOR, name);
        if path.len() > Self::MAX_LEN {
            return Err(InvalidPathError::TooLong(path.len()));
        }
        Ok(Self(path))
    }

    /// `None` for the root
    pub fn parent(&self) -> Option<Self> {
        self.0
            .rfind(Self::SEPARATOR)
            .map(|idx| Self(self.0[..idx].to_string()))
    }

    /// last segment of the path
    pub fn name(&self) -> &str {
        self.0.rsplit(Self::SEPARATOR).next().unwrap_or(&self.0)
    }

    /// number of hops to the root; 0 for `MAIN`
    pub fn depth(&self) -> usize {
        self.0.matches(Self::SEPARATOR).count()
    }

    pub fn is_root(&self) -> bool {
        self.0 == Self::MAIN
    }

    /// strict descendant check: a path is not its own descendant
    pub fn is_descendant_of(&self, other: &BranchPath) -> bool {
        self.0.len() > other.0.len()
            && self.0.starts_with(&other.0)
            && self.0[other.0.len()..].starts_with(Self::SEPARATOR)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BranchPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for BranchPath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for BranchPath {
    type Err = InvalidPathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for BranchPath {
    type Error = InvalidPathError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<BranchPath> for String {
    fn from(path: BranchPath) -> Self {
        path.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_paths() {
        let path = BranchPath::new("MAIN/task-1/sub_2").unwrap();
        assert_eq!(path.name(), "sub_2");
        assert_eq!(path.depth(), 2);
        assert_eq!(path.parent().unwrap().as_str(), "MAIN/task-1");
        assert!(BranchPath::main().parent().is_none());
        assert!(BranchPath::main().is_root());
        assert_eq!(BranchPath::main().name(), "MAIN");
    }

    #[test]
    fn test_invalid_paths() {
        assert_eq!(BranchPath::new(""), Err(InvalidPathError::Empty));
        assert!(matches!(
            BranchPath::new("DEV/a"),
            Err(InvalidPathError::InvalidRoot(_))
        ));
        assert!(BranchPath::new("MAIN/").is_err());
        assert!(BranchPath::new("MAIN//a").is_err());
        assert!(BranchPath::new("MAIN/a b").is_err());
        assert!(BranchPath::new(format!("MAIN/{}", "x".repeat(51))).is_err());
        assert!(BranchPath::new(format!("MAIN/{}", "x".repeat(50))).is_ok());
    }

    #[test]
    fn test_child() {
        let main = BranchPath::main();
        assert_eq!(main.child("a").unwrap().as_str(), "MAIN/a");
        assert!(main.child("a/b").is_err());
    }

    #[test]
    fn test_path_length_is_bounded() {
        let name = "x".repeat(BranchPath::MAX_NAME_LEN);
        let mut path = BranchPath::main();
        // MAIN plus four 51 character segments is 208 long
        for _ in 0..4 {
            path = path.child(&name).unwrap();
        }
        assert_eq!(path.as_str().len(), 208);
        assert!(matches!(path.child(&name), Err(InvalidPathError::TooLong(259))));
        assert!(path.child(&"y".repeat(46)).is_ok());

        let too_long = format!("{}/{}", path, name);
        assert_eq!(BranchPath::new(too_long), Err(InvalidPathError::TooLong(259)));
    }

    #[test]
    fn test_descendants() {
        let main = BranchPath::main();
        let a = BranchPath::new("MAIN/a").unwrap();
        let ab = BranchPath::new("MAIN/a/b").unwrap();
        let aa = BranchPath::new("MAIN/aa").unwrap();
        assert!(a.is_descendant_of(&main));
        assert!(ab.is_descendant_of(&a));
        assert!(!aa.is_descendant_of(&a));
        assert!(!a.is_descendant_of(&a));
    }

    #[test]
    fn test_serde_validates() {
        let json = serde_json::to_string(&BranchPath::new("MAIN/a").unwrap()).unwrap();
        assert_eq!(json, "\"MAIN/a\"");
        assert!(serde_json::from_str::<BranchPath>("\"nope\"").is_err());
    }
}
