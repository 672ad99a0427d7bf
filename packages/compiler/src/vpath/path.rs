use serde::{Deserialize, Serialize};
use std::fmt;

/// An application-absolute virtual path in POSIX form (`/dir/page.aspx`).
///
/// Construction normalizes separators, resolves `.`/`..` segments and maps
/// the `~/` application-root prefix onto `/`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VirtualPath(String);

impl VirtualPath {
    /// Normalize `path`. Segments that would climb above the root are dropped.
    pub fn new(path: impl AsRef<str>) -> Self {
        let (segments, _) = normalize_segments(path.as_ref());
        VirtualPath(join_segments(&segments))
    }

    /// Like [`VirtualPath::new`] but rejects paths that climb above the root.
    pub fn parse(path: impl AsRef<str>) -> Option<Self> {
        let (segments, escaped) = normalize_segments(path.as_ref());
        if escaped {
            None
        } else {
            Some(VirtualPath(join_segments(&segments)))
        }
    }

    pub fn root() -> Self {
        VirtualPath("/".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    pub fn is_root(&self) -> bool {
        self.0 == "/"
    }

    /// Resolve `relative` against this path taken as a directory. Absolute
    /// and `~/` paths replace the base. Returns `None` if the result would
    /// lie above the root.
    pub fn combine(&self, relative: &str) -> Option<VirtualPath> {
        let relative = relative.replace('\\', "/");
        if relative.starts_with('/') || relative.starts_with("~/") || relative == "~" {
            return VirtualPath::parse(relative);
        }
        VirtualPath::parse(format!("{}/{}", self.0, relative))
    }

    /// Resolve `relative` against the directory containing this file.
    pub fn combine_with_directory(&self, relative: &str) -> Option<VirtualPath> {
        self.directory().combine(relative)
    }

    /// Containing directory; the root is its own directory.
    pub fn directory(&self) -> VirtualPath {
        match self.0.rfind('/') {
            Some(0) | None => VirtualPath::root(),
            Some(idx) => VirtualPath(self.0[..idx].to_string()),
        }
    }

    pub fn file_name(&self) -> &str {
        match self.0.rfind('/') {
            Some(idx) => &self.0[idx + 1..],
            None => &self.0,
        }
    }

    /// Lower-cased extension including the dot, empty if there is none.
    pub fn extension(&self) -> String {
        let name = self.file_name();
        match name.rfind('.') {
            Some(idx) if idx > 0 => name[idx..].to_ascii_lowercase(),
            _ => String::new(),
        }
    }

    pub fn file_stem(&self) -> &str {
        let name = self.file_name();
        match name.rfind('.') {
            Some(idx) if idx > 0 => &name[..idx],
            _ => name,
        }
    }

    /// True if this path is `dir` or lies below it. Comparison ignores case.
    pub fn is_within(&self, dir: &VirtualPath) -> bool {
        if dir.is_root() {
            return true;
        }
        let me = self.0.to_ascii_lowercase();
        let dir = dir.0.to_ascii_lowercase();
        me == dir || me.starts_with(&format!("{}/", dir))
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/').filter(|s| !s.is_empty())
    }
}

impl fmt::Display for VirtualPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for VirtualPath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for VirtualPath {
    fn from(path: &str) -> Self {
        VirtualPath::new(path)
    }
}

fn normalize_segments(path: &str) -> (Vec<String>, bool) {
    let path = path.replace('\\', "/");
    let path = path.strip_prefix('~').unwrap_or(&path);
    let mut segments: Vec<String> = Vec::new();
    let mut escaped = false;
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if segments.pop().is_none() {
                    escaped = true;
                }
            }
            other => segments.push(other.to_string()),
        }
    }
    (segments, escaped)
}

fn join_segments(segments: &[String]) -> String {
    format!("/{}", segments.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalization() {
        assert_eq!(VirtualPath::new("~/a/./b/../c.aspx").as_str(), "/a/c.aspx");
        assert_eq!(VirtualPath::new("a\\b").as_str(), "/a/b");
        assert_eq!(VirtualPath::new("/").as_str(), "/");
        assert!(VirtualPath::parse("/a/../../b").is_none());
    }

    #[test]
    fn test_combine() {
        let dir = VirtualPath::new("/sub");
        assert_eq!(dir.combine("x.inc").unwrap().as_str(), "/sub/x.inc");
        assert_eq!(dir.combine("../x.inc").unwrap().as_str(), "/x.inc");
        assert_eq!(dir.combine("~/y/x.inc").unwrap().as_str(), "/y/x.inc");
        assert!(dir.combine("../../x.inc").is_none());
    }

    #[test]
    fn test_parts() {
        let p = VirtualPath::new("/dir/Page.ASPX");
        assert_eq!(p.directory().as_str(), "/dir");
        assert_eq!(p.file_name(), "Page.ASPX");
        assert_eq!(p.extension(), ".aspx");
        assert_eq!(p.file_stem(), "Page");
        assert_eq!(VirtualPath::new("/a.aspx").directory().as_str(), "/");
        assert!(p.is_within(&VirtualPath::new("/DIR")));
        assert!(!VirtualPath::new("/dirx/a").is_within(&VirtualPath::new("/dir")));
    }
}
