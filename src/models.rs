//! Domain records shared by the hosts, the orchestrator and the sink.

use std::fmt;
use std::str::FromStr;

use reqwest::Url;
use serde::{Deserialize, Serialize};

/// Identifier of a searchable scope.
///
/// GitLab accepts either the numeric project id or the full project path,
/// GitHub repositories are addressed by `owner/repo`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScopeId {
    Numeric(u64),
    Path(String),
}

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScopeId::Numeric(id) => write!(f, "{}", id),
            ScopeId::Path(path) => f.write_str(path),
        }
    }
}

impl FromStr for ScopeId {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        Ok(match trimmed.parse::<u64>() {
            Ok(id) => ScopeId::Numeric(id),
            Err(_) => ScopeId::Path(trimmed.to_string()),
        })
    }
}

/// A GitLab project or a GitHub repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scope {
    pub id: ScopeId,
    pub name: String,
    pub url: String,
    pub archived: bool,
}

/// One line-level hit returned by a search endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMatch {
    pub file_path: String,
    pub file_name: String,
    /// Absent for GitHub, whose code search does not report line numbers.
    pub start_line: Option<u32>,
    pub preview: String,
    /// Git ref the hit was found on (GitLab).
    pub ref_name: Option<String>,
    /// Direct browse URL of the file (GitHub).
    pub web_url: Option<String>,
    pub scope_id: Option<ScopeId>,
}

/// A file with at least one hit, and the lines those hits start on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMatch {
    pub file_path: String,
    pub file_name: String,
    pub start_lines: Vec<u32>,
    pub preview: String,
    pub ref_name: Option<String>,
    pub web_url: Option<String>,
    pub scope_id: Option<ScopeId>,
}

impl FileMatch {
    /// Start a new file match from its first hit.
    pub fn from_raw(raw: RawMatch) -> Self {
        Self {
            file_path: raw.file_path,
            file_name: raw.file_name,
            start_lines: raw.start_line.into_iter().collect(),
            preview: raw.preview,
            ref_name: raw.ref_name,
            web_url: raw.web_url,
            scope_id: raw.scope_id,
        }
    }

    /// Browse URL of the file inside `scope`, with the ref and path segments
    /// percent-encoded.
    pub fn url(&self, scope: &Scope) -> String {
        if let Some(url) = &self.web_url {
            return url.clone();
        }
        let reference = self.ref_name.as_deref().unwrap_or("HEAD");
        let mut url = match Url::parse(&scope.url) {
            Ok(url) => url,
            Err(_) => {
                return format!(
                    "{}/-/blob/{}/{}",
                    scope.url.trim_end_matches('/'),
                    reference,
                    self.file_path
                )
            }
        };
        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .pop_if_empty()
                .extend(["-", "blob"])
                .extend(reference.split('/'))
                .extend(self.file_path.split('/'));
        }
        url.to_string()
    }
}

/// One page of raw records from a list or search endpoint.
#[derive(Debug, Clone, Default)]
pub struct Page {
    pub items: Vec<serde_json::Value>,
    /// URL of the next page, taken from the `Link` header.
    pub next_page_token: Option<String>,
}

/// A searched scope paired with its consolidated file matches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeResult {
    pub scope: Scope,
    pub files: Vec<FileMatch>,
}

impl ScopeResult {
    pub fn has_matches(&self) -> bool {
        !self.files.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scope() -> Scope {
        Scope {
            id: ScopeId::Numeric(42),
            name: "team / service".into(),
            url: "https://gitlab.example.com/team/service/".into(),
            archived: false,
        }
    }

    #[test]
    fn test_scope_id_parse() {
        assert_eq!("2110".parse::<ScopeId>().unwrap(), ScopeId::Numeric(2110));
        assert_eq!(
            " team/service ".parse::<ScopeId>().unwrap(),
            ScopeId::Path("team/service".into())
        );
        assert_eq!(ScopeId::Path("o/r".into()).to_string(), "o/r");
    }

    #[test]
    fn test_file_url_uses_blob_path_without_web_url() {
        let file = FileMatch {
            file_path: "src/main.rs".into(),
            file_name: "main.rs".into(),
            start_lines: vec![3],
            preview: String::new(),
            ref_name: Some("develop".into()),
            web_url: None,
            scope_id: Some(ScopeId::Numeric(42)),
        };
        assert_eq!(
            file.url(&scope()),
            "https://gitlab.example.com/team/service/-/blob/develop/src/main.rs"
        );
    }

    #[test]
    fn test_file_url_encodes_path_segments() {
        let file = FileMatch {
            file_path: "docs/my guide (v2)#1.md".into(),
            file_name: "my guide (v2)#1.md".into(),
            start_lines: vec![3],
            preview: String::new(),
            ref_name: Some("feature/x".into()),
            web_url: None,
            scope_id: None,
        };
        assert_eq!(
            file.url(&scope()),
            "https://gitlab.example.com/team/service/-/blob/feature/x/docs/my%20guide%20(v2)%231.md"
        );
    }

    #[test]
    fn test_file_url_prefers_web_url() {
        let raw = RawMatch {
            file_path: "lib.rs".into(),
            file_name: "lib.rs".into(),
            start_line: None,
            preview: String::new(),
            ref_name: None,
            web_url: Some("https://github.com/o/r/blob/abc/lib.rs".into()),
            scope_id: None,
        };
        let file = FileMatch::from_raw(raw);
        assert!(file.start_lines.is_empty());
        assert_eq!(file.url(&scope()), "https://github.com/o/r/blob/abc/lib.rs");
    }
}
