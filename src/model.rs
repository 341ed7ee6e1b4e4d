use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// One searchable archive site known to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ArchiveDescriptor {
    pub id: u32,
    pub name: &'static str,
    pub base_url: &'static str,
}

/// Archives in engine index order. The index is what gets passed to the engine.
pub const ARCHIVES: &[ArchiveDescriptor] = &[
    ArchiveDescriptor {
        id: 0,
        name: "Desuarchive",
        base_url: "https://desuarchive.org",
    },
    ArchiveDescriptor {
        id: 1,
        name: "Palanq",
        base_url: "https://archive.palanq.win",
    },
    ArchiveDescriptor {
        id: 2,
        name: "Moe",
        base_url: "https://archived.moe",
    },
    ArchiveDescriptor {
        id: 3,
        name: "4plebs",
        base_url: "https://archive.4plebs.org",
    },
    ArchiveDescriptor {
        id: 4,
        name: "b4k",
        base_url: "https://arch.b4k.co",
    },
];

impl ArchiveDescriptor {
    pub fn by_id(id: u32) -> Option<&'static ArchiveDescriptor> {
        ARCHIVES.iter().find(|a| a.id == id)
    }

    /// Site markers emitted by the engine use lowercase archive names.
    pub fn by_site_name(site: &str) -> Option<&'static ArchiveDescriptor> {
        ARCHIVES.iter().find(|a| a.name.eq_ignore_ascii_case(site))
    }
}

/// One user search submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRequest {
    pub query: String,
    pub archive_ids: BTreeSet<u32>,
    pub board: String,
    pub limit: u32,
    pub delay_seconds: u64,
    pub case_sensitive: bool,
    pub subject: Option<String>,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>, archive_ids: impl IntoIterator<Item = u32>) -> Self {
        Self {
            query: query.into(),
            archive_ids: archive_ids.into_iter().collect(),
            board: "_".to_string(),
            limit: 100,
            delay_seconds: 3,
            case_sensitive: false,
            subject: None,
        }
    }

    /// Check the request before anything is dispatched.
    pub fn validate(&self) -> Result<()> {
        if self.query.trim().is_empty() {
            return Err(Error::invalid("query", "must not be empty"));
        }
        if self.archive_ids.is_empty() {
            return Err(Error::invalid("archives", "select at least one archive"));
        }
        if let Some(id) = self
            .archive_ids
            .iter()
            .find(|id| ArchiveDescriptor::by_id(**id).is_none())
        {
            return Err(Error::invalid(
                "archives",
                format!("unknown archive index {id} (known: 0-{})", ARCHIVES.len() - 1),
            ));
        }
        if self.limit == 0 {
            return Err(Error::invalid("limit", "must be a positive integer"));
        }
        Ok(())
    }
}

/// A fully-specified process launch: program, argv (without the program) and
/// the complete child environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandInvocation {
    pub executable: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
}

#[cfg(test)]
impl CommandInvocation {
    /// Value following `flag` in the argument vector, if present.
    pub fn flag_value(&self, flag: &str) -> Option<&str> {
        self.args
            .iter()
            .position(|a| a == flag)
            .and_then(|i| self.args.get(i + 1))
            .map(String::as_str)
    }

    pub fn has_flag(&self, flag: &str) -> bool {
        self.args.iter().any(|a| a == flag)
    }
}

/// Output line routing for the stdout/stderr writer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputLine {
    Stdout(String),
    Stderr(String),
}

/// Board reference as the archives report it: either a bare short name or
/// an object carrying `short_name` and a display `name`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BoardRef {
    Short(String),
    Named {
        short_name: String,
        #[serde(default)]
        name: Option<String>,
    },
}

impl BoardRef {
    pub fn short_name(&self) -> &str {
        match self {
            BoardRef::Short(s) => s,
            BoardRef::Named { short_name, .. } => short_name,
        }
    }

    pub fn display_name(&self) -> Option<&str> {
        match self {
            BoardRef::Short(_) => None,
            BoardRef::Named { name, .. } => name.as_deref(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Media {
    #[serde(default)]
    pub media_orig: Option<String>,
    #[serde(default)]
    pub media_filename: Option<String>,
}

/// A post annotated with the site that was current when it was read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PostRecord {
    pub num: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub board: Option<BoardRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_num: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media: Option<Media>,
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SiteCount {
    pub site: String,
    pub count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AggregatedResultSet {
    pub posts: Vec<PostRecord>,
    pub site_counts: Vec<SiteCount>,
}

/// A contiguous run of posts read while one site was current.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteGroup<'a> {
    pub site: &'a str,
    pub posts: &'a [PostRecord],
}

impl AggregatedResultSet {
    pub fn is_empty(&self) -> bool {
        self.posts.is_empty() && self.site_counts.is_empty()
    }

    /// Split posts into per-encounter groups, in emission order.
    pub fn groups(&self) -> Vec<SiteGroup<'_>> {
        let mut groups = Vec::new();
        let mut start = 0;
        for i in 1..=self.posts.len() {
            if i == self.posts.len() || self.posts[i].source != self.posts[start].source {
                groups.push(SiteGroup {
                    site: &self.posts[start].source,
                    posts: &self.posts[start..i],
                });
                start = i;
            }
        }
        groups
    }
}
