//! Keyword-triggered section retrieval over the DAX reference document.

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

pub const DOCS_FILE_NAME: &str = "dax_documentation.txt";
pub const SECTION_MARKER: &str = "\n## ";
pub const MAX_SECTIONS: usize = 5;
pub const MISSING_DOCS_TEXT: &str =
    "No documentation available. Please create dax_documentation.txt";

const CRITICAL_RULES_MARKER: &str = "Critical Rules";

/// Swappable retrieval seam for the agent's syntax lookup tool.
pub trait DocRetriever: Send + Sync {
    fn relevant_docs(&self, query: &str) -> String;
}

/// A keyword group: if any trigger appears in the lower-cased query, every section
/// containing one of the markers is selected. Markers match case-sensitively unless
/// listed in `lowercase_markers`.
struct KeywordGroup {
    triggers: &'static [&'static str],
    markers: &'static [&'static str],
    lowercase_markers: &'static [&'static str],
}

const KEYWORD_GROUPS: &[KeywordGroup] = &[
    KeywordGroup {
        triggers: &["delay", "breakdown", "compare", "types", "categories"],
        markers: &["UNION"],
        lowercase_markers: &["compare multiple"],
    },
    KeywordGroup {
        triggers: &["top", "highest", "lowest", "best", "worst", "most", "least"],
        markers: &["TOPN"],
        lowercase_markers: &[],
    },
    KeywordGroup {
        triggers: &["group", "by", "each", "per"],
        markers: &["ADDCOLUMNS", "Group"],
        lowercase_markers: &[],
    },
    KeywordGroup {
        triggers: &["count", "how many", "total number"],
        markers: &["COUNTROWS", "Count"],
        lowercase_markers: &[],
    },
    KeywordGroup {
        triggers: &["sum", "total", "amount"],
        markers: &["SUM"],
        lowercase_markers: &[],
    },
    KeywordGroup {
        triggers: &["insight", "summary", "overview", "quick"],
        markers: &["Common Patterns", "Quick Stats"],
        lowercase_markers: &[],
    },
];

const FALLBACK_MARKERS: &[&str] = &["EVALUATE", "ADDCOLUMNS", "Common Patterns", CRITICAL_RULES_MARKER];

impl KeywordGroup {
    fn triggered_by(&self, query_lower: &str) -> bool {
        self.triggers.iter().any(|t| query_lower.contains(t))
    }

    fn selects(&self, section: &str) -> bool {
        if self.markers.iter().any(|m| section.contains(m)) {
            return true;
        }
        if self.lowercase_markers.is_empty() {
            return false;
        }
        let lower = section.to_lowercase();
        self.lowercase_markers.iter().any(|m| lower.contains(m))
    }
}

/// Sections of the corpus, split at the heading marker. The first section keeps
/// whatever preamble precedes the first heading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocCorpus {
    sections: Vec<String>,
}

impl DocCorpus {
    pub fn parse(text: &str) -> Self {
        Self {
            sections: text.split(SECTION_MARKER).map(str::to_string).collect(),
        }
    }

    pub fn sections(&self) -> &[String] {
        &self.sections
    }

    pub fn select(&self, query: &str) -> Vec<&str> {
        let query_lower = query.to_lowercase();
        let mut relevant: Vec<&str> = Vec::new();

        for group in KEYWORD_GROUPS {
            if group.triggered_by(&query_lower) {
                relevant.extend(
                    self.sections
                        .iter()
                        .filter(|s| group.selects(s))
                        .map(String::as_str),
                );
            }
        }
        relevant.extend(
            self.sections
                .iter()
                .filter(|s| s.contains(CRITICAL_RULES_MARKER))
                .map(String::as_str),
        );

        if relevant.is_empty() {
            relevant = self
                .sections
                .iter()
                .filter(|s| FALLBACK_MARKERS.iter().any(|m| s.contains(m)))
                .map(String::as_str)
                .collect();
        }

        let mut unique: Vec<&str> = Vec::with_capacity(MAX_SECTIONS);
        for section in relevant {
            if !unique.contains(&section) {
                unique.push(section);
            }
        }
        unique.truncate(MAX_SECTIONS);
        unique
    }
}

/// Loads the corpus lazily from the first candidate path that exists and keeps it
/// for the life of the process (or until `invalidate`).
pub struct KeywordRetriever {
    candidates: Vec<PathBuf>,
    corpus: RwLock<Option<Arc<DocCorpus>>>,
}

impl KeywordRetriever {
    pub fn new(candidates: Vec<PathBuf>) -> Self {
        Self {
            candidates,
            corpus: RwLock::new(None),
        }
    }

    /// Explicit path first (if any), then the working directory, then next to the binary.
    pub fn default_candidates(explicit: Option<&Path>) -> Vec<PathBuf> {
        let mut out = Vec::new();
        if let Some(path) = explicit {
            out.push(path.to_path_buf());
        }
        out.push(PathBuf::from(DOCS_FILE_NAME));
        out.push(PathBuf::from("assets").join(DOCS_FILE_NAME));
        if let Ok(exe) = std::env::current_exe() {
            if let Some(dir) = exe.parent() {
                out.push(dir.join(DOCS_FILE_NAME));
                out.push(dir.join("..").join(DOCS_FILE_NAME));
            }
        }
        out
    }

    pub fn from_text(text: &str) -> Self {
        let retriever = Self::new(Vec::new());
        *write(&retriever.corpus) = Some(Arc::new(DocCorpus::parse(text)));
        retriever
    }

    /// The first existing candidate, for diagnostics.
    pub fn resolved_path(&self) -> Option<PathBuf> {
        self.candidates.iter().find(|p| p.is_file()).cloned()
    }

    pub fn invalidate(&self) {
        *write(&self.corpus) = None;
    }

    fn corpus(&self) -> Option<Arc<DocCorpus>> {
        if let Some(corpus) = read(&self.corpus).as_ref() {
            return Some(corpus.clone());
        }
        let path = self.resolved_path()?;
        match std::fs::read_to_string(&path) {
            Ok(text) => {
                let corpus = Arc::new(DocCorpus::parse(&text));
                tracing::info!(
                    path = %path.display(),
                    sections = corpus.sections().len(),
                    "dax documentation loaded"
                );
                let mut slot = write(&self.corpus);
                Some(slot.get_or_insert(corpus).clone())
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to read dax documentation");
                None
            }
        }
    }
}

impl DocRetriever for KeywordRetriever {
    fn relevant_docs(&self, query: &str) -> String {
        let Some(corpus) = self.corpus() else {
            return MISSING_DOCS_TEXT.to_string();
        };
        let sections = corpus.select(query);
        if sections.is_empty() {
            return MISSING_DOCS_TEXT.to_string();
        }
        sections.join(SECTION_MARKER)
    }
}

fn read<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}
