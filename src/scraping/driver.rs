//! Page-driver seam.
//!
//! Everything above this module (selector resolution, navigation, message
//! extraction, authentication polling) is written against [`PageDriver`], so
//! the same code runs on a live chromiumoxide tab and on an in-memory fake in
//! tests. Implementations return `Ok(vec![])` when a query matches nothing;
//! `Err` is reserved for transport problems and stale handles.

use anyhow::Result;
use async_trait::async_trait;
use std::fmt;
use std::path::Path;

/// One structural query against the DOM.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Query {
    Css(String),
    XPath(String),
}

impl Query {
    pub fn css(s: impl Into<String>) -> Self {
        Query::Css(s.into())
    }

    pub fn xpath(s: impl Into<String>) -> Self {
        Query::XPath(s.into())
    }

    /// The parent of the scope element.
    pub fn parent() -> Self {
        Query::XPath("..".to_string())
    }

    pub fn as_str(&self) -> &str {
        match self {
            Query::Css(s) | Query::XPath(s) => s,
        }
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Query::Css(s) => write!(f, "css:{s}"),
            Query::XPath(s) => write!(f, "xpath:{s}"),
        }
    }
}

#[async_trait]
pub trait ElementHandle: Clone + Send + Sync {
    /// Identity of the underlying DOM node, stable for the page's lifetime.
    fn node_key(&self) -> i64;

    /// Rendered text content (`innerText`).
    async fn text(&self) -> Result<String>;
    async fn attribute(&self, name: &str) -> Result<Option<String>>;
    async fn click(&self) -> Result<()>;
    /// Focus, clear any existing content, then type `text`.
    async fn clear_and_type(&self, text: &str) -> Result<()>;
}

#[async_trait]
pub trait PageDriver: Send + Sync {
    type Element: ElementHandle;

    /// All matches for `query`, in document order. With `scope` set, the
    /// query is evaluated relative to that element.
    async fn find_all(&self, scope: Option<&Self::Element>, query: &Query)
        -> Result<Vec<Self::Element>>;

    async fn navigate(&self, url: &str) -> Result<()>;

    async fn reload(&self) -> Result<()>;

    async fn screenshot(&self, path: &Path) -> Result<()>;
}
