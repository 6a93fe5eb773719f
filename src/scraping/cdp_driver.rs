//! [`PageDriver`] over a live chromiumoxide tab.
//!
//! CDP has no element-scoped XPath lookup, so XPath queries are evaluated in
//! the page, every hit is tagged with a one-shot `data-ts-ref` attribute, and
//! the tagged nodes are then fetched through `querySelectorAll` (which keeps
//! document order). The tags are removed again right after.

use super::driver::{ElementHandle, PageDriver, Query};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chromiumoxide::element::Element;
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::Page;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

const REF_ATTR: &str = "data-ts-ref";

#[derive(Clone)]
pub struct CdpPage {
    page: Page,
}

impl CdpPage {
    pub fn new(page: Page) -> Self {
        Self { page }
    }

    pub fn inner(&self) -> &Page {
        &self.page
    }

    async fn find_xpath(&self, scope: Option<&CdpElement>, xpath: &str) -> Result<Vec<CdpElement>> {
        let tag = format!("x{}", uuid::Uuid::new_v4().simple());
        let decl = xpath_tag_function(xpath, &tag)?;

        let tagged: u64 = match scope {
            Some(el) => el
                .inner
                .call_js_fn(decl, false)
                .await
                .map_err(|e| anyhow!("xpath eval on element failed: {}", e))?
                .result
                .value
                .and_then(|v| v.as_u64())
                .unwrap_or(0),
            None => self
                .page
                .evaluate(format!("({decl}).call(document)"))
                .await
                .map_err(|e| anyhow!("xpath eval failed: {}", e))?
                .into_value::<u64>()
                .unwrap_or(0),
        };

        if tagged == 0 {
            return Ok(Vec::new());
        }

        let selector = format!("[{REF_ATTR}^=\"{tag}-\"]");
        let found = self
            .page
            .find_elements(selector.as_str())
            .await
            .map_err(|e| anyhow!("tagged lookup failed: {}", e));

        let cleanup = format!(
            "document.querySelectorAll('[{REF_ATTR}^=\"{tag}-\"]').forEach(e => e.removeAttribute('{REF_ATTR}'))"
        );
        if let Err(e) = self.page.evaluate(cleanup).await {
            debug!("cdp_driver: tag cleanup failed: {}", e);
        }

        Ok(found?.into_iter().map(CdpElement::new).collect())
    }
}

/// JS function (called with `this` = context node) that tags every node the
/// XPath selects and returns how many it tagged. Text nodes are mapped to their
/// parent element.
fn xpath_tag_function(xpath: &str, tag: &str) -> Result<String> {
    let xp = serde_json::to_string(xpath).context("xpath encode")?;
    let tg = serde_json::to_string(tag).context("tag encode")?;
    Ok(format!(
        r#"function() {{
            const xp = {xp};
            const tag = {tg};
            let r;
            try {{
                r = document.evaluate(xp, this, null, XPathResult.ORDERED_NODE_SNAPSHOT_TYPE, null);
            }} catch (e) {{
                return 0;
            }}
            let n = 0;
            for (let i = 0; i < r.snapshotLength; i++) {{
                const node = r.snapshotItem(i);
                const el = node.nodeType === 1 ? node : node.parentElement;
                if (!el) continue;
                el.setAttribute('{REF_ATTR}', tag + '-' + n);
                n++;
            }}
            return n;
        }}"#
    ))
}

#[async_trait]
impl PageDriver for CdpPage {
    type Element = CdpElement;

    async fn find_all(&self, scope: Option<&CdpElement>, query: &Query) -> Result<Vec<CdpElement>> {
        match (query, scope) {
            (Query::Css(css), None) => Ok(self
                .page
                .find_elements(css.as_str())
                .await
                .map_err(|e| anyhow!("css lookup failed: {}", e))?
                .into_iter()
                .map(CdpElement::new)
                .collect()),
            (Query::Css(css), Some(el)) => Ok(el
                .inner
                .find_elements(css.as_str())
                .await
                .map_err(|e| anyhow!("scoped css lookup failed: {}", e))?
                .into_iter()
                .map(CdpElement::new)
                .collect()),
            (Query::XPath(xp), scope) => self.find_xpath(scope, xp).await,
        }
    }

    async fn navigate(&self, url: &str) -> Result<()> {
        self.page
            .goto(url)
            .await
            .map_err(|e| anyhow!("navigation to {} failed: {}", url, e))?;
        Ok(())
    }

    async fn reload(&self) -> Result<()> {
        self.page
            .evaluate("window.location.reload()")
            .await
            .map_err(|e| anyhow!("reload failed: {}", e))?;
        Ok(())
    }

    async fn screenshot(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        self.page
            .save_screenshot(ScreenshotParams::builder().full_page(true).build(), path)
            .await
            .map_err(|e| anyhow!("screenshot failed: {}", e))?;
        Ok(())
    }
}

#[derive(Clone)]
pub struct CdpElement {
    inner: Arc<Element>,
}

impl CdpElement {
    fn new(el: Element) -> Self {
        Self {
            inner: Arc::new(el),
        }
    }
}

#[async_trait]
impl ElementHandle for CdpElement {
    fn node_key(&self) -> i64 {
        *self.inner.backend_node_id.inner()
    }

    async fn text(&self) -> Result<String> {
        Ok(self
            .inner
            .inner_text()
            .await
            .map_err(|e| anyhow!("inner_text failed: {}", e))?
            .unwrap_or_default())
    }

    async fn attribute(&self, name: &str) -> Result<Option<String>> {
        self.inner
            .attribute(name)
            .await
            .map_err(|e| anyhow!("attribute '{}' failed: {}", name, e))
    }

    async fn click(&self) -> Result<()> {
        self.inner
            .click()
            .await
            .map_err(|e| anyhow!("click failed: {}", e))?;
        Ok(())
    }

    async fn clear_and_type(&self, text: &str) -> Result<()> {
        self.click().await?;
        // Search boxes are contenteditable editors; select-all + delete clears
        // both those and plain inputs.
        self.inner
            .call_js_fn(
                "function() { this.focus(); document.execCommand('selectAll', false, null); document.execCommand('delete', false, null); }",
                false,
            )
            .await
            .map_err(|e| anyhow!("clear failed: {}", e))?;
        self.inner
            .type_str(text)
            .await
            .map_err(|e| anyhow!("typing failed: {}", e))?;
        Ok(())
    }
}
