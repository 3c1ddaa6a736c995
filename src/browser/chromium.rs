//! Chromium adapter for the browser traits
//!
//! Frame-scoped DOM operations are executed as JavaScript evaluated in the
//! page, resolving the target frame by walking `window.frames` along an
//! index path. Cross-origin frames that refuse script access are skipped
//! during discovery, so every frame handed out here is operable.

use crate::browser::traits::{Browser, BrowserError, Frame, Page, TableRow};
use crate::config::BrowserConfig as WorkerBrowserConfig;
use async_trait::async_trait;
use chromiumoxide::browser::{Browser as CdpBrowser, BrowserConfig};
use chromiumoxide::Page as CdpPage;
use futures::StreamExt;
use std::time::Duration;
use tokio::task::JoinHandle;

/// A launched Chromium instance
pub struct ChromiumBrowser {
    browser: tokio::sync::Mutex<CdpBrowser>,
    handler_task: JoinHandle<()>,
}

impl ChromiumBrowser {
    /// Launches a Chromium instance per the worker's browser configuration
    pub async fn launch(config: &WorkerBrowserConfig) -> Result<Self, BrowserError> {
        let mut builder = BrowserConfig::builder();
        if !config.headless {
            builder = builder.with_head();
        }
        let browser_config = builder
            .build()
            .map_err(BrowserError::Launch)?;

        let (browser, mut handler) = CdpBrowser::launch(browser_config)
            .await
            .map_err(|e| BrowserError::Launch(e.to_string()))?;

        // The handler stream must be drained for the CDP connection to
        // make progress
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    tracing::debug!("CDP handler event error: {}", e);
                }
            }
        });

        Ok(Self {
            browser: tokio::sync::Mutex::new(browser),
            handler_task,
        })
    }
}

#[async_trait]
impl Browser for ChromiumBrowser {
    async fn new_page(&self) -> Result<Box<dyn Page>, BrowserError> {
        let browser = self.browser.lock().await;
        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| BrowserError::Launch(e.to_string()))?;
        Ok(Box::new(ChromiumPage {
            page,
            poll_interval: Duration::from_millis(250),
        }))
    }

    async fn close(&self) -> Result<(), BrowserError> {
        let mut browser = self.browser.lock().await;
        browser
            .close()
            .await
            .map_err(|e| BrowserError::Dom(e.to_string()))?;
        self.handler_task.abort();
        Ok(())
    }
}

/// A Chromium page (tab)
pub struct ChromiumPage {
    page: CdpPage,
    poll_interval: Duration,
}

impl ChromiumPage {
    async fn eval<T: serde::de::DeserializeOwned + Unpin>(
        &self,
        expression: String,
    ) -> Result<T, BrowserError> {
        let result = self
            .page
            .evaluate(expression)
            .await
            .map_err(|e| BrowserError::Dom(e.to_string()))?;
        result
            .into_value::<T>()
            .map_err(|e| BrowserError::Dom(e.to_string()))
    }
}

#[async_trait]
impl Page for ChromiumPage {
    async fn goto(&self, url: &str, timeout: Duration) -> Result<(), BrowserError> {
        let navigate = async {
            self.page
                .goto(url)
                .await
                .map_err(|e| BrowserError::Navigation {
                    url: url.to_string(),
                    message: e.to_string(),
                })?;
            self.page
                .wait_for_navigation()
                .await
                .map_err(|e| BrowserError::Navigation {
                    url: url.to_string(),
                    message: e.to_string(),
                })?;
            Ok(())
        };

        tokio::time::timeout(timeout, navigate)
            .await
            .map_err(|_| BrowserError::WaitTimeout(timeout, format!("navigation to {}", url)))?
    }

    async fn current_url(&self) -> String {
        match self.page.url().await {
            Ok(Some(url)) => url,
            _ => String::new(),
        }
    }

    async fn title(&self) -> String {
        match self.page.get_title().await {
            Ok(Some(title)) => title,
            _ => String::new(),
        }
    }

    async fn content(&self) -> Result<String, BrowserError> {
        self.page
            .content()
            .await
            .map_err(|e| BrowserError::Dom(e.to_string()))
    }

    async fn wait_for_navigation(&self, timeout: Duration) -> Result<(), BrowserError> {
        tokio::time::timeout(timeout, self.page.wait_for_navigation())
            .await
            .map_err(|_| BrowserError::WaitTimeout(timeout, "navigation".to_string()))?
            .map_err(|e| BrowserError::Navigation {
                url: String::new(),
                message: e.to_string(),
            })?;
        Ok(())
    }

    async fn wait_for_any(&self, selectors: &[String], timeout: Duration) -> bool {
        let selector_json = match serde_json::to_string(selectors) {
            Ok(json) => json,
            Err(_) => return false,
        };
        let expression = format!(
            r#"(() => {{
                const selectors = {selector_json};
                const check = (win) => {{
                    let doc;
                    try {{ doc = win.document; }} catch (e) {{ return false; }}
                    if (selectors.some((s) => doc.querySelector(s))) return true;
                    for (let i = 0; i < win.frames.length; i++) {{
                        if (check(win.frames[i])) return true;
                    }}
                    return false;
                }};
                return check(window);
            }})()"#
        );

        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Ok(true) = self.eval::<bool>(expression.clone()).await {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn frames(&self) -> Result<Vec<Box<dyn Frame>>, BrowserError> {
        // Same-origin frame discovery; inaccessible frames are skipped
        let expression = r#"(() => {
            const paths = [[]];
            const walk = (win, path) => {
                for (let i = 0; i < win.frames.length; i++) {
                    try { void win.frames[i].document; } catch (e) { continue; }
                    const next = path.concat([i]);
                    paths.push(next);
                    walk(win.frames[i], next);
                }
            };
            walk(window, []);
            return paths;
        })()"#
            .to_string();

        let paths: Vec<Vec<usize>> = self.eval(expression).await?;

        Ok(paths
            .into_iter()
            .map(|path| {
                Box::new(ChromiumFrame {
                    page: self.page.clone(),
                    path,
                }) as Box<dyn Frame>
            })
            .collect())
    }

    async fn close_page(&self) -> Result<(), BrowserError> {
        self.page
            .clone()
            .close()
            .await
            .map_err(|e| BrowserError::Dom(e.to_string()))?;
        Ok(())
    }
}

/// One same-origin frame, addressed by its index path from the main window
pub struct ChromiumFrame {
    page: CdpPage,
    path: Vec<usize>,
}

impl ChromiumFrame {
    /// JS prelude resolving `win` and `doc` for this frame
    fn prelude(&self) -> String {
        let path_json = serde_json::to_string(&self.path).unwrap_or_else(|_| "[]".to_string());
        format!(
            "const win = {path_json}.reduce((w, i) => w.frames[i], window); \
             const doc = win.document;"
        )
    }

    async fn eval<T: serde::de::DeserializeOwned + Unpin>(
        &self,
        body: &str,
    ) -> Result<T, BrowserError> {
        let expression = format!("(() => {{ {} {} }})()", self.prelude(), body);
        let result = self
            .page
            .evaluate(expression)
            .await
            .map_err(|e| BrowserError::Dom(e.to_string()))?;
        result
            .into_value::<T>()
            .map_err(|e| BrowserError::Dom(e.to_string()))
    }
}

fn js_string(value: &str) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "\"\"".to_string())
}

#[async_trait]
impl Frame for ChromiumFrame {
    async fn exists(&self, selector: &str) -> Result<bool, BrowserError> {
        let body = format!("return !!doc.querySelector({});", js_string(selector));
        self.eval(&body).await
    }

    async fn fill(&self, selector: &str, text: &str) -> Result<bool, BrowserError> {
        let body = format!(
            r#"const el = doc.querySelector({sel});
               if (!el) return false;
               el.focus();
               el.value = '';
               el.value = {text};
               el.dispatchEvent(new win.Event('input', {{ bubbles: true }}));
               el.dispatchEvent(new win.Event('change', {{ bubbles: true }}));
               return true;"#,
            sel = js_string(selector),
            text = js_string(text),
        );
        self.eval(&body).await
    }

    async fn press_enter(&self, selector: &str) -> Result<bool, BrowserError> {
        let body = format!(
            r#"const el = doc.querySelector({sel});
               if (!el) return false;
               const opts = {{ key: 'Enter', code: 'Enter', keyCode: 13, bubbles: true }};
               el.dispatchEvent(new win.KeyboardEvent('keydown', opts));
               el.dispatchEvent(new win.KeyboardEvent('keyup', opts));
               if (el.form) el.form.requestSubmit ? el.form.requestSubmit() : el.form.submit();
               return true;"#,
            sel = js_string(selector),
        );
        self.eval(&body).await
    }

    async fn click(&self, selector: &str) -> Result<bool, BrowserError> {
        let body = format!(
            r#"const el = doc.querySelector({sel});
               if (!el) return false;
               el.click();
               return true;"#,
            sel = js_string(selector),
        );
        self.eval(&body).await
    }

    async fn click_link_by_text(&self, text: &str) -> Result<bool, BrowserError> {
        let body = format!(
            r#"const wanted = {text};
               const anchors = doc.querySelectorAll('a');
               for (const a of anchors) {{
                   if ((a.innerText || '').trim() === wanted) {{ a.click(); return true; }}
               }}
               return false;"#,
            text = js_string(text),
        );
        self.eval(&body).await
    }

    async fn texts(&self, selector: &str) -> Result<Vec<String>, BrowserError> {
        let body = format!(
            r#"return Array.from(doc.querySelectorAll({sel}))
                   .map((el) => (el.innerText || el.textContent || '').trim());"#,
            sel = js_string(selector),
        );
        self.eval(&body).await
    }

    async fn table_rows(&self, selector: &str) -> Result<Vec<TableRow>, BrowserError> {
        let body = format!(
            r#"return Array.from(doc.querySelectorAll({sel})).map((row) => ({{
                   text: (row.innerText || '').replace(/\s+/g, ' ').trim(),
                   link_texts: Array.from(row.querySelectorAll('a'))
                       .map((a) => (a.innerText || '').trim())
                       .filter((t) => t.length > 0),
               }}));"#,
            sel = js_string(selector),
        );
        self.eval(&body).await
    }

    async fn all_text(&self) -> Result<String, BrowserError> {
        self.eval("return doc.body ? (doc.body.innerText || '') : '';")
            .await
    }

    async fn is_checked(&self, selector: &str) -> Result<Option<bool>, BrowserError> {
        let body = format!(
            r#"const el = doc.querySelector({sel});
               return el ? !!el.checked : null;"#,
            sel = js_string(selector),
        );
        self.eval(&body).await
    }
}
