//! Scripted page for driver tests: a fixed list of result pages, a
//! next-page control and checkbox filters with configurable behaviour.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;

use super::{Session, SessionFactory};
use crate::settings::Selectors;

#[derive(Debug, Clone, Copy)]
pub struct Checkbox {
    checked: bool,
    click_works: bool,
    key_works: bool,
}

impl Checkbox {
    pub fn checked() -> Self {
        Checkbox { checked: true, click_works: true, key_works: true }
    }

    pub fn clickable() -> Self {
        Checkbox { checked: false, click_works: true, key_works: true }
    }

    pub fn key_only() -> Self {
        Checkbox { checked: false, click_works: false, key_works: true }
    }

    pub fn stuck() -> Self {
        Checkbox { checked: false, click_works: false, key_works: false }
    }
}

#[derive(Clone)]
pub struct ScriptedSession {
    selectors: Selectors,
    pages: Vec<Vec<String>>,
    current: usize,
    checkboxes: HashMap<String, Checkbox>,
    clicks: HashMap<String, usize>,
    stuck_next: bool,
    disabled_next: bool,
    unreachable: bool,
    fail_read_on: Option<usize>,
    closed: Arc<AtomicUsize>,
}

impl ScriptedSession {
    pub fn new(pages: Vec<Vec<&str>>) -> Self {
        ScriptedSession {
            selectors: Selectors::default(),
            pages: pages
                .into_iter()
                .map(|p| p.into_iter().map(String::from).collect())
                .collect(),
            current: 0,
            checkboxes: HashMap::new(),
            clicks: HashMap::new(),
            stuck_next: false,
            disabled_next: false,
            unreachable: false,
            fail_read_on: None,
            closed: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_checkbox(mut self, selector: &str, checkbox: Checkbox) -> Self {
        self.checkboxes.insert(selector.to_string(), checkbox);
        self
    }

    /// The next-page control stays clickable but never changes the page.
    pub fn with_stuck_next(mut self) -> Self {
        self.stuck_next = true;
        self
    }

    /// The next-page control is rendered on the last page but `disabled`,
    /// and clicking it does nothing.
    pub fn with_disabled_next(mut self) -> Self {
        self.disabled_next = true;
        self
    }

    /// Navigation to the entry url fails.
    pub fn unreachable(mut self) -> Self {
        self.unreachable = true;
        self
    }

    /// Reading cards fails on the given zero-based page.
    pub fn failing_read_on(mut self, page: usize) -> Self {
        self.fail_read_on = Some(page);
        self
    }

    pub fn clicks(&self, selector: &str) -> usize {
        self.clicks.get(selector).copied().unwrap_or(0)
    }

    pub fn is_checked(&self, selector: &str) -> bool {
        self.checkboxes.get(selector).map(|c| c.checked).unwrap_or(false)
    }

    fn has_next(&self) -> bool {
        self.stuck_next || self.current + 1 < self.pages.len()
    }

    fn next_disabled(&self) -> bool {
        self.disabled_next && self.current + 1 >= self.pages.len()
    }
}

#[async_trait]
impl Session for ScriptedSession {
    async fn navigate(&mut self, url: &str) -> Result<()> {
        if self.unreachable {
            bail!("net::ERR_NAME_NOT_RESOLVED at {}", url);
        }
        self.current = 0;
        Ok(())
    }

    async fn wait_for(&mut self, selector: &str, _timeout: Duration) -> Result<bool> {
        let found = if selector == self.selectors.ready {
            true
        } else if selector == self.selectors.cards {
            self.pages.get(self.current).map(|p| !p.is_empty()).unwrap_or(false)
        } else if selector == self.selectors.next_page {
            self.has_next() || self.next_disabled()
        } else {
            self.checkboxes.contains_key(selector)
        };
        Ok(found)
    }

    async fn click(&mut self, selector: &str) -> Result<()> {
        *self.clicks.entry(selector.to_string()).or_default() += 1;
        if selector == self.selectors.next_page {
            if self.next_disabled() {
                return Ok(());
            }
            if !self.has_next() {
                bail!("next page control is gone");
            }
            if !self.stuck_next {
                self.current += 1;
            }
            return Ok(());
        }
        match self.checkboxes.get_mut(selector) {
            Some(c) if c.click_works => c.checked = true,
            Some(_) => {}
            None => bail!("no element matches {}", selector),
        }
        Ok(())
    }

    async fn press_key(&mut self, selector: &str, _key: &str) -> Result<()> {
        match self.checkboxes.get_mut(selector) {
            Some(c) if c.key_works => c.checked = true,
            Some(_) => {}
            None => bail!("no element matches {}", selector),
        }
        Ok(())
    }

    async fn scroll_into_view(&mut self, _selector: &str) -> Result<()> {
        Ok(())
    }

    async fn read_attribute(&mut self, selector: &str, attr: &str) -> Result<Option<String>> {
        if selector == self.selectors.next_page {
            let disabled = self.next_disabled() && attr == "disabled";
            return Ok(disabled.then(String::new));
        }
        if attr != "aria-checked" {
            return Ok(None);
        }
        Ok(self.checkboxes.get(selector).map(|c| c.checked.to_string()))
    }

    async fn read_outer_html(&mut self, selector: &str) -> Result<Option<String>> {
        Ok(self.checkboxes.get(selector).map(|c| {
            format!(r#"<span role="checkbox" aria-checked="{}">filter</span>"#, c.checked)
        }))
    }

    async fn read_all(&mut self, selector: &str, _attr: &str) -> Result<Vec<String>> {
        if self.fail_read_on == Some(self.current) {
            bail!("timed out reading {}", selector);
        }
        if selector != self.selectors.cards {
            return Ok(Vec::new());
        }
        Ok(self.pages.get(self.current).cloned().unwrap_or_default())
    }

    async fn close(self: Box<Self>) -> Result<()> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Hands out copies of one scripted session and counts opens and closes.
pub struct ScriptedFactory {
    template: ScriptedSession,
    pub opened: AtomicUsize,
}

impl ScriptedFactory {
    pub fn new(template: ScriptedSession) -> Self {
        ScriptedFactory {
            template,
            opened: AtomicUsize::new(0),
        }
    }

    pub fn closed(&self) -> usize {
        self.template.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionFactory for ScriptedFactory {
    async fn open(&self) -> Result<Box<dyn Session>> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(self.template.clone()))
    }
}
