//! Browser automation surface used by link discovery. The pagination driver
//! only talks to a rendered page through [`Session`].

#[cfg(feature = "browser")]
mod chrome;
#[cfg(test)]
pub mod fake;

#[cfg(feature = "browser")]
pub use chrome::ChromeFactory;

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

/// One live page. Every call may fail (timeouts, detached nodes); callers
/// treat failures as "nothing there".
#[async_trait]
pub trait Session: Send {
    async fn navigate(&mut self, url: &str) -> Result<()>;

    /// Poll until `selector` matches or `timeout` elapses.
    async fn wait_for(&mut self, selector: &str, timeout: Duration) -> Result<bool>;

    async fn click(&mut self, selector: &str) -> Result<()>;

    async fn press_key(&mut self, selector: &str, key: &str) -> Result<()>;

    async fn scroll_into_view(&mut self, selector: &str) -> Result<()>;

    async fn read_attribute(&mut self, selector: &str, attr: &str) -> Result<Option<String>>;

    async fn read_outer_html(&mut self, selector: &str) -> Result<Option<String>>;

    /// `attr` of every element matching `selector`, skipping ones without it.
    async fn read_all(&mut self, selector: &str, attr: &str) -> Result<Vec<String>>;

    async fn close(self: Box<Self>) -> Result<()>;
}

/// Opens a fresh session per partition.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn open(&self) -> Result<Box<dyn Session>>;
}

/// Poll interval shared by `wait_for` implementations.
pub const POLL_INTERVAL: Duration = Duration::from_millis(250);
