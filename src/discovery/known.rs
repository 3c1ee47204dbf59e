use std::collections::HashSet;

use anyhow::Result;
use rusqlite::Connection;

use crate::db;

/// Urls already stored for one partition, for the length of a discovery run.
pub struct KnownUrls {
    urls: HashSet<String>,
}

impl KnownUrls {
    pub fn seed(conn: &Connection, partition: &str) -> Result<Self> {
        let urls = db::fetch_known_urls(conn, partition)?.into_iter().collect();
        Ok(KnownUrls { urls })
    }

    pub fn known(&self, url: &str) -> bool {
        self.urls.contains(url)
    }

    /// Only call once the store holds `url`.
    pub fn remember(&mut self, url: String) {
        self.urls.insert(url);
    }

    /// Links not yet known, in page order, each at most once.
    pub fn split_new(&self, links: &[String]) -> Vec<String> {
        let mut seen = HashSet::new();
        links
            .iter()
            .filter(|l| !self.known(l) && seen.insert(l.as_str()))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.urls.len()
    }
}
