//! Dynamic origin denylist with a local file cache and conditional HTTP
//! refresh.
//!
//! File format: one hex-encoded 32-byte address per line; blank lines and
//! `#` comments are ignored. Unparseable lines are logged and skipped so a
//! partially corrupt cache still loads.

use std::collections::HashSet;
use std::path::Path;
use std::sync::RwLock;

use anyhow::{bail, Context, Result};
use slog::Logger;

use chain::Address;

/// Set of blocked origins. `contains` is a shared-lock read on the hot
/// path; `load`/`fetch`/`save` serialize through the write side.
pub struct Blocklist {
    set: RwLock<HashSet<Address>>,
    logger: Logger,
}

impl Blocklist {
    pub fn new(logger: Logger) -> Self {
        Self {
            set: RwLock::new(HashSet::new()),
            logger,
        }
    }

    /// Adds a single origin. Refreshes replace the whole set; this is for
    /// seeding in tests and tools.
    pub fn insert(&self, origin: Address) {
        self.set
            .write()
            .expect("blocklist lock poisoned")
            .insert(origin);
    }

    pub fn contains(&self, origin: &Address) -> bool {
        self.set
            .read()
            .expect("blocklist lock poisoned")
            .contains(origin)
    }

    pub fn len(&self) -> usize {
        self.set.read().expect("blocklist lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Populates the set from a local cache file. A missing file is not an
    /// error; the set is left empty.
    pub async fn load(&self, path: &Path) -> Result<()> {
        let content = match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e).context("read blocklist cache"),
        };
        let parsed = self.parse(&content);
        *self.set.write().expect("blocklist lock poisoned") = parsed;
        Ok(())
    }

    /// Atomically rewrites the cache file: write a sibling temp file, then
    /// rename over the target.
    pub async fn save(&self, path: &Path) -> Result<()> {
        let mut lines: Vec<String> = self
            .set
            .read()
            .expect("blocklist lock poisoned")
            .iter()
            .map(|addr| hex::encode(addr.as_bytes()))
            .collect();
        lines.sort();
        let mut content = lines.join("\n");
        content.push('\n');

        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, content)
            .await
            .context("write blocklist temp file")?;
        tokio::fs::rename(&tmp, path)
            .await
            .context("replace blocklist cache")?;
        Ok(())
    }

    /// Issues a conditional GET against `url`. On 200 the set and `etag`
    /// are replaced; on 304 nothing changes.
    pub async fn fetch(
        &self,
        client: &reqwest::Client,
        url: &str,
        etag: &mut Option<String>,
    ) -> Result<()> {
        let mut request = client.get(url);
        if let Some(tag) = etag.as_deref() {
            request = request.header(reqwest::header::IF_NONE_MATCH, tag);
        }
        let response = request.send().await.context("fetch blocklist")?;

        if response.status() == reqwest::StatusCode::NOT_MODIFIED {
            return Ok(());
        }
        if !response.status().is_success() {
            bail!("blocklist fetch returned status {}", response.status());
        }

        let new_etag = response
            .headers()
            .get(reqwest::header::ETAG)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        let body = response.text().await.context("read blocklist body")?;

        let parsed = self.parse(&body);
        *self.set.write().expect("blocklist lock poisoned") = parsed;
        *etag = new_etag;
        Ok(())
    }

    fn parse(&self, content: &str) -> HashSet<Address> {
        let mut set = HashSet::new();
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            match hex::decode(line) {
                Ok(raw) if raw.len() == 32 => {
                    let mut bytes = [0u8; 32];
                    bytes.copy_from_slice(&raw);
                    set.insert(Address::from_bytes(bytes));
                }
                _ => {
                    slog::warn!(self.logger, "skipping bad blocklist line"; "line" => line);
                }
            }
        }
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blocklist() -> Blocklist {
        Blocklist::new(Logger::root(slog::Discard, slog::o!()))
    }

    fn addr(byte: u8) -> Address {
        Address::from_bytes([byte; 32])
    }

    #[tokio::test]
    async fn save_load_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("blocklist.txt");

        let list = blocklist();
        {
            let mut set = list.set.write().expect("lock");
            set.insert(addr(1));
            set.insert(addr(2));
        }
        list.save(&path).await.expect("save");

        let loaded = blocklist();
        loaded.load(&path).await.expect("load");
        assert_eq!(loaded.len(), 2);
        assert!(loaded.contains(&addr(1)));
        assert!(loaded.contains(&addr(2)));
        assert!(!loaded.contains(&addr(3)));
    }

    #[tokio::test]
    async fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let list = blocklist();
        list.load(&dir.path().join("absent.txt"))
            .await
            .expect("missing file is fine");
        assert!(list.is_empty());
    }

    #[tokio::test]
    async fn bad_lines_are_skipped() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("blocklist.txt");
        let content = format!(
            "# comment\n\n{}\nnot-hex\ndeadbeef\n",
            hex::encode(addr(9).as_bytes())
        );
        tokio::fs::write(&path, content).await.expect("write");

        let list = blocklist();
        list.load(&path).await.expect("load");
        assert_eq!(list.len(), 1);
        assert!(list.contains(&addr(9)));
    }

    #[tokio::test]
    async fn save_is_atomic_replace() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("blocklist.txt");

        let list = blocklist();
        {
            list.set.write().expect("lock").insert(addr(4));
        }
        list.save(&path).await.expect("first save");
        {
            list.set.write().expect("lock").insert(addr(5));
        }
        list.save(&path).await.expect("second save");

        let loaded = blocklist();
        loaded.load(&path).await.expect("load");
        assert_eq!(loaded.len(), 2);
        assert!(!path.with_extension("tmp").exists());
    }
}
