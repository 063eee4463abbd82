//! The six rule lists of one user, with directory persistence.

use std::fs::File;
use std::io::{BufReader, BufWriter, ErrorKind};
use std::path::Path;

use crate::rules::{HostRuleList, RuleError, UrlRuleList};

pub const COOKIE_HOSTS_FILE: &str = "cookiehosts";
pub const SESSION_COOKIES_FILE: &str = "sessioncookies";
pub const COOKIE_EXCEPTIONS_FILE: &str = "cookieexceptions";
pub const BLOCK_RULES_FILE: &str = "blockrules";
pub const BLOCK_EXCEPTIONS_FILE: &str = "blockexceptions";
pub const IMAGE_RULES_FILE: &str = "imagerules";

/// Cookie host lists and URL block lists.
#[derive(Debug, Default)]
pub struct RuleSet {
    /// Hosts whose cookies pass in both directions.
    pub cookie_hosts: HostRuleList,
    /// Hosts whose cookies pass but lose their expiry.
    pub session_cookies: HostRuleList,
    /// Hosts whose cookies are always eaten.
    pub cookie_exceptions: HostRuleList,
    pub block_rules: UrlRuleList,
    /// A hit here cancels a block rule hit.
    pub block_exceptions: UrlRuleList,
    /// Blocked URLs answered with a blank image instead of 403.
    pub image_rules: UrlRuleList,
}

impl RuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    fn host_lists(&self) -> [(&'static str, &HostRuleList); 3] {
        [
            (COOKIE_HOSTS_FILE, &self.cookie_hosts),
            (SESSION_COOKIES_FILE, &self.session_cookies),
            (COOKIE_EXCEPTIONS_FILE, &self.cookie_exceptions),
        ]
    }

    fn url_lists(&self) -> [(&'static str, &UrlRuleList); 3] {
        [
            (BLOCK_RULES_FILE, &self.block_rules),
            (BLOCK_EXCEPTIONS_FILE, &self.block_exceptions),
            (IMAGE_RULES_FILE, &self.image_rules),
        ]
    }

    /// Load every list file found in `dir`. Missing files leave the list empty.
    pub fn load_dir(dir: &Path) -> Result<Self, RuleError> {
        let set = Self::new();
        for (name, list) in set.host_lists() {
            if let Some(file) = open_if_exists(&dir.join(name))? {
                list.read_from(BufReader::new(file))?;
            }
        }
        for (name, list) in set.url_lists() {
            if let Some(file) = open_if_exists(&dir.join(name))? {
                list.read_from(BufReader::new(file))?;
            }
        }
        tracing::info!(
            dir = %dir.display(),
            rules = set.total_rules(),
            "Loaded rule lists"
        );
        Ok(set)
    }

    /// Write all six list files into `dir`, creating it if needed.
    pub fn save_dir(&self, dir: &Path) -> Result<(), RuleError> {
        std::fs::create_dir_all(dir)?;
        for (name, list) in self.host_lists() {
            list.write_to(BufWriter::new(File::create(dir.join(name))?))?;
        }
        for (name, list) in self.url_lists() {
            list.write_to(BufWriter::new(File::create(dir.join(name))?))?;
        }
        tracing::info!(
            dir = %dir.display(),
            rules = self.total_rules(),
            "Saved rule lists"
        );
        Ok(())
    }

    /// Re-sort every list whose hit-count order drifted. Returns how many did.
    pub fn refresh_all(&self) -> usize {
        let hosts = self
            .host_lists()
            .into_iter()
            .filter(|(_, list)| list.refresh_order())
            .count();
        let urls = self
            .url_lists()
            .into_iter()
            .filter(|(_, list)| list.refresh_order())
            .count();
        hosts + urls
    }

    pub fn total_rules(&self) -> usize {
        let hosts: usize = self.host_lists().iter().map(|(_, l)| l.len()).sum();
        let urls: usize = self.url_lists().iter().map(|(_, l)| l.len()).sum();
        hosts + urls
    }
}

fn open_if_exists(path: &Path) -> Result<Option<File>, RuleError> {
    match File::open(path) {
        Ok(file) => Ok(Some(file)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}
