//! Recently seen cookie hosts.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

/// Hosts kept per jar.
pub const MAX_JAR_SIZE: usize = 20;

/// Distinct hosts whose cookies were eaten, most recent last.
#[derive(Debug, Default)]
pub struct CookieJar {
    hosts: Mutex<VecDeque<String>>,
}

impl CookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move `host` to the end, dropping the oldest host when full.
    pub fn record(&self, host: &str) {
        let mut hosts = self.hosts.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(pos) = hosts.iter().position(|h| h == host) {
            hosts.remove(pos);
        }
        hosts.push_back(host.to_string());
        if hosts.len() > MAX_JAR_SIZE {
            hosts.pop_front();
        }
    }

    pub fn hosts(&self) -> Vec<String> {
        self.hosts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.hosts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_distinct_hosts_most_recent_last() {
        let jar = CookieJar::new();
        jar.record("a");
        jar.record("b");
        jar.record("a");
        assert_eq!(jar.hosts(), ["b", "a"]);
    }

    #[test]
    fn drops_oldest_beyond_capacity() {
        let jar = CookieJar::new();
        for i in 0..=MAX_JAR_SIZE {
            jar.record(&format!("h{i}"));
        }
        let hosts = jar.hosts();
        assert_eq!(hosts.len(), MAX_JAR_SIZE);
        assert_eq!(hosts[0], "h1");
        assert_eq!(hosts[MAX_JAR_SIZE - 1], format!("h{MAX_JAR_SIZE}"));
    }
}
