//! Operator-maintained pass and block lists.
//!
//! Entries are exact addresses or CIDR ranges. Lookups go through a prefix
//! trie held in an [`ArcSwap`], so the lists can be replaced while requests
//! are being checked.

mod trie;

use std::net::IpAddr;
use std::sync::Arc;

use arc_swap::ArcSwap;
use ipnet::IpNet;
use tracing::{info, warn};

use crate::trie::PrefixTrie;

/// What the lists say about an address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpAction {
    /// On the pass list: skip every other check.
    Pass,
    /// On the block list.
    Block,
    /// On neither list.
    None,
}

pub struct IpLists {
    pass: ArcSwap<PrefixTrie>,
    block: ArcSwap<PrefixTrie>,
}

impl IpLists {
    pub fn new() -> Self {
        Self {
            pass: ArcSwap::from_pointee(PrefixTrie::new()),
            block: ArcSwap::from_pointee(PrefixTrie::new()),
        }
    }

    pub fn from_entries<S: AsRef<str>>(pass: &[S], block: &[S]) -> Self {
        let lists = Self::new();
        lists.reload(pass, block);
        lists
    }

    /// Replace both lists. Unparseable entries are logged and skipped.
    pub fn reload<S: AsRef<str>>(&self, pass: &[S], block: &[S]) {
        let pass_trie = build_trie("pass_list", pass);
        let block_trie = build_trie("block_list", block);
        info!(pass = pass_trie.len(), block = block_trie.len(), "loaded IP lists");
        self.pass.store(Arc::new(pass_trie));
        self.block.store(Arc::new(block_trie));
    }

    /// The pass list wins when an address is on both.
    pub fn check(&self, addr: IpAddr) -> IpAction {
        if self.pass.load().contains(addr) {
            IpAction::Pass
        } else if self.block.load().contains(addr) {
            IpAction::Block
        } else {
            IpAction::None
        }
    }

    pub fn pass_len(&self) -> usize {
        self.pass.load().len()
    }

    pub fn block_len(&self) -> usize {
        self.block.load().len()
    }
}

impl Default for IpLists {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse one list entry: CIDR first, then a bare address as a host route.
pub fn parse_entry(entry: &str) -> Option<IpNet> {
    let entry = entry.trim();
    if let Ok(network) = entry.parse::<IpNet>() {
        return Some(network);
    }
    entry.parse::<IpAddr>().ok().map(IpNet::from)
}

fn build_trie<S: AsRef<str>>(list: &str, entries: &[S]) -> PrefixTrie {
    let mut trie = PrefixTrie::new();
    for entry in entries {
        let entry = entry.as_ref();
        if entry.trim().is_empty() {
            continue;
        }
        match parse_entry(entry) {
            Some(network) => trie.insert(network),
            None => warn!(list, entry, "skipping invalid IP list entry"),
        }
    }
    trie
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_empty_lists() {
        let lists = IpLists::new();
        assert_eq!(lists.check(ip("10.0.0.1")), IpAction::None);
    }

    #[test]
    fn test_pass_takes_precedence() {
        let lists = IpLists::from_entries(&["10.0.0.1"], &["10.0.0.0/8"]);
        assert_eq!(lists.check(ip("10.0.0.1")), IpAction::Pass);
        assert_eq!(lists.check(ip("10.0.0.2")), IpAction::Block);
        assert_eq!(lists.check(ip("8.8.8.8")), IpAction::None);
    }

    #[test]
    fn test_bad_entries_skipped() {
        let lists = IpLists::from_entries(&["1.1.1.1", "not-an-ip", " "], &["192.168.1.0/24"]);
        assert_eq!(lists.pass_len(), 1);
        assert_eq!(lists.block_len(), 1);
    }

    #[test]
    fn test_reload_replaces() {
        let lists = IpLists::from_entries::<&str>(&[], &["10.0.0.0/8"]);
        assert_eq!(lists.check(ip("10.1.2.3")), IpAction::Block);

        lists.reload::<&str>(&[], &[]);
        assert_eq!(lists.check(ip("10.1.2.3")), IpAction::None);
    }

    #[test]
    fn test_parse_entry() {
        assert_eq!(parse_entry("1.2.3.4").unwrap().prefix_len(), 32);
        assert_eq!(parse_entry("::1").unwrap().prefix_len(), 128);
        assert_eq!(parse_entry(" 10.0.0.0/8 ").unwrap().prefix_len(), 8);
        assert!(parse_entry("10.0.0.0/33").is_none());
    }
}
