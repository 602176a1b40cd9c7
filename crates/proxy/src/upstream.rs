use botgate_common::UpstreamConfig;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Weighted round-robin over the configured upstream servers.
pub struct UpstreamSelector {
    pub name: String,
    addrs: Vec<String>,
    counter: AtomicUsize,
    /// Server indices repeated by weight: weight 3 → [i, i, i].
    schedule: Vec<usize>,
}

impl UpstreamSelector {
    pub fn from_config(config: &UpstreamConfig) -> Self {
        let addrs: Vec<String> = config.servers.iter().map(|s| s.addr.clone()).collect();

        let mut schedule: Vec<usize> = config
            .servers
            .iter()
            .enumerate()
            .flat_map(|(i, s)| std::iter::repeat(i).take(s.weight as usize))
            .collect();
        if schedule.is_empty() {
            // All weights zero: fall back to equal weight.
            schedule = (0..addrs.len()).collect();
        }

        Self {
            name: config.name.clone(),
            addrs,
            counter: AtomicUsize::new(0),
            schedule,
        }
    }

    pub fn select(&self) -> Option<&str> {
        if self.schedule.is_empty() {
            return None;
        }
        let slot = self.counter.fetch_add(1, Ordering::Relaxed) % self.schedule.len();
        self.addrs.get(self.schedule[slot]).map(String::as_str)
    }

    pub fn server_count(&self) -> usize {
        self.addrs.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use botgate_common::UpstreamServer;

    fn config(servers: &[(&str, u32)]) -> UpstreamConfig {
        UpstreamConfig {
            name: "app".into(),
            servers: servers
                .iter()
                .map(|(addr, weight)| UpstreamServer {
                    addr: addr.to_string(),
                    weight: *weight,
                })
                .collect(),
        }
    }

    #[test]
    fn weighted_rotation() {
        let selector = UpstreamSelector::from_config(&config(&[("a:1", 2), ("b:1", 1)]));
        let picks: Vec<_> = (0..6).map(|_| selector.select().unwrap()).collect();
        assert_eq!(picks, ["a:1", "a:1", "b:1", "a:1", "a:1", "b:1"]);
        assert_eq!(selector.server_count(), 2);
    }

    #[test]
    fn zero_weights_share_equally() {
        let selector = UpstreamSelector::from_config(&config(&[("a:1", 0), ("b:1", 0)]));
        assert_eq!(selector.select(), Some("a:1"));
        assert_eq!(selector.select(), Some("b:1"));
    }

    #[test]
    fn no_servers() {
        let selector = UpstreamSelector::from_config(&config(&[]));
        assert_eq!(selector.select(), None);
    }
}
