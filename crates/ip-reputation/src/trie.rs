use std::net::IpAddr;

use ipnet::IpNet;

/// Binary prefix trie over IP networks, one root per address family.
#[derive(Default)]
pub struct PrefixTrie {
    v4: Node,
    v6: Node,
    entries: usize,
}

#[derive(Default)]
struct Node {
    children: [Option<Box<Node>>; 2],
    terminal: bool,
}

/// Address bits left-aligned in a `u128`, plus the family width.
fn bits_of(addr: IpAddr) -> (u128, u8) {
    match addr {
        IpAddr::V4(v4) => ((u32::from(v4) as u128) << 96, 32),
        IpAddr::V6(v6) => (u128::from(v6), 128),
    }
}

fn bit_at(bits: u128, i: u8) -> usize {
    ((bits >> (127 - i)) & 1) as usize
}

impl PrefixTrie {
    pub fn new() -> Self {
        Self::default()
    }

    fn root(&self, addr: IpAddr) -> &Node {
        if addr.is_ipv4() {
            &self.v4
        } else {
            &self.v6
        }
    }

    pub fn insert(&mut self, network: IpNet) {
        let addr = network.network();
        let (bits, _) = bits_of(addr);
        let mut node = if addr.is_ipv4() {
            &mut self.v4
        } else {
            &mut self.v6
        };

        for i in 0..network.prefix_len() {
            node = node.children[bit_at(bits, i)]
                .get_or_insert_with(Box::default)
                .as_mut();
        }
        if !node.terminal {
            node.terminal = true;
            self.entries += 1;
        }
    }

    /// True if any inserted network covers `addr`.
    pub fn contains(&self, addr: IpAddr) -> bool {
        let (bits, width) = bits_of(addr);
        let mut node = self.root(addr);
        if node.terminal {
            return true;
        }
        for i in 0..width {
            match &node.children[bit_at(bits, i)] {
                Some(child) if child.terminal => return true,
                Some(child) => node = &**child,
                None => return false,
            }
        }
        false
    }

    pub fn len(&self) -> usize {
        self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries == 0
    }
}
