use serde::{Deserialize, Deserializer, Serialize};

/// Number of client verdicts remembered per network.
pub const HISTORY_CAPACITY: usize = 60;

/// Fixed-size ring buffer of per-request "was this client suspicious" flags.
///
/// Invariants: `count <= HISTORY_CAPACITY`, `suspicious <= count`, and
/// `suspicious` equals the number of `true` slots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientHistory {
    #[serde(default, deserialize_with = "null_as_empty")]
    statuses: Vec<bool>,
    index: usize,
    count: usize,
    suspicious: usize,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<bool>>::deserialize(deserializer)?.unwrap_or_default())
}

impl ClientHistory {
    pub fn new() -> Self {
        Self {
            statuses: vec![false; HISTORY_CAPACITY],
            index: 0,
            count: 0,
            suspicious: 0,
        }
    }

    /// Record one verdict, overwriting the oldest when full.
    pub fn push(&mut self, suspicious: bool) {
        if self.statuses.len() != HISTORY_CAPACITY {
            *self = Self::new();
        }

        if self.count == HISTORY_CAPACITY {
            if self.statuses[self.index] {
                self.suspicious -= 1;
            }
        } else {
            self.count += 1;
        }

        self.statuses[self.index] = suspicious;
        if suspicious {
            self.suspicious += 1;
        }
        self.index = (self.index + 1) % HISTORY_CAPACITY;
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn suspicious(&self) -> usize {
        self.suspicious
    }

    pub fn is_full(&self) -> bool {
        self.count == HISTORY_CAPACITY
    }

    /// Share of suspicious verdicts, available only once the buffer is full.
    pub fn suspicious_ratio(&self) -> Option<f64> {
        if !self.is_full() {
            return None;
        }
        Some(self.suspicious as f64 / self.count as f64)
    }

    pub fn is_consistent(&self) -> bool {
        let flagged = self.statuses.iter().filter(|s| **s).count();
        self.statuses.len() == HISTORY_CAPACITY
            && self.index < HISTORY_CAPACITY
            && self.count <= HISTORY_CAPACITY
            && self.suspicious <= self.count
            && self.suspicious == flagged
            && (self.is_full() || self.index == self.count)
    }

    /// Return `self` if it upholds the invariants, otherwise an empty history.
    pub fn sanitized(self) -> Self {
        if self.is_consistent() {
            self
        } else {
            Self::new()
        }
    }
}

impl Default for ClientHistory {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fills_then_wraps() {
        let mut history = ClientHistory::new();
        for _ in 0..HISTORY_CAPACITY {
            history.push(true);
        }
        assert!(history.is_full());
        assert_eq!(history.suspicious(), 60);
        assert_eq!(history.index, 0);

        history.push(false);
        assert_eq!(history.count(), 60);
        assert_eq!(history.suspicious(), 59);
        assert_eq!(history.index, 1);
        assert!(history.is_consistent());
    }

    #[test]
    fn ratio_only_when_full() {
        let mut history = ClientHistory::new();
        for _ in 0..59 {
            history.push(true);
        }
        assert_eq!(history.suspicious_ratio(), None);

        history.push(false);
        let ratio = history.suspicious_ratio().unwrap();
        assert!((ratio - 59.0 / 60.0).abs() < f64::EPSILON);
    }

    #[test]
    fn overwrite_keeps_counts_in_step() {
        let mut history = ClientHistory::new();
        for i in 0..200 {
            history.push(i % 3 == 0);
            assert!(history.count() <= HISTORY_CAPACITY);
            assert!(history.suspicious() <= history.count());
            assert!(history.is_consistent(), "broken after push {}", i);
        }
    }

    #[test]
    fn null_statuses_deserialize() {
        let json = r#"{"statuses":null,"index":0,"count":0,"suspicious":0}"#;
        let history: ClientHistory = serde_json::from_str(json).unwrap();
        assert!(!history.is_consistent());

        let history = history.sanitized();
        assert!(history.is_consistent());
        assert_eq!(history.count(), 0);
    }

    #[test]
    fn corrupt_counts_are_reset() {
        let mut history = ClientHistory::new();
        history.push(true);
        history.suspicious = 5;
        let history = history.sanitized();
        assert_eq!(history, ClientHistory::new());
    }
}
