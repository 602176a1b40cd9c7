use std::io::{Read, Write};
use std::path::Path;
use std::sync::Arc;

use botgate_common::{BotgateError, BotgateResult};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::history::ClientHistory;
use crate::limiter::NetworkLimiter;
use crate::registry::NetworkRegistry;

/// On-disk form of one limiter.
#[derive(Debug, Serialize, Deserialize)]
struct PersistedLimiter {
    network: String,
    last_access: DateTime<Utc>,
    history: ClientHistory,
    is_suspicious: bool,
    rate: f64,
    burst: u32,
}

impl NetworkRegistry {
    /// Write every limiter as a pretty-printed JSON array.
    pub fn save<W: Write>(&self, writer: W) -> BotgateResult<usize> {
        let records: Vec<PersistedLimiter> = self
            .limiters
            .iter()
            .map(|entry| {
                let limiter = entry.value().lock();
                PersistedLimiter {
                    network: limiter.network().to_string(),
                    last_access: limiter.last_access(),
                    history: limiter.history().clone(),
                    is_suspicious: limiter.is_suspicious(),
                    rate: limiter.rate(),
                    burst: limiter.burst(),
                }
            })
            .collect();

        serde_json::to_writer_pretty(writer, &records)?;
        info!(count = records.len(), "saved limiter state");
        Ok(records.len())
    }

    /// Replace the registry contents with the records in `reader`.
    ///
    /// Empty input leaves an empty registry. Buckets start full.
    pub fn load<R: Read>(&self, mut reader: R) -> BotgateResult<usize> {
        let mut raw = String::new();
        reader.read_to_string(&mut raw)?;

        if raw.trim().is_empty() {
            self.limiters.clear();
            info!("limiter state is empty, starting fresh");
            return Ok(0);
        }

        let records: Option<Vec<PersistedLimiter>> = serde_json::from_str(&raw)?;
        let records = records.unwrap_or_default();
        if records.iter().any(|r| r.network.is_empty()) {
            return Err(BotgateError::State("limiter record without network".into()));
        }

        self.limiters.clear();
        let now = self.clock.now();
        let count = records.len();
        for record in records {
            let limiter = NetworkLimiter::restore(
                record.network.clone(),
                record.rate,
                record.burst,
                record.last_access,
                record.is_suspicious,
                record.history,
                now,
            );
            self.limiters
                .insert(record.network, Arc::new(Mutex::new(limiter)));
        }

        info!(count, "loaded limiter state");
        Ok(count)
    }

    /// Load state from `path`. A missing or unreadable file is not fatal.
    pub fn restore_from_file(&self, path: &Path) {
        let file = match std::fs::File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(file = %path.display(), "limiter state file not found, starting fresh");
                return;
            }
            Err(e) => {
                warn!(file = %path.display(), error = %e, "could not open limiter state file, starting fresh");
                return;
            }
        };

        if let Err(e) = self.load(std::io::BufReader::new(file)) {
            self.limiters.clear();
            warn!(file = %path.display(), error = %e, "could not parse limiter state file, starting fresh");
        }
    }

    /// Save state to `path`, creating parent directories. Failures are logged.
    pub fn persist_to_file(&self, path: &Path) {
        info!(file = %path.display(), "saving limiter state");

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            if let Err(e) = std::fs::create_dir_all(parent) {
                warn!(file = %path.display(), error = %e, "failed to create limiter state directory");
                return;
            }
        }

        let file = match std::fs::File::create(path) {
            Ok(file) => file,
            Err(e) => {
                warn!(file = %path.display(), error = %e, "failed to create limiter state file");
                return;
            }
        };

        let mut writer = std::io::BufWriter::new(file);
        let result = self
            .save(&mut writer)
            .and_then(|_| writer.flush().map_err(BotgateError::from));
        if let Err(e) = result {
            warn!(file = %path.display(), error = %e, "failed to write limiter state");
        }
    }
}
