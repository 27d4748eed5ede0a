//! The controller's in-memory config document: streams, protocols, account,
//! and a rolling statistics log, all behind one writer lock so mutations
//! are totally ordered.

use std::collections::BTreeMap;
use std::path::PathBuf;

use media_api::config::{Account, ConfigError, LogEntry, Protocol, StreamEntry};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("no config path configured for save")]
    NoSavePath,
    #[error("writing config file: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ControllerConfig {
    #[serde(flatten)]
    pub fields: serde_json::Map<String, Value>,
}

/// The whole mutable config document, mirroring the original's single JSON
/// tree: streams, protocols, controller settings, account, and logs.
#[derive(Debug, Clone, Default)]
pub struct ConfigDoc {
    pub streams: BTreeMap<String, StreamEntry>,
    pub protocols: Vec<Protocol>,
    pub controller: ControllerConfig,
    pub serverid: String,
    pub debug_level: i64,
    /// Accounts keyed by username; the original's `Storage["account"]` is a
    /// map, not a single global credential.
    pub accounts: BTreeMap<String, Account>,
    pub ui_settings: Value,
    pub capabilities: Value,
    pub log: Vec<LogEntry>,
    pub iid: String,
    pub version: String,
    pub config_path: Option<PathBuf>,
}

impl ConfigDoc {
    pub fn new(iid: impl Into<String>, version: impl Into<String>) -> Self {
        ConfigDoc {
            iid: iid.into(),
            version: version.into(),
            ui_settings: json!({}),
            capabilities: Value::Null,
            ..Default::default()
        }
    }

    pub fn with_config_path(mut self, path: PathBuf) -> Self {
        self.config_path = Some(path);
        self
    }

    pub fn set_debug_level(&mut self, level: i64) {
        self.debug_level = level;
        utils::logging::set_debug_level(level);
    }

    pub fn set_protocols(&mut self, protocols: Vec<Protocol>) {
        self.protocols = protocols;
        self.dedup_protocols();
    }

    pub fn add_protocol(&mut self, mut protocol: Protocol) {
        protocol.remove_null_members();
        self.protocols.push(protocol);
        self.dedup_protocols();
    }

    pub fn delete_protocols_matching(&mut self, targets: &[Protocol]) {
        self.protocols
            .retain(|p| !targets.iter().any(|t| p.equal_ignoring_online(t)));
    }

    /// Replace every protocol equal to `from` (ignoring `online`) with `to`.
    pub fn update_protocol(&mut self, from: &Protocol, to: Protocol) {
        for p in &mut self.protocols {
            if p.equal_ignoring_online(from) {
                *p = to.clone();
            }
        }
        self.dedup_protocols();
    }

    /// Drop null members everywhere, then pairwise-compare (ignoring
    /// `online`), dropping the second occurrence of any equal pair and
    /// restarting, until a full pass finds no duplicate.
    fn dedup_protocols(&mut self) {
        for p in &mut self.protocols {
            p.remove_null_members();
        }
        loop {
            let mut drop_index = None;
            'outer: for i in 0..self.protocols.len() {
                for j in (i + 1)..self.protocols.len() {
                    if self.protocols[i].equal_ignoring_online(&self.protocols[j]) {
                        drop_index = Some(j);
                        break 'outer;
                    }
                }
            }
            match drop_index {
                Some(j) => {
                    self.protocols.remove(j);
                }
                None => break,
            }
        }
    }

    /// Validate-then-swap the whole stream map: reject (don't partially
    /// apply) if any entry is malformed.
    pub fn set_streams(&mut self, value: Value) -> Result<(), StoreError> {
        let streams = media_api::config::validate_streams_document(value)?;
        self.streams = streams;
        Ok(())
    }

    pub fn add_stream(&mut self, name: String, value: Value) -> Result<(), StoreError> {
        let entry = StreamEntry::validate(value)?;
        self.streams.insert(name, entry);
        Ok(())
    }

    pub fn delete_streams(&mut self, names: &[String]) {
        for name in names {
            self.streams.remove(name);
        }
    }

    pub fn clear_stat_logs(&mut self) {
        self.log.clear();
    }

    pub fn log_event(&mut self, kind: impl Into<String>, message: impl Into<String>, unix_time: i64) {
        self.log.push(LogEntry {
            kind: kind.into(),
            message: message.into(),
            unix_time,
        });
    }

    /// The on-disk shape written by `save` and read back at startup:
    /// everything but the transient `log`/`capabilities` subtrees.
    pub fn to_persisted_value(&self) -> Value {
        json!({
            "streams": self.streams,
            "protocols": self.protocols.iter().map(Protocol::to_value).collect::<Vec<_>>(),
            "controller": self.controller.fields,
            "serverid": self.serverid,
            "debug": self.debug_level,
            "account": self.accounts,
            "ui_settings": self.ui_settings,
        })
    }

    pub fn save(&self) -> Result<(), StoreError> {
        let path = self.config_path.as_ref().ok_or(StoreError::NoSavePath)?;
        let bytes = serde_json::to_vec_pretty(&self.to_persisted_value()).expect("config always serializes");
        std::fs::write(path, bytes)?;
        Ok(())
    }
}
