//! The API dispatcher: maps a parsed JSON command to a `ConfigDoc`
//! mutation, best-effort. No command handler panics; malformed input
//! becomes a logged no-op rather than an error response, matching the
//! "controller never throws out of the dispatcher" contract.

use media_api::config::Protocol;
use serde_json::{json, Map, Value};
use tracing::warn;

use crate::browse::browse;
use crate::config_store::ConfigDoc;

/// Apply every recognized top-level command present in `command`. Returns
/// the set of stream names touched by `addstream`/`deletestream`, used to
/// shape a `minimal` response.
pub fn dispatch(doc: &mut ConfigDoc, command: &Map<String, Value>, now: i64) -> Vec<String> {
    let mut touched_streams = Vec::new();

    // `debug`/`protocols`/`controller`/`serverid` all live nested under a
    // top-level `config` object in the wire protocol.
    if let Some(config) = command.get("config").and_then(Value::as_object) {
        if let Some(level) = config.get("debug").and_then(Value::as_i64) {
            doc.set_debug_level(level);
        }
        if let Some(protocols) = config.get("protocols") {
            match parse_protocol_list(protocols) {
                Some(list) => doc.set_protocols(list),
                None => warn!("config.protocols: not a JSON array, ignoring"),
            }
        }
        if let Some(controller) = config.get("controller").and_then(Value::as_object) {
            doc.controller.fields = controller.clone();
        }
        if let Some(serverid) = config.get("serverid").and_then(Value::as_str) {
            doc.serverid = serverid.to_string();
        }
    }

    if let Some(streams) = command.get("streams") {
        if let Err(e) = doc.set_streams(streams.clone()) {
            warn!(error = %e, "streams: validation failed, ignoring whole document");
        }
    }
    if let Some(addstream) = command.get("addstream").and_then(Value::as_object) {
        for (name, value) in addstream {
            match doc.add_stream(name.clone(), value.clone()) {
                Ok(()) => touched_streams.push(name.clone()),
                Err(e) => warn!(stream = name, error = %e, "addstream: invalid entry, ignoring"),
            }
        }
    }
    if let Some(deletestream) = command.get("deletestream") {
        let names = string_list(deletestream);
        doc.delete_streams(&names);
        touched_streams.extend(names);
    }

    if let Some(addprotocol) = command.get("addprotocol") {
        for value in protocol_values(addprotocol) {
            doc.add_protocol(Protocol::from_value(value));
        }
    }
    if let Some(deleteprotocol) = command.get("deleteprotocol") {
        let targets: Vec<Protocol> = protocol_values(deleteprotocol).into_iter().map(Protocol::from_value).collect();
        doc.delete_protocols_matching(&targets);
    }
    if let Some(Value::Array(pair)) = command.get("updateprotocol") {
        if let [from, to] = pair.as_slice() {
            doc.update_protocol(&Protocol::from_value(from.clone()), Protocol::from_value(to.clone()));
        } else {
            warn!("updateprotocol: expected a two-element array, ignoring");
        }
    }

    if command.get("capabilities").is_some() {
        doc.capabilities = controller_capabilities();
    }

    if command.get("save").is_some() {
        if let Err(e) = doc.save() {
            warn!(error = %e, "save: failed to persist config");
        }
    }

    if let Some(Value::String(path)) = command.get("browse") {
        match browse(path) {
            Ok(result) => doc.log_event("INFO", format!("browsed {path}: {:?}", result.files), now),
            Err(e) => warn!(path, error = %e, "browse failed"),
        }
    }

    if let Some(value) = command.get("ui_settings") {
        doc.ui_settings = value.clone();
    }

    if command.get("clearstatlogs").is_some() {
        doc.clear_stat_logs();
    }

    touched_streams
}

fn parse_protocol_list(value: &Value) -> Option<Vec<Protocol>> {
    value.as_array().map(|arr| arr.iter().cloned().map(Protocol::from_value).collect())
}

/// Accepts the `addprotocol`/`deleteprotocol` command's array-or-single-
/// object shape.
fn protocol_values(value: &Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items.clone(),
        other => vec![other.clone()],
    }
}

/// Accepts `deletestream`'s string/array/object shape, returning the
/// affected stream names.
fn string_list(value: &Value) -> Vec<String> {
    match value {
        Value::String(s) => vec![s.clone()],
        Value::Array(items) => items.iter().filter_map(|v| v.as_str().map(str::to_string)).collect(),
        Value::Object(map) => map.keys().cloned().collect(),
        _ => Vec::new(),
    }
}

/// The machine-readable descriptor recomputed on every `capabilities`
/// command, listing the commands this dispatcher understands.
fn controller_capabilities() -> Value {
    json!({
        "name": "controller",
        "commands": [
            "config.debug", "config.protocols", "config.controller", "config.serverid",
            "streams", "addstream", "deletestream",
            "addprotocol", "deleteprotocol", "updateprotocol",
            "capabilities", "browse", "save", "ui_settings", "clearstatlogs",
        ],
    })
}

/// Build the periodic response envelope: `streams`, `config` (with `iid`,
/// `version`, `time`, defaulted `serverid`), and `log`.
pub fn build_envelope(doc: &ConfigDoc, now: i64) -> Value {
    json!({
        "streams": doc.streams,
        "config": {
            "iid": doc.iid,
            "version": doc.version,
            "time": now,
            "serverid": doc.serverid,
            "protocols": doc.protocols.iter().map(Protocol::to_value).collect::<Vec<_>>(),
            "controller": doc.controller.fields,
            "capabilities": doc.capabilities,
        },
        "log": doc.log,
    })
}

/// A `minimal` response after `addstream`/`deletestream`: `incomplete
/// list=1` plus only the touched entries.
pub fn minimal_streams_envelope(doc: &ConfigDoc, touched: &[String]) -> Value {
    let entries: Map<String, Value> = touched
        .iter()
        .filter_map(|name| doc.streams.get(name).map(|e| (name.clone(), e.0.clone())))
        .collect();
    json!({ "streams": { "incomplete": true, "list": entries } })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn command(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(m) => m,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn addstream_then_deletestream_round_trips() {
        let mut doc = ConfigDoc::new("iid", "1.0");
        dispatch(&mut doc, &command(json!({"addstream": {"cam1": {"source": "x"}}})), 0);
        assert_eq!(doc.streams.len(), 1);
        dispatch(&mut doc, &command(json!({"deletestream": "cam1"})), 0);
        assert!(doc.streams.is_empty());
    }

    #[test]
    fn streams_replace_rejects_invalid_document_wholesale() {
        let mut doc = ConfigDoc::new("iid", "1.0");
        dispatch(&mut doc, &command(json!({"addstream": {"cam1": {"source": "x"}}})), 0);
        dispatch(&mut doc, &command(json!({"streams": {"a": "not-an-object"}})), 0);
        // invalid replacement ignored; prior state intact
        assert_eq!(doc.streams.len(), 1);
    }

    #[test]
    fn addprotocol_accepts_single_object_or_array() {
        let mut doc = ConfigDoc::new("iid", "1.0");
        dispatch(&mut doc, &command(json!({"addprotocol": {"name": "HTTP"}})), 0);
        dispatch(&mut doc, &command(json!({"addprotocol": [{"name": "RTMP"}]})), 0);
        assert_eq!(doc.protocols.len(), 2);
    }

    #[test]
    fn updateprotocol_replaces_matching_entry() {
        let mut doc = ConfigDoc::new("iid", "1.0");
        dispatch(&mut doc, &command(json!({"addprotocol": {"name": "HTTP", "port": 80}})), 0);
        dispatch(
            &mut doc,
            &command(json!({"updateprotocol": [{"name": "HTTP", "port": 80}, {"name": "HTTP", "port": 8080}]})),
            0,
        );
        assert_eq!(doc.protocols[0].fields["port"], json!(8080));
    }

    #[test]
    fn clearstatlogs_empties_the_log() {
        let mut doc = ConfigDoc::new("iid", "1.0");
        doc.log_event("INFO", "x", 0);
        dispatch(&mut doc, &command(json!({"clearstatlogs": true})), 0);
        assert!(doc.log.is_empty());
    }

    #[test]
    fn envelope_carries_iid_version_and_time() {
        let doc = ConfigDoc::new("myiid", "2.0");
        let envelope = build_envelope(&doc, 1234);
        assert_eq!(envelope["config"]["iid"], json!("myiid"));
        assert_eq!(envelope["config"]["time"], json!(1234));
    }

    #[test]
    fn debug_and_serverid_are_read_from_the_nested_config_object() {
        let mut doc = ConfigDoc::new("iid", "1.0");
        dispatch(&mut doc, &command(json!({"config": {"debug": 3, "serverid": "srv1"}})), 0);
        assert_eq!(doc.debug_level, 3);
        assert_eq!(doc.serverid, "srv1");
    }

    #[test]
    fn top_level_debug_outside_config_is_ignored() {
        let mut doc = ConfigDoc::new("iid", "1.0");
        dispatch(&mut doc, &command(json!({"debug": 3})), 0);
        assert_eq!(doc.debug_level, 0);
    }

    #[test]
    fn capabilities_command_refreshes_the_descriptor() {
        let mut doc = ConfigDoc::new("iid", "1.0");
        assert!(doc.capabilities.is_null());
        dispatch(&mut doc, &command(json!({"capabilities": true})), 0);
        assert_eq!(doc.capabilities["name"], json!("controller"));
    }

    #[test]
    fn save_without_a_config_path_is_a_logged_no_op() {
        let mut doc = ConfigDoc::new("iid", "1.0");
        // Should not panic even though no config_path was configured.
        dispatch(&mut doc, &command(json!({"save": true})), 0);
    }

    #[test]
    fn save_writes_the_persisted_document_to_disk() {
        let dir = camino_tempfile::tempdir().unwrap();
        let path = dir.path().join("controller.json").as_std_path().to_path_buf();
        let mut doc = ConfigDoc::new("iid", "1.0").with_config_path(path.clone());
        dispatch(&mut doc, &command(json!({"addstream": {"cam1": {"source": "x"}}})), 0);
        dispatch(&mut doc, &command(json!({"save": true})), 0);
        let saved: Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert!(saved["streams"]["cam1"].is_object());
    }
}
