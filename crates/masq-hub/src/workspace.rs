//! # Request workspace
//!
//! The on-disk layout the hub serves from:
//!
//! ```text
//! <root>/resources/processed/<requestID>/query.json
//! <root>/resources/processed/<requestID>/options.json
//! <root>/resources/logs/access.log
//! ```
//!
//! Descriptor loading does structural validation only; the access log is an
//! append-only line format that also feeds the request-listing counters.

use crate::error::ExportError;
use masq_core::descriptor::{AnonymizationDescriptor, QueryDescriptor};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Outcome markers written to the access log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessEvent {
    Attempt,
    Success,
    Failed,
}

impl AccessEvent {
    fn tag(self) -> &'static str {
        match self {
            Self::Attempt => "[Attempt]",
            Self::Success => "[Success]",
            Self::Failed => "[Failed]",
        }
    }
}

/// Per-request export history tallied from the access log.
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct AccessTally {
    pub attempt: u32,
    pub success: u32,
    pub failed: u32,
}

pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn processed_dir(&self) -> PathBuf {
        self.root.join("resources").join("processed")
    }

    fn log_path(&self) -> PathBuf {
        self.root.join("resources").join("logs").join("access.log")
    }

    /// Load both descriptors for a request.
    pub fn load(
        &self,
        request_id: &str,
    ) -> Result<(QueryDescriptor, AnonymizationDescriptor), ExportError> {
        let dir = self.processed_dir().join(request_id);
        let query = read_descriptor::<QueryDescriptor>(&dir.join("query.json"))?;
        let options = read_descriptor::<AnonymizationDescriptor>(&dir.join("options.json"))?;
        Ok((query, options))
    }

    /// Append one access-log line: `<local time> [Tag] <requestID>`.
    ///
    /// Logging must never fail a request; write errors are reported through
    /// tracing and swallowed.
    pub fn append_access(&self, event: AccessEvent, request_id: &str) {
        if let Err(err) = self.try_append_access(event, request_id) {
            tracing::error!("failed to append access log: {err}");
        }
    }

    fn try_append_access(&self, event: AccessEvent, request_id: &str) -> io::Result<()> {
        let path = self.log_path();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = fs::OpenOptions::new().append(true).create(true).open(path)?;
        let stamp = chrono::Local::now().format("%Y-%m-%dT%H:%M:%S");
        writeln!(file, "{stamp} {} {request_id}", event.tag())
    }

    /// Scan the processed directory and tally access-log lines per request.
    pub fn list_requests(&self) -> io::Result<BTreeMap<String, AccessTally>> {
        let dir = self.processed_dir();
        if !dir.exists() {
            fs::create_dir_all(&dir)?;
        }

        let mut tallies = BTreeMap::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            tallies.insert(
                entry.file_name().to_string_lossy().into_owned(),
                AccessTally::default(),
            );
        }

        let log = match fs::read_to_string(self.log_path()) {
            Ok(content) => content,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(tallies),
            Err(err) => return Err(err),
        };
        for line in log.lines() {
            let mut parts = line.split(' ');
            let (Some(_stamp), Some(tag), Some(id)) = (parts.next(), parts.next(), parts.next())
            else {
                continue;
            };
            let Some(tally) = tallies.get_mut(id) else {
                continue;
            };
            match tag {
                "[Attempt]" => tally.attempt += 1,
                "[Success]" => tally.success += 1,
                "[Failed]" => tally.failed += 1,
                _ => {}
            }
        }
        Ok(tallies)
    }
}

fn read_descriptor<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ExportError> {
    let raw = fs::read(path).map_err(|err| {
        if err.kind() == io::ErrorKind::NotFound {
            ExportError::ConfigMissing(path.display().to_string())
        } else {
            ExportError::ConfigMalformed(format!("{}: {err}", path.display()))
        }
    })?;
    serde_json::from_slice(&raw)
        .map_err(|err| ExportError::ConfigMalformed(format!("{}: {err}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;

    const QUERY_JSON: &str = r#"{
        "conn": { "host": "h", "port": "5432", "user": "u", "pwd": "p",
                  "database": "crm", "table": "profiles" },
        "attributes": { "age": { "isExport": true } }
    }"#;

    fn workspace_with_request(id: &str) -> (tempfile::TempDir, Workspace) {
        let dir = tempfile::tempdir().unwrap();
        let request_dir = dir.path().join("resources/processed").join(id);
        fs::create_dir_all(&request_dir).unwrap();
        fs::write(request_dir.join("query.json"), QUERY_JSON).unwrap();
        fs::write(request_dir.join("options.json"), r#"{ "age": { "method": "non" } }"#)
            .unwrap();
        let workspace = Workspace::new(dir.path());
        (dir, workspace)
    }

    #[test]
    fn test_load_both_descriptors() {
        let (_dir, workspace) = workspace_with_request("req-1");
        let (query, options) = workspace.load("req-1").unwrap();
        assert_eq!(query.conn.table, "profiles");
        assert_eq!(options["age"].method, "non");
    }

    #[test]
    fn test_missing_request_is_config_missing() {
        let (_dir, workspace) = workspace_with_request("req-1");
        assert!(matches!(
            workspace.load("absent").unwrap_err(),
            ExportError::ConfigMissing(_)
        ));
    }

    #[test]
    fn test_malformed_descriptor_is_config_malformed() {
        let (dir, workspace) = workspace_with_request("req-1");
        fs::write(
            dir.path().join("resources/processed/req-1/options.json"),
            "not json",
        )
        .unwrap();
        assert!(matches!(
            workspace.load("req-1").unwrap_err(),
            ExportError::ConfigMalformed(_)
        ));
    }

    #[test]
    fn test_access_log_tally() {
        let (_dir, workspace) = workspace_with_request("req-1");
        workspace.append_access(AccessEvent::Attempt, "req-1");
        workspace.append_access(AccessEvent::Attempt, "req-1");
        workspace.append_access(AccessEvent::Success, "req-1");
        workspace.append_access(AccessEvent::Failed, "req-1");
        workspace.append_access(AccessEvent::Attempt, "unknown-request");

        let tallies = workspace.list_requests().unwrap();
        assert_eq!(
            tallies["req-1"],
            AccessTally {
                attempt: 2,
                success: 1,
                failed: 1
            }
        );
        // Log lines for requests without a processed directory are ignored.
        assert!(!tallies.contains_key("unknown-request"));
    }

    #[test]
    fn test_list_requests_without_log() {
        let (_dir, workspace) = workspace_with_request("req-1");
        let tallies = workspace.list_requests().unwrap();
        assert_eq!(tallies["req-1"], AccessTally::default());
    }

    #[test]
    fn test_access_line_format() {
        let (dir, workspace) = workspace_with_request("req-1");
        workspace.append_access(AccessEvent::Attempt, "req-1");
        let log = fs::read_to_string(dir.path().join("resources/logs/access.log")).unwrap();
        let line = log.lines().next().unwrap();
        let mut parts = line.split(' ');
        let stamp = parts.next().unwrap();
        assert_eq!(parts.next(), Some("[Attempt]"));
        assert_eq!(parts.next(), Some("req-1"));
        // 2026-08-02T11:22:33
        assert_eq!(stamp.len(), 19);
        assert_eq!(&stamp[10..11], "T");
    }
}
