//! Audit log — one JSON line per request, append-only, 0640 root:group
//! (spec §4.3, §6.3).

use std::fs::OpenOptions;
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::sync::Mutex;

use chrono::Utc;
use serde::Serialize;

#[derive(Serialize)]
pub struct AuditEntry<'a> {
    pub timestamp: String,
    pub peer_uid: u32,
    pub peer_pid: i32,
    pub endpoint: &'a str,
    pub ctid: Option<u32>,
    pub duration_ms: u128,
    pub result: &'a str,
}

pub struct AuditLog {
    file: Mutex<std::fs::File>,
}

impl AuditLog {
    pub fn open(path: &str) -> anyhow::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .mode(0o640)
            .open(path)?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }

    pub fn record(
        &self,
        peer_uid: u32,
        peer_pid: i32,
        endpoint: &str,
        ctid: Option<u32>,
        duration_ms: u128,
        ok: bool,
    ) {
        let entry = AuditEntry {
            timestamp: Utc::now().to_rfc3339(),
            peer_uid,
            peer_pid,
            endpoint,
            ctid,
            duration_ms,
            result: if ok { "ok" } else { "error" },
        };
        let Ok(mut line) = serde_json::to_string(&entry) else {
            return;
        };
        line.push('\n');
        if let Ok(mut file) = self.file.lock() {
            let _ = file.write_all(line.as_bytes());
        }
    }
}
