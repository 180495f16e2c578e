// Rclone output and debug-log parsing. Stderr summaries are authoritative
// for statistics; the debug log only enriches runs with per-file detail, and
// a parse miss never fails a run.

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::OnceLock;

fn bytes_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"Transferred:\s*([0-9][0-9.]*)\s*(Bytes|[KMGTPE]?i?B)\s*/").unwrap()
    })
}

fn files_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"Transferred:\s*([0-9]+)\s*/\s*[0-9]+").unwrap())
}

fn hash_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"DEBUG\s*:\s*(.+?)\s*:\s*(?:md5|sha1)\s*=\s*([0-9a-fA-F]+)\s+OK").unwrap()
    })
}

fn copied_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"INFO\s*:\s*(.+?)\s*:\s*Copied").unwrap())
}

/// Summary statistics scraped from rclone's stderr.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferStats {
    pub bytes: Option<i64>,
    pub files: Option<i64>,
}

/// Parses the `Transferred: N / M Bytes` and `Transferred: N / M` summary
/// lines. Byte lines carry a unit before the slash; file lines are plain
/// counts.
pub fn parse_transfer_stats(stderr: &str) -> TransferStats {
    let mut stats = TransferStats::default();
    for line in stderr.lines() {
        if !line.contains("Transferred:") {
            continue;
        }
        if let Some(caps) = bytes_re().captures(line) {
            let amount: f64 = caps[1].parse().unwrap_or(0.0);
            stats.bytes = Some((amount * unit_multiplier(&caps[2]) as f64) as i64);
            continue;
        }
        if let Some(caps) = files_re().captures(line) {
            if let Ok(count) = caps[1].parse() {
                stats.files = Some(count);
            }
        }
    }
    stats
}

fn unit_multiplier(unit: &str) -> i64 {
    match unit {
        "B" | "Bytes" => 1,
        "KiB" | "KB" => 1024,
        "MiB" | "MB" => 1024 * 1024,
        "GiB" | "GB" => 1024 * 1024 * 1024,
        "TiB" | "TB" => 1024_i64.pow(4),
        "PiB" | "PB" => 1024_i64.pow(5),
        "EiB" | "EB" => 1024_i64.pow(6),
        _ => 1,
    }
}

/// Stderr that carries a full stats block counts as success-with-warnings
/// even on a non-zero exit.
pub fn has_warning_signature(stderr: &str) -> bool {
    stderr.contains("Transferred:") && stderr.contains("Errors:") && stderr.contains("Checks:")
}

/// Per-file signals scraped from an rclone debug log.
#[derive(Debug, Default)]
pub struct RunLogSignals {
    /// file → hash, from `DEBUG: <file>: md5|sha1 = <hex> OK` lines.
    pub hashes: HashMap<String, String>,
    /// files named by `INFO: <file>: Copied …` lines, listing order, deduped.
    pub copied: Vec<String>,
}

pub fn parse_run_log(content: &str) -> RunLogSignals {
    let mut signals = RunLogSignals::default();
    for caps in hash_re().captures_iter(content) {
        signals
            .hashes
            .insert(caps[1].to_string(), caps[2].to_ascii_lowercase());
    }
    for caps in copied_re().captures_iter(content) {
        let file = caps[1].to_string();
        if !signals.copied.contains(&file) {
            signals.copied.push(file);
        }
    }
    signals
}

// ============================================================================
// lsjson listings
// ============================================================================

/// One entry of an `lsjson --hash --recursive` listing.
#[derive(Debug, Clone, Deserialize)]
pub struct ListingEntry {
    #[serde(rename = "Path")]
    pub path: String,
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(default, rename = "Size")]
    pub size: i64,
    #[serde(default, rename = "ModTime")]
    pub mod_time: Option<DateTime<Utc>>,
    #[serde(default, rename = "IsDir")]
    pub is_dir: bool,
    #[serde(default, rename = "Hashes")]
    pub hashes: Option<HashMap<String, String>>,
}

impl ListingEntry {
    /// First available hash in preference order SHA-1, MD5, SHA-256, CRC32.
    pub fn preferred_hash(&self) -> String {
        let Some(hashes) = &self.hashes else {
            return String::new();
        };
        for key in ["sha1", "SHA-1", "md5", "MD5", "sha256", "SHA-256", "crc32", "CRC-32"] {
            if let Some(hash) = hashes.get(key).filter(|h| !h.is_empty()) {
                return hash.clone();
            }
        }
        String::new()
    }
}

pub fn parse_listing(raw: &str) -> Result<Vec<ListingEntry>, serde_json::Error> {
    serde_json::from_str(raw)
}
