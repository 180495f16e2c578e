// Rclone command classification and argument composition

use crate::models::{RcloneFlag, TransferConfig};
use std::collections::HashMap;
use std::path::Path;

/// The verb used when a configuration names no command.
pub const DEFAULT_COMMAND: &str = "copyto";

/// Fixed classification of rclone verbs, driving path arguments and the
/// execution mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandCategory {
    Transfer,
    Listing,
    Info,
    Directory,
    Destructive,
    Maintenance,
    Special,
}

pub fn classify(command: &str) -> CommandCategory {
    match command {
        "copy" | "copyto" | "move" | "moveto" | "sync" | "bisync" => CommandCategory::Transfer,
        "ls" | "lsd" | "lsl" | "lsf" | "lsjson" | "listremotes" => CommandCategory::Listing,
        "md5sum" | "sha1sum" | "size" | "version" => CommandCategory::Info,
        "mkdir" | "rmdir" | "rmdirs" => CommandCategory::Directory,
        "delete" | "purge" => CommandCategory::Destructive,
        "cleanup" | "dedupe" | "check" => CommandCategory::Maintenance,
        "obscure" | "cryptcheck" => CommandCategory::Special,
        // Unknown verbs behave like plain transfers.
        _ => CommandCategory::Transfer,
    }
}

/// Directory-based transfers operate on whole trees rather than single files.
pub fn is_directory_based(command: &str) -> bool {
    matches!(command, "sync" | "bisync" | "copy" | "move")
}

/// The two execution shapes inside the transfer executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    Simple,
    FileByFile,
}

pub fn execution_mode(command: &str) -> ExecutionMode {
    match command {
        "copyto" | "moveto" => ExecutionMode::FileByFile,
        _ => ExecutionMode::Simple,
    }
}

/// Which endpoint arguments a simple-mode command takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathSpec {
    None,
    SourceOnly,
    SourceAndDest,
}

pub fn path_spec(command: &str, rclone_flags: &str) -> PathSpec {
    match command {
        "obscure" | "version" | "listremotes" => PathSpec::None,
        "cryptcheck" | "check" => PathSpec::SourceAndDest,
        "rmdirs" => {
            if rclone_flags.contains("--dst") {
                PathSpec::SourceAndDest
            } else {
                PathSpec::SourceOnly
            }
        }
        _ if classify(command) == CommandCategory::Transfer => PathSpec::SourceAndDest,
        _ => PathSpec::SourceOnly,
    }
}

// ============================================================================
// Endpoint paths
// ============================================================================

fn join_remote(base: &str, leaf: &str) -> String {
    let base = base.trim_matches('/');
    if base.is_empty() {
        leaf.to_string()
    } else {
        format!("{base}/{leaf}")
    }
}

/// The source endpoint of a configuration: a bare path for local sources,
/// `source_<id>:<bucket>/<path>` for bucket remotes, `source_<id>:<path>`
/// otherwise. The rclone config file defines the aliases.
pub fn source_endpoint(config: &TransferConfig) -> String {
    if config.source_type.is_local() {
        return config.source_path.clone();
    }
    let alias = format!("source_{}", config.id);
    remote_endpoint(
        &alias,
        config.source_type.uses_bucket(),
        config.source_bucket.as_deref(),
        &config.source_path,
    )
}

/// Destination counterpart of [`source_endpoint`], using the `dest_<id>`
/// alias.
pub fn dest_endpoint(config: &TransferConfig) -> String {
    if config.destination_type.is_local() {
        return config.destination_path.clone();
    }
    let alias = format!("dest_{}", config.id);
    remote_endpoint(
        &alias,
        config.destination_type.uses_bucket(),
        config.dest_bucket.as_deref(),
        &config.destination_path,
    )
}

fn remote_endpoint(alias: &str, uses_bucket: bool, bucket: Option<&str>, path: &str) -> String {
    let path = path.trim_matches('/');
    match bucket.filter(|b| uses_bucket && !b.is_empty()) {
        Some(bucket) => {
            if path.is_empty() {
                format!("{alias}:{bucket}")
            } else {
                format!("{alias}:{bucket}/{path}")
            }
        }
        None => format!("{alias}:{path}"),
    }
}

/// Concrete source argument for one listed file.
pub fn source_file_endpoint(config: &TransferConfig, file_path: &str) -> String {
    if config.source_type.is_local() {
        return Path::new(&config.source_path)
            .join(file_path)
            .to_string_lossy()
            .into_owned();
    }
    let base = source_endpoint(config);
    let trimmed = base.trim_end_matches('/');
    if trimmed.ends_with(':') {
        format!("{trimmed}{file_path}")
    } else {
        format!("{trimmed}/{file_path}")
    }
}

/// Concrete destination argument for one output filename.
pub fn dest_file_endpoint(config: &TransferConfig, file_name: &str) -> String {
    if config.destination_type.is_local() {
        return Path::new(&config.destination_path)
            .join(file_name)
            .to_string_lossy()
            .into_owned();
    }
    let base = dest_endpoint(config);
    let trimmed = base.trim_end_matches('/');
    if trimmed.ends_with(':') {
        format!("{trimmed}{file_name}")
    } else {
        format!("{trimmed}/{file_name}")
    }
}

/// Archive location for one file, interpreted on the source side.
pub fn archive_file_endpoint(config: &TransferConfig, file_path: &str) -> String {
    if config.source_type.is_local() {
        return Path::new(&config.archive_path)
            .join(file_path)
            .to_string_lossy()
            .into_owned();
    }
    let alias = format!("source_{}", config.id);
    format!("{alias}:{}", join_remote(&config.archive_path, file_path))
}

/// Destination path persisted into file metadata: a filesystem join for local
/// destinations, `bucket/[path/]file` for bucket remotes, `path/file`
/// otherwise.
pub fn persisted_destination(config: &TransferConfig, file_name: &str) -> String {
    if config.destination_type.is_local() {
        return Path::new(&config.destination_path)
            .join(file_name)
            .to_string_lossy()
            .into_owned();
    }
    if config.destination_type.uses_bucket() {
        if let Some(bucket) = config.dest_bucket.as_deref().filter(|b| !b.is_empty()) {
            return join_remote(&join_remote(bucket, config.destination_path.trim_matches('/')), file_name);
        }
    }
    join_remote(&config.destination_path, file_name)
}

// ============================================================================
// Argument composition
// ============================================================================

/// JSON list of selected flag ids; malformed input selects nothing.
pub fn parse_flag_ids(raw: &str) -> Vec<u64> {
    serde_json::from_str(raw).unwrap_or_default()
}

/// JSON map of flag id → value; malformed input carries no values.
pub fn parse_flag_values(raw: &str) -> HashMap<u64, String> {
    let parsed: HashMap<String, String> = serde_json::from_str(raw).unwrap_or_default();
    parsed
        .into_iter()
        .filter_map(|(k, v)| k.parse::<u64>().ok().map(|id| (id, v)))
        .collect()
}

/// Composes the base argument list: the verb, the selected flags (booleans as
/// `--name`, valued flags from the per-config value, else the descriptor
/// default, else skipped), the free-form extra tokens, then the standard
/// tail.
pub fn build_base_args(
    command: &str,
    flag_ids: &[u64],
    flag_values: &HashMap<u64, String>,
    descriptors: &HashMap<u64, RcloneFlag>,
    rclone_flags: &str,
    config_path: &Path,
) -> Vec<String> {
    let mut args = vec![command.to_string()];
    for id in flag_ids {
        let Some(flag) = descriptors.get(id) else {
            continue;
        };
        if flag.is_boolean {
            args.push(format!("--{}", flag.name));
            continue;
        }
        let value = flag_values
            .get(id)
            .cloned()
            .or_else(|| flag.default_value.clone());
        if let Some(value) = value {
            args.push(format!("--{}", flag.name));
            args.push(value);
        }
    }
    args.extend(rclone_flags.split_whitespace().map(String::from));
    args.extend([
        "--progress".to_string(),
        "--stats".to_string(),
        "1s".to_string(),
        "--config".to_string(),
        config_path.to_string_lossy().into_owned(),
        "--stats-one-line".to_string(),
    ]);
    args
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EndpointType;
    use std::path::PathBuf;

    fn s3_config() -> TransferConfig {
        TransferConfig {
            id: 7,
            source_type: EndpointType::S3,
            source_path: "incoming/reports".to_string(),
            source_bucket: Some("data-bucket".to_string()),
            destination_type: EndpointType::Local,
            destination_path: "/var/mft/out".to_string(),
            ..TransferConfig::default()
        }
    }

    #[test]
    fn test_classification_tables() {
        assert_eq!(classify("sync"), CommandCategory::Transfer);
        assert_eq!(classify("copyto"), CommandCategory::Transfer);
        assert_eq!(classify("lsjson"), CommandCategory::Listing);
        assert_eq!(classify("version"), CommandCategory::Info);
        assert_eq!(classify("rmdirs"), CommandCategory::Directory);
        assert_eq!(classify("purge"), CommandCategory::Destructive);
        assert_eq!(classify("check"), CommandCategory::Maintenance);
        assert_eq!(classify("obscure"), CommandCategory::Special);
    }

    #[test]
    fn test_directory_based_set() {
        for cmd in ["sync", "bisync", "copy", "move"] {
            assert!(is_directory_based(cmd), "{cmd}");
        }
        assert!(!is_directory_based("copyto"));
        assert!(!is_directory_based("moveto"));
        assert!(!is_directory_based("ls"));
    }

    #[test]
    fn test_execution_modes() {
        assert_eq!(execution_mode("copyto"), ExecutionMode::FileByFile);
        assert_eq!(execution_mode("moveto"), ExecutionMode::FileByFile);
        assert_eq!(execution_mode("copy"), ExecutionMode::Simple);
        assert_eq!(execution_mode("sync"), ExecutionMode::Simple);
        assert_eq!(execution_mode("lsjson"), ExecutionMode::Simple);
        assert_eq!(execution_mode("delete"), ExecutionMode::Simple);
    }

    #[test]
    fn test_path_spec_rules() {
        assert_eq!(path_spec("version", ""), PathSpec::None);
        assert_eq!(path_spec("obscure", ""), PathSpec::None);
        assert_eq!(path_spec("listremotes", ""), PathSpec::None);
        assert_eq!(path_spec("sync", ""), PathSpec::SourceAndDest);
        assert_eq!(path_spec("check", ""), PathSpec::SourceAndDest);
        assert_eq!(path_spec("cryptcheck", ""), PathSpec::SourceAndDest);
        assert_eq!(path_spec("rmdirs", ""), PathSpec::SourceOnly);
        assert_eq!(path_spec("rmdirs", "--dst --leave-root"), PathSpec::SourceAndDest);
        assert_eq!(path_spec("ls", ""), PathSpec::SourceOnly);
        assert_eq!(path_spec("mkdir", ""), PathSpec::SourceOnly);
        assert_eq!(path_spec("delete", ""), PathSpec::SourceOnly);
    }

    #[test]
    fn test_bucket_endpoint_embeds_bucket() {
        let config = s3_config();
        assert_eq!(source_endpoint(&config), "source_7:data-bucket/incoming/reports");
    }

    #[test]
    fn test_local_endpoint_is_bare_path() {
        let config = TransferConfig {
            source_path: "/srv/in".to_string(),
            ..TransferConfig::default()
        };
        assert_eq!(source_endpoint(&config), "/srv/in");
    }

    #[test]
    fn test_remote_endpoint_without_bucket() {
        let config = TransferConfig {
            id: 3,
            destination_type: EndpointType::Sftp,
            destination_path: "upload/area".to_string(),
            ..TransferConfig::default()
        };
        assert_eq!(dest_endpoint(&config), "dest_3:upload/area");
    }

    #[test]
    fn test_file_endpoints() {
        let config = s3_config();
        assert_eq!(
            source_file_endpoint(&config, "daily/a.csv"),
            "source_7:data-bucket/incoming/reports/daily/a.csv"
        );
        assert_eq!(dest_file_endpoint(&config, "a.csv"), "/var/mft/out/a.csv");
    }

    #[test]
    fn test_persisted_destination_variants() {
        let local = TransferConfig {
            destination_path: "/out".to_string(),
            ..TransferConfig::default()
        };
        assert_eq!(persisted_destination(&local, "f.txt"), "/out/f.txt");

        let bucket = TransferConfig {
            destination_type: EndpointType::B2,
            dest_bucket: Some("backups".to_string()),
            destination_path: "nightly".to_string(),
            ..TransferConfig::default()
        };
        assert_eq!(persisted_destination(&bucket, "f.txt"), "backups/nightly/f.txt");

        let bucket_no_path = TransferConfig {
            destination_type: EndpointType::B2,
            dest_bucket: Some("backups".to_string()),
            ..TransferConfig::default()
        };
        assert_eq!(persisted_destination(&bucket_no_path, "f.txt"), "backups/f.txt");

        let remote = TransferConfig {
            destination_type: EndpointType::Sftp,
            destination_path: "upload".to_string(),
            ..TransferConfig::default()
        };
        assert_eq!(persisted_destination(&remote, "f.txt"), "upload/f.txt");
    }

    #[test]
    fn test_flag_parsing_tolerates_garbage() {
        assert_eq!(parse_flag_ids("[1, 2, 3]"), vec![1, 2, 3]);
        assert!(parse_flag_ids("not json").is_empty());
        assert!(parse_flag_ids("").is_empty());

        let values = parse_flag_values(r#"{"1": "4", "2": "fast"}"#);
        assert_eq!(values.get(&1).map(String::as_str), Some("4"));
        assert_eq!(values.get(&2).map(String::as_str), Some("fast"));
        assert!(parse_flag_values("{broken").is_empty());
    }

    #[test]
    fn test_base_args_composition() {
        let descriptors = HashMap::from([
            (
                1,
                RcloneFlag {
                    id: 1,
                    name: "checksum".to_string(),
                    is_boolean: true,
                    default_value: None,
                },
            ),
            (
                2,
                RcloneFlag {
                    id: 2,
                    name: "transfers".to_string(),
                    is_boolean: false,
                    default_value: Some("4".to_string()),
                },
            ),
            (
                3,
                RcloneFlag {
                    id: 3,
                    name: "bwlimit".to_string(),
                    is_boolean: false,
                    default_value: None,
                },
            ),
        ]);
        let values = HashMap::from([(2, "8".to_string())]);

        let args = build_base_args(
            "copyto",
            &[1, 2, 3, 99],
            &values,
            &descriptors,
            "--fast-list",
            &PathBuf::from("/etc/gomft/rclone.conf"),
        );

        assert_eq!(
            args,
            vec![
                "copyto",
                "--checksum",
                "--transfers",
                "8",
                "--fast-list",
                "--progress",
                "--stats",
                "1s",
                "--config",
                "/etc/gomft/rclone.conf",
                "--stats-one-line",
            ]
        );
    }

    #[test]
    fn test_valued_flag_falls_back_to_default_then_skips() {
        let descriptors = HashMap::from([(
            2,
            RcloneFlag {
                id: 2,
                name: "transfers".to_string(),
                is_boolean: false,
                default_value: Some("4".to_string()),
            },
        ), (
            3,
            RcloneFlag {
                id: 3,
                name: "bwlimit".to_string(),
                is_boolean: false,
                default_value: None,
            },
        )]);

        let args = build_base_args(
            "sync",
            &[2, 3],
            &HashMap::new(),
            &descriptors,
            "",
            &PathBuf::from("r.conf"),
        );
        // Flag 2 uses its default; flag 3 has neither value nor default.
        assert!(args.contains(&"--transfers".to_string()));
        assert!(args.contains(&"4".to_string()));
        assert!(!args.contains(&"--bwlimit".to_string()));
    }
}
