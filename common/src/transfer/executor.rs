// Drives one (job, config) transfer: builds the rclone invocation, runs it
// in simple or file-by-file mode, records history and per-file metadata, and
// dispatches notifications on every exit path.

use super::command::{
    self, archive_file_endpoint, dest_endpoint, dest_file_endpoint, persisted_destination,
    source_endpoint, source_file_endpoint, CommandCategory, ExecutionMode, PathSpec,
    DEFAULT_COMMAND,
};
use super::output::{self, ListingEntry};
use super::pattern;
use super::runner::CommandRunner;
use crate::errors::TransferError;
use crate::metadata::MetadataHandler;
use crate::models::{
    FileMetadata, FileStatus, Job, JobHistory, JobStatus, TransferConfig,
};
use crate::notify::Notifier;
use crate::secrets::CredentialCipher;
use crate::store::Store;
use chrono::Utc;
use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tempfile::NamedTempFile;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

const OUTPUT_TRUNCATE_LEN: usize = 1000;

pub struct TransferExecutor {
    store: Arc<dyn Store>,
    runner: Arc<dyn CommandRunner>,
    metadata: MetadataHandler,
    notifier: Arc<Notifier>,
    cipher: CredentialCipher,
    rclone_path: String,
}

impl TransferExecutor {
    pub fn new(
        store: Arc<dyn Store>,
        runner: Arc<dyn CommandRunner>,
        notifier: Arc<Notifier>,
        cipher: CredentialCipher,
        rclone_path: String,
    ) -> Self {
        Self {
            metadata: MetadataHandler::new(Arc::clone(&store)),
            store,
            runner,
            notifier,
            cipher,
            rclone_path,
        }
    }

    /// Executes one configuration against its running history row. The row is
    /// finalized exactly once, on every exit path, followed by notification
    /// dispatch.
    pub async fn execute_config_transfer(
        &self,
        job: &Job,
        config: &TransferConfig,
        history: &mut JobHistory,
    ) {
        info!(
            job_id = job.id,
            config_id = config.id,
            history_id = history.id,
            "starting transfer"
        );

        // Decrypt referenced provider credentials into a per-run copy before
        // anything else; a decryption failure fails the run.
        if let Err(e) = self.prepare_credentials(config).await {
            self.fail_history(job, config, history, format!("credential preparation failed: {e}"))
                .await;
            return;
        }

        let command = self.resolve_command(config).await;
        let config_path = match self.store.get_config_rclone_path(config).await {
            Ok(path) => path,
            Err(e) => {
                self.fail_history(
                    job,
                    config,
                    history,
                    format!("failed to resolve rclone config path: {e}"),
                )
                .await;
                return;
            }
        };
        let base_args = self.build_base_args(&command, config, &config_path).await;

        match command::execution_mode(&command) {
            ExecutionMode::FileByFile => {
                self.execute_file_by_file(job, config, history, base_args, &config_path)
                    .await;
            }
            ExecutionMode::Simple => {
                self.execute_simple_command(job, config, history, &command, base_args)
                    .await;
            }
        }
    }

    async fn prepare_credentials(&self, config: &TransferConfig) -> Result<(), TransferError> {
        for provider_id in [config.source_provider_id, config.destination_provider_id]
            .into_iter()
            .flatten()
        {
            let provider = self.store.get_storage_provider(provider_id).await?;
            // Held only for the duration of the run, never logged.
            let _credentials = self.cipher.decrypt_provider(&provider)?;
            debug!(provider_id, "provider credentials prepared");
        }
        Ok(())
    }

    async fn resolve_command(&self, config: &TransferConfig) -> String {
        let Some(command_id) = config.command_id else {
            return DEFAULT_COMMAND.to_string();
        };
        match self.store.get_rclone_command(command_id).await {
            Ok(command) => command.name,
            Err(e) => {
                warn!(command_id, error = %e, "command lookup failed, defaulting to copyto");
                DEFAULT_COMMAND.to_string()
            }
        }
    }

    async fn build_base_args(
        &self,
        command: &str,
        config: &TransferConfig,
        config_path: &Path,
    ) -> Vec<String> {
        let descriptors = match config.command_id {
            Some(command_id) => match self.store.get_rclone_command_flags(command_id).await {
                Ok(descriptors) => descriptors,
                Err(e) => {
                    warn!(command_id, error = %e, "flag descriptor lookup failed");
                    Default::default()
                }
            },
            None => Default::default(),
        };
        let flag_ids = command::parse_flag_ids(&config.command_flags);
        let flag_values = command::parse_flag_values(&config.command_flag_values);
        command::build_base_args(
            command,
            &flag_ids,
            &flag_values,
            &descriptors,
            &config.rclone_flags,
            config_path,
        )
    }

    /// Finalizes the history row as failed and dispatches notifications.
    async fn fail_history(
        &self,
        job: &Job,
        config: &TransferConfig,
        history: &mut JobHistory,
        message: String,
    ) {
        error!(
            job_id = job.id,
            config_id = config.id,
            history_id = history.id,
            error = %message,
            "transfer failed"
        );
        history.status = JobStatus::Failed;
        history.error_message = message;
        history.end_time = Some(Utc::now());
        if let Err(e) = self.store.update_job_history(history).await {
            error!(history_id = history.id, error = %e, "failed to persist history");
        }
        self.notifier.notify(job, history, config).await;
    }

    async fn finalize_history(&self, job: &Job, config: &TransferConfig, history: &mut JobHistory) {
        history.end_time = Some(Utc::now());
        if let Err(e) = self.store.update_job_history(history).await {
            error!(history_id = history.id, error = %e, "failed to persist history");
        }
        self.notifier.notify(job, history, config).await;
    }

    // ========================================================================
    // Simple mode
    // ========================================================================

    async fn execute_simple_command(
        &self,
        job: &Job,
        config: &TransferConfig,
        history: &mut JobHistory,
        command: &str,
        mut args: Vec<String>,
    ) {
        match command::path_spec(command, &config.rclone_flags) {
            PathSpec::None => {}
            PathSpec::SourceOnly => args.push(source_endpoint(config)),
            PathSpec::SourceAndDest => {
                args.push(source_endpoint(config));
                args.push(dest_endpoint(config));
            }
        }

        // The temp log file is removed on drop, on every exit path.
        let log_file = match NamedTempFile::new() {
            Ok(file) => file,
            Err(e) => {
                self.fail_history(job, config, history, format!("failed to create log file: {e}"))
                    .await;
                return;
            }
        };
        args.extend([
            "--log-file".to_string(),
            log_file.path().to_string_lossy().into_owned(),
            "--log-level".to_string(),
            "DEBUG".to_string(),
        ]);

        let started = Instant::now();
        let result = self.runner.run(&self.rclone_path, &args).await;
        let duration = started.elapsed();
        debug!(
            command,
            duration_secs = duration.as_secs_f64(),
            "rclone finished"
        );

        let run = match result {
            Ok(run) => run,
            Err(e) => {
                self.fail_history(job, config, history, format!("Command Error: {e}"))
                    .await;
                return;
            }
        };

        // Per-file enrichment from the debug log, best-effort.
        let log_content = std::fs::read_to_string(log_file.path()).unwrap_or_default();
        let signals = output::parse_run_log(&log_content);
        self.record_copied_files(job, config, &signals).await;

        if !run.success() && !output::has_warning_signature(&run.stderr) {
            self.fail_history(
                job,
                config,
                history,
                format!(
                    "Command Error: exit status {}\nStderr: {}",
                    run.exit_code, run.stderr
                ),
            )
            .await;
            return;
        }

        let stats = output::parse_transfer_stats(&run.stderr);
        history.bytes_transferred = stats.bytes.unwrap_or(0);
        history.files_transferred = match stats.files {
            Some(files) => files,
            None if !signals.copied.is_empty() => signals.copied.len() as i64,
            None => 0,
        };

        let category = command::classify(command);
        if matches!(category, CommandCategory::Listing | CommandCategory::Info) {
            history.files_transferred = run.stdout.lines().count() as i64;
            history.error_message = format!("Command Output: {}", truncate(&run.stdout, OUTPUT_TRUNCATE_LEN));
        }

        history.status = JobStatus::Completed;
        self.finalize_history(job, config, history).await;
    }

    async fn record_copied_files(
        &self,
        job: &Job,
        config: &TransferConfig,
        signals: &output::RunLogSignals,
    ) {
        for path in &signals.copied {
            let name = path.rsplit('/').next().unwrap_or(path).to_string();
            let now = Utc::now();
            let mut metadata = FileMetadata {
                id: 0,
                job_id: job.id,
                config_id: config.id,
                file_name: name.clone(),
                original_path: source_file_endpoint(config, path),
                file_size: 0,
                file_hash: signals.hashes.get(path).cloned().unwrap_or_default(),
                creation_time: Some(now),
                mod_time: Some(now),
                processed_time: now,
                destination_path: persisted_destination(config, &name),
                status: FileStatus::Processed,
                error_message: String::new(),
            };
            if let Err(e) = self.store.create_file_metadata(&mut metadata).await {
                error!(file = %path, error = %e, "failed to persist file metadata");
            }
        }
    }

    // ========================================================================
    // File-by-file mode
    // ========================================================================

    async fn execute_file_by_file(
        &self,
        job: &Job,
        config: &TransferConfig,
        history: &mut JobHistory,
        base_args: Vec<String>,
        config_path: &Path,
    ) {
        let listing = match self.list_source_files(config, config_path).await {
            Ok(listing) => listing,
            Err(e) => {
                self.fail_history(job, config, history, e.to_string()).await;
                return;
            }
        };

        let files: Vec<ListingEntry> = listing.into_iter().filter(|e| !e.is_dir).collect();
        history.bytes_transferred = files.iter().map(|f| f.size.max(0)).sum();

        if files.is_empty() {
            info!(job_id = job.id, config_id = config.id, "no files to transfer");
            history.status = JobStatus::Completed;
            history.files_transferred = 0;
            self.finalize_history(job, config, history).await;
            return;
        }

        let tasks = self.filter_dispatchable(job, config, files).await;

        let context = Arc::new(FileTaskContext {
            job: job.clone(),
            config: config.clone(),
            base_args,
            config_path: config_path.to_path_buf(),
            runner: Arc::clone(&self.runner),
            store: Arc::clone(&self.store),
            rclone_path: self.rclone_path.clone(),
            errors: Mutex::new(Vec::new()),
            transferred: Mutex::new(0),
        });

        let semaphore = Arc::new(Semaphore::new(config.effective_concurrency()));
        let mut handles = Vec::with_capacity(tasks.len());
        for entry in tasks {
            let semaphore = Arc::clone(&semaphore);
            let context = Arc::clone(&context);
            handles.push(tokio::spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return;
                };
                process_file(context, entry).await;
            }));
        }
        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "file task panicked");
                context
                    .errors
                    .lock()
                    .unwrap_or_else(|p| p.into_inner())
                    .push(format!("file task failed: {e}"));
            }
        }

        let errors = {
            let guard = context.errors.lock().unwrap_or_else(|p| p.into_inner());
            guard.clone()
        };
        history.files_transferred = *context
            .transferred
            .lock()
            .unwrap_or_else(|p| p.into_inner());
        history.status = if errors.is_empty() {
            JobStatus::Completed
        } else {
            history.error_message = errors.join("\n");
            JobStatus::CompletedWithErrors
        };
        if config.archive_enabled
            && !config.archive_path.is_empty()
            && !history.error_message.is_empty()
        {
            history.status = JobStatus::CompletedWithArchiveError;
        }
        self.finalize_history(job, config, history).await;
    }

    /// Lists the source with `lsjson --hash --recursive`, applying the rename
    /// filter file when a file pattern is set. Any failure here is fatal for
    /// the run.
    async fn list_source_files(
        &self,
        config: &TransferConfig,
        config_path: &Path,
    ) -> Result<Vec<ListingEntry>, TransferError> {
        let mut args = vec![
            "lsjson".to_string(),
            "--hash".to_string(),
            "--recursive".to_string(),
        ];

        // Kept alive until the listing completes; removed on drop.
        let _filter_file = if config.has_file_pattern() {
            let mut file = NamedTempFile::new()
                .map_err(|e| TransferError::FilterFile(e.to_string()))?;
            file.write_all(pattern::rename_filter_rules(&config.file_pattern).as_bytes())
                .map_err(|e| TransferError::FilterFile(e.to_string()))?;
            args.extend([
                "--filter-from".to_string(),
                file.path().to_string_lossy().into_owned(),
            ]);
            Some(file)
        } else {
            None
        };

        args.push(source_endpoint(config));
        args.extend([
            "--config".to_string(),
            config_path.to_string_lossy().into_owned(),
        ]);

        let run = self.runner.run(&self.rclone_path, &args).await?;
        if !run.success() {
            return Err(TransferError::ListingParse(format!(
                "lsjson exited with status {}: {}",
                run.exit_code, run.stderr
            )));
        }
        output::parse_listing(&run.stdout).map_err(|e| TransferError::ListingParse(e.to_string()))
    }

    /// Applies the dedup decisions and the per-run seen-set, returning the
    /// entries to dispatch.
    async fn filter_dispatchable(
        &self,
        job: &Job,
        config: &TransferConfig,
        files: Vec<ListingEntry>,
    ) -> Vec<ListingEntry> {
        let mut seen = HashSet::new();
        let mut tasks = Vec::with_capacity(files.len());
        for entry in files {
            let hash = entry.preferred_hash();

            if config.skip_processed_files && !hash.is_empty() {
                if let Ok((true, Some(prior))) =
                    self.metadata.has_file_been_processed(job.id, &hash).await
                {
                    if prior.status.is_terminal_processed() {
                        info!(file = %entry.path, "skipping file, identical hash already processed");
                        continue;
                    }
                }
            }

            // The name history is consulted regardless of the skip flag; it
            // only suppresses dispatch when the flag is set and the hashes
            // match a terminally processed record.
            if let Ok(prior) = self
                .metadata
                .check_file_processing_history(job.id, &entry.name)
                .await
            {
                if config.skip_processed_files
                    && !hash.is_empty()
                    && prior.file_hash == hash
                    && prior.status.is_terminal_processed()
                {
                    info!(file = %entry.path, "skipping file, prior run already processed it");
                    continue;
                }
            }

            // Duplicate listing entries are processed at most once per run.
            if !seen.insert(entry.path.clone()) {
                debug!(file = %entry.path, "duplicate listing entry ignored");
                continue;
            }
            tasks.push(entry);
        }
        tasks
    }
}

/// Shared state of one file-by-file run.
struct FileTaskContext {
    job: Job,
    config: TransferConfig,
    base_args: Vec<String>,
    config_path: PathBuf,
    runner: Arc<dyn CommandRunner>,
    store: Arc<dyn Store>,
    rclone_path: String,
    errors: Mutex<Vec<String>>,
    transferred: Mutex<i64>,
}

impl FileTaskContext {
    fn push_error(&self, message: String) {
        self.errors
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(message);
    }
}

/// Transfers one file, runs the archive and delete follow-ups, and persists
/// exactly one metadata row whatever happens.
async fn process_file(ctx: Arc<FileTaskContext>, entry: ListingEntry) {
    let config = &ctx.config;
    let out_name = if config.output_pattern.is_empty() {
        entry.name.clone()
    } else {
        pattern::render_output_pattern(&config.output_pattern, &entry.name)
    };
    let source = source_file_endpoint(config, &entry.path);

    let now = Utc::now();
    let mut metadata = FileMetadata {
        id: 0,
        job_id: ctx.job.id,
        config_id: config.id,
        file_name: entry.name.clone(),
        original_path: source.clone(),
        file_size: entry.size,
        file_hash: entry.preferred_hash(),
        creation_time: entry.mod_time,
        mod_time: entry.mod_time,
        processed_time: now,
        destination_path: String::new(),
        status: FileStatus::Error,
        error_message: String::new(),
    };

    let mut args = ctx.base_args.clone();
    args.push(source.clone());
    args.push(dest_file_endpoint(config, &out_name));

    let transfer_result = ctx.runner.run(&ctx.rclone_path, &args).await;
    match interpret(transfer_result) {
        Err(message) => {
            warn!(file = %entry.path, error = %message, "file transfer failed");
            metadata.error_message = message.clone();
            ctx.push_error(format!("{}: {}", entry.name, message));
        }
        Ok(()) => {
            *ctx.transferred.lock().unwrap_or_else(|p| p.into_inner()) += 1;
            metadata.status = FileStatus::Processed;
            metadata.destination_path = persisted_destination(config, &out_name);

            if config.archive_enabled && !config.archive_path.is_empty() {
                let archive_args = vec![
                    "copyto".to_string(),
                    source.clone(),
                    archive_file_endpoint(config, &entry.path),
                    "--config".to_string(),
                    ctx.config_path.to_string_lossy().into_owned(),
                ];
                match interpret(ctx.runner.run(&ctx.rclone_path, &archive_args).await) {
                    Ok(()) => metadata.status = FileStatus::Archived,
                    Err(message) => {
                        // The primary transfer stands; the archive failure is
                        // only recorded.
                        warn!(file = %entry.path, error = %message, "archive copy failed");
                        ctx.push_error(format!("archive {}: {}", entry.name, message));
                    }
                }
            }

            if config.delete_after_transfer {
                let delete_args = vec![
                    "deletefile".to_string(),
                    source.clone(),
                    "--config".to_string(),
                    ctx.config_path.to_string_lossy().into_owned(),
                ];
                match interpret(ctx.runner.run(&ctx.rclone_path, &delete_args).await) {
                    Ok(()) => {
                        metadata.status = if metadata.status == FileStatus::Archived {
                            FileStatus::ArchivedAndDeleted
                        } else {
                            FileStatus::Deleted
                        };
                    }
                    Err(message) => {
                        warn!(file = %entry.path, error = %message, "source delete failed");
                    }
                }
            }
        }
    }

    if let Err(e) = ctx.store.create_file_metadata(&mut metadata).await {
        error!(file = %entry.path, error = %e, "failed to persist file metadata");
    }
}

fn interpret(
    result: Result<super::runner::CommandOutput, TransferError>,
) -> Result<(), String> {
    match result {
        Ok(run) if run.success() => Ok(()),
        Ok(run) => Err(format!(
            "exit status {}: {}",
            run.exit_code,
            truncate(run.stderr.trim(), 500)
        )),
        Err(e) => Err(e.to_string()),
    }
}

fn truncate(text: &str, limit: usize) -> String {
    if text.len() <= limit {
        return text.to_string();
    }
    let mut end = limit;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}
