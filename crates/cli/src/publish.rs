//! The publish pipeline: inventory, diff, plan, archive, upload, delete.

use crate::api_client::ApiClient;
use crate::config::PublishConfig;
use crate::progress::{RunTimer, Status, print_status, upload_bar};
use crate::publish_log::{ArchiveEntry, FileCounts, PublishLog, UploadEntry};
use anyhow::{Context, Result};
use futures::StreamExt;
use sitesync_core::manifest::needs_upload;
use sitesync_core::{ChunkPlan, DiffRequest, Inventory, PlannedFile, SessionId, plan_chunks};
use sitesync_storage::ArchiveWriter;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use time::OffsetDateTime;
use tracing::{info, warn};

/// What a run did.
#[derive(Debug)]
pub struct PublishSummary {
    pub session_id: SessionId,
    pub dry_run: bool,
    pub files_uploaded: usize,
    pub archives: usize,
    pub deleted: Vec<String>,
    /// Paths the receiver could not remove.
    pub corrupted: Vec<String>,
    /// The done log, absent for dry runs.
    pub log_path: Option<PathBuf>,
}

/// Run a full publish. A failure leaves the active log in place.
pub async fn run(config: &PublishConfig, client: &ApiClient, dry_run: bool) -> Result<PublishSummary> {
    let timer = RunTimer::start();
    let session_id = SessionId::generate(OffsetDateTime::now_utc());
    let mut log = PublishLog::acquire(&config.log_dir, &session_id, OffsetDateTime::now_utc())?;
    info!(session_id = %session_id, dry_run, "publish started");

    let mut summary = match execute(config, client, &session_id, &mut log, dry_run).await {
        Ok(summary) => summary,
        Err(e) => {
            log.fail(format!("{e:#}"));
            warn!(log = %log.path().display(), "publish failed, log left in place");
            return Err(e);
        }
    };

    if dry_run {
        log.discard()?;
    } else {
        summary.log_path = Some(log.complete(OffsetDateTime::now_utc())?);
        print_status(
            Status::PUBLISHED,
            &format!("{} in {}", session_id, timer.elapsed_str()),
        );
    }
    Ok(summary)
}

async fn execute(
    config: &PublishConfig,
    client: &ApiClient,
    session_id: &SessionId,
    log: &mut PublishLog,
    dry_run: bool,
) -> Result<PublishSummary> {
    let source_dir = config.source_dir.clone();
    if !source_dir.is_dir() {
        anyhow::bail!("source directory {} does not exist", source_dir.display());
    }

    // Secrets and server-side scripts never leave this machine.
    let protected = config.protected_files.clone();
    let unwanted = {
        let source_dir = source_dir.clone();
        tokio::task::spawn_blocking(move || remove_protected_files(&source_dir, &protected, dry_run))
            .await
            .context("protected file task failed")??
    };
    log.record.unwanted_files = unwanted.clone();
    log.save()?;

    let filter = config.ignore_filter()?;
    let inventory = {
        let source_dir = source_dir.clone();
        tokio::task::spawn_blocking(move || {
            Inventory::scan_following_links(&source_dir, &filter)
        })
            .await
            .context("inventory task failed")??
    };
    // A dry run leaves protected files on disk; keep them out of the manifest anyway.
    let inventory: Inventory = inventory
        .iter()
        .filter(|(path, _)| !unwanted.iter().any(|u| u.as_str() == *path))
        .map(|(path, stat)| (path.to_string(), *stat))
        .collect();

    let diff = client
        .resolve_diff(
            (!dry_run).then_some(session_id),
            &DiffRequest::from_inventory(&inventory),
        )
        .await
        .context("failed to resolve manifest against the receiver")?;

    let to_upload = needs_upload(&inventory, &diff.files_to_update);
    let removals = diff.removal_paths();
    log.record.file_counts = FileCounts {
        local: inventory.len(),
        to_upload: to_upload.len(),
        to_remove: removals.len(),
    };
    log.save()?;
    print_status(
        Status::INVENTORY,
        &format!(
            "{} files ({} bytes), {} to upload, {} to remove",
            inventory.len(),
            inventory.total_bytes(),
            to_upload.len(),
            removals.len()
        ),
    );

    let plans = plan_uploads(&inventory, &to_upload, config.max_chunk_bytes);

    if dry_run {
        for plan in &plans {
            print_status(
                Status::PLANNED,
                &format!(
                    "{} ({} files, {} bytes)",
                    archive_name(plan.no),
                    plan.files.len(),
                    plan.bytes
                ),
            );
        }
        for path in &removals {
            print_status(Status::PLANNED, &format!("delete {path}"));
        }
        return Ok(PublishSummary {
            session_id: session_id.clone(),
            dry_run,
            files_uploaded: 0,
            archives: plans.len(),
            deleted: Vec::new(),
            corrupted: Vec::new(),
            log_path: None,
        });
    }

    let archives = build_archives(config, &plans, log).await?;
    upload_archives(client, session_id, &archives, log).await?;

    let (deleted, corrupted) = delete_removed(client, removals, config.delete_concurrency).await;
    log.record.deleted = deleted.clone();
    log.record.corrupted = corrupted.clone();
    log.save()?;

    Ok(PublishSummary {
        session_id: session_id.clone(),
        dry_run,
        files_uploaded: to_upload.len(),
        archives: archives.len(),
        deleted,
        corrupted,
        log_path: None,
    })
}

fn archive_name(no: u32) -> String {
    format!("dist_{no}.tar.zst")
}

/// Delete each protected file from `source_dir`, returning the ones that were present.
/// With `dry_run` nothing is deleted.
pub fn remove_protected_files(
    source_dir: &Path,
    protected: &[String],
    dry_run: bool,
) -> Result<Vec<String>> {
    let mut present = Vec::new();
    for file in protected {
        let path = source_dir.join(file);
        match path.symlink_metadata() {
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e).with_context(|| format!("failed to stat {}", path.display())),
        }
        if !dry_run {
            fs::remove_file(&path)
                .with_context(|| format!("failed to remove protected file {}", path.display()))?;
            info!(file = %file, "removed protected file from source");
        }
        present.push(file.clone());
    }
    Ok(present)
}

/// Plan archives for the paths that need uploading, in path order.
pub fn plan_uploads(inventory: &Inventory, to_upload: &[String], max_chunk_bytes: u64) -> Vec<ChunkPlan> {
    let files = to_upload.iter().filter_map(|path| {
        inventory.get(path).map(|stat| PlannedFile {
            path: path.clone(),
            size: stat.size,
        })
    });
    plan_chunks(files, max_chunk_bytes)
}

/// Build every archive before the first upload so a read failure never leaves
/// the receiver with a partial chunk set.
async fn build_archives(
    config: &PublishConfig,
    plans: &[ChunkPlan],
    log: &mut PublishLog,
) -> Result<Vec<(u32, PathBuf)>> {
    let writer = ArchiveWriter::with_defaults();
    let mut archives = Vec::with_capacity(plans.len());

    for plan in plans {
        let dest = config.work_dir.join(archive_name(plan.no));
        print_status(
            Status::ARCHIVING,
            &format!("{} ({} files)", archive_name(plan.no), plan.files.len()),
        );

        let writer = writer.clone();
        let source_dir = config.source_dir.clone();
        let files = plan.files.clone();
        let target = dest.clone();
        let info = tokio::task::spawn_blocking(move || writer.write(&source_dir, &files, &target))
            .await
            .context("archive task failed")?
            .with_context(|| format!("failed to build archive {}", dest.display()))?;

        log.record.archives.push(ArchiveEntry {
            no: plan.no,
            path: info.path.display().to_string(),
            bytes: info.size,
            files: info.files,
        });
        log.save()?;
        archives.push((plan.no, dest));
    }
    Ok(archives)
}

/// Upload archives one at a time. Any failure aborts the run.
async fn upload_archives(
    client: &ApiClient,
    session_id: &SessionId,
    archives: &[(u32, PathBuf)],
    log: &mut PublishLog,
) -> Result<()> {
    let total = u32::try_from(archives.len()).context("too many archives")?;

    for (no, path) in archives {
        let size = fs::metadata(path)
            .with_context(|| format!("failed to stat archive {}", path.display()))?
            .len();
        let pb = upload_bar(size, &archive_name(*no));
        let bar = pb.clone();
        let result = client
            .upload_chunk(session_id, total, *no, path, move |n| bar.inc(n))
            .await;
        pb.finish_and_clear();
        let response = result.with_context(|| format!("failed to upload {}", archive_name(*no)))?;

        let failed = response
            .session
            .archives
            .iter()
            .find(|a| a.index == Some(*no))
            .map(|a| {
                if let Some(error) = &a.error {
                    warn!(archive = no, error = %error, "receiver could not fully unpack archive");
                }
                a.files.iter().filter(|f| f.error().is_some()).count()
            })
            .unwrap_or(0);
        if failed > 0 {
            warn!(archive = no, failed, "receiver rejected some files");
        }

        log.record.uploaded.push(UploadEntry {
            no: *no,
            status: response.status.as_u16(),
            state: response.session.state().to_string(),
            failed_files: failed,
        });
        log.save()?;
        print_status(
            Status::UPLOADED,
            &format!("{} ({} bytes)", archive_name(*no), size),
        );

        if let Err(e) = fs::remove_file(path) {
            warn!(archive = no, error = %e, "failed to remove uploaded archive");
        }
        if *no == total && !response.completed() {
            warn!(session_id = %session_id, "receiver did not complete the session after the last archive");
        }
    }
    Ok(())
}

/// Delete remote files with bounded parallelism. Failures never abort the run.
async fn delete_removed(
    client: &ApiClient,
    removals: Vec<String>,
    concurrency: usize,
) -> (Vec<String>, Vec<String>) {
    let results: Vec<_> = futures::stream::iter(removals)
        .map(|path| async move {
            let result = client.delete_file(&path).await;
            (path, result)
        })
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;

    let mut deleted = Vec::new();
    let mut corrupted = Vec::new();
    for (path, result) in results {
        match result {
            Ok(response) if response.removed => {
                print_status(Status::DELETED, &path);
                deleted.push(path);
            }
            Ok(_) => {
                print_status(Status::FAILED, &format!("{path} was not removed"));
                corrupted.push(path);
            }
            Err(e) => {
                warn!(path = %path, error = %e, "delete request failed");
                print_status(Status::FAILED, &format!("{path}: {e}"));
                corrupted.push(path);
            }
        }
    }
    deleted.sort();
    corrupted.sort();
    (deleted, corrupted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publish_log::{ACTIVE_LOG_NAME, DONE_LOG_NAME, PublishError};
    use filetime::FileTime;
    use httpmock::Method::{DELETE, POST, PUT};
    use httpmock::MockServer;
    use serde_json::json;
    use std::time::Duration;

    fn can_bind_localhost() -> bool {
        std::net::TcpListener::bind("127.0.0.1:0").is_ok()
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        config: PublishConfig,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("dist");
        fs::create_dir_all(source.join("blog")).unwrap();
        fs::write(source.join("index.html"), "<h1>new</h1>").unwrap();
        fs::write(source.join("blog/same.txt"), "same").unwrap();
        fs::write(source.join(".env"), "SECRET=1").unwrap();
        filetime::set_file_mtime(
            source.join("blog/same.txt"),
            FileTime::from_unix_time(1_700_000_000, 0),
        )
        .unwrap();

        let config = PublishConfig {
            source_dir: source,
            work_dir: dir.path().join(".nw"),
            log_dir: dir.path().join("logs"),
            ..Default::default()
        };
        Fixture { _dir: dir, config }
    }

    fn client(server: &MockServer) -> ApiClient {
        ApiClient::new(&server.base_url(), "token", Duration::from_secs(5)).unwrap()
    }

    fn diff_body() -> serde_json::Value {
        json!({
            "filesToUpdate": {
                "blog/same.txt": { "size": 4, "time": 1_700_000_000 },
                "index.html": null
            },
            "filesToRemove": { "old.html": true, "gone.css": true }
        })
    }

    fn completed_session() -> serde_json::Value {
        json!({
            "id": "20260101.abc",
            "clientAddress": "127.0.0.1",
            "state": "completed",
            "expectedChunks": 1,
            "archives": [{
                "no": 1,
                "index": 1,
                "path": "archives/dist_1.tar.zst",
                "size": 100,
                "mtime": 1_767_225_600,
                "files": [{ "path": "index.html", "status": "ok", "size": 12, "mtime": 1_767_225_600 }]
            }],
            "removed": [],
            "files": [],
            "pendingRemovals": [],
            "createdAt": "2026-01-01T00:00:00Z",
            "updatedAt": "2026-01-01T00:00:01Z"
        })
    }

    #[test]
    fn test_remove_protected_files() {
        let fx = fixture();
        let protected = vec![".env".to_string(), "config.php".to_string()];

        let found = remove_protected_files(&fx.config.source_dir, &protected, true).unwrap();
        assert_eq!(found, vec![".env".to_string()]);
        assert!(fx.config.source_dir.join(".env").exists());

        let removed = remove_protected_files(&fx.config.source_dir, &protected, false).unwrap();
        assert_eq!(removed, vec![".env".to_string()]);
        assert!(!fx.config.source_dir.join(".env").exists());
    }

    #[test]
    fn test_plan_uploads_uses_inventory_sizes() {
        let inventory: Inventory = [
            ("a.html", 60u64),
            ("b.html", 60),
            ("c.html", 10),
        ]
        .into_iter()
        .map(|(p, size)| (p.to_string(), sitesync_core::FileStat { size, mtime: 0 }))
        .collect();
        let to_upload = vec!["a.html".to_string(), "b.html".to_string(), "c.html".to_string()];

        let plans = plan_uploads(&inventory, &to_upload, 100);
        assert_eq!(plans.len(), 2);
        assert_eq!(plans[0].files.len(), 1);
        assert_eq!(plans[1].bytes, 70);
    }

    #[tokio::test]
    async fn test_publish_uploads_changes_and_deletes_removals() {
        if !can_bind_localhost() {
            eprintln!("Skipping httpmock tests: cannot bind to localhost");
            return;
        }
        let fx = fixture();
        let server = MockServer::start();

        let diff = server.mock(|when, then| {
            when.method(POST).path("/").query_param_exists("id");
            then.status(200).json_body(diff_body());
        });
        let upload = server.mock(|when, then| {
            when.method(PUT)
                .path("/")
                .query_param("chunks", "1")
                .query_param("index", "1");
            then.status(201).json_body(completed_session());
        });
        let delete_old = server.mock(|when, then| {
            when.method(DELETE).path("/").query_param("file", "old.html");
            then.status(200)
                .json_body(json!({ "fileRemoved": "old.html", "removed": true }));
        });
        let delete_css = server.mock(|when, then| {
            when.method(DELETE).path("/").query_param("file", "gone.css");
            then.status(200)
                .json_body(json!({ "fileRemoved": "gone.css", "removed": false }));
        });

        let summary = run(&fx.config, &client(&server), false).await.unwrap();

        assert_eq!(summary.files_uploaded, 1);
        assert_eq!(summary.archives, 1);
        assert_eq!(summary.deleted, vec!["old.html".to_string()]);
        assert_eq!(summary.corrupted, vec!["gone.css".to_string()]);
        diff.assert();
        upload.assert();
        delete_old.assert();
        delete_css.assert();

        // Protected files are gone and uploaded archives cleaned up.
        assert!(!fx.config.source_dir.join(".env").exists());
        assert!(!fx.config.work_dir.join("dist_1.tar.zst").exists());

        assert!(!fx.config.log_dir.join(ACTIVE_LOG_NAME).exists());
        let log: serde_json::Value =
            serde_json::from_slice(&fs::read(fx.config.log_dir.join(DONE_LOG_NAME)).unwrap())
                .unwrap();
        assert_eq!(log["unwantedFiles"], json!([".env"]));
        assert_eq!(log["fileCounts"]["toUpload"], 1);
        assert_eq!(log["archives"][0]["files"], 1);
        assert_eq!(log["uploaded"][0]["state"], "completed");
        assert_eq!(log["corrupted"], json!(["gone.css"]));
    }

    #[tokio::test]
    async fn test_dry_run_changes_nothing() {
        if !can_bind_localhost() {
            eprintln!("Skipping httpmock tests: cannot bind to localhost");
            return;
        }
        let fx = fixture();
        let server = MockServer::start();

        let diff = server.mock(|when, then| {
            when.method(POST).path("/");
            then.status(200).json_body(diff_body());
        });
        let upload = server.mock(|when, then| {
            when.method(PUT).path("/");
            then.status(201).json_body(completed_session());
        });
        let delete = server.mock(|when, then| {
            when.method(DELETE).path("/");
            then.status(200)
                .json_body(json!({ "fileRemoved": "old.html", "removed": true }));
        });

        let summary = run(&fx.config, &client(&server), true).await.unwrap();

        assert!(summary.dry_run);
        assert_eq!(summary.archives, 1);
        diff.assert();
        upload.assert_hits(0);
        delete.assert_hits(0);
        assert!(fx.config.source_dir.join(".env").exists());
        assert!(!fx.config.log_dir.join(ACTIVE_LOG_NAME).exists());
        assert!(!fx.config.log_dir.join(DONE_LOG_NAME).exists());
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn test_symlinked_files_are_part_of_the_manifest() {
        if !can_bind_localhost() {
            eprintln!("Skipping httpmock tests: cannot bind to localhost");
            return;
        }
        let fx = fixture();
        let shared = tempfile::tempdir().unwrap();
        fs::write(shared.path().join("logo.png"), "PNGDATA").unwrap();
        std::os::unix::fs::symlink(
            shared.path().join("logo.png"),
            fx.config.source_dir.join("logo.png"),
        )
        .unwrap();
        let server = MockServer::start();

        let diff = server.mock(|when, then| {
            when.method(POST)
                .path("/")
                .body_contains(r#"{"file":"logo.png"}"#);
            then.status(200).json_body(json!({
                "filesToUpdate": {
                    "blog/same.txt": { "size": 4, "time": 1_700_000_000 },
                    "index.html": null,
                    "logo.png": null
                },
                "filesToRemove": {}
            }));
        });

        let summary = run(&fx.config, &client(&server), true).await.unwrap();

        diff.assert();
        assert_eq!(summary.archives, 1);
    }

    #[tokio::test]
    async fn test_failed_upload_blocks_next_run() {
        if !can_bind_localhost() {
            eprintln!("Skipping httpmock tests: cannot bind to localhost");
            return;
        }
        let fx = fixture();
        let server = MockServer::start();

        server.mock(|when, then| {
            when.method(POST).path("/");
            then.status(200).json_body(diff_body());
        });
        server.mock(|when, then| {
            when.method(PUT).path("/");
            then.status(500)
                .json_body(json!({ "code": "storage_error", "message": "disk full" }));
        });
        let delete = server.mock(|when, then| {
            when.method(DELETE).path("/");
            then.status(200)
                .json_body(json!({ "fileRemoved": "old.html", "removed": true }));
        });

        let err = run(&fx.config, &client(&server), false).await.unwrap_err();
        assert!(format!("{err:#}").contains("dist_1.tar.zst"));
        delete.assert_hits(0);

        let log: serde_json::Value =
            serde_json::from_slice(&fs::read(fx.config.log_dir.join(ACTIVE_LOG_NAME)).unwrap())
                .unwrap();
        assert_eq!(log["errors"].as_array().unwrap().len(), 1);

        let err = run(&fx.config, &client(&server), false).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PublishError>(),
            Some(PublishError::InProgress(_))
        ));
    }

    #[tokio::test]
    async fn test_diff_failure_aborts_before_upload() {
        if !can_bind_localhost() {
            eprintln!("Skipping httpmock tests: cannot bind to localhost");
            return;
        }
        let fx = fixture();
        let server = MockServer::start();

        server.mock(|when, then| {
            when.method(POST).path("/");
            then.status(401)
                .json_body(json!({ "code": "unauthorized", "message": "missing or invalid bearer token" }));
        });
        let upload = server.mock(|when, then| {
            when.method(PUT).path("/");
            then.status(201).json_body(completed_session());
        });

        let err = run(&fx.config, &client(&server), false).await.unwrap_err();
        assert!(format!("{err:#}").contains("401"));
        upload.assert_hits(0);
        assert!(fx.config.log_dir.join(ACTIVE_LOG_NAME).exists());
    }
}
