use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use bytes::Bytes;
use portal_core::{
    human_file_size, validation_log, FileMeta, JobCategory, JobHandle, JobPhase, PreviewKind,
    PreviewPane, PreviewPhase, QueryState, TerminalKind, ACCEPTED_UPLOAD_TYPE,
};
use portal_engine::{
    ApiRoutes, ConvertConfig, HttpPortalApi, ImportConfig, JobMonitorController, Location,
    OaiPmhConfig, PortalApi, PreviewController, ReqwestPreviewLoader, ReqwestUploadTransport,
    ResourceSyncConfig, UploadItem, UploadPipeline, WebSocketTransport, WorkerHandle,
};
use portal_logging::{portal_info, portal_warn};

use crate::cli::Command;
use crate::config::PortalConfig;
use crate::persistence::FileLocation;

const FOLLOW_POLL: Duration = Duration::from_millis(50);

/// Everything a command needs, built once from the loaded config.
pub struct Session {
    config: PortalConfig,
    config_path: PathBuf,
    api: Arc<HttpPortalApi>,
}

impl Session {
    pub fn new(config: PortalConfig, config_path: PathBuf) -> anyhow::Result<Self> {
        let routes = ApiRoutes::new(&config.base_url, &config.repo_id, &config.dataset_id)
            .context("invalid API settings")?;
        let api = Arc::new(HttpPortalApi::new(routes)?);
        Ok(Self {
            config,
            config_path,
            api,
        })
    }

    fn worker(&self) -> WorkerHandle {
        WorkerHandle::spawn(
            Arc::new(ReqwestPreviewLoader::new(self.config.preview_settings())),
            Arc::new(WebSocketTransport),
        )
    }

    fn location(&self) -> Arc<FileLocation> {
        Arc::new(FileLocation::open(self.config.state_path(&self.config_path)))
    }

    pub async fn run(&self, command: Command) -> anyhow::Result<()> {
        match command {
            Command::Init { .. } => bail!("init runs before a config is loaded"),
            Command::List { prefix, after, all } => self.list(&prefix, after, all).await,
            Command::Preview {
                key,
                max_bytes,
                whole,
                pretty,
                no_validate,
            } => {
                let budget = if whole {
                    None
                } else {
                    max_bytes.or(self.config.preview_max_bytes)
                };
                let pane = PreviewPane::new(PreviewKind::File, budget).with_validation(!no_validate);
                self.preview(pane, &key, pretty).await
            }
            Command::ConvertPreview {
                key,
                mappings,
                pretty,
            } => {
                let pane = PreviewPane::new(
                    PreviewKind::Convert { mappings },
                    self.config.preview_max_bytes,
                );
                self.preview(pane, &key, pretty).await
            }
            Command::Upload { paths } => self.upload(&paths).await,
            Command::Ingest {
                keys,
                message,
                commit,
                tolerant,
                allow_updates,
                detach,
            } => {
                let mut import = ImportConfig::new(message);
                import.tolerant = tolerant;
                import.allow_updates = allow_updates;
                let handle = self.api.ingest_files(&keys, &import, commit).await?;
                portal_info!("Started ingest job {} for {} file(s)", handle.job_id, keys.len());
                self.start_job(JobCategory::Ingest, handle, detach).await
            }
            Command::Convert {
                key,
                mappings,
                force,
                detach,
            } => {
                let config = ConvertConfig { mappings, force };
                let handle = self.api.convert_files(key.as_deref(), &config).await?;
                portal_info!(
                    "Started convert job {} for {}",
                    handle.job_id,
                    key.as_deref().unwrap_or("the whole stage")
                );
                self.start_job(JobCategory::Convert, handle, detach).await
            }
            Command::Harvest {
                url,
                format,
                set,
                full,
                detach,
            } => {
                let config = OaiPmhConfig { url, format, set };
                let handle = self.api.harvest(&config, !full).await?;
                portal_info!("Started harvest job {} from {}", handle.job_id, config.url);
                self.start_job(JobCategory::Harvest, handle, detach).await
            }
            Command::Sync {
                url,
                filter,
                detach,
            } => {
                let config = ResourceSyncConfig { url, filter };
                let handle = self.api.sync(&config).await?;
                portal_info!("Started sync job {} from {}", handle.job_id, config.url);
                self.start_job(JobCategory::Sync, handle, detach).await
            }
            Command::Monitor { category } => self.monitor(category).await,
            Command::Cancel { category } => self.cancel(category).await,
        }
    }

    async fn list(&self, prefix: &str, mut after: Option<String>, all: bool) -> anyhow::Result<()> {
        loop {
            let page = self
                .api
                .list_files(&self.config.stage, prefix, after.as_deref())
                .await?;
            for file in &page.files {
                println!(
                    "{:>10}  {}  {}",
                    human_file_size(file.size, true),
                    file.last_modified.as_deref().unwrap_or("-"),
                    file.key
                );
            }
            match page.files.last() {
                Some(last) if page.truncated && all => after = Some(last.key.clone()),
                _ => {
                    if page.truncated {
                        println!("(more files; use --all to list them)");
                    }
                    return Ok(());
                }
            }
        }
    }

    /// Listing metadata makes the validation fingerprint the server's eTag;
    /// a key the listing does not know is previewed by name alone.
    async fn lookup(&self, key: &str) -> FileMeta {
        match self.api.list_files(&self.config.stage, key, None).await {
            Ok(page) => page
                .files
                .into_iter()
                .find(|file| file.key == key)
                .unwrap_or_else(|| FileMeta::new(key)),
            Err(err) => {
                portal_warn!("Listing {} failed, previewing without metadata: {}", key, err);
                FileMeta::new(key)
            }
        }
    }

    async fn preview(&self, pane: PreviewPane, key: &str, pretty: bool) -> anyhow::Result<()> {
        let file = self.lookup(key).await;
        let mut controller =
            PreviewController::new(pane, self.worker(), self.api.clone(), &self.config.stage);
        controller.set_target(Some(file.clone())).await;
        controller.settle().await;
        if pretty {
            controller.toggle_pretty_print().await;
        }

        let view = controller.pane().view();
        if view.phase == PreviewPhase::Failed {
            bail!("{}", view.text.trim_start_matches("Error: "));
        }
        println!("{}", view.text);
        if view.truncated {
            eprintln!("(preview truncated; use --whole to load the entire file)");
        }
        if let Some(notice) = view.notice {
            eprintln!("{notice}");
        }
        if let Some(fingerprint) = controller.pane().fingerprint() {
            for line in validation_log([(file.key.as_str(), &fingerprint)], controller.pane().cache())
            {
                eprintln!("{line}");
            }
        }
        Ok(())
    }

    async fn upload(&self, paths: &[PathBuf]) -> anyhow::Result<()> {
        let mut items = Vec::with_capacity(paths.len());
        for path in paths {
            items.push(read_upload_item(path).await?);
        }

        let pipeline = UploadPipeline::new(
            self.api.clone(),
            Arc::new(ReqwestUploadTransport::new()),
            &self.config.stage,
        );
        let upload = pipeline.upload_files(items);
        tokio::pin!(upload);
        let summary = tokio::select! {
            result = &mut upload => result?,
            _ = tokio::signal::ctrl_c() => {
                portal_warn!("Interrupted, withdrawing queued uploads");
                pipeline.cancel_all();
                upload.await?
            }
        };
        println!("{summary}");
        Ok(())
    }

    async fn monitor_controller(&self, category: JobCategory) -> JobMonitorController {
        JobMonitorController::resume(
            category,
            self.config.sentinels.clone(),
            &self.config.monitor_url,
            self.worker(),
            self.api.clone(),
            self.location(),
        )
        .await
    }

    /// Hand a freshly started job to its category's monitor and follow it.
    async fn start_job(
        &self,
        category: JobCategory,
        handle: JobHandle,
        detach: bool,
    ) -> anyhow::Result<()> {
        println!("{category} job: {}", handle.job_id);

        if detach {
            // Record the job without opening a transport for it.
            let location = self.location();
            let mut query = QueryState::parse(&location.query());
            query.set(category.query_key(), &handle.job_id);
            location.replace_query(&query.to_query_string());
            println!("follow it with: portal monitor {category}");
            return Ok(());
        }
        let mut controller = self.monitor_controller(category).await;
        controller.start(handle).await;
        follow(&mut controller, self.location().path()).await
    }

    async fn monitor(&self, category: JobCategory) -> anyhow::Result<()> {
        let mut controller = self.monitor_controller(category).await;
        if controller.monitor().handle().is_none() {
            println!("No {category} job recorded");
            return Ok(());
        }
        follow(&mut controller, self.location().path()).await
    }

    async fn cancel(&self, category: JobCategory) -> anyhow::Result<()> {
        let mut controller = self.monitor_controller(category).await;
        let Some(handle) = controller.monitor().handle().cloned() else {
            println!("No {category} job recorded");
            return Ok(());
        };
        controller.cancel().await;
        if controller.monitor().handle().is_some() {
            bail!("the server did not acknowledge cancelling job {}", handle.job_id);
        }
        println!("cancelled {category} job {}", handle.job_id);
        Ok(())
    }
}

/// Write a fresh config, refusing to replace an existing one unless forced.
pub fn init_config(
    path: &Path,
    repo: String,
    dataset: String,
    base_url: Option<String>,
    force: bool,
) -> anyhow::Result<()> {
    if path.exists() && !force {
        bail!("{path:?} already exists; pass --force to replace it");
    }
    let mut config = PortalConfig {
        repo_id: repo,
        dataset_id: dataset,
        ..PortalConfig::default()
    };
    if let Some(base_url) = base_url {
        config.base_url = base_url;
    }
    ApiRoutes::new(&config.base_url, &config.repo_id, &config.dataset_id)
        .context("invalid API settings")?;
    config.save(path)?;
    println!("wrote {path:?}");
    Ok(())
}

/// Print log lines as they arrive until the job is no longer monitored.
/// Ctrl-C detaches and leaves the job id recorded for a later `monitor`.
async fn follow(controller: &mut JobMonitorController, state_file: &Path) -> anyhow::Result<()> {
    let mut printed = 0;
    let interrupt = tokio::signal::ctrl_c();
    tokio::pin!(interrupt);
    loop {
        controller.pump().await;
        let lines = controller.monitor().log().lines();
        if lines.len() < printed {
            printed = 0;
        }
        for line in &lines[printed..] {
            println!("{line}");
        }
        printed = lines.len();

        if !controller.monitor().is_monitoring() {
            break;
        }
        tokio::select! {
            _ = tokio::time::sleep(FOLLOW_POLL) => {}
            _ = &mut interrupt => {
                println!("detached; job id kept in {state_file:?}");
                return Ok(());
            }
        }
    }

    match controller.monitor().phase() {
        JobPhase::Terminal(TerminalKind::Error) => bail!("job reported an error"),
        _ => Ok(()),
    }
}

async fn read_upload_item(path: &Path) -> anyhow::Result<UploadItem> {
    let name = path
        .file_name()
        .and_then(|name| name.to_str())
        .with_context(|| format!("not a file name: {path:?}"))?;
    let data = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read {path:?}"))?;
    Ok(UploadItem::new(name, content_type_for(path), Bytes::from(data)))
}

fn content_type_for(path: &Path) -> &'static str {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("xml") => ACCEPTED_UPLOAD_TYPE,
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_xml_extensions_get_the_upload_type() {
        assert_eq!(content_type_for(Path::new("a/b.XML")), "text/xml");
        assert_eq!(content_type_for(Path::new("scan.pdf")), "application/octet-stream");
        assert_eq!(content_type_for(Path::new("README")), "application/octet-stream");
    }

    #[test]
    fn init_refuses_to_overwrite_without_force() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".portal.ron");

        init_config(&path, "r1".into(), "d1".into(), None, false).unwrap();
        assert!(init_config(&path, "r2".into(), "d2".into(), None, false).is_err());
        init_config(&path, "r2".into(), "d2".into(), Some("https://portal.example/api".into()), true)
            .unwrap();

        let config = PortalConfig::load(&path).unwrap();
        assert_eq!(config.repo_id, "r2");
        assert_eq!(config.base_url, "https://portal.example/api");
    }

    #[test]
    fn init_rejects_an_unusable_base_url() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".portal.ron");

        assert!(init_config(&path, "r".into(), "d".into(), Some("not a url".into()), false).is_err());
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn detached_jobs_are_recorded_under_their_category() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join(".portal.ron");
        let config = PortalConfig {
            repo_id: "r1".to_string(),
            dataset_id: "d1".to_string(),
            ..PortalConfig::default()
        };
        let state_path = config.state_path(&config_path);
        let session = Session::new(config, config_path).unwrap();

        session
            .start_job(JobCategory::Harvest, JobHandle::new("h-1", "ws://unused/h-1"), true)
            .await
            .unwrap();
        session
            .start_job(JobCategory::Sync, JobHandle::new("s-1", "ws://unused/s-1"), true)
            .await
            .unwrap();

        let location = FileLocation::open(state_path);
        let query = QueryState::parse(&location.query());
        assert_eq!(query.get(JobCategory::Harvest.query_key()), Some("h-1"));
        assert_eq!(query.get(JobCategory::Sync.query_key()), Some("s-1"));
        assert_eq!(query.get(JobCategory::Ingest.query_key()), None);
    }

    #[tokio::test]
    async fn upload_items_are_named_after_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("c.xml");
        std::fs::write(&path, "<c/>").unwrap();

        let item = read_upload_item(&path).await.unwrap();
        assert_eq!(item.file.name, "c.xml");
        assert_eq!(item.file.content_type, "text/xml");
        assert_eq!(item.file.size, 4);
        assert_eq!(&item.data[..], b"<c/>");
    }
}
