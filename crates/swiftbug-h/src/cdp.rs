use chromiumoxide::{Browser, BrowserConfig};
use futures::StreamExt;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::task::JoinHandle;

pub type CdpResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

/// A launched Chromium and the task pumping its DevTools connection.
pub struct CdpClient {
    pub browser: Browser,
    handler_task: JoinHandle<()>,
    user_data_dir: Option<PathBuf>,
    cleanup_user_data_dir: bool,
}

impl CdpClient {
    pub async fn launch(visible: bool) -> CdpResult<Self> {
        let mut config_builder = BrowserConfig::builder();
        config_builder = config_builder.no_sandbox(); // Often needed in docker/CI/restricted envs
        let (user_data_dir, cleanup_user_data_dir) = resolve_user_data_dir()?;
        config_builder = config_builder.user_data_dir(&user_data_dir);

        if visible {
            tracing::info!("Launching browser in visible mode");
            config_builder = config_builder.with_head();
        } else {
            tracing::info!("Launching browser in headless mode");
        }

        if let Ok(chrome_bin) = std::env::var("CHROME_BIN") {
            tracing::info!("Using custom Chrome binary: {}", chrome_bin);
            config_builder = config_builder.chrome_executable(chrome_bin);
        }

        let (browser, mut handler) = Browser::launch(
            config_builder
                .build()
                .map_err(|e| format!("Failed to build browser config: {}", e))?,
        )
        .await
        .map_err(|e| format!("Failed to launch browser: {}", e))?;

        let handler_task = tokio::spawn(async move {
            while let Some(h) = handler.next().await {
                if let Err(e) = h {
                    tracing::error!("Browser handler error (ignoring): {}", e);
                    continue;
                }
            }
            tracing::info!("Browser handler task ended");
        });

        Ok(Self {
            browser,
            handler_task,
            user_data_dir: Some(user_data_dir),
            cleanup_user_data_dir,
        })
    }

    pub async fn close(mut self) -> CdpResult<()> {
        self.browser
            .close()
            .await
            .map_err(|e| format!("Error closing browser: {}", e))?;
        self.handler_task
            .await
            .map_err(|e| format!("Error awaiting handler: {}", e))?;

        if self.cleanup_user_data_dir
            && let Some(dir) = &self.user_data_dir
            && let Err(e) = std::fs::remove_dir_all(dir)
        {
            tracing::debug!("Failed to clean up user-data-dir {}: {}", dir.display(), e);
        }

        Ok(())
    }
}

fn resolve_user_data_dir() -> CdpResult<(PathBuf, bool)> {
    if let Ok(dir) = std::env::var("SWIFTBUG_USER_DATA_DIR") {
        let path = PathBuf::from(dir);
        std::fs::create_dir_all(&path)?;
        tracing::info!(
            "Using user data dir from SWIFTBUG_USER_DATA_DIR: {}",
            path.display()
        );
        return Ok((path, false));
    }

    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| format!("System clock error: {}", e))?
        .as_nanos();
    let unique = format!("swiftbug-chromium-profile-{}-{}", std::process::id(), nanos);
    let path = std::env::temp_dir().join(unique);
    std::fs::create_dir_all(&path)?;
    tracing::info!("Using isolated user data dir: {}", path.display());
    Ok((path, true))
}
