//! Chrome/Chromium discovery and launch
//!
//! Finds a local browser executable (or downloads a managed one), builds a
//! launch configuration with anti-detection arguments, and starts the
//! process. The returned [`Handler`] stream is NOT spawned here; the
//! transport layer owns the event loop so it can observe process death.

use chromiumoxide::browser::{Browser, BrowserConfigBuilder, HeadlessMode};
use chromiumoxide::fetcher::{BrowserFetcher, BrowserFetcherOptions};
use chromiumoxide::handler::Handler;
use std::path::PathBuf;
use std::process::Command;
use tracing::{info, warn};

use crate::config::CrawlSettings;
use crate::protocol::LaunchError;

/// Find a Chrome/Chromium executable with platform-specific search paths.
///
/// The `CHROMIUM_PATH` environment variable overrides all other methods.
pub async fn find_browser_executable() -> Result<PathBuf, LaunchError> {
    if let Ok(path) = std::env::var("CHROMIUM_PATH") {
        let path = PathBuf::from(path);
        if path.exists() {
            info!("Using browser from CHROMIUM_PATH: {}", path.display());
            return Ok(path);
        }
        warn!(
            "CHROMIUM_PATH points to non-existent file: {}",
            path.display()
        );
    }

    let paths = if cfg!(target_os = "windows") {
        vec![
            r"C:\Program Files\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files\Chromium\Application\chrome.exe",
            r"C:\Program Files (x86)\Chromium\Application\chrome.exe",
        ]
    } else if cfg!(target_os = "macos") {
        vec![
            "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
            "/Applications/Google Chrome Canary.app/Contents/MacOS/Google Chrome Canary",
            "/Applications/Chromium.app/Contents/MacOS/Chromium",
            "~/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
            "~/Applications/Chromium.app/Contents/MacOS/Chromium",
            "/opt/homebrew/bin/chromium",
        ]
    } else {
        vec![
            "/usr/bin/google-chrome",
            "/usr/bin/google-chrome-stable",
            "/usr/bin/chromium",
            "/usr/bin/chromium-browser",
            "/snap/bin/chromium",
            "/usr/local/bin/chromium",
            "/opt/google/chrome/chrome",
        ]
    };

    for path_str in paths {
        let path = if let Some(rest) = path_str.strip_prefix("~/") {
            match dirs::home_dir() {
                Some(home) => home.join(rest),
                None => continue,
            }
        } else {
            PathBuf::from(path_str)
        };

        if path.exists() {
            info!("Found browser at: {}", path.display());
            return Ok(path);
        }
    }

    if !cfg!(target_os = "windows") {
        for cmd in &["chromium", "chromium-browser", "google-chrome", "chrome"] {
            let output = Command::new("which").arg(cmd).output();
            if let Ok(output) = output
                && output.status.success()
            {
                let path_str = String::from_utf8_lossy(&output.stdout).trim().to_string();
                if !path_str.is_empty() {
                    let path = PathBuf::from(path_str);
                    info!("Found browser using 'which': {}", path.display());
                    return Ok(path);
                }
            }
        }
    }

    Err(LaunchError::Process(
        "Chrome/Chromium executable not found".into(),
    ))
}

/// Download a managed Chromium into a local cache and return its executable.
pub async fn download_managed_browser() -> Result<PathBuf, LaunchError> {
    info!("Downloading managed Chromium browser...");

    let cache_dir = dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("veilcrawl")
        .join("chromium");
    std::fs::create_dir_all(&cache_dir)
        .map_err(|e| LaunchError::Process(format!("failed to create cache directory: {e}")))?;

    let fetcher = BrowserFetcher::new(
        BrowserFetcherOptions::builder()
            .with_path(&cache_dir)
            .build()
            .map_err(|e| LaunchError::Process(format!("failed to build fetcher options: {e}")))?,
    );

    let revision_info = fetcher
        .fetch()
        .await
        .map_err(|e| LaunchError::Process(format!("failed to fetch browser: {e}")))?;

    info!(
        "Downloaded Chromium to: {}",
        revision_info.folder_path.display()
    );
    Ok(revision_info.executable_path)
}

/// Launch a browser process with anti-detection arguments.
///
/// `user_data_dir` must be unique per instance; concurrent instances sharing
/// a profile hit Chrome's SingletonLock. The handshake is bounded by
/// [`CrawlSettings::launch_timeout`]; exceeding it is a [`LaunchError`], the
/// single fatal error of this layer.
pub async fn launch_browser(
    settings: &CrawlSettings,
    user_data_dir: PathBuf,
) -> Result<(Browser, Handler), LaunchError> {
    let chrome_path = match find_browser_executable().await {
        Ok(path) => path,
        Err(_) => download_managed_browser().await?,
    };

    std::fs::create_dir_all(&user_data_dir)
        .map_err(|e| LaunchError::Process(format!("failed to create user data directory: {e}")))?;

    let (width, height) = settings.window_size();
    let mut config_builder = BrowserConfigBuilder::default()
        .request_timeout(settings.launch_timeout())
        .window_size(width, height)
        .user_data_dir(user_data_dir)
        .chrome_executable(chrome_path);

    if settings.headless() {
        config_builder = config_builder.headless_mode(HeadlessMode::default());
    } else {
        config_builder = config_builder.with_head();
    }

    if let Some(user_agent) = settings.user_agent() {
        config_builder = config_builder.arg(format!("--user-agent={user_agent}"));
    }

    config_builder = config_builder
        .arg("--disable-blink-features=AutomationControlled")
        .arg("--disable-infobars")
        .arg("--disable-notifications")
        .arg("--disable-print-preview")
        .arg("--disable-desktop-notifications")
        .arg("--disable-software-rasterizer")
        .arg("--disable-features=IsolateOrigins,site-per-process")
        .arg("--disable-setuid-sandbox")
        .arg("--no-first-run")
        .arg("--no-default-browser-check")
        .arg("--no-sandbox")
        .arg("--ignore-certificate-errors")
        .arg("--disable-extensions")
        .arg("--disable-popup-blocking")
        .arg("--disable-background-networking")
        .arg("--disable-background-timer-throttling")
        .arg("--disable-backgrounding-occluded-windows")
        .arg("--disable-breakpad")
        .arg("--disable-component-extensions-with-background-pages")
        .arg("--disable-features=TranslateUI")
        .arg("--disable-hang-monitor")
        .arg("--disable-ipc-flooding-protection")
        .arg("--disable-prompt-on-repost")
        .arg("--metrics-recording-only")
        .arg("--password-store=basic")
        .arg("--use-mock-keychain")
        .arg("--hide-scrollbars")
        .arg("--mute-audio");

    let browser_config = config_builder
        .build()
        .map_err(|e| LaunchError::Process(format!("failed to build browser config: {e}")))?;

    info!("Launching browser");
    let launch = Browser::launch(browser_config);
    match tokio::time::timeout(settings.launch_timeout(), launch).await {
        Ok(Ok((browser, handler))) => Ok((browser, handler)),
        Ok(Err(e)) => Err(LaunchError::Process(e.to_string())),
        Err(_) => Err(LaunchError::HandshakeTimeout(settings.launch_timeout())),
    }
}
