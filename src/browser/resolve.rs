use crate::error::PriceWatchError;
use std::path::{Path, PathBuf};

/// Resolves the Chrome binary. The configured path wins when it exists,
/// otherwise well-known install locations are probed.
pub fn resolve_chrome(user_path: Option<&Path>) -> Result<PathBuf, PriceWatchError> {
    if let Some(path) = user_path {
        if path.exists() {
            tracing::info!("Using configured browser: {}", path.display());
            return Ok(path.to_path_buf());
        }
        tracing::warn!(
            "Configured browser path does not exist: {}",
            path.display()
        );
    }

    if let Some(path) = detect_system_chrome() {
        tracing::info!("Using system Chrome: {}", path.display());
        return Ok(path);
    }

    Err(PriceWatchError::BrowserLaunch(
        "No Chrome or Chromium installation found; set PRICEWATCH_BROWSER_PATH".to_string(),
    ))
}

fn detect_system_chrome() -> Option<PathBuf> {
    let candidates: &[&str] = if cfg!(target_os = "macos") {
        &[
            "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
            "/Applications/Chromium.app/Contents/MacOS/Chromium",
        ]
    } else if cfg!(target_os = "linux") {
        &[
            "/usr/bin/google-chrome",
            "/usr/bin/google-chrome-stable",
            "/usr/bin/chromium",
            "/usr/bin/chromium-browser",
            "/snap/bin/chromium",
        ]
    } else if cfg!(target_os = "windows") {
        &[
            r"C:\Program Files\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
        ]
    } else {
        &[]
    };

    if let Some(found) = candidates.iter().map(PathBuf::from).find(|p| p.exists()) {
        return Some(found);
    }

    #[cfg(unix)]
    for binary in ["google-chrome", "chromium", "chromium-browser"] {
        if let Ok(output) = std::process::Command::new("which").arg(binary).output() {
            if output.status.success() {
                let path = String::from_utf8_lossy(&output.stdout).trim().to_string();
                if !path.is_empty() {
                    return Some(PathBuf::from(path));
                }
            }
        }
    }

    None
}
