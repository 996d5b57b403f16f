use tracing::{info, warn};

/// Opens the URL in the user's browser, falling back to printing it when
/// no browser can be launched (e.g. over SSH).
pub fn open_url(url: &str) {
    match open::that(url) {
        Ok(()) => info!("opened {} in the browser", url),
        Err(e) => {
            warn!("failed to open a browser for {}: {}", url, e);
            println!("Open this URL in your browser:\n{url}");
        }
    }
}
