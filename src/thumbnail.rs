use std::sync::{Arc, Mutex};
use std::time::Duration;

use eframe::egui::ColorImage;
use rust_embed::RustEmbed;
use tracing::warn;

#[derive(RustEmbed)]
#[folder = "assets/"]
struct Asset;

const PLACEHOLDER: &str = "no_thumbnail.png";

/// Largest size a thumbnail is shown at
const MAX_WIDTH: u32 = 300;
const MAX_HEIGHT: u32 = 180;

/// Downloads and decodes the thumbnail at `url`. Blocking; run it off the
/// UI thread. Any failure gives the "no thumbnail" placeholder instead.
pub fn fetch_thumbnail(url: Option<&str>) -> Option<ColorImage> {
    let fetched = url.and_then(|url| match download(url) {
        Ok(bytes) => decode_thumbnail(&bytes),
        Err(e) => {
            warn!("Thumbnail download failed for {}: {}", url, e);
            None
        }
    });
    fetched.or_else(placeholder)
}

fn download(url: &str) -> reqwest::Result<Vec<u8>> {
    let client = reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(15))
        .build()?;
    let resp = client.get(url).send()?.error_for_status()?;
    Ok(resp.bytes()?.to_vec())
}

/// Decodes image bytes, shrinking them to thumbnail size
pub fn decode_thumbnail(bytes: &[u8]) -> Option<ColorImage> {
    let img = match image::load_from_memory(bytes) {
        Ok(img) => img,
        Err(e) => {
            warn!("Could not decode thumbnail: {}", e);
            return None;
        }
    };
    let img = img.thumbnail(MAX_WIDTH, MAX_HEIGHT).to_rgba8();
    let size = [img.width() as usize, img.height() as usize];
    Some(ColorImage::from_rgba_unmultiplied(size, &img))
}

/// The bundled "no thumbnail" image
pub fn placeholder() -> Option<ColorImage> {
    let file = Asset::get(PLACEHOLDER)?;
    decode_thumbnail(&file.data)
}

/// Hands finished thumbnail fetches to the UI thread. Each fetch is tagged
/// with the request it belongs to, and only the newest request is accepted.
#[derive(Clone, Default)]
pub struct ThumbnailInbox {
    inner: Arc<Mutex<Inbox>>,
}

#[derive(Default)]
struct Inbox {
    request: u64,
    ready: Option<ColorImage>,
}

impl ThumbnailInbox {
    /// Starts a new request, dropping anything older. Returns its tag.
    pub fn begin(&self) -> u64 {
        match self.inner.lock() {
            Ok(mut inbox) => {
                inbox.request += 1;
                inbox.ready = None;
                inbox.request
            }
            Err(e) => {
                warn!("Thumbnail inbox poisoned: {}", e);
                0
            }
        }
    }

    /// Stores `img` if `request` is still the newest one
    pub fn deliver(&self, request: u64, img: ColorImage) -> bool {
        let Ok(mut inbox) = self.inner.lock() else { return false };
        if inbox.request != request {
            return false;
        }
        inbox.ready = Some(img);
        true
    }

    pub fn take(&self) -> Option<ColorImage> {
        self.inner.lock().ok().and_then(|mut inbox| inbox.ready.take())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eframe::egui::Color32;

    #[test]
    fn stale_thumbnail_is_dropped() {
        let inbox = ThumbnailInbox::default();
        let first = inbox.begin();
        let second = inbox.begin();

        assert!(inbox.deliver(second, ColorImage::new([2, 1], Color32::BLACK)));
        // The first video's image arrives late
        assert!(!inbox.deliver(first, ColorImage::new([1, 1], Color32::WHITE)));

        assert_eq!(inbox.take().map(|img| img.size), Some([2, 1]));
        assert!(inbox.take().is_none());
    }

    #[test]
    fn new_request_clears_unclaimed_image() {
        let inbox = ThumbnailInbox::default();
        let first = inbox.begin();
        inbox.deliver(first, ColorImage::new([1, 1], Color32::WHITE));
        inbox.begin();
        assert!(inbox.take().is_none());
    }

    #[test]
    fn placeholder_is_bundled_and_fits() {
        let img = placeholder().unwrap();
        assert!(img.size[0] <= MAX_WIDTH as usize);
        assert!(img.size[1] <= MAX_HEIGHT as usize);
    }

    #[test]
    fn garbage_bytes_do_not_decode() {
        assert!(decode_thumbnail(b"<html>not an image</html>").is_none());
    }

    #[test]
    fn no_url_gives_placeholder() {
        assert_eq!(fetch_thumbnail(None).map(|i| i.size), placeholder().map(|i| i.size));
    }
}
