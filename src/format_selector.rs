// Format selection for the two download modes.
//
// With audio, yt-dlp gets a height-bounded selector and resolves it itself.
// Without audio, we pick a concrete video-only format id up front so that
// no merge step pulls an audio track back in.

use crate::extractor::Extractor;
use crate::models::MediaFormat;

/// Lets yt-dlp decide when nothing better is known.
pub const FALLBACK_FORMAT: &str = "best";

/// Tallest video-only format; earlier entries win ties.
pub fn pick_video_only(formats: &[MediaFormat]) -> Option<&MediaFormat> {
    let mut candidates: Vec<&MediaFormat> = formats.iter().filter(|f| f.is_video_only()).collect();
    // sort_by is stable, so listing order breaks ties.
    candidates.sort_by(|a, b| b.height.cmp(&a.height));
    candidates.into_iter().next()
}

/// Query `url` and return the best video-only format id, or [`FALLBACK_FORMAT`].
///
/// Never fails: any extraction error degrades to the fallback.
pub async fn select_video_only_format(
    extractor: &dyn Extractor,
    url: &str,
    user_agent: Option<&str>,
) -> String {
    match extractor.list_formats(url, user_agent).await {
        Ok(formats) => match pick_video_only(&formats) {
            Some(f) => {
                log::info!("[FORMAT] Video-only format {} ({}p)", f.format_id, f.height);
                f.format_id.clone()
            }
            None => {
                log::info!("[FORMAT] No video-only format listed, using {}", FALLBACK_FORMAT);
                FALLBACK_FORMAT.to_string()
            }
        },
        Err(e) => {
            log::warn!("[FORMAT] Format query failed, using {}: {}", FALLBACK_FORMAT, e);
            FALLBACK_FORMAT.to_string()
        }
    }
}

/// Best video up to `height` merged with best audio, else best single file up
/// to `height`, else anything.
pub fn combined_selector(height: u32) -> String {
    format!(
        "bestvideo[height<={h}]+bestaudio/best[height<={h}]/best",
        h = height
    )
}
