//! MIME type and extension helpers used when naming direct downloads

use url::Url;

const MEDIA_EXTENSIONS: &[&str] = &["mp4", "mkv", "webm", "m4v", "mov", "avi", "flv", "ts"];

/// Get file extension from a Content-Type value
pub fn ext_from_mime(content_type: &str) -> Option<&'static str> {
    let mime_type = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    let ext = match mime_type.as_str() {
        "video/mp4" => "mp4",
        "video/webm" => "webm",
        "video/x-flv" => "flv",
        "video/quicktime" => "mov",
        "video/x-msvideo" => "avi",
        "video/mp2t" => "ts",
        "video/x-matroska" => "mkv",
        "video/x-m4v" => "m4v",
        _ => return None,
    };
    Some(ext)
}

/// Get a known media extension from the last path segment of a URL
pub fn ext_from_url(url: &Url) -> Option<&'static str> {
    let last = url.path_segments()?.last()?;
    let (_, ext) = last.rsplit_once('.')?;
    let ext = ext.to_ascii_lowercase();
    MEDIA_EXTENSIONS.iter().copied().find(|known| *known == ext)
}

/// Check if a URL points at an HLS or DASH manifest rather than a single file
pub fn is_manifest_url(url: &str) -> bool {
    let lower = url.to_ascii_lowercase();
    let path = lower.split(['?', '#']).next().unwrap_or_default();
    path.ends_with(".m3u8") || path.ends_with(".mpd")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ext_from_mime() {
        assert_eq!(ext_from_mime("video/mp4"), Some("mp4"));
        assert_eq!(ext_from_mime("Video/WebM; charset=binary"), Some("webm"));
        assert_eq!(ext_from_mime("text/html"), None);
    }

    #[test]
    fn test_ext_from_url() {
        let url = Url::parse("https://cdn.example.com/v/ep01.MP4?token=x").unwrap();
        assert_eq!(ext_from_url(&url), Some("mp4"));
        let url = Url::parse("https://cdn.example.com/v/master.m3u8").unwrap();
        assert_eq!(ext_from_url(&url), None);
        let url = Url::parse("https://cdn.example.com/").unwrap();
        assert_eq!(ext_from_url(&url), None);
    }

    #[test]
    fn test_is_manifest_url() {
        assert!(is_manifest_url("https://cdn.example.com/hls/master.m3u8?t=1"));
        assert!(is_manifest_url("https://cdn.example.com/dash/manifest.MPD"));
        assert!(!is_manifest_url("https://cdn.example.com/ep.mp4"));
    }
}
