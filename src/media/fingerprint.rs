//! Source identity normalization.
//!
//! A fingerprint key identifies "the same media" across enqueues. Remote
//! locators are canonicalized (YouTube URLs collapse to the video id, other
//! URLs lose their tracking noise); uploaded files are identified by content
//! hash, since filenames are not identity.

use std::io;
use std::path::Path;

use sha2::{Digest, Sha256};
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use url::Url;

use crate::domain::MediaSource;

/// Query parameters that never contribute to identity
const TRACKING_PARAMS: &[&str] = &[
    "feature", "si", "fbclid", "gclid", "ref", "ref_src", "pp",
];

/// Compute the fingerprint key for a source.
///
/// Remote keys look like `youtube:<video-id>` or `url:<canonical-url>`;
/// upload keys look like `sha256:<16-hex>`.
pub async fn source_key(source: &MediaSource) -> io::Result<String> {
    match source {
        MediaSource::Remote { url } => Ok(remote_key(url)),
        MediaSource::Uploaded { path, .. } => {
            let digest = hash_file(path).await?;
            Ok(format!("sha256:{}", digest))
        }
    }
}

/// Canonical key for a remote locator
pub fn remote_key(raw: &str) -> String {
    let Ok(url) = Url::parse(raw) else {
        // Unparseable locators fall back to the raw string; enqueue-time
        // validation should have rejected these already.
        return format!("url:{}", raw.trim());
    };

    if let Some(id) = youtube_video_id(&url) {
        return format!("youtube:{}", id);
    }

    format!("url:{}", canonicalize(url))
}

/// Extract the video id from the usual YouTube URL shapes
pub fn youtube_video_id(url: &Url) -> Option<String> {
    let host = url.host_str()?.trim_start_matches("www.").to_lowercase();

    match host.as_str() {
        "youtube.com" | "m.youtube.com" | "music.youtube.com" => {
            let path = url.path();
            if path == "/watch" {
                return url
                    .query_pairs()
                    .find(|(k, _)| k == "v")
                    .map(|(_, v)| v.into_owned());
            }
            for prefix in ["/shorts/", "/live/", "/embed/"] {
                if let Some(rest) = path.strip_prefix(prefix) {
                    let id = rest.split('/').next().unwrap_or(rest);
                    if !id.is_empty() {
                        return Some(id.to_string());
                    }
                }
            }
            None
        }
        "youtu.be" => {
            let id = url.path().trim_start_matches('/');
            (!id.is_empty()).then(|| id.split('/').next().unwrap_or(id).to_string())
        }
        _ => None,
    }
}

/// Whether this URL points at YouTube (and should go through yt-dlp)
pub fn is_youtube(raw: &str) -> bool {
    Url::parse(raw)
        .ok()
        .map(|u| youtube_video_id(&u).is_some())
        .unwrap_or(false)
}

fn canonicalize(mut url: Url) -> String {
    url.set_fragment(None);

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !is_tracking_param(k))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if kept.is_empty() {
        url.set_query(None);
    } else {
        let mut pairs = url.query_pairs_mut();
        pairs.clear();
        for (k, v) in &kept {
            pairs.append_pair(k, v);
        }
        drop(pairs);
    }

    let mut s = url.to_string();
    while s.ends_with('/') && url.path() != "/" {
        s.pop();
    }
    s
}

fn is_tracking_param(key: &str) -> bool {
    key.starts_with("utm_") || TRACKING_PARAMS.contains(&key)
}

/// SHA-256 of file content, truncated to 16 hex chars
pub async fn hash_file(path: &Path) -> io::Result<String> {
    let mut file = File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];

    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    let digest = hasher.finalize();
    Ok(hex::encode(&digest[..8]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn youtube_urls_collapse_to_video_id() {
        let forms = [
            "https://www.youtube.com/watch?v=dQw4w9WgXcQ",
            "https://youtube.com/watch?v=dQw4w9WgXcQ&t=42s",
            "https://youtu.be/dQw4w9WgXcQ",
            "https://youtu.be/dQw4w9WgXcQ?si=tracking",
            "https://m.youtube.com/watch?v=dQw4w9WgXcQ&feature=share",
            "https://www.youtube.com/shorts/dQw4w9WgXcQ",
        ];
        for form in forms {
            assert_eq!(remote_key(form), "youtube:dQw4w9WgXcQ", "{form}");
        }
    }

    #[test]
    fn tracking_params_are_stripped() {
        let a = remote_key("https://example.com/ep.mp3?utm_source=x&utm_campaign=y");
        let b = remote_key("https://example.com/ep.mp3");
        assert_eq!(a, b);
    }

    #[test]
    fn meaningful_params_are_kept() {
        let a = remote_key("https://example.com/feed?episode=12");
        let b = remote_key("https://example.com/feed?episode=13");
        assert_ne!(a, b);
    }

    #[test]
    fn fragments_and_trailing_slashes_ignored() {
        let a = remote_key("https://example.com/ep/#t=90");
        let b = remote_key("https://example.com/ep");
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn upload_key_is_content_derived() {
        let temp = tempfile::TempDir::new().unwrap();
        let a = temp.path().join("first.m4a");
        let b = temp.path().join("renamed.m4a");
        tokio::fs::write(&a, b"same bytes").await.unwrap();
        tokio::fs::write(&b, b"same bytes").await.unwrap();

        let key_a = source_key(&MediaSource::Uploaded {
            path: a,
            original_name: "first.m4a".into(),
        })
        .await
        .unwrap();
        let key_b = source_key(&MediaSource::Uploaded {
            path: b,
            original_name: "renamed.m4a".into(),
        })
        .await
        .unwrap();

        assert_eq!(key_a, key_b);
        assert!(key_a.starts_with("sha256:"));
        assert_eq!(key_a.len(), "sha256:".len() + 16);
    }
}
