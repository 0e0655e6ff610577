use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

static VIDEO_EXT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\.(mp4|mov|m4v|webm|ogg)$").expect("video extension pattern"));
static ANY_EXT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\.[^./]+$").expect("extension pattern"));

const STORAGE_OBJECT_PREFIX: &str = "storage/v1/object/public/videos";

/// Naming convention shared with the external thumbnail pipeline: a poster
/// lives next to its video with the extension swapped for a still image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PosterConvention {
    pub extension: String,
    pub placeholder: String,
    pub public_base_url: Option<String>,
}

impl Default for PosterConvention {
    fn default() -> Self {
        Self {
            extension: "webp".into(),
            placeholder: "/placeholder.jpg".into(),
            public_base_url: None,
        }
    }
}

impl PosterConvention {
    /// Poster reference for a media item, or the placeholder when none can be derived.
    pub fn resolve(&self, media_ref: &str, storage_path: Option<&str>) -> String {
        self.derive(media_ref, storage_path)
            .unwrap_or_else(|| self.placeholder.clone())
    }

    pub fn derive(&self, media_ref: &str, storage_path: Option<&str>) -> Option<String> {
        if let Some(poster) = storage_path.and_then(|path| self.from_storage_path(path)) {
            return Some(poster);
        }
        self.from_media_ref(media_ref)
    }

    fn suffix(&self) -> String {
        format!(".{}", self.extension.trim_start_matches('.'))
    }

    fn from_storage_path(&self, path: &str) -> Option<String> {
        let base = self.public_base_url.as_deref()?;
        let swapped = ANY_EXT.replace(path, self.suffix().as_str());
        if swapped.is_empty() || swapped == path {
            return None;
        }
        Some(format!(
            "{}/{}/{}",
            base.trim_end_matches('/'),
            STORAGE_OBJECT_PREFIX,
            swapped.trim_start_matches('/')
        ))
    }

    fn from_media_ref(&self, media_ref: &str) -> Option<String> {
        let media_ref = media_ref.trim();
        if media_ref.is_empty() {
            return None;
        }
        match Url::parse(media_ref) {
            Ok(mut url) => {
                if !VIDEO_EXT.is_match(url.path()) {
                    return None;
                }
                let path = VIDEO_EXT
                    .replace(url.path(), self.suffix().as_str())
                    .into_owned();
                url.set_path(&path);
                url.set_query(None);
                url.set_fragment(None);
                Some(url.to_string())
            }
            // Relative references: plain string surgery on the path part.
            Err(_) => {
                let base = media_ref
                    .split(['?', '#'])
                    .next()
                    .unwrap_or(media_ref);
                if !VIDEO_EXT.is_match(base) {
                    return None;
                }
                Some(VIDEO_EXT.replace(base, self.suffix().as_str()).into_owned())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn swaps_extension_and_strips_signature() {
        let posters = PosterConvention::default();
        let poster = posters.resolve("https://cdn.example.com/v/clip.MP4?token=abc#t=3", None);
        assert_eq!(poster, "https://cdn.example.com/v/clip.webp");
    }

    #[test]
    fn ignores_streaming_manifests() {
        let posters = PosterConvention::default();
        assert_eq!(posters.derive("https://cdn.example.com/v/clip.m3u8", None), None);
        assert_eq!(
            posters.resolve("https://cdn.example.com/v/clip.m3u8", None),
            "/placeholder.jpg"
        );
    }

    #[test]
    fn relative_refs_use_string_replacement() {
        let posters = PosterConvention::default();
        assert_eq!(
            posters.derive("videos/a/b.mov?x=1", None).as_deref(),
            Some("videos/a/b.webp")
        );
    }

    #[test]
    fn storage_path_wins_when_base_configured() {
        let posters = PosterConvention {
            public_base_url: Some("https://proj.example.co/".into()),
            ..PosterConvention::default()
        };
        assert_eq!(
            posters.derive("https://cdn.example.com/other.mp4", Some("/owner/42.mp4")).as_deref(),
            Some("https://proj.example.co/storage/v1/object/public/videos/owner/42.webp")
        );
    }

    #[test]
    fn storage_path_without_base_falls_back_to_media_ref() {
        let posters = PosterConvention::default();
        assert_eq!(
            posters.derive("https://cdn.example.com/a.webm", Some("owner/42.mp4")).as_deref(),
            Some("https://cdn.example.com/a.webp")
        );
    }
}
