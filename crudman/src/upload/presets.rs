//! Type-hint presets for shorthand upload declarations (`"image-avatar"`, `"video-mp4"`, ...).
//!
//! Empty extension or MIME lists accept anything.

/// Dimension and aspect constraints checked on decoded images.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImageRules {
    pub min_width: u32,
    pub min_height: u32,
    pub max_width: u32,
    pub max_height: u32,
    /// Expected width / height.
    pub aspect_ratio: Option<f64>,
    /// Allowed relative deviation from `aspect_ratio`.
    pub aspect_tolerance: f64,
}

/// Square-ish images between 128 and 4096 pixels a side, within 20% of square.
pub const AVATAR: ImageRules = ImageRules {
    min_width: 128,
    min_height: 128,
    max_width: 4096,
    max_height: 4096,
    aspect_ratio: Some(1.0),
    aspect_tolerance: 0.2,
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TypePreset {
    pub hint: &'static str,
    pub extensions: &'static [&'static str],
    pub mime_types: &'static [&'static str],
    pub max_size_mb: Option<f64>,
    pub image: Option<ImageRules>,
}

const IMAGE_EXT: &[&str] = &["jpg", "jpeg", "png", "gif", "webp", "avif"];
const IMAGE_MIME: &[&str] = &["image/jpeg", "image/png", "image/gif", "image/webp", "image/avif"];
const JPG_EXT: &[&str] = &["jpg", "jpeg"];
const JPG_MIME: &[&str] = &["image/jpeg"];
const PNG_EXT: &[&str] = &["png"];
const PNG_MIME: &[&str] = &["image/png"];
const WEBP_EXT: &[&str] = &["webp"];
const WEBP_MIME: &[&str] = &["image/webp"];
const AVIF_EXT: &[&str] = &["avif"];
const AVIF_MIME: &[&str] = &["image/avif"];
const XLSX_MIME: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";
const DOCX_MIME: &str = "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

const fn preset(
    hint: &'static str,
    extensions: &'static [&'static str],
    mime_types: &'static [&'static str],
    max_size_mb: Option<f64>,
    image: Option<ImageRules>,
) -> TypePreset {
    TypePreset {
        hint,
        extensions,
        mime_types,
        max_size_mb,
        image,
    }
}

pub static PRESETS: &[TypePreset] = &[
    preset("image", IMAGE_EXT, IMAGE_MIME, Some(5.0), None),
    preset("image-jpg", JPG_EXT, JPG_MIME, Some(5.0), None),
    preset("image-png", PNG_EXT, PNG_MIME, Some(5.0), None),
    preset("image-gif", &["gif"], &["image/gif"], Some(5.0), None),
    preset("image-webp", WEBP_EXT, WEBP_MIME, Some(5.0), None),
    preset("image-avif", AVIF_EXT, AVIF_MIME, Some(5.0), None),
    preset("image-avatar", IMAGE_EXT, IMAGE_MIME, Some(2.0), Some(AVATAR)),
    preset("image-jpg-avatar", JPG_EXT, JPG_MIME, Some(2.0), Some(AVATAR)),
    preset("image-png-avatar", PNG_EXT, PNG_MIME, Some(2.0), Some(AVATAR)),
    preset("image-webp-avatar", WEBP_EXT, WEBP_MIME, Some(2.0), Some(AVATAR)),
    preset("image-avif-avatar", AVIF_EXT, AVIF_MIME, Some(2.0), Some(AVATAR)),
    preset(
        "video",
        &["mp4", "webm", "ogg", "ogv", "mov"],
        &["video/mp4", "video/webm", "video/ogg", "video/quicktime"],
        Some(100.0),
        None,
    ),
    preset("video-mp4", &["mp4"], &["video/mp4"], Some(100.0), None),
    preset("video-webm", &["webm"], &["video/webm"], Some(100.0), None),
    preset("video-ogg", &["ogg", "ogv"], &["video/ogg"], Some(100.0), None),
    preset("video-short", &["mp4", "webm"], &["video/mp4", "video/webm"], Some(20.0), None),
    preset("pdf", &["pdf"], &["application/pdf"], Some(20.0), None),
    preset(
        "doc",
        &["doc", "docx", "odt", "rtf"],
        &[
            "application/msword",
            DOCX_MIME,
            "application/vnd.oasis.opendocument.text",
            "application/rtf",
        ],
        Some(20.0),
        None,
    ),
    preset("text", &["txt", "md"], &["text/plain", "text/markdown"], Some(5.0), None),
    preset("xml", &["xml"], &["application/xml", "text/xml"], Some(5.0), None),
    preset("html", &["html", "htm"], &["text/html"], Some(5.0), None),
    preset("json", &["json"], &["application/json"], Some(5.0), None),
    preset(
        "spreadsheet",
        &["csv", "xls", "xlsx", "ods"],
        &[
            "text/csv",
            "application/vnd.ms-excel",
            XLSX_MIME,
            "application/vnd.oasis.opendocument.spreadsheet",
        ],
        Some(20.0),
        None,
    ),
    preset("spreadsheet-csv", &["csv"], &["text/csv"], Some(20.0), None),
    preset("spreadsheet-xls", &["xls"], &["application/vnd.ms-excel"], Some(20.0), None),
    preset("spreadsheet-xlsx", &["xlsx"], &[XLSX_MIME], Some(20.0), None),
    preset(
        "archive",
        &["zip", "tar", "gz", "7z"],
        &[
            "application/zip",
            "application/x-tar",
            "application/gzip",
            "application/x-7z-compressed",
        ],
        Some(100.0),
        None,
    ),
    preset("binary", &[], &[], None, None),
];

#[must_use]
pub fn lookup(hint: &str) -> Option<&'static TypePreset> {
    let hint = hint.trim().to_ascii_lowercase();
    PRESETS.iter().find(|p| p.hint == hint)
}

/// File extension conventionally used for a MIME type.
#[must_use]
pub fn extension_for_mime(mime: &str) -> Option<&'static str> {
    let mime = mime.trim().to_ascii_lowercase();
    Some(match mime.as_str() {
        "image/jpeg" => "jpg",
        "image/png" => "png",
        "image/gif" => "gif",
        "image/webp" => "webp",
        "image/avif" => "avif",
        "image/svg+xml" => "svg",
        "video/mp4" => "mp4",
        "video/webm" => "webm",
        "video/ogg" => "ogg",
        "video/quicktime" => "mov",
        "application/pdf" => "pdf",
        "text/plain" => "txt",
        "text/csv" => "csv",
        "text/html" => "html",
        "application/json" => "json",
        "application/xml" | "text/xml" => "xml",
        "application/zip" => "zip",
        m if m == XLSX_MIME => "xlsx",
        m if m == DOCX_MIME => "docx",
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_hint_is_unique() {
        for (i, preset) in PRESETS.iter().enumerate() {
            assert!(
                PRESETS[i + 1..].iter().all(|other| other.hint != preset.hint),
                "duplicate hint {}",
                preset.hint
            );
        }
    }

    #[test]
    fn test_avatar_presets_carry_image_rules() {
        for hint in ["image-avatar", "image-png-avatar", "image-avif-avatar"] {
            assert_eq!(lookup(hint).and_then(|p| p.image), Some(AVATAR));
        }
        assert!(lookup("image").unwrap().image.is_none());
        assert!(lookup("Video-MP4").is_some());
        assert!(lookup("hologram").is_none());
    }

    #[test]
    fn test_extension_for_mime() {
        assert_eq!(extension_for_mime("IMAGE/JPEG"), Some("jpg"));
        assert_eq!(extension_for_mime(XLSX_MIME), Some("xlsx"));
        assert_eq!(extension_for_mime("application/x-unknown"), None);
    }
}
