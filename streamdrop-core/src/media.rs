//! Presentation helpers for file names, sizes and player links.

use serde::Serialize;

const SIZE_UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];

/// Tags that start the release-info tail of a file name, matched
/// case-insensitively. Four-digit years starting with 19 or 20 count too.
const METADATA_TAGS: [&str; 11] = [
    "4k", "2160p", "1080p", "720p", "480p", "360p", "hevc", "x265", "bluray", "web-dl", "hdrip",
];

/// Human readable size with two decimals: `1.50 MB`. Zero is `0B`.
pub fn readable_size(bytes: u64) -> String {
    if bytes == 0 {
        return "0B".to_string();
    }
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < SIZE_UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    format!("{size:.2} {}", SIZE_UNITS[unit])
}

/// Keep alphanumerics, space, `.`, `_` and `-`, then trim trailing spaces.
/// Falls back to `file` when nothing is left.
pub fn safe_file_name(name: &str) -> String {
    let safe: String = name
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, ' ' | '.' | '_' | '-'))
        .collect();
    let safe = safe.trim_end();
    if safe.is_empty() {
        "file".to_string()
    } else {
        safe.to_string()
    }
}

/// Obscure a file name for public pages.
///
/// The title keeps every third character (counting from the first) when it
/// is alphanumeric; other alphanumerics become `*` and punctuation stays.
/// The release-info tail (year, resolution, codec or source) and the
/// extension are kept as they are.
pub fn mask_filename(name: &str) -> String {
    if name.is_empty() {
        return "Protected File".to_string();
    }
    let (base, ext) = split_extension(name);
    let chars: Vec<char> = base.chars().collect();

    let (title, tail) = match (0..chars.len()).find(|&i| metadata_at(&chars, i)) {
        Some(i) => {
            let title: String = chars[..i].iter().collect();
            let title = title.trim_matches(|c| matches!(c, ' ' | '.' | '-' | '_')).to_string();
            (title, chars[i..].iter().collect::<String>())
        }
        None => (base.to_string(), String::new()),
    };

    let masked: String = title
        .chars()
        .enumerate()
        .map(|(i, c)| match c.is_alphanumeric() {
            true if i % 3 == 0 => c,
            true => '*',
            false => c,
        })
        .collect();

    format!("{masked} {tail}{ext}").trim().to_string()
}

/// Split at the last `.` unless it only leads the name (`.bashrc`).
fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(dot) if name[..dot].chars().any(|c| c != '.') => name.split_at(dot),
        _ => (name, ""),
    }
}

fn metadata_at(chars: &[char], i: usize) -> bool {
    let rest = &chars[i..];
    let is_year = rest.len() >= 4
        && matches!((rest[0], rest[1]), ('1', '9') | ('2', '0'))
        && rest[2].is_ascii_digit()
        && rest[3].is_ascii_digit();

    is_year
        || METADATA_TAGS.iter().any(|tag| {
            tag.len() <= rest.len()
                && tag
                    .chars()
                    .zip(rest)
                    .all(|(t, c)| c.to_ascii_lowercase() == t)
        })
}

/// Links advertised for a published file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlayerLinks {
    pub direct_dl_link: String,
    pub mx_player_link: String,
    pub vlc_player_link: String,
}

impl PlayerLinks {
    /// Links for `/dl/{id}/{file name}` under `base_url`. The name segment
    /// is percent-encoded.
    pub fn new(base_url: &str, id: &str, file_name: &str, mime_type: &str) -> Self {
        let direct = format!(
            "{}/dl/{}/{}",
            base_url.trim_end_matches('/'),
            id,
            urlencoding::encode(&safe_file_name(file_name))
        );
        Self {
            mx_player_link: format!(
                "intent:{direct}#Intent;action=android.intent.action.VIEW;type={mime_type};end"
            ),
            vlc_player_link: format!(
                "intent:{direct}#Intent;action=android.intent.action.VIEW;type={mime_type};package=org.videolan.vlc;end"
            ),
            direct_dl_link: direct,
        }
    }
}
