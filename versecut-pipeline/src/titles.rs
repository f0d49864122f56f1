//! Video-title and song-identity normalization
//!
//! Import resolves "Artist - Song (Official Video)" style titles into an
//! artist/title pair, and every curated row gets a normalized song key so
//! the same song reached through different videos deduplicates.

use once_cell::sync::Lazy;
use regex::Regex;

/// Suffixes commonly glued onto video titles
static TITLE_NOISE: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"\s*\(Official\s*(Video|Audio|Music Video|Lyric Video|Visualizer)?\s*\)",
        r"\s*\[Official\s*(Video|Audio|Music Video|Lyric Video|Visualizer)?\s*\]",
        r"\s*\(Lyric[s]?\s*(Video)?\s*\)",
        r"\s*\[Lyric[s]?\s*(Video)?\s*\]",
        r"\s*\(Audio\s*(Only)?\s*\)",
        r"\s*\[Audio\s*(Only)?\s*\]",
        r"\s*\(Video\s*(Oficial|Officiel)?\s*\)",
        r"\s*\[Video\s*(Oficial|Officiel)?\s*\]",
        r"\s*\(Performance\s*(Video)?\s*\)",
        r"\s*\[Performance\s*(Video)?\s*\]",
        r"\s*\(Live\s*(Video|Performance|Session|at\s+.*)?\s*\)",
        r"\s*\[Live\s*(Video|Performance|Session|at\s+.*)?\s*\]",
        r"\s*\(Acoustic\s*(Version|Video|Session)?\s*\)",
        r"\s*\[Acoustic\s*(Version|Video|Session)?\s*\]",
        r"\s*\[HD\]",
        r"\s*\[HQ\]",
        r"\s*\(HD\)",
        r"\s*\(HQ\)",
        r"\s*\(Prod\..*?\)",
        r"\s*\[Prod\..*?\]",
    ]
    .iter()
    .map(|p| Regex::new(&format!("(?i){p}")).unwrap())
    .collect()
});

/// Featuring-artist tails for title variations
static FEATURING: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)\s+ft\.\s+(.+)$",
        r"(?i)\s+feat\.\s+(.+)$",
        r"(?i)\s+featuring\s+(.+)$",
        r"(?i)\s*\(ft\.\s+(.+)\)$",
        r"(?i)\s*\(feat\.\s+(.+)\)$",
        r"(?i)\s*\(featuring\s+(.+)\)$",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

/// Remove common suffixes like "(Official Video)", "[HD]", "(Lyrics)"
pub fn clean_title(title: &str) -> String {
    let mut result = title.to_string();
    for pattern in TITLE_NOISE.iter() {
        result = pattern.replace_all(&result, "").into_owned();
    }
    result.trim().to_string()
}

/// Split a video title into `(artist, song_name)`
///
/// Tries the common separators in order on the cleaned title. When a side
/// carries a featuring marker it is taken to be the song name. With no
/// separator at all the artist comes back empty and the caller falls back
/// to the uploader.
pub fn parse_video_title(title: &str) -> (String, String) {
    let cleaned = clean_title(title);

    for sep in [" - ", " \u{2013} ", " \u{2014} ", " | ", ": "] {
        if let Some(pos) = cleaned.find(sep) {
            let left = cleaned[..pos].trim();
            let right = cleaned[pos + sep.len()..].trim();
            if left.is_empty() || right.is_empty() {
                continue;
            }

            let left_feat = has_featuring(left);
            let right_feat = has_featuring(right);
            if right_feat && !left_feat {
                return (left.to_string(), right.to_string());
            }
            if left_feat && !right_feat {
                return (right.to_string(), left.to_string());
            }
            return (left.to_string(), right.to_string());
        }
    }

    (String::new(), cleaned)
}

fn has_featuring(s: &str) -> bool {
    let lower = s.to_lowercase();
    lower.contains("ft.") || lower.contains("feat.")
}

/// Strip YouTube's auto-channel " - Topic" suffix from an uploader name
pub fn strip_topic_suffix(uploader: &str) -> String {
    uploader
        .strip_suffix(" - Topic")
        .unwrap_or(uploader)
        .trim()
        .to_string()
}

fn normalize_part(s: &str) -> String {
    let mut s = s.to_lowercase().trim().to_string();

    // Featuring credits vary between sources; drop everything from the marker on
    for marker in [" ft.", " feat.", " featuring", " ft ", " feat ", "(ft.", "(feat."] {
        if let Some(idx) = s.find(marker) {
            s.truncate(idx);
        }
    }

    for suffix in [
        "(official)",
        "(lyrics)",
        "(audio)",
        "(video)",
        "(official video)",
        "(official audio)",
        "(lyric video)",
    ] {
        s = s.replace(suffix, "");
    }

    let cleaned: String = s
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect();
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Normalized `artist|title` identity used to deduplicate the same song
/// encountered via different videos
pub fn normalize_song_key(artist: &str, title: &str) -> String {
    format!("{}|{}", normalize_part(artist), normalize_part(title))
}

/// Title variations for lyrics lookup
///
/// A title with a featuring credit is retried in the common alternative
/// spellings and finally without the credit at all. The original title is
/// always first.
pub fn title_variations(title: &str) -> Vec<String> {
    let mut variations = vec![title.to_string()];

    for pattern in FEATURING.iter() {
        if let Some(caps) = pattern.captures(title) {
            let featured = caps.get(1).map(|m| m.as_str().trim()).unwrap_or("");
            let base = title[..caps.get(0).unwrap().start()].trim();

            variations.extend([
                format!("{base} (feat. {featured})"),
                format!("{base} feat. {featured}"),
                format!("{base} ft. {featured}"),
                format!("{base} (ft. {featured})"),
                base.to_string(),
            ]);
            break;
        }
    }

    let mut seen = std::collections::HashSet::new();
    variations.retain(|v| seen.insert(v.clone()));
    variations
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cleans_official_video_noise() {
        assert_eq!(clean_title("Essence (Official Video)"), "Essence");
        assert_eq!(clean_title("Essence [HD]"), "Essence");
        assert_eq!(clean_title("Essence (Lyrics) [HQ]"), "Essence");
        assert_eq!(clean_title("Essence"), "Essence");
    }

    #[test]
    fn splits_artist_dash_title() {
        let (artist, title) = parse_video_title("Wizkid - Essence (Official Video)");
        assert_eq!(artist, "Wizkid");
        assert_eq!(title, "Essence");
    }

    #[test]
    fn featuring_side_is_the_song() {
        let (artist, title) = parse_video_title("Peru ft. Ed Sheeran - Fireboy DML");
        assert_eq!(artist, "Fireboy DML");
        assert_eq!(title, "Peru ft. Ed Sheeran");
    }

    #[test]
    fn other_separators() {
        assert_eq!(
            parse_video_title("Burna Boy | Last Last"),
            ("Burna Boy".to_string(), "Last Last".to_string())
        );
        assert_eq!(
            parse_video_title("Burna Boy: Last Last"),
            ("Burna Boy".to_string(), "Last Last".to_string())
        );
    }

    #[test]
    fn no_separator_leaves_artist_empty() {
        let (artist, title) = parse_video_title("Last Last (Official Audio)");
        assert_eq!(artist, "");
        assert_eq!(title, "Last Last");
    }

    #[test]
    fn topic_suffix_stripped() {
        assert_eq!(strip_topic_suffix("Burna Boy - Topic"), "Burna Boy");
        assert_eq!(strip_topic_suffix("Burna Boy"), "Burna Boy");
    }

    #[test]
    fn song_key_ignores_featuring_and_noise() {
        let base = normalize_song_key("Wizkid", "Essence");
        assert_eq!(base, normalize_song_key("Wizkid", "Essence ft. Tems"));
        assert_eq!(base, normalize_song_key("Wizkid", "Essence (feat. Tems)"));
        assert_eq!(base, normalize_song_key("WIZKID", "Essence (Official Video)"));
        assert_eq!(base, "wizkid|essence");
    }

    #[test]
    fn song_key_strips_punctuation() {
        assert_eq!(
            normalize_song_key("B.o.B", "Don't Stop!"),
            "bob|dont stop"
        );
    }

    #[test]
    fn title_variations_cover_featuring_forms() {
        let vars = title_variations("Essence ft. Tems");
        assert_eq!(vars[0], "Essence ft. Tems");
        assert!(vars.contains(&"Essence (feat. Tems)".to_string()));
        assert!(vars.contains(&"Essence feat. Tems".to_string()));
        assert!(vars.contains(&"Essence".to_string()));
        // No duplicates
        let set: std::collections::HashSet<_> = vars.iter().collect();
        assert_eq!(set.len(), vars.len());
    }

    #[test]
    fn title_without_featuring_has_single_variation() {
        assert_eq!(title_variations("Essence"), vec!["Essence".to_string()]);
    }
}
