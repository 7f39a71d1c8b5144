//! OCR text cleanup
//!
//! Turns the raw text block returned by text detection into a single
//! candidate card title:
//!
//! 1. [`split_lines`] breaks the block into trimmed, non-empty lines
//! 2. [`select_title_line`] picks the first all-caps line that is not a
//!    stat or rarity line
//! 3. [`normalize_card_name`] removes OCR artifacts from that line

use once_cell::sync::Lazy;
use regex::Regex;

/// Runs of two or more whitespace characters
static MULTI_SPACE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s{2,}").expect("static whitespace pattern"));

/// A lone Han / Hiragana / Katakana glyph at the end of the line
static TRAILING_CJK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\s+[\x{4E00}-\x{9FFF}\x{3040}-\x{309F}\x{30A0}-\x{30FF}]$")
        .expect("static CJK pattern")
});

/// Suffixes OCR tends to append when it misreads the card frame
const ARTIFACT_SUFFIXES: [&str; 2] = ["GE", "CE"];

/// Endings that make a trailing GE/CE part of a real word (RAGE, FORCE, ...)
const PROTECTED_ENDINGS: [&str; 4] = ["A", "RA", "OR", "FOR"];

/// Split a detected text block into trimmed, non-empty lines
pub fn split_lines(block: &str) -> Vec<String> {
    block
        .split('\n')
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// Pick the line most likely to be the printed card title
///
/// Lines of three characters or fewer, lines containing `[` (rarity and
/// type markers) and `ATK/` / `DEF/` stat lines are skipped. The first
/// remaining line that is entirely upper case wins.
pub fn select_title_line(lines: &[String]) -> Option<&str> {
    lines
        .iter()
        .map(String::as_str)
        .filter(|line| !is_noise_line(line))
        .find(|line| line.chars().count() > 3 && is_upper_case(line))
}

fn is_noise_line(line: &str) -> bool {
    line.chars().count() <= 3 || line.contains('[') || line.contains("ATK/") || line.contains("DEF/")
}

fn is_upper_case(line: &str) -> bool {
    line.to_uppercase() == line
}

/// Clean a candidate title line
///
/// Trims, collapses whitespace runs, and strips trailing OCR artifacts
/// until nothing more changes, so the result is a fixed point:
/// `normalize_card_name(Some(&normalize_card_name(x))) == normalize_card_name(x)`.
pub fn normalize_card_name(raw: Option<&str>) -> String {
    let raw = match raw {
        Some(raw) => raw.trim(),
        None => return String::new(),
    };

    let mut current = MULTI_SPACE.replace_all(raw, " ").into_owned();
    loop {
        let next = strip_artifacts(&current);
        if next == current {
            return current;
        }
        current = next;
    }
}

fn strip_artifacts(name: &str) -> String {
    let name = strip_suffix_artifact(name).unwrap_or(name);
    TRAILING_CJK.replace(name, "").trim_end().to_string()
}

fn strip_suffix_artifact(name: &str) -> Option<&str> {
    let stem = ARTIFACT_SUFFIXES
        .iter()
        .find_map(|suffix| name.strip_suffix(suffix))?;

    if PROTECTED_ENDINGS.iter().any(|ending| stem.ends_with(ending)) {
        return None;
    }

    Some(stem.trim_end())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_normalize_empty_input() {
        assert_eq!(normalize_card_name(None), "");
        assert_eq!(normalize_card_name(Some("")), "");
        assert_eq!(normalize_card_name(Some("   ")), "");
    }

    #[test]
    fn test_normalize_collapses_whitespace() {
        assert_eq!(
            normalize_card_name(Some("  DARK    MAGICIAN  ")),
            "DARK MAGICIAN"
        );
    }

    #[test]
    fn test_normalize_strips_attached_suffix() {
        assert_eq!(normalize_card_name(Some("CARD XYZGE")), "CARD XYZ");
        assert_eq!(normalize_card_name(Some("CARD XYZCE")), "CARD XYZ");
    }

    #[test]
    fn test_normalize_strips_standalone_suffix() {
        assert_eq!(normalize_card_name(Some("BLUE-EYES WHITE DRAGON GE")), "BLUE-EYES WHITE DRAGON");
        assert_eq!(normalize_card_name(Some("MONSTER REBORN  CE")), "MONSTER REBORN");
    }

    #[test]
    fn test_normalize_keeps_protected_endings() {
        assert_eq!(normalize_card_name(Some("CARD FORCE")), "CARD FORCE");
        assert_eq!(normalize_card_name(Some("DRAGON RAGE")), "DRAGON RAGE");
        assert_eq!(normalize_card_name(Some("MIRROR FORCE")), "MIRROR FORCE");
        assert_eq!(normalize_card_name(Some("SPELLBOOK OF SECRETS IMAGE")), "SPELLBOOK OF SECRETS IMAGE");
    }

    #[test]
    fn test_normalize_only_uppercase_suffixes() {
        assert_eq!(normalize_card_name(Some("Judge")), "Judge");
    }

    #[test]
    fn test_normalize_strips_lone_cjk_glyph() {
        assert_eq!(normalize_card_name(Some("DARK MAGICIAN 魔")), "DARK MAGICIAN");
        assert_eq!(normalize_card_name(Some("DARK MAGICIAN ア")), "DARK MAGICIAN");
        assert_eq!(normalize_card_name(Some("DARK MAGICIAN の")), "DARK MAGICIAN");
    }

    #[test]
    fn test_normalize_keeps_attached_cjk() {
        assert_eq!(normalize_card_name(Some("ブラック・マジシャン")), "ブラック・マジシャン");
    }

    #[test]
    fn test_normalize_mixed_artifacts_reach_fixed_point() {
        assert_eq!(normalize_card_name(Some("POT OF GREED GE 魔")), "POT OF GREED");
        assert_eq!(normalize_card_name(Some("CARD XYZGECE")), "CARD XYZ");
    }

    #[test]
    fn test_normalize_idempotent() {
        let samples = [
            "",
            "CARD XYZGE",
            "CARD FORCE",
            "DRAGON RAGE",
            "  SKILL   DRAIN  ",
            "POT OF GREED GE 魔",
            "CARD XYZGECE",
            "A GE",
            "GE",
            "RAIGEKI 雷 CE",
            "Dark\t\tHole",
            "MAGE",
            "BLACK LUSTER SOLDIER - ENVOY OF THE BEGINNING",
        ];

        for sample in samples {
            let once = normalize_card_name(Some(sample));
            let twice = normalize_card_name(Some(&once));
            assert_eq!(once, twice, "normalize not idempotent for {:?}", sample);
        }
    }

    #[test]
    fn test_split_lines_trims_and_drops_empty() {
        let block = "  BLUE-EYES WHITE DRAGON \n\n [DRAGON/NORMAL]\n   \nATK/3000 DEF/2500";
        assert_eq!(
            split_lines(block),
            lines(&["BLUE-EYES WHITE DRAGON", "[DRAGON/NORMAL]", "ATK/3000 DEF/2500"])
        );
        assert!(split_lines("").is_empty());
    }

    #[test]
    fn test_select_skips_stat_and_marker_lines() {
        let ocr = lines(&[
            "[Rare]",
            "ATK/2500 DEF/2000",
            "BLUE-EYES WHITE DRAGON",
            "lore text",
        ]);
        assert_eq!(select_title_line(&ocr), Some("BLUE-EYES WHITE DRAGON"));
    }

    #[test]
    fn test_select_skips_short_lines() {
        let ocr = lines(&["LV8", "DARK", "MAGICIAN"]);
        assert_eq!(select_title_line(&ocr), Some("DARK"));

        let ocr = lines(&["ABC", "1234", "Dark Hole"]);
        assert_eq!(select_title_line(&ocr), Some("1234"));
    }

    #[test]
    fn test_select_requires_all_caps() {
        let ocr = lines(&["Dark Magician", "Spellcaster/Normal", "The ultimate wizard"]);
        assert_eq!(select_title_line(&ocr), None);
    }

    #[test]
    fn test_select_empty_input() {
        assert_eq!(select_title_line(&[]), None);
    }

    #[test]
    fn test_select_skips_def_only_line() {
        let ocr = lines(&["DEF/1200", "GEM-KNIGHT GARNET"]);
        assert_eq!(select_title_line(&ocr), Some("GEM-KNIGHT GARNET"));
    }
}
