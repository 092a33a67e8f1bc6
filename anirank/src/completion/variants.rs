//! Title variant cascade
//!
//! Deterministic list of query strings tried for one missing observation:
//! 1. primary title
//! 2. localized title and aliases
//! 3. titles with bracketed annotations stripped
//! 4. titles with trailing season or cour markers stripped
//!
//! Duplicates and empty strings are dropped, keeping the first occurrence.

use crate::types::TitleRecord;
use once_cell::sync::Lazy;
use regex::Regex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariantKind {
    Primary,
    Alias,
    BracketsStripped,
    SeasonStripped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TitleVariant {
    pub kind: VariantKind,
    pub query: String,
}

static BRACKETS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\([^()]*\)|\[[^\[\]]*\]|【[^【】]*】|（[^（）]*）").expect("valid bracket pattern")
});

static SEASON_MARKER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"(?i)[\s:：\-–]*(?:",
        r"\b(?:the\s+)?(?:\d+(?:st|nd|rd|th)|first|second|third|final)\s+(?:season|cour|part)",
        r"|\b(?:season|part|cour)\s*\d+|\bs\d+",
        r"|第\s*[0-9０-９一二三四五六七八九十]+\s*(?:期|季|部|クール|シーズン)",
        r"|[0-9０-９]+\s*(?:期|クール)",
        r")\s*$"
    ))
    .expect("valid season marker pattern")
});

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid whitespace pattern"));

fn normalize(text: &str) -> String {
    WHITESPACE
        .replace_all(text, " ")
        .trim_matches(|c: char| c.is_whitespace() || matches!(c, ':' | '：' | '-' | '–'))
        .to_string()
}

/// Title with (), [], 【】 and （） annotations removed
pub fn strip_brackets(title: &str) -> String {
    normalize(&BRACKETS.replace_all(title, " "))
}

/// Title with one trailing season or cour marker removed
pub fn strip_season_marker(title: &str) -> String {
    normalize(&SEASON_MARKER.replace(title, ""))
}

/// Ordered, deduplicated queries for a title
pub fn title_variants(record: &TitleRecord, use_alternative_titles: bool) -> Vec<TitleVariant> {
    let bases: Vec<&str> = if use_alternative_titles {
        record.display_titles().collect()
    } else {
        vec![record.title.as_str()]
    };

    let mut variants: Vec<TitleVariant> = Vec::new();
    let mut push = |kind: VariantKind, query: String| {
        let query = normalize(&query);
        if !query.is_empty() && !variants.iter().any(|v| v.query == query) {
            variants.push(TitleVariant { kind, query });
        }
    };

    for (i, base) in bases.iter().enumerate() {
        let kind = if i == 0 {
            VariantKind::Primary
        } else {
            VariantKind::Alias
        };
        push(kind, base.to_string());
    }
    for base in &bases {
        push(VariantKind::BracketsStripped, strip_brackets(base));
    }
    for base in &bases {
        push(VariantKind::SeasonStripped, strip_season_marker(&strip_brackets(base)));
    }

    variants
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queries(record: &TitleRecord, aliases: bool) -> Vec<String> {
        title_variants(record, aliases).into_iter().map(|v| v.query).collect()
    }

    #[test]
    fn test_strip_brackets() {
        assert_eq!(strip_brackets("Oshi no Ko (TV)"), "Oshi no Ko");
        assert_eq!(strip_brackets("【推しの子】"), "");
        assert_eq!(strip_brackets("【推しの子】 第2期"), "第2期");
        assert_eq!(strip_brackets("Dungeon Meshi [Delicious in Dungeon]"), "Dungeon Meshi");
        assert_eq!(strip_brackets("薬屋のひとりごと（第2クール）"), "薬屋のひとりごと");
    }

    #[test]
    fn test_strip_season_marker() {
        assert_eq!(strip_season_marker("Mushoku Tensei 2nd Season"), "Mushoku Tensei");
        assert_eq!(strip_season_marker("Jujutsu Kaisen Season 2"), "Jujutsu Kaisen");
        assert_eq!(strip_season_marker("Spy x Family Part 2"), "Spy x Family");
        assert_eq!(strip_season_marker("Dr. Stone: New World S3"), "Dr. Stone: New World");
        assert_eq!(strip_season_marker("Attack on Titan: The Final Season"), "Attack on Titan");
        assert_eq!(strip_season_marker("ダンジョン飯 第2期"), "ダンジョン飯");
        assert_eq!(strip_season_marker("无职转生 第二季"), "无职转生");
        assert_eq!(strip_season_marker("薬屋のひとりごと 第2クール"), "薬屋のひとりごと");
        assert_eq!(strip_season_marker("Frieren"), "Frieren");
    }

    #[test]
    fn test_cascade_order() {
        let record = TitleRecord::new("t", "Shingeki no Kyojin (TV) Season 3")
            .with_localized("Attack on Titan Season 3");
        assert_eq!(
            queries(&record, true),
            vec![
                "Shingeki no Kyojin (TV) Season 3",
                "Attack on Titan Season 3",
                "Shingeki no Kyojin Season 3",
                "Shingeki no Kyojin",
                "Attack on Titan",
            ]
        );

        let kinds: Vec<_> = title_variants(&record, true).into_iter().map(|v| v.kind).collect();
        assert_eq!(
            kinds,
            vec![
                VariantKind::Primary,
                VariantKind::Alias,
                VariantKind::BracketsStripped,
                VariantKind::SeasonStripped,
                VariantKind::SeasonStripped,
            ]
        );
    }

    #[test]
    fn test_cascade_without_alternative_titles() {
        let record = TitleRecord::new("t", "Jujutsu Kaisen 2nd Season").with_localized("JJK");
        assert_eq!(queries(&record, false), vec!["Jujutsu Kaisen 2nd Season", "Jujutsu Kaisen"]);
    }

    #[test]
    fn test_plain_title_has_single_variant() {
        let record = TitleRecord::new("t", "Frieren");
        assert_eq!(queries(&record, true), vec!["Frieren"]);
    }

    #[test]
    fn test_variants_are_deterministic() {
        let record = TitleRecord::new("t", "【推しの子】 第2期").with_localized("Oshi no Ko Season 2");
        assert_eq!(queries(&record, true), queries(&record, true));
    }
}
