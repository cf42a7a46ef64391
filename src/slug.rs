use rand::distributions::Alphanumeric;
use rand::Rng;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Length of the random alphanumeric prefix on every generated slug.
pub const SLUG_PREFIX_LEN: usize = 6;

/// Produces slugs for accounts and members on first migration.
pub trait SlugSource: Send + Sync {
    fn make_slug(&self, name: &str) -> String;
}

/// Thread-local RNG backed generator; holds no state of its own.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomSlugs;

impl SlugSource for RandomSlugs {
    fn make_slug(&self, name: &str) -> String {
        make_slug(name)
    }
}

/// `<6 random alphanumerics>-<normalized name>`, or just the prefix when the
/// name normalizes to nothing.
pub fn make_slug(name: &str) -> String {
    let prefix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SLUG_PREFIX_LEN)
        .map(char::from)
        .collect();
    join_slug(&prefix, &normalize_name(name))
}

fn join_slug(prefix: &str, body: &str) -> String {
    if body.is_empty() {
        prefix.to_string()
    } else {
        format!("{prefix}-{body}")
    }
}

/// Lowercases, strips diacritics, and joins alphanumeric runs with `-`.
pub fn normalize_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut pending_sep = false;
    for c in name.nfkd().filter(|c| !is_combining_mark(*c)) {
        if c.is_alphanumeric() {
            let lowered: String = c.to_lowercase().filter(|l| l.is_alphanumeric()).collect();
            if lowered.is_empty() {
                continue;
            }
            if pending_sep && !out.is_empty() {
                out.push('-');
            }
            pending_sep = false;
            out.push_str(&lowered);
        } else if c.is_whitespace() || matches!(c, '-' | '_' | '.' | '/' | '+' | '~') {
            pending_sep = true;
        }
        // everything else is dropped
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn normalizes_case_spacing_and_accents() {
        assert_eq!(normalize_name("Alex"), "alex");
        assert_eq!(normalize_name("  Joy  Bright "), "joy-bright");
        assert_eq!(normalize_name("Zoë_the-Great"), "zoe-the-great");
        assert_eq!(normalize_name("☆Star☆"), "star");
        assert_eq!(normalize_name("!!!"), "");
    }

    #[test]
    fn slug_has_prefix_and_name() {
        let slug = make_slug("Alex");
        let (prefix, rest) = slug.split_at(SLUG_PREFIX_LEN);
        assert!(prefix.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_eq!(rest, "-alex");
    }

    #[test]
    fn empty_name_yields_bare_prefix() {
        let slug = make_slug("");
        assert_eq!(slug.len(), SLUG_PREFIX_LEN);
    }

    #[test]
    fn repeated_calls_differ() {
        // 62^6 prefixes; two equal draws in a row would point at a broken RNG.
        assert_ne!(make_slug("Sam"), make_slug("Sam"));
    }

    proptest! {
        #[test]
        fn slug_is_url_safe(name in ".{0,40}") {
            let slug = make_slug(&name);
            prop_assert!(slug.len() >= SLUG_PREFIX_LEN);
            prop_assert!(!slug.ends_with('-'));
            prop_assert!(!slug.contains("--"));
            prop_assert!(slug.chars().all(|c| c == '-' || c.is_alphanumeric()));
            prop_assert!(slug[SLUG_PREFIX_LEN..].chars().all(|c| !c.is_ascii_uppercase()));
        }
    }
}
