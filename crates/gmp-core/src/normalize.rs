//! Identity normalization: raw offering name to comparison key.

/// Corporate boilerplate dropped wherever it appears as a whole word.
pub const BOILERPLATE_TOKENS: &[&str] = &["limited", "ltd", "private", "pvt", "ipo"];

/// Map a raw offering name to its identity key.
///
/// Lower-cases, removes [`BOILERPLATE_TOKENS`], strips punctuation and collapses
/// whitespace. Total and idempotent.
pub fn normalize_name(raw: &str) -> String {
    let lowered = raw.to_lowercase();
    let first = collapse_whitespace(&strip_punctuation(&drop_boilerplate(&lowered)));
    // Stripping punctuation can expose new tokens ("l.t.d" -> "ltd").
    collapse_whitespace(&drop_boilerplate(&first))
}

fn is_boilerplate(word: &str) -> bool {
    BOILERPLATE_TOKENS.contains(&word)
}

fn drop_boilerplate(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut word = String::new();
    for ch in input.chars() {
        if ch.is_alphanumeric() {
            word.push(ch);
            continue;
        }
        if !is_boilerplate(&word) {
            out.push_str(&word);
        }
        word.clear();
        out.push(ch);
    }
    if !is_boilerplate(&word) {
        out.push_str(&word);
    }
    out
}

fn strip_punctuation(input: &str) -> String {
    input
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect()
}

fn collapse_whitespace(input: &str) -> String {
    input.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drops_suffixes_and_case() {
        assert_eq!(normalize_name("Fractal Analytics Ltd"), "fractal analytics");
        assert_eq!(normalize_name("FRACTAL ANALYTICS"), "fractal analytics");
        assert_eq!(normalize_name("Fractal Analytics Ltd."), "fractal analytics");
        assert_eq!(normalize_name("Aequs Private Limited IPO"), "aequs");
        assert_eq!(normalize_name("  Shree   Ram Twistex SME "), "shree ram twistex sme");
    }

    #[test]
    fn boilerplate_only_removed_as_whole_words() {
        assert_eq!(normalize_name("Ltdco Pvtech"), "ltdco pvtech");
        assert_eq!(normalize_name("Vipo Industries"), "vipo industries");
        assert_eq!(normalize_name("Acme-Ltd"), "acme");
    }

    #[test]
    fn punctuation_is_stripped_not_spaced() {
        assert_eq!(normalize_name("A.B.C. Infra (India)"), "abc infra india");
        assert_eq!(normalize_name("M&B Engineering"), "mb engineering");
    }

    #[test]
    fn total_on_degenerate_input() {
        assert_eq!(normalize_name(""), "");
        assert_eq!(normalize_name("   "), "");
        assert_eq!(normalize_name("--- ,,, !!!"), "");
        assert_eq!(normalize_name("Ltd. IPO"), "");
        assert_eq!(normalize_name("₹ 900"), "900");
    }

    #[test]
    fn normalization_is_idempotent() {
        let samples = [
            "Fractal Analytics Ltd",
            "L.t.d Holdings",
            "acme l-t-d",
            "I.P.O Ventures Pvt. Ltd.",
            "Ärzte Gesundheit GmbH",
            "ipo ipo ipo",
            "Shree Ram Twistex SME",
            "",
            "p.v.t l.i.m.i.t.e.d",
            "₹42 (4.66%)",
        ];
        for sample in samples {
            let once = normalize_name(sample);
            assert_eq!(normalize_name(&once), once, "not idempotent for {sample:?}");
        }
    }
}
