// Generic business words dropped from names before keying, so that
// "Lucali Pizza" and "Lucali" land on the same cache row.
const GENERIC_WORDS: &[&str] = &[
    "restaurant",
    "cafe",
    "coffee",
    "pizza",
    "bar",
    "grill",
    "bistro",
    "kitchen",
    "eatery",
    "diner",
    "pub",
    "tavern",
    "inc",
    "llc",
    "corp",
    "co",
    "company",
];

// Builds the cache key for a venue name. Lowercases, drops generic business
// words, strips punctuation, and joins the remaining words with underscores;
// a location hint goes through the same cleanup and is appended. Idempotent:
// an already-built key passes through unchanged.
pub fn normalize_place_name(name: &str, location_hint: &str) -> String {
    let lowered = name.to_lowercase();
    let stripped = remove_generic_words(lowered.trim());
    let mut key = collapse_to_key(&stripped);

    if !location_hint.is_empty() {
        let hint = collapse_to_key(&location_hint.to_lowercase());
        key = format!("{key}_{hint}");
    }

    key
}

// Word characters are alphanumerics and underscore; a generic word only
// matches when bounded by non-word characters, so it never fires inside an
// underscore-joined key.
fn remove_generic_words(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut word = String::new();
    for ch in text.chars() {
        if ch.is_alphanumeric() || ch == '_' {
            word.push(ch);
        } else {
            flush_word(&mut out, &mut word);
            out.push(ch);
        }
    }
    flush_word(&mut out, &mut word);
    out
}

fn flush_word(out: &mut String, word: &mut String) {
    if !word.is_empty() {
        if !GENERIC_WORDS.contains(&word.as_str()) {
            out.push_str(word);
        }
        word.clear();
    }
}

fn collapse_to_key(text: &str) -> String {
    let cleaned: String = text
        .chars()
        .filter(|ch| ch.is_alphanumeric() || *ch == '_' || ch.is_whitespace())
        .collect();
    cleaned.split_whitespace().collect::<Vec<_>>().join("_")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_generic_suffix_words() {
        assert_eq!(
            normalize_place_name("Joe's Pizza", ""),
            normalize_place_name("Joe's", "")
        );
        assert_eq!(normalize_place_name("Joe's Pizza", ""), "joes");
    }

    #[test]
    fn collapses_whitespace_and_punctuation() {
        assert_eq!(
            normalize_place_name("  The   Blue-Bottle!  ", ""),
            "the_bluebottle"
        );
    }

    #[test]
    fn appends_location_hint() {
        assert_eq!(
            normalize_place_name("Lucali", "Brooklyn, NY"),
            "lucali_brooklyn_ny"
        );
    }

    #[test]
    fn is_idempotent() {
        let inputs = [
            "Joe's Pizza",
            "Cafe   Habana, SoHo!",
            "lucali_brooklyn_ny",
            "Señor Frog's Bar & Grill",
        ];
        for input in inputs {
            let once = normalize_place_name(input, "");
            let twice = normalize_place_name(&once, "");
            assert_eq!(once, twice, "normalizing {input:?} twice diverged");
        }
    }

    #[test]
    fn generic_word_survives_inside_key() {
        // "pizza" is bounded by an underscore here, not a word break.
        assert_eq!(normalize_place_name("prince_street_pizza", ""), "prince_street_pizza");
    }

    #[test]
    fn distinct_venues_with_generic_names_collide() {
        assert_eq!(
            normalize_place_name("Corner Cafe", ""),
            normalize_place_name("Corner Bar", "")
        );
    }
}
