/// Lowercase ASCII words joined by `-`.
///
/// Runs of anything that is not a letter or digit collapse into one
/// separator, `@` reads as "at", and common Latin accents are folded to
/// their ASCII letter. Other non-ASCII characters act as separators.
pub fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    let mut pending_separator = false;

    for ch in text.chars() {
        if ch.is_ascii_alphanumeric() {
            push_word(&mut slug, &ch.to_ascii_lowercase().to_string(), &mut pending_separator);
        } else if let Some(folded) = fold_accent(ch) {
            push_word(&mut slug, folded, &mut pending_separator);
        } else if ch == '@' {
            pending_separator = true;
            push_word(&mut slug, "at", &mut pending_separator);
            pending_separator = true;
        } else if ch == '\'' || ch == '\u{2019}' {
            // apostrophes join the surrounding word
        } else {
            pending_separator = true;
        }
    }

    slug
}

fn push_word(slug: &mut String, word: &str, pending_separator: &mut bool) {
    if *pending_separator && !slug.is_empty() {
        slug.push('-');
    }
    *pending_separator = false;
    slug.push_str(word);
}

fn fold_accent(ch: char) -> Option<&'static str> {
    let folded = match ch.to_lowercase().next()? {
        'à' | 'á' | 'â' | 'ã' | 'ä' | 'å' => "a",
        'æ' => "ae",
        'ç' => "c",
        'è' | 'é' | 'ê' | 'ë' => "e",
        'ì' | 'í' | 'î' | 'ï' => "i",
        'ñ' => "n",
        'ò' | 'ó' | 'ô' | 'õ' | 'ö' | 'ø' => "o",
        'ù' | 'ú' | 'û' | 'ü' => "u",
        'ý' | 'ÿ' => "y",
        'ß' => "ss",
        _ => return None,
    };
    Some(folded)
}
