//! Naming conventions for tables, keys and link identifiers.
//!
//! All synthesized storage names are derived from model and property
//! names through the functions in this module, so that discovery is a
//! pure function of the declared model shapes.

/// Convert a `PascalCase` identifier to `snake_case`.
///
/// Acronyms stay together: `HTTPServer` becomes `http_server`.
pub fn to_snake_case(name: &str) -> String {
    let chars: Vec<char> = name.chars().collect();
    let mut out = String::with_capacity(name.len() + 4);
    for (i, &c) in chars.iter().enumerate() {
        if !c.is_uppercase() {
            out.push(c);
            continue;
        }
        let boundary = i > 0 && {
            let prev = chars[i - 1];
            prev.is_lowercase()
                || prev.is_ascii_digit()
                || (prev.is_uppercase() && chars.get(i + 1).is_some_and(|n| n.is_lowercase()))
        };
        if boundary && !out.ends_with('_') {
            out.push('_');
        }
        out.extend(c.to_lowercase());
    }
    out
}

const IRREGULAR: &[(&str, &str)] = &[
    ("person", "people"),
    ("child", "children"),
    ("man", "men"),
    ("woman", "women"),
    ("foot", "feet"),
    ("tooth", "teeth"),
    ("goose", "geese"),
    ("mouse", "mice"),
    ("datum", "data"),
    ("index", "indices"),
    ("matrix", "matrices"),
    ("vertex", "vertices"),
    ("analysis", "analyses"),
    ("crisis", "crises"),
    ("axis", "axes"),
];

/// Split off the last `_`-separated word so inflection only touches it.
fn split_last(word: &str) -> (&str, &str) {
    match word.rfind('_') {
        Some(pos) => (&word[..=pos], &word[pos + 1..]),
        None => ("", word),
    }
}

/// Simple English pluralization of the last word of a snake_case name.
pub fn pluralize(word: &str) -> String {
    let (head, last) = split_last(word);
    format!("{head}{}", pluralize_word(last))
}

fn pluralize_word(word: &str) -> String {
    if let Some((_, plural)) = IRREGULAR.iter().find(|(s, _)| *s == word) {
        return (*plural).to_string();
    }
    let penultimate = word.chars().rev().nth(1);
    let after_vowel = penultimate.is_some_and(is_vowel);
    let after_consonant = penultimate.is_some_and(|c| !is_vowel(c));

    match word.chars().last() {
        None => String::new(),
        Some('s' | 'x') => format!("{word}es"),
        Some('h') if word.ends_with("ch") || word.ends_with("sh") => format!("{word}es"),
        Some('z') if after_vowel => format!("{word}zes"),
        Some('z') => format!("{word}es"),
        Some('y') if after_consonant => format!("{}ies", &word[..word.len() - 1]),
        Some('f') => format!("{}ves", &word[..word.len() - 1]),
        Some('e') if word.ends_with("fe") => format!("{}ves", &word[..word.len() - 2]),
        Some('o') if after_consonant && !PLAIN_O.contains(&word) => format!("{word}es"),
        Some(_) => format!("{word}s"),
    }
}

/// Words ending in a consonant plus `o` that still take a plain `s`.
const PLAIN_O: &[&str] = &["photo", "piano", "halo", "memo", "pro", "auto"];

fn is_vowel(c: char) -> bool {
    matches!(c, 'a' | 'e' | 'i' | 'o' | 'u')
}

/// Best-effort inverse of [`pluralize`].
pub fn singularize(word: &str) -> String {
    let (head, last) = split_last(word);
    format!("{head}{}", singularize_word(last))
}

fn singularize_word(word: &str) -> String {
    if let Some((singular, _)) = IRREGULAR.iter().find(|(_, p)| *p == word) {
        return (*singular).to_string();
    }
    if let Some(stem) = word.strip_suffix("ies") {
        if !stem.is_empty() {
            return format!("{stem}y");
        }
    }
    if let Some(stem) = word.strip_suffix("ves") {
        if !stem.is_empty() {
            return format!("{stem}f");
        }
    }
    if let Some(stem) = word.strip_suffix("zzes") {
        return format!("{stem}z");
    }
    for suffix in ["sses", "ches", "shes", "xes", "zes", "oes"] {
        if word.ends_with(suffix) {
            return word[..word.len() - 2].to_string();
        }
    }
    if let Some(stem) = word.strip_suffix('s') {
        if !stem.is_empty() && !stem.ends_with('s') {
            return stem.to_string();
        }
    }
    word.to_string()
}

/// Default table name for a model: the pluralized snake_case type name.
pub fn table_name(model: &str) -> String {
    pluralize(&to_snake_case(model))
}

fn segments(name: &str) -> Vec<&str> {
    name.split('_').filter(|s| !s.is_empty()).collect()
}

fn find_run(haystack: &[&str], needle: &[&str]) -> Option<usize> {
    if needle.is_empty() || needle.len() > haystack.len() {
        return None;
    }
    (0..=haystack.len() - needle.len()).find(|&i| haystack[i..i + needle.len()] == *needle)
}

/// Derive the link identifier of a relation property by stripping the
/// related model's name (plural or singular) out of the property name.
///
/// `old_cars` pointing at `Car` yields `old`; `old_user` pointing at
/// `User` yields `old` as well. If the model name does not occur, the
/// whole property name is the identifier.
pub fn link_identifier(property: &str, model: &str) -> String {
    let singular = to_snake_case(model);
    let plural = pluralize(&singular);
    let words = segments(property);

    for form in [plural.as_str(), singular.as_str()] {
        let needle = segments(form);
        if let Some(start) = find_run(&words, &needle) {
            let rest: Vec<&str> = words[..start]
                .iter()
                .chain(&words[start + needle.len()..])
                .copied()
                .collect();
            return rest.join("_");
        }
    }
    words.join("_")
}

/// Does `property` contain `identifier` as a run of whole `_` segments?
pub fn contains_identifier(property: &str, identifier: &str) -> bool {
    find_run(&segments(property), &segments(identifier)).is_some()
}

/// `{identifier}_{rest}`, or just `rest` without an identifier.
pub fn prefixed(identifier: Option<&str>, rest: &str) -> String {
    match identifier {
        Some(ident) if !ident.is_empty() => format!("{ident}_{rest}"),
        _ => rest.to_string(),
    }
}
