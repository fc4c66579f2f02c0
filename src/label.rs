/// Turns a raw dataset tag like `n02085782-Chihuahua` or
/// `n02099712-Labrador_retriever` into a display name (`Chihuahua`,
/// `Labrador Retriever`).
pub fn clean_breed_label(raw: &str) -> String {
    strip_dataset_prefix(raw)
        .split(['_', '-'])
        .filter(|word| !word.is_empty())
        .map(capitalize)
        .collect::<Vec<_>>()
        .join(" ")
}

// Dataset tags carry an optional `n` followed by digits and a hyphen.
fn strip_dataset_prefix(raw: &str) -> &str {
    let rest = raw.strip_prefix(['n', 'N']).unwrap_or(raw);
    let digits = rest.chars().take_while(char::is_ascii_digit).count();
    if digits == 0 {
        return raw;
    }
    rest[digits..].strip_prefix('-').unwrap_or(raw)
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
