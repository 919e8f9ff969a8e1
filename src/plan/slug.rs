use crate::error::ValidationError;

/// Normalizes `input` into a URL-safe course slug.
///
/// ASCII alphanumerics are lowercased and kept; every other run of characters
/// collapses into a single `-`. Leading and trailing separators are dropped.
pub fn slugify(input: &str) -> Result<String, ValidationError> {
    let mut slug = String::with_capacity(input.len());
    let mut pending_separator = false;

    for ch in input.chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_separator && !slug.is_empty() {
                slug.push('-');
            }
            pending_separator = false;
            slug.push(ch.to_ascii_lowercase());
        } else {
            pending_separator = true;
        }
    }

    if slug.is_empty() {
        return Err(ValidationError::EmptySlug {
            source_text: input.to_string(),
        });
    }

    Ok(slug)
}
