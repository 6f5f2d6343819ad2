//! Branch naming for published change sets.

/// Longest slug kept from the title.
const MAX_SLUG_LEN: usize = 50;
/// Number of trailing clock digits used as the uniqueness salt.
const SALT_DIGITS: u64 = 1_000_000;

/// Slug for a change-set title: lower-cased, `title_prefix` removed, every
/// non-alphanumeric run collapsed to `-`, trimmed and truncated.
pub fn branch_slug(title: &str, title_prefix: &str) -> String {
    let lowered = title.trim().to_lowercase();
    let prefix = format!("{}:", title_prefix.trim().to_lowercase());
    let body = if title_prefix.trim().is_empty() {
        lowered.as_str()
    } else {
        lowered.strip_prefix(&prefix).unwrap_or(&lowered)
    };

    let mut slug = String::with_capacity(body.len());
    for ch in body.chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch);
        } else if !slug.ends_with('-') {
            slug.push('-');
        }
    }
    let mut slug: String = slug.trim_matches('-').chars().take(MAX_SLUG_LEN).collect();
    while slug.ends_with('-') {
        slug.pop();
    }
    if slug.is_empty() {
        "update".to_string()
    } else {
        slug
    }
}

/// Time-derived uniqueness salt: the last six digits of the millisecond clock.
pub fn time_salt(epoch_millis: u128) -> String {
    format!("{:06}", epoch_millis % u128::from(SALT_DIGITS))
}

/// `<prefix>/<slug>-<salt>`.
pub fn branch_name(prefix: &str, title: &str, title_prefix: &str, salt: &str) -> String {
    let slug = branch_slug(title, title_prefix);
    let prefix = prefix.trim().trim_matches('/');
    if prefix.is_empty() {
        format!("{slug}-{salt}")
    } else {
        format!("{prefix}/{slug}-{salt}")
    }
}
