//! Localized string keys of the form `base::seg1::seg2`.

use std::future::Future;

pub const KEY_SEPARATOR: &str = "::";

/// Split `key` into its segments; segment 0 is the base key.
pub fn split_key(key: &str) -> Vec<&str> {
    key.split(KEY_SEPARATOR).collect()
}

/// Replace every `##replace.<n>##` in `template` with `segments[n]`.
///
/// Placeholders whose index has no segment are left as they are.
pub fn substitute_placeholders(template: &str, segments: &[&str]) -> String {
    let mut out = template.to_owned();
    for (n, segment) in segments.iter().enumerate() {
        let placeholder = format!("##replace.{n}##");
        if out.contains(&placeholder) {
            out = out.replace(&placeholder, segment);
        }
    }
    out
}

/// Resolve `key` through `local`, then `remote`, then the key itself.
///
/// Both lookups receive the base key only. A resolved string gets its
/// placeholders substituted; the fallback is returned verbatim.
pub async fn resolve<L, R, Fut>(key: &str, local: L, remote: R) -> String
where
    L: FnOnce(&str) -> Option<String>,
    R: FnOnce(&str) -> Fut,
    Fut: Future<Output = Option<String>>,
{
    let segments = split_key(key);
    let base = segments[0];

    // An empty translation counts as missing.
    let resolved = match local(base).filter(|s| !s.is_empty()) {
        Some(s) => Some(s),
        None => remote(base).await.filter(|s| !s.is_empty()),
    };

    match resolved {
        Some(template) => substitute_placeholders(&template, &segments),
        None => {
            tracing::debug!(key, "no translation found; using the key");
            key.to_owned()
        }
    }
}
