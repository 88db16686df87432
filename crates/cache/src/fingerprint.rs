//! Request fingerprinting for the response cache.
//!
//! The key is `SHA-256(canonical_json({model, prompt, temperature, system}))`
//! rendered as lowercase hex. Only these four fields participate; parameter
//! variations outside the set share keys by design (a coarser key raises the
//! hit rate). Canonical form means stable key order and no insignificant
//! whitespace — `serde_json::Value` objects are BTreeMap-backed, so keys
//! always serialize in sorted order.

use sha2::{Digest, Sha256};

/// Derive the deterministic cache key for a completion request.
pub fn fingerprint(
    model: &str,
    prompt: &str,
    temperature: Option<f32>,
    system: Option<&str>,
) -> String {
    let canonical = serde_json::json!({
        "model": model,
        "prompt": prompt,
        "temperature": temperature,
        "system": system,
    });
    // Value objects serialize with sorted keys and compact separators.
    let encoded = canonical.to_string();

    let mut hasher = Sha256::new();
    hasher.update(encoded.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic_for_identical_inputs() {
        let a = fingerprint("gpt-4o-mini", "ping", Some(0.2), Some("You are terse"));
        let b = fingerprint("gpt-4o-mini", "ping", Some(0.2), Some("You are terse"));
        assert_eq!(a, b);
    }

    #[test]
    fn sixty_four_lowercase_hex_chars() {
        let key = fingerprint("m", "p", None, None);
        assert_eq!(key.len(), 64);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn each_participating_field_changes_the_key() {
        let base = fingerprint("m", "p", Some(0.5), Some("s"));
        assert_ne!(base, fingerprint("m2", "p", Some(0.5), Some("s")));
        assert_ne!(base, fingerprint("m", "p2", Some(0.5), Some("s")));
        assert_ne!(base, fingerprint("m", "p", Some(0.6), Some("s")));
        assert_ne!(base, fingerprint("m", "p", Some(0.5), Some("s2")));
        assert_ne!(base, fingerprint("m", "p", None, Some("s")));
        assert_ne!(base, fingerprint("m", "p", Some(0.5), None));
    }

    #[test]
    fn absent_and_empty_system_are_distinct() {
        assert_ne!(
            fingerprint("m", "p", None, None),
            fingerprint("m", "p", None, Some(""))
        );
    }
}
