//! Request signature for the masstransit API
//!
//! Replicates the hash the Yandex Maps frontend computes over the query
//! parameters of an API request. The upstream silently rejects requests
//! whose `s` parameter does not match (the payload comes back as an
//! error or empty, never as a clear status code), so the routine has to
//! be bit-exact.

use url::form_urlencoded;

/// Query key carrying the computed signature.
pub(crate) const SIGNATURE_KEY: &str = "s";

/// Compute the signature over a set of query parameters.
///
/// Pairs are stable-sorted by key (compared case-insensitively, emitted
/// with their original case), form-encoded into a single query string
/// and hashed with the provider's DJB2-xor variant. An empty parameter
/// set signs to the empty string.
///
/// Input order does not affect the result for map-like inputs; only the
/// relative order of keys that are equal under case folding is
/// preserved from the input.
#[must_use]
pub fn sign<K, V>(params: &[(K, V)]) -> String
where
    K: AsRef<str>,
    V: AsRef<str>,
{
    let mut pairs: Vec<(&str, &str)> = params
        .iter()
        .map(|(key, value)| (key.as_ref(), value.as_ref()))
        .collect();
    pairs.sort_by_key(|(key, _)| key.to_lowercase());

    let mut serializer = form_urlencoded::Serializer::new(String::new());
    for (key, value) in &pairs {
        serializer.append_pair(key, value);
    }
    let encoded = serializer.finish();
    if encoded.is_empty() {
        return String::new();
    }

    // 33 * n ^ charCodeAt(r), kept in 32 unsigned bits. The encoded
    // string is pure ASCII, so byte iteration matches the original
    // per-character loop.
    let mut acc: u32 = 5381;
    for byte in encoded.bytes() {
        acc = acc.wrapping_mul(33) ^ u32::from(byte);
    }
    acc.to_string()
}
