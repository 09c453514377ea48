//! Challenge secret generation.
//!
//! Secrets are short random strings a human must read off a distorted
//! image, so the alphabet drops glyph pairs that render identically in
//! most fonts (`1`/`l`/`I`, `0`/`o`/`O`). A uniform PRNG is sufficient
//! here; the secret only has to beat a single blind button press, it is
//! not a security token.

use rand::Rng;

/// ASCII letters and digits minus the confusable glyphs `1 l 0 o O I`.
pub const ALPHABET: &[u8] = b"abcdefghijkmnpqrstuvwxyzABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Default number of characters in a challenge secret.
pub const DEFAULT_LENGTH: usize = 5;

/// Generate a secret of `length` characters drawn independently and
/// uniformly from [`ALPHABET`].
pub fn generate(length: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..length)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect()
}
