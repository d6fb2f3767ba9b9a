//! Reply-token allocation: base-62 encoding over a 64-bit random draw.
//!
//! Tokens are not retried on collision: callers are expected to use
//! insert-and-return-old map semantics instead.

const DIGITS: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";
const BASE: u64 = 62;
pub const TOKEN_SIZE: usize = 8;

/// Draws a fresh 64-bit random value and emits it as an 8-character base-62
/// token using repeated modulo/divide.
pub fn new_token() -> String {
    let mut n = fastrand::u64(..);
    let mut buf = [0u8; TOKEN_SIZE];
    for slot in buf.iter_mut() {
        *slot = DIGITS[(n % BASE) as usize];
        n /= BASE;
    }
    // SAFETY: every byte comes from DIGITS, which is ASCII.
    String::from_utf8(buf.to_vec()).expect("base62 alphabet is ASCII")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_is_eight_ascii_chars() {
        let t = new_token();
        assert_eq!(t.len(), TOKEN_SIZE);
        assert!(t.bytes().all(|b| DIGITS.contains(&b)));
    }

    #[test]
    fn tokens_vary() {
        let a = new_token();
        let b = new_token();
        // Not a correctness guarantee (collisions are permitted),
        // just a sanity check that we're not returning a constant.
        assert_ne!(a, b, "extremely unlikely collision on two draws");
    }
}
