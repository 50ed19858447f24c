//! Index to filename mapping shared by every worker in a directory.
//!
//! Workers never exchange names; they all derive the same ones, which is what
//! makes them collide on the same inodes.

/// Digits of the base-64 numeral, in value order.
pub const ALPHABET: &[u8; 64] =
    b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789_=";

/// Render `index` as a base-64 numeral, least significant digit first.
///
/// Always emits at least one digit, so `derive(0) == "a"`.
pub fn derive(index: usize) -> String {
    let mut name = String::new();
    let mut rest = index;
    loop {
        name.push(ALPHABET[rest % 64] as char);
        rest /= 64;
        if rest == 0 {
            break;
        }
    }
    name
}
