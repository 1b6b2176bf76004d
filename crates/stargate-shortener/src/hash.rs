use md5::{Digest, Md5};
use stargate_core::ShortCode;

const ALPHABET: &[u8; 62] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

/// Length of every derived short code.
pub const CODE_LENGTH: usize = 6;

/// Derives a six-symbol base62 code from the first 32 bits of the MD5
/// digest of `input`.
pub fn hash_to_base62(input: &str) -> ShortCode {
    let digest = Md5::digest(input.as_bytes());
    let prefix = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
    ShortCode::new_unchecked(encode(prefix))
}

/// Least significant digit first, right-padded with `'0'` when the value
/// runs out of digits early.
fn encode(mut value: u32) -> String {
    let mut code = String::with_capacity(CODE_LENGTH);
    while value > 0 && code.len() < CODE_LENGTH {
        code.push(char::from(ALPHABET[(value % 62) as usize]));
        value /= 62;
    }
    while code.len() < CODE_LENGTH {
        code.push(char::from(ALPHABET[0]));
    }
    code
}
