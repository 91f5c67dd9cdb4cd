//! Password key derivation: PBKDF2-HMAC-SHA1, 4096 iterations, 16-byte
//! salt, 32-byte derived key.

use hmac::{Hmac, Mac};
use rand::RngCore;
use sha1::Sha1;

type HmacSha1 = Hmac<Sha1>;

pub const SALT_LEN: usize = 16;
pub const KEY_LEN: usize = 32;
const ITERATIONS: u32 = 4096;

/// Derive the storage key for a password and salt.
pub fn derive_key(password: &str, salt: &[u8]) -> [u8; KEY_LEN] {
    let mut key = [0u8; KEY_LEN];
    // SHA1 blocks are 20 bytes; two blocks cover the 32-byte key.
    let mut offset = 0;
    let mut block_index: u32 = 1;
    while offset < KEY_LEN {
        let block = pbkdf2_block(password.as_bytes(), salt, block_index);
        let take = block.len().min(KEY_LEN - offset);
        key[offset..offset + take].copy_from_slice(&block[..take]);
        offset += take;
        block_index += 1;
    }
    key
}

fn pbkdf2_block(password: &[u8], salt: &[u8], index: u32) -> [u8; 20] {
    let mut mac = HmacSha1::new_from_slice(password).expect("hmac accepts any key length");
    mac.update(salt);
    mac.update(&index.to_be_bytes());
    let mut u: [u8; 20] = mac.finalize().into_bytes().into();
    let mut out = u;
    for _ in 1..ITERATIONS {
        let mut mac = HmacSha1::new_from_slice(password).expect("hmac accepts any key length");
        mac.update(&u);
        u = mac.finalize().into_bytes().into();
        for (o, b) in out.iter_mut().zip(u.iter()) {
            *o ^= b;
        }
    }
    out
}

/// Salt and derive a fresh password.
pub fn hash_password(password: &str) -> (Vec<u8>, Vec<u8>) {
    let mut salt = vec![0u8; SALT_LEN];
    rand::thread_rng().fill_bytes(&mut salt);
    let key = derive_key(password, &salt).to_vec();
    (salt, key)
}

pub fn verify(password: &str, salt: &[u8], key: &[u8]) -> bool {
    derive_key(password, salt).as_slice() == key
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derivation_is_deterministic_and_salted() {
        let a = derive_key("hunter2 hunter2", b"0123456789abcdef");
        let b = derive_key("hunter2 hunter2", b"0123456789abcdef");
        let c = derive_key("hunter2 hunter2", b"fedcba9876543210");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn rfc6070_style_vector() {
        // PBKDF2-HMAC-SHA1("password", "salt", 4096) first bytes, per the
        // RFC 6070 test vectors.
        let key = derive_key("password", b"salt");
        assert_eq!(
            &key[..20],
            &[
                0x4b, 0x00, 0x79, 0x01, 0xb7, 0x65, 0x48, 0x9a, 0xbe, 0xad, 0x49, 0xd9, 0x26,
                0xf7, 0x21, 0xd0, 0x65, 0xa4, 0x29, 0xc1
            ]
        );
    }

    #[test]
    fn round_trip_verification() {
        let (salt, key) = hash_password("correct horse");
        assert!(verify("correct horse", &salt, &key));
        assert!(!verify("incorrect horse", &salt, &key));
    }
}
