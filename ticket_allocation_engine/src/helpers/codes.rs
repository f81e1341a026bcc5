use blake2::{Blake2b512, Digest};
use rand::{distributions::Alphanumeric, Rng};
use tas_common::Secret;

pub const QR_CODE_LEN: usize = 16;

/// Generates the opaque 16-character entry token printed on a ticket. Collisions are possible in
/// principle; the tickets table carries a uniqueness constraint as the backstop.
pub fn new_qr_code() -> String {
    rand::thread_rng().sample_iter(&Alphanumeric).take(QR_CODE_LEN).map(char::from).collect()
}

/// Draws the per-release nonce that seeds the lottery shuffle. Fixed at release creation so a
/// re-run of the policy over the same queue is reproducible.
pub fn new_lottery_nonce() -> i64 {
    rand::thread_rng().gen()
}

/// Digest stored on promo-gated releases. The clear-text code never touches the database.
pub fn promo_code_digest(code: &str) -> String {
    let hash = Blake2b512::digest(code.as_bytes());
    hash.iter().fold(String::with_capacity(hash.len() * 2), |mut s, b| {
        use std::fmt::Write;
        let _ = write!(s, "{b:02x}");
        s
    })
}

pub fn promo_code_matches(code: &Secret<String>, digest: &str) -> bool {
    promo_code_digest(code.reveal()) == digest
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn qr_codes_are_sixteen_alphanumeric_chars() {
        for _ in 0..100 {
            let qr = new_qr_code();
            assert_eq!(qr.len(), QR_CODE_LEN);
            assert!(qr.chars().all(|c| c.is_ascii_alphanumeric()));
        }
    }

    #[test]
    fn digest_is_stable_and_code_sensitive() {
        let d1 = promo_code_digest("EARLYBIRD");
        let d2 = promo_code_digest("EARLYBIRD");
        let d3 = promo_code_digest("earlybird");
        assert_eq!(d1, d2);
        assert_ne!(d1, d3);
        assert_eq!(d1.len(), 128);
    }

    #[test]
    fn promo_codes_verify_against_their_digest() {
        let digest = promo_code_digest("VIP-2024");
        assert!(promo_code_matches(&Secret::new("VIP-2024".to_string()), &digest));
        assert!(!promo_code_matches(&Secret::new("VIP-2025".to_string()), &digest));
    }
}
