pub mod codes;

pub use codes::{new_lottery_nonce, new_qr_code, promo_code_digest, promo_code_matches};
