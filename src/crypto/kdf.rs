//! HMAC helpers over the protocol context strings.

use hmac::{Hmac, Mac};
use sha2::Sha256;

/// Compute `HMAC-SHA256(key, context)`.
///
/// Both sides of the protocol key decoy selection and the Min transport
/// connect tag this way, with the shared secret as the key.
pub fn conjure_hmac(key: &[u8], context: &str) -> [u8; 32] {
    let mut mac = Hmac::<Sha256>::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(context.as_bytes());
    mac.finalize().into_bytes().into()
}
