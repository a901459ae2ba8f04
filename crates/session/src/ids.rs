use std::sync::atomic::{AtomicU64, Ordering};

use crate::model::SessionKind;

const MAX_ID_LEN: usize = 128;

static FALLBACK_COUNTER: AtomicU64 = AtomicU64::new(0);

/// `<kind-prefix>_<unix-ms>_<8 hex>`.
pub fn generate(kind: SessionKind, now_ms: u64) -> String {
    format!("{}_{}_{:08x}", kind.id_prefix(), now_ms, random_u32(now_ms))
}

/// Ids double as directory names, so only `[A-Za-z0-9_-]` is accepted.
pub fn is_valid(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_ID_LEN
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

fn random_u32(seed: u64) -> u32 {
    let mut buf = [0u8; 4];
    match getrandom::getrandom(&mut buf) {
        Ok(()) => u32::from_le_bytes(buf),
        Err(err) => {
            log::warn!("OS randomness unavailable ({err}); using counter-derived id suffix");
            let n = FALLBACK_COUNTER.fetch_add(1, Ordering::Relaxed);
            let mixed = (seed ^ u64::from(std::process::id()) << 32)
                .wrapping_add(n.wrapping_mul(0x9E37_79B9_7F4A_7C15));
            (mixed ^ (mixed >> 32)) as u32
        }
    }
}
