//! Deterministic, bounded-length client order ids.

use crate::domain::{Decimal, InstId, OrderTag, Side};
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU32, Ordering};

const BASE36: &[u8; 36] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const COUNTER_WIDTH: usize = 6;
const COUNTER_MODULUS: u32 = 36u32.pow(COUNTER_WIDTH as u32);
const HASH_CHARS: usize = 16;

/// Longest client id: a four-character tag + hash + counter.
pub const MAX_CLIENT_ID_LEN: usize = 4 + HASH_CHARS + COUNTER_WIDTH;

/// Generates client ids of the form tag + 16 hex chars + 6 base36 chars,
/// e.g. `GRID` + hash + counter. The leading tag lets an order whose tag
/// field was dropped still be classified.
///
/// The hash binds the id to the order's content and a process-lifetime seed;
/// the rolling counter keeps resubmissions of identical content distinct.
#[derive(Debug)]
pub struct ClientIdGenerator {
    seed: String,
    counter: AtomicU32,
}

impl ClientIdGenerator {
    pub fn new(seed: impl Into<String>) -> Self {
        Self {
            seed: seed.into(),
            counter: AtomicU32::new(0),
        }
    }

    /// Seed from `CLORD_SEED` when configured, otherwise random per process.
    pub fn from_seed_or_random(seed: Option<&str>) -> Self {
        match seed.map(str::trim).filter(|s| !s.is_empty()) {
            Some(s) => Self::new(s),
            None => {
                let random = uuid::Uuid::new_v4().simple().to_string();
                Self::new(&random[..8])
            }
        }
    }

    pub fn seed(&self) -> &str {
        &self.seed
    }

    /// Next id for an order. `price` is `None` for market orders.
    pub fn next(
        &self,
        inst: &InstId,
        side: Side,
        price: Option<Decimal>,
        size: Decimal,
        tag: OrderTag,
    ) -> String {
        let n = self.bump();
        let px = price.map_or_else(|| "MKT".to_string(), |p| p.to_canonical_string());
        let key = format!(
            "{}|{}|{}|{}|{}|{}",
            inst,
            side,
            px,
            size.to_canonical_string(),
            tag,
            self.seed
        );
        let digest = hex::encode(Sha256::digest(key.as_bytes()));
        format!("{}{}{}", tag, &digest[..HASH_CHARS], base36(n)).to_ascii_uppercase()
    }

    fn bump(&self) -> u32 {
        let prev = self
            .counter
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |c| {
                Some((c + 1) % COUNTER_MODULUS)
            })
            .unwrap_or(0);
        (prev + 1) % COUNTER_MODULUS
    }
}

fn base36(mut n: u32) -> String {
    let mut out = [b'0'; COUNTER_WIDTH];
    for slot in out.iter_mut().rev() {
        *slot = BASE36[(n % 36) as usize];
        n /= 36;
    }
    out.iter().map(|b| *b as char).collect()
}
