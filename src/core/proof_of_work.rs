use crate::core::object::{BmObject, ProtocolVersion, NONCE_LEN};
use crate::error::{BitmessageError, Result};
use crate::utils::{describe_duration, sha512_digest};
use log::{debug, info};
use num_bigint::BigUint;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Floor applied to the remaining time to live when weighting the target.
pub const MIN_TTL: u64 = 300;
const TTL_DIVISOR: u64 = 1 << 16;
/// Nonces each worker tries between cancellation checks.
const CANCEL_CHECK_INTERVAL: u64 = 1 << 12;

/// Target formulas. The legacy one ignores how long an object lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowFormula {
    Legacy,
    TimeWeighted,
}

/// Difficulty plus the protocol version, which fixes both the target
/// formula and the header layout the nonce is computed over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PowParams {
    pub nonce_trials_per_byte: u64,
    pub extra_bytes: u64,
    pub protocol: ProtocolVersion,
}

impl PowParams {
    pub fn new(nonce_trials_per_byte: u64, extra_bytes: u64) -> PowParams {
        PowParams {
            nonce_trials_per_byte,
            extra_bytes,
            protocol: ProtocolVersion::default(),
        }
    }

    pub fn with_protocol(mut self, protocol: ProtocolVersion) -> PowParams {
        self.protocol = protocol;
        self
    }

    pub fn formula(&self) -> PowFormula {
        self.protocol.pow_formula()
    }

    /// Raises each difficulty value to at least `floor`'s.
    pub fn at_least(self, floor: &PowParams) -> PowParams {
        PowParams {
            nonce_trials_per_byte: self.nonce_trials_per_byte.max(floor.nonce_trials_per_byte),
            extra_bytes: self.extra_bytes.max(floor.extra_bytes),
            protocol: self.protocol,
        }
    }
}

/// 2^64 divided by the work demanded for a payload of `payload_len` bytes
/// (nonce excluded).
pub fn calculate_target(
    payload_len: usize,
    expires: u64,
    now: u64,
    params: &PowParams,
) -> Result<u64> {
    let length = BigUint::from(payload_len as u64 + NONCE_LEN as u64)
        + BigUint::from(params.extra_bytes);
    let work = match params.formula() {
        PowFormula::Legacy => length,
        PowFormula::TimeWeighted => {
            let ttl = expires.saturating_sub(now).max(MIN_TTL);
            &length + &length * BigUint::from(ttl) / BigUint::from(TTL_DIVISOR)
        }
    };
    let denominator = BigUint::from(params.nonce_trials_per_byte) * work;
    if denominator == BigUint::from(0u32) {
        return Err(BitmessageError::DegenerateTarget);
    }
    let target = (BigUint::from(1u32) << 64) / denominator;
    if target == BigUint::from(0u32) {
        return Err(BitmessageError::DegenerateTarget);
    }
    Ok(u64::try_from(&target).unwrap_or(u64::MAX))
}

/// Shared stop signal for a running search.
#[derive(Debug, Clone, Default)]
pub struct PowCancel(Arc<AtomicBool>);

impl PowCancel {
    pub fn new() -> PowCancel {
        PowCancel::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

pub struct ProofOfWork {
    initial_hash: Vec<u8>,
    target: u64,
}

impl ProofOfWork {
    pub fn new(payload_without_nonce: &[u8], target: u64) -> Result<ProofOfWork> {
        if target == 0 {
            return Err(BitmessageError::DegenerateTarget);
        }
        Ok(ProofOfWork {
            initial_hash: sha512_digest(payload_without_nonce),
            target,
        })
    }

    /// Covers the object's bytes after the nonce, laid out for
    /// `params.protocol`.
    pub fn for_object(object: &BmObject, params: &PowParams, now: u64) -> Result<ProofOfWork> {
        let payload = object.payload_without_nonce_with(params.protocol)?;
        let target = calculate_target(payload.len(), object.expires, now, params)?;
        ProofOfWork::new(&payload, target)
    }

    pub fn target(&self) -> u64 {
        self.target
    }

    fn prepare_data(&self, nonce: u64) -> Vec<u8> {
        let mut data = Vec::with_capacity(NONCE_LEN + self.initial_hash.len());
        data.extend(nonce.to_be_bytes());
        data.extend_from_slice(&self.initial_hash);
        data
    }

    /// First 8 bytes of SHA512(SHA512(nonce ‖ SHA512(payload))).
    pub fn trial_value(&self, nonce: u64) -> u64 {
        let hash = sha512_digest(&sha512_digest(&self.prepare_data(nonce)));
        let mut first = [0u8; 8];
        first.copy_from_slice(&hash[..8]);
        u64::from_be_bytes(first)
    }

    pub fn validate(&self, nonce: u64) -> bool {
        self.trial_value(nonce) <= self.target
    }

    /// Searches upward from `start` on `workers` threads, each taking every
    /// `workers`-th nonce. Returns the smallest valid nonce at or above
    /// `start`, so a given start always yields the same answer.
    pub fn run_from(&self, start: u64, workers: usize, cancel: &PowCancel) -> Result<u64> {
        let workers = workers.max(1) as u64;
        let best = AtomicU64::new(u64::MAX);
        let started = Instant::now();

        std::thread::scope(|scope| {
            for offset in 0..workers {
                let best = &best;
                scope.spawn(move || self.search_stripe(start, offset, workers, best, cancel));
            }
        });

        let nonce = best.load(Ordering::SeqCst);
        if nonce == u64::MAX {
            if cancel.is_cancelled() {
                debug!("POW search cancelled");
                return Err(BitmessageError::PowCancelled);
            }
            return Err(BitmessageError::PowInvalid);
        }
        info!(
            "POW found nonce {nonce} in {}",
            describe_duration(started.elapsed().as_secs())
        );
        Ok(nonce)
    }

    pub fn run(&self, workers: usize, cancel: &PowCancel) -> Result<u64> {
        self.run_from(0, workers, cancel)
    }

    fn search_stripe(
        &self,
        start: u64,
        offset: u64,
        stride: u64,
        best: &AtomicU64,
        cancel: &PowCancel,
    ) {
        let mut nonce = match start.checked_add(offset) {
            Some(nonce) => nonce,
            None => return,
        };
        let mut tried: u64 = 0;
        while nonce < best.load(Ordering::Relaxed) {
            if tried % CANCEL_CHECK_INTERVAL == 0 && cancel.is_cancelled() {
                return;
            }
            if self.validate(nonce) {
                best.fetch_min(nonce, Ordering::SeqCst);
                return;
            }
            tried += 1;
            nonce = match nonce.checked_add(stride) {
                Some(next) => next,
                None => return,
            };
        }
    }
}

/// Finds a nonce for `payload_without_nonce`, searching from zero on one thread.
pub fn do_pow(payload_without_nonce: &[u8], expires: u64, now: u64, params: &PowParams) -> Result<u64> {
    let target = calculate_target(payload_without_nonce.len(), expires, now, params)?;
    ProofOfWork::new(payload_without_nonce, target)?.run(1, &PowCancel::new())
}

/// Exact inverse of [`do_pow`] for the same parameters.
pub fn check_pow(
    payload_without_nonce: &[u8],
    nonce: u64,
    expires: u64,
    now: u64,
    params: &PowParams,
) -> Result<bool> {
    let target = calculate_target(payload_without_nonce.len(), expires, now, params)?;
    Ok(ProofOfWork::new(payload_without_nonce, target)?.validate(nonce))
}

/// Fills in `object.nonce`. Starts at a random point when `random_start`
/// is set so parallel senders do not duplicate work.
pub fn stamp_object(
    object: &mut BmObject,
    params: &PowParams,
    now: u64,
    workers: usize,
    random_start: bool,
    cancel: &PowCancel,
) -> Result<()> {
    let pow = ProofOfWork::for_object(object, params, now)?;
    let start = if random_start {
        rand::random::<u64>() >> 1
    } else {
        0
    };
    debug!(
        "Stamping type {} object, target {}, {} workers",
        object.object_type,
        pow.target(),
        workers
    );
    object.nonce = pow.run_from(start, workers, cancel)?;
    Ok(())
}

/// Rejects objects whose nonce does not meet the target for `params`.
pub fn verify_object(object: &BmObject, params: &PowParams, now: u64) -> Result<()> {
    if ProofOfWork::for_object(object, params, now)?.validate(object.nonce) {
        Ok(())
    } else {
        Err(BitmessageError::PowInvalid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::object::ObjectType;

    fn easy() -> PowParams {
        PowParams::new(1, 1)
    }

    #[test]
    fn test_target_formulas() {
        // L = 100 + 8 + 1000 = 1108
        let legacy = PowParams::new(1000, 1000).with_protocol(ProtocolVersion::V2);
        assert_eq!(
            calculate_target(100, 0, 0, &legacy).unwrap() as u128,
            (1u128 << 64) / (1000 * 1108)
        );

        let weighted = PowParams::new(1000, 1000);
        let now = 1_000_000;
        let ttl = 4 * 86_400;
        let work = 1108u128 + 1108u128 * ttl as u128 / 65_536;
        assert_eq!(
            calculate_target(100, now + ttl, now, &weighted).unwrap() as u128,
            (1u128 << 64) / (1000 * work)
        );
    }

    #[test]
    fn test_short_ttl_uses_floor() {
        let params = easy();
        assert_eq!(
            calculate_target(50, 0, 1_000, &params).unwrap(),
            calculate_target(50, 1_000 + MIN_TTL, 1_000, &params).unwrap()
        );
    }

    #[test]
    fn test_degenerate_targets() {
        assert_eq!(
            calculate_target(10, 0, 0, &PowParams::new(0, 1000)),
            Err(BitmessageError::DegenerateTarget)
        );
        assert_eq!(
            ProofOfWork::new(b"x", 0).err(),
            Some(BitmessageError::DegenerateTarget)
        );
        // Work above 2^64 leaves nothing to search for
        assert_eq!(
            calculate_target(10, 0, 0, &PowParams::new(u64::MAX, u64::MAX)),
            Err(BitmessageError::DegenerateTarget)
        );
    }

    #[test]
    fn test_do_and_check_pow() {
        let payload = b"time stream ciphertext".to_vec();
        let now = 1_700_000_000;
        let expires = now + 3_600;
        let nonce = do_pow(&payload, expires, now, &easy()).unwrap();
        assert!(check_pow(&payload, nonce, expires, now, &easy()).unwrap());
        let mut altered = payload.clone();
        altered[0] ^= 1;
        let target = calculate_target(payload.len(), expires, now, &easy()).unwrap();
        let pow = ProofOfWork::new(&altered, target).unwrap();
        assert_eq!(pow.validate(nonce), pow.trial_value(nonce) <= target);
    }

    #[test]
    fn test_found_nonce_is_the_first_valid_one() {
        // about one nonce in 128 passes, so nonce 0 rarely does
        let params = PowParams::new(1, 90);
        let now = 1_700_000_000;
        let expires = now + 3_600;
        let (payload, nonce) = (0u8..64)
            .map(|i| vec![i; 24])
            .map(|payload| {
                let nonce = do_pow(&payload, expires, now, &params).unwrap();
                (payload, nonce)
            })
            .find(|(_, nonce)| *nonce > 0)
            .unwrap();
        assert!(check_pow(&payload, nonce, expires, now, &params).unwrap());
        assert!(!check_pow(&payload, nonce - 1, expires, now, &params).unwrap());
        assert!((0..nonce).all(|n| !check_pow(&payload, n, expires, now, &params).unwrap()));
    }

    #[test]
    fn test_parallel_search_finds_smallest_nonce() {
        let payload = vec![42u8; 64];
        let pow = ProofOfWork::new(&payload, u64::MAX / 5_000).unwrap();
        let single = pow.run(1, &PowCancel::new()).unwrap();
        let parallel = pow.run(4, &PowCancel::new()).unwrap();
        assert_eq!(single, parallel);
        assert!((0..single).all(|n| !pow.validate(n)));
    }

    #[test]
    fn test_cancelled_search() {
        let pow = ProofOfWork::new(b"never", 1).unwrap();
        let cancel = PowCancel::new();
        cancel.cancel();
        assert_eq!(pow.run(2, &cancel), Err(BitmessageError::PowCancelled));
    }

    #[test]
    fn test_cancel_from_another_thread() {
        let pow = ProofOfWork::new(b"practically impossible", 1).unwrap();
        let cancel = PowCancel::new();
        let remote = cancel.clone();
        let stopper = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(50));
            remote.cancel();
        });
        assert_eq!(pow.run(2, &cancel), Err(BitmessageError::PowCancelled));
        stopper.join().unwrap();
    }

    #[test]
    fn test_stamp_and_verify_object() {
        let now = 1_700_000_000;
        let mut object = BmObject::new(ObjectType::Getpubkey, 4, 1, now + 7_200, vec![5; 32]);
        stamp_object(&mut object, &easy(), now, 2, true, &PowCancel::new()).unwrap();
        verify_object(&object, &easy(), now).unwrap();

        object.body[0] ^= 1;
        let strict = PowParams::new(1_000_000, 1_000);
        assert_eq!(
            verify_object(&object, &strict, now),
            Err(BitmessageError::PowInvalid)
        );
    }

    #[test]
    fn test_legacy_stamp_holds_on_legacy_wire_bytes() {
        let now = 1_700_000_000;
        let legacy = easy().with_protocol(ProtocolVersion::V2);
        let mut object = BmObject::new(ObjectType::Getpubkey, 4, 1, now + 7_200, vec![7; 32]);
        stamp_object(&mut object, &legacy, now, 2, false, &PowCancel::new()).unwrap();

        let wire = object.to_bytes_with(ProtocolVersion::V2).unwrap();
        let parsed = BmObject::parse_with(&wire, ProtocolVersion::V2).unwrap();
        verify_object(&parsed, &legacy, now).unwrap();
        assert!(check_pow(
            &parsed.payload_without_nonce_with(ProtocolVersion::V2).unwrap(),
            parsed.nonce,
            parsed.expires,
            now,
            &legacy
        )
        .unwrap());
        assert_eq!(&wire[8..], parsed.payload_without_nonce_with(ProtocolVersion::V2).unwrap());
    }

    #[test]
    fn test_legacy_header_must_fit_four_bytes() {
        let legacy = easy().with_protocol(ProtocolVersion::V2);
        let object = BmObject::new(ObjectType::Getpubkey, 4, 1, u64::from(u32::MAX) + 1, vec![1; 32]);
        assert!(matches!(
            ProofOfWork::for_object(&object, &legacy, 0),
            Err(BitmessageError::Format(_))
        ));
    }

    #[test]
    fn test_at_least_raises_difficulty() {
        let demanded = PowParams::new(500, 2_000).at_least(&PowParams::new(1_000, 1_000));
        assert_eq!(demanded.nonce_trials_per_byte, 1_000);
        assert_eq!(demanded.extra_bytes, 2_000);
        assert_eq!(demanded.formula(), PowFormula::TimeWeighted);
    }
}
