//! The value header: payload, type/encoding tags, and the 24-bit
//! access-metadata field shared by the LRU and LFU policies.
//!
//! Values are shared by reference count (`Arc`); a handler that needs to
//! mutate a payload in place goes through `Arc::make_mut`, which clones
//! exactly when the refcount is above one. The access field is an
//! `AtomicU32` (relaxed) so read paths can stamp it through a shared
//! handle without taking a mutable borrow of the keyspace.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use rand::Rng;

use crate::set::SetValue;
use crate::time;

/// Shared handle to a stored value. `Arc::strong_count` is the refcount
/// of the data model; dropping the last handle frees the payload.
pub type SharedObject = Arc<Object>;

/// Only the low 24 bits of the access field are meaningful.
const ACCESS_MASK: u32 = 0x00ff_ffff;

/// LRU clock resolution in milliseconds.
const LRU_CLOCK_RESOLUTION_MS: u64 = 1000;

/// Counter value assigned to newly created objects in LFU mode, so a
/// fresh key does not look like an immediate eviction candidate.
pub const LFU_INIT_VAL: u8 = 5;

/// How object access recency/frequency is recorded, fixed at server
/// configuration time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessPolicy {
    /// 24-bit truncated clock of the last access, 1s resolution.
    Lru,
    /// 16-bit minutes timestamp plus 8-bit logarithmic counter.
    Lfu {
        /// Steepness of the probabilistic increment; higher values make
        /// the counter harder to grow.
        log_factor: u8,
        /// Minutes per single counter decay step. Zero disables decay.
        decay_minutes: u16,
    },
}

impl Default for AccessPolicy {
    fn default() -> Self {
        AccessPolicy::Lru
    }
}

/// The logical datatype of a value, as reported by TYPE.
///
/// All six tags exist even though only strings and sets are
/// constructible in this crate; the other datatypes live elsewhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    String,
    List,
    Set,
    ZSet,
    Hash,
    Module,
}

impl Kind {
    pub fn as_str(self) -> &'static str {
        match self {
            Kind::String => "string",
            Kind::List => "list",
            Kind::Set => "set",
            Kind::ZSet => "zset",
            Kind::Hash => "hash",
            Kind::Module => "module",
        }
    }
}

/// A stored payload.
#[derive(Debug, Clone)]
pub enum Value {
    /// Binary-safe string data.
    Str(Bytes),
    /// A set, in either of its two encodings.
    Set(SetValue),
}

impl Value {
    pub fn kind(&self) -> Kind {
        match self {
            Value::Str(_) => Kind::String,
            Value::Set(_) => Kind::Set,
        }
    }
}

/// A refcounted value with its access metadata.
#[derive(Debug)]
pub struct Object {
    access: AtomicU32,
    value: Value,
}

impl Clone for Object {
    fn clone(&self) -> Self {
        Object {
            access: AtomicU32::new(self.access.load(Ordering::Relaxed)),
            value: self.value.clone(),
        }
    }
}

impl Object {
    /// Creates an object with its access field stamped for `policy`.
    pub fn new(value: Value, policy: AccessPolicy, now_ms: u64) -> Object {
        let access = match policy {
            AccessPolicy::Lru => lru_clock(now_ms),
            // start at LFU_INIT_VAL so new objects survive their first
            // brush with the eviction sampler
            AccessPolicy::Lfu { .. } => {
                ((time::now_minutes(now_ms) as u32) << 8) | LFU_INIT_VAL as u32
            }
        };
        Object {
            access: AtomicU32::new(access),
            value,
        }
    }

    /// Convenience constructor for a string payload.
    pub fn string(data: impl Into<Bytes>, policy: AccessPolicy, now_ms: u64) -> Object {
        Object::new(Value::Str(data.into()), policy, now_ms)
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Mutable payload access. Callers hold the unique `Arc` (or have
    /// gone through `Arc::make_mut`), so this is plain field access.
    pub fn value_mut(&mut self) -> &mut Value {
        &mut self.value
    }

    pub fn kind(&self) -> Kind {
        self.value.kind()
    }

    /// The internal representation name, as reported by OBJECT ENCODING.
    pub fn encoding(&self) -> &'static str {
        match &self.value {
            Value::Str(data) => {
                if parse_strict_i64(data).is_some() {
                    "int"
                } else if data.len() <= 44 {
                    "embstr"
                } else {
                    "raw"
                }
            }
            Value::Set(set) => set.encoding_name(),
        }
    }

    /// Raw 24-bit access field.
    pub fn access_raw(&self) -> u32 {
        self.access.load(Ordering::Relaxed) & ACCESS_MASK
    }

    /// Records an access at `now_ms` under `policy`.
    ///
    /// In LRU mode this stamps the truncated clock. In LFU mode it
    /// first decays the counter by the minutes elapsed since the stored
    /// timestamp, then increments it with probability
    /// `1 / ((counter - LFU_INIT_VAL) * log_factor + 1)`, then restamps.
    /// Callers skip this entirely while a persistence child is active.
    pub fn touch(&self, policy: AccessPolicy, now_ms: u64) {
        match policy {
            AccessPolicy::Lru => {
                self.access.store(lru_clock(now_ms), Ordering::Relaxed);
            }
            AccessPolicy::Lfu {
                log_factor,
                decay_minutes,
            } => {
                let now_min = time::now_minutes(now_ms);
                let counter = self.lfu_decayed_counter(now_min, decay_minutes);
                let counter = lfu_log_incr(counter, log_factor);
                self.access
                    .store(((now_min as u32) << 8) | counter as u32, Ordering::Relaxed);
            }
        }
    }

    /// The LFU counter after applying time decay, without storing it.
    pub fn lfu_decayed_counter(&self, now_min: u16, decay_minutes: u16) -> u8 {
        let access = self.access.load(Ordering::Relaxed);
        let stamped = (access >> 8) as u16;
        let counter = (access & 0xff) as u8;
        if decay_minutes == 0 {
            return counter;
        }
        let periods = time::minutes_elapsed(now_min, stamped) / decay_minutes as u64;
        counter.saturating_sub(periods.min(u8::MAX as u64) as u8)
    }

    /// Seconds since the stored LRU stamp, accounting for 24-bit
    /// wraparound. Only meaningful in LRU mode.
    pub fn idle_seconds(&self, now_ms: u64) -> u64 {
        let now = lru_clock(now_ms);
        let then = self.access_raw();
        let ticks = if now >= then {
            (now - then) as u64
        } else {
            (ACCESS_MASK as u64 + 1) - then as u64 + now as u64
        };
        ticks * LRU_CLOCK_RESOLUTION_MS / 1000
    }

    /// Copies another object's access field. Used by overwrite so the
    /// replacement value inherits the old key's history.
    pub fn inherit_access(&self, from: &Object) {
        self.access
            .store(from.access.load(Ordering::Relaxed), Ordering::Relaxed);
    }
}

/// The truncated LRU clock for a given time.
fn lru_clock(now_ms: u64) -> u32 {
    ((now_ms / LRU_CLOCK_RESOLUTION_MS) as u32) & ACCESS_MASK
}

/// Probabilistic logarithmic counter increment, saturating at 255.
fn lfu_log_incr(counter: u8, log_factor: u8) -> u8 {
    if counter == u8::MAX {
        return u8::MAX;
    }
    let base = counter.saturating_sub(LFU_INIT_VAL) as f64;
    let p = 1.0 / (base * log_factor as f64 + 1.0);
    if rand::rng().random::<f64>() < p {
        counter + 1
    } else {
        counter
    }
}

/// Strict decimal parse: the bytes must be the canonical base-10
/// rendering of an `i64` (no sign prefix `+`, no leading zeros, no
/// whitespace). This is the representability test for the intset
/// encoding and the "int" string encoding.
pub fn parse_strict_i64(bytes: &[u8]) -> Option<i64> {
    let text = std::str::from_utf8(bytes).ok()?;
    let value: i64 = text.parse().ok()?;
    // parse() is lenient about "+1" and "007"; round-trip to reject them
    if itoa_eq(value, text) {
        Some(value)
    } else {
        None
    }
}

fn itoa_eq(value: i64, text: &str) -> bool {
    let mut buf = [0u8; 20];
    let mut n = value.unsigned_abs();
    let mut pos = buf.len();
    loop {
        pos -= 1;
        buf[pos] = b'0' + (n % 10) as u8;
        n /= 10;
        if n == 0 {
            break;
        }
    }
    if value < 0 {
        pos -= 1;
        buf[pos] = b'-';
    }
    text.as_bytes() == &buf[pos..]
}

#[cfg(test)]
mod tests {
    use super::*;

    // log_factor 0 makes every increment certain, which keeps these
    // tests deterministic
    const LFU: AccessPolicy = AccessPolicy::Lfu {
        log_factor: 0,
        decay_minutes: 1,
    };

    #[test]
    fn strict_parse_accepts_canonical() {
        assert_eq!(parse_strict_i64(b"0"), Some(0));
        assert_eq!(parse_strict_i64(b"42"), Some(42));
        assert_eq!(parse_strict_i64(b"-7"), Some(-7));
        assert_eq!(
            parse_strict_i64(b"9223372036854775807"),
            Some(i64::MAX)
        );
        assert_eq!(
            parse_strict_i64(b"-9223372036854775808"),
            Some(i64::MIN)
        );
    }

    #[test]
    fn strict_parse_rejects_non_canonical() {
        assert_eq!(parse_strict_i64(b"+1"), None);
        assert_eq!(parse_strict_i64(b"01"), None);
        assert_eq!(parse_strict_i64(b" 1"), None);
        assert_eq!(parse_strict_i64(b"1 "), None);
        assert_eq!(parse_strict_i64(b"1.0"), None);
        assert_eq!(parse_strict_i64(b"hello"), None);
        assert_eq!(parse_strict_i64(b""), None);
        assert_eq!(parse_strict_i64(b"9223372036854775808"), None);
        assert_eq!(parse_strict_i64(b"\xff\xfe"), None);
    }

    #[test]
    fn string_encodings() {
        let now = time::now_ms();
        assert_eq!(Object::string("123", AccessPolicy::Lru, now).encoding(), "int");
        assert_eq!(Object::string("abc", AccessPolicy::Lru, now).encoding(), "embstr");
        let long = "x".repeat(45);
        assert_eq!(Object::string(long, AccessPolicy::Lru, now).encoding(), "raw");
    }

    #[test]
    fn lru_touch_stamps_clock() {
        let obj = Object::string("v", AccessPolicy::Lru, 0);
        obj.touch(AccessPolicy::Lru, 90_000);
        assert_eq!(obj.access_raw(), 90);
        assert_eq!(obj.idle_seconds(150_000), 60);
    }

    #[test]
    fn lru_idle_survives_wraparound() {
        let obj = Object::string("v", AccessPolicy::Lru, 0);
        // stamp near the top of the 24-bit clock
        let almost_wrapped = (ACCESS_MASK as u64 - 1) * 1000;
        obj.touch(AccessPolicy::Lru, almost_wrapped);
        // 10 ticks later the clock has wrapped past zero
        assert_eq!(obj.idle_seconds(almost_wrapped + 10_000), 10);
    }

    #[test]
    fn lfu_counter_caps_at_255() {
        let obj = Object::string("v", LFU, 0);
        for _ in 0..1000 {
            obj.touch(LFU, 0);
        }
        assert_eq!(obj.access_raw() & 0xff, 255);
    }

    #[test]
    fn lfu_counter_never_decreases_on_touch() {
        let steep = AccessPolicy::Lfu {
            log_factor: 10,
            decay_minutes: 0,
        };
        let obj = Object::string("v", steep, 0);
        let mut last = obj.access_raw() & 0xff;
        for _ in 0..5000 {
            obj.touch(steep, 0);
            let now = obj.access_raw() & 0xff;
            assert!(now >= last && now <= 255);
            last = now;
        }
    }

    #[test]
    fn lfu_counter_decays_with_time() {
        let obj = Object::string("v", LFU, 0);
        // drive the counter up
        for _ in 0..1000 {
            obj.touch(LFU, 0);
        }
        // 60 minutes later with decay_minutes=1 the counter is 60 lower
        let decayed = obj.lfu_decayed_counter(60, 1);
        assert_eq!(decayed, 255 - 60);
        // without elapsed time nothing decays
        assert_eq!(obj.lfu_decayed_counter(0, 1), 255);
    }

    #[test]
    fn lfu_decay_saturates_at_zero() {
        let obj = Object::string("v", LFU, 0);
        assert_eq!(obj.lfu_decayed_counter(0x7fff, 1), 0);
    }

    #[test]
    fn make_mut_clones_only_when_shared() {
        let now = time::now_ms();
        let mut shared: SharedObject = Arc::new(Object::string("v", AccessPolicy::Lru, now));
        let other = Arc::clone(&shared);
        assert_eq!(Arc::strong_count(&shared), 2);

        // shared: make_mut must clone rather than mutate in place
        *Arc::make_mut(&mut shared).value_mut() = Value::Str(Bytes::from_static(b"w"));
        assert!(matches!(other.value(), Value::Str(b) if b == "v"));
        assert!(matches!(shared.value(), Value::Str(b) if b == "w"));
        assert_eq!(Arc::strong_count(&other), 1);
        assert_eq!(Arc::strong_count(&shared), 1);
    }

    #[test]
    fn inherit_access_copies_field() {
        let old = Object::string("old", AccessPolicy::Lru, 0);
        old.touch(AccessPolicy::Lru, 123_000);
        let new = Object::string("new", AccessPolicy::Lru, 999_000);
        new.inherit_access(&old);
        assert_eq!(new.access_raw(), old.access_raw());
    }
}
