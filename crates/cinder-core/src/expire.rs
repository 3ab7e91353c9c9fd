//! Lazy and active expiration.
//!
//! Masters own expiration: they delete on access (lazy) or via the
//! periodic sampling cycle (active), and in both cases emit a synthetic
//! DEL/UNLINK to the propagation sink so replicas and the AOF converge.
//! Replicas never delete on their own — [`expire_if_needed`] only
//! reports the logical state and waits for the master's DEL to arrive.

use bytes::Bytes;

use crate::db::Database;
use crate::dropper::DropHandle;
use crate::propagate::{target, PropagationSink};
use crate::server::{EventClass, ServerContext};
use crate::time;

/// Keys sampled from each database's expire index per round.
const ACTIVE_SAMPLE_SIZE: usize = 20;

/// Smoothing divisor for the avg_ttl exponential moving average.
const AVG_TTL_SMOOTHING: f64 = 50.0;

/// Checks `key` for expiration and reclaims it when this node is
/// allowed to. Returns `true` if the key is logically expired.
///
/// The deletion is suppressed in three cases: persisted state is still
/// loading, a script has the clock pinned to its start time (the pinned
/// value is used for the comparison instead), or this node is a replica
/// — then the return value is advisory and the key stays until the
/// master's DEL arrives.
pub fn expire_if_needed(
    db: &mut Database,
    key: &Bytes,
    ctx: &mut ServerContext,
    sink: &mut dyn PropagationSink,
    dropper: Option<&DropHandle>,
) -> bool {
    let Some(when) = db.get_expire(key) else {
        return false;
    };
    if ctx.loading {
        return false;
    }
    let now = ctx.now_ms();
    if ctx.is_replica {
        return now > when;
    }
    if now <= when {
        return false;
    }
    delete_expired(db, key, ctx, sink, dropper);
    true
}

/// Reclaims a key whose TTL has passed: bumps the stat counter, emits
/// the synthetic delete, queues the `expired` notification, and deletes
/// synchronously or through the async-free queue per config.
fn delete_expired(
    db: &mut Database,
    key: &Bytes,
    ctx: &mut ServerContext,
    sink: &mut dyn PropagationSink,
    dropper: Option<&DropHandle>,
) {
    ctx.stats.expired_keys += 1;
    propagate_expire(db.id, key, ctx.lazy_expire, sink);
    ctx.notify(EventClass::Expired, "expired", key, db.id);
    if let Some(value) = db.delete(key) {
        if ctx.lazy_expire {
            if let Some(handle) = dropper {
                handle.defer_value(value);
            }
        }
    }
}

/// Emits the synthetic delete that centralizes expiry at the master.
fn propagate_expire(db_id: u32, key: &Bytes, lazy: bool, sink: &mut dyn PropagationSink) {
    let verb: &'static [u8] = if lazy { b"UNLINK" } else { b"DEL" };
    sink.feed(
        db_id,
        &[Bytes::from_static(verb), key.clone()],
        target::ALL,
    );
}

/// One active expiration cycle over all databases.
///
/// Samples up to [`ACTIVE_SAMPLE_SIZE`] random entries from each expire
/// index, reclaims the dead ones, and keeps working the same database
/// while more than 25% of a sample was expired. Bounded by
/// `time_limit_ms` of wall clock per call. Returns the number of keys
/// reclaimed.
pub fn active_expire_cycle(
    dbs: &mut [Database],
    ctx: &mut ServerContext,
    sink: &mut dyn PropagationSink,
    dropper: Option<&DropHandle>,
    time_limit_ms: u64,
) -> u64 {
    if ctx.is_replica || ctx.loading {
        return 0;
    }
    let start = time::now_ms();
    let mut total = 0u64;

    'dbs: for db in dbs {
        loop {
            if db.expires_len() == 0 {
                break;
            }
            let now = ctx.now_ms();
            let mut sampled = 0usize;
            let mut victims: Vec<Bytes> = Vec::new();
            let mut ttl_sum = 0.0f64;
            let mut ttl_count = 0usize;

            for _ in 0..ACTIVE_SAMPLE_SIZE.min(db.expires_len()) {
                let Some((key, when)) = db.expires.random_entry() else {
                    break;
                };
                sampled += 1;
                if *when <= now {
                    victims.push(key.clone());
                } else {
                    ttl_sum += (*when - now) as f64;
                    ttl_count += 1;
                }
            }

            // fold the surviving sample into the database's TTL average
            if ttl_count > 0 {
                let avg = ttl_sum / ttl_count as f64;
                if db.avg_ttl_ms == 0.0 {
                    db.avg_ttl_ms = avg;
                } else {
                    db.avg_ttl_ms += (avg - db.avg_ttl_ms) / AVG_TTL_SMOOTHING;
                }
            }

            let mut expired = 0usize;
            for key in victims {
                // re-checks the TTL: the sampler may hand out repeats
                if expire_if_needed(db, &key, ctx, sink, dropper) {
                    expired += 1;
                }
            }
            total += expired as u64;

            // under a quarter of the sample expired: clean enough
            if expired * 4 <= sampled {
                break;
            }
            if time::now_ms() - start >= time_limit_ms {
                break 'dbs;
            }
        }
        if time::now_ms() - start >= time_limit_ms {
            break;
        }
    }
    total
}
