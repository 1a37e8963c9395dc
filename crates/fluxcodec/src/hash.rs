//! Structural hashing for cache keys.
//!
//! The hash is xxHash64 with seed 0 over a tagged, length-prefixed walk of the
//! value, so it is stable across processes and releases.

use std::hash::Hasher;

use twox_hash::XxHash64;

use crate::Value;

const SEED: u64 = 0;

/// Structural hash of one value.
pub fn hash_value(value: &Value) -> u64 {
    let mut h = XxHash64::with_seed(SEED);
    write_value(&mut h, value);
    h.finish()
}

/// Hash of a whole argument list, as used in result cache keys.
///
/// - no arguments: `0`
/// - one argument that is not a list: that argument's own hash
/// - anything else: an order-sensitive hash over every argument
pub fn generate_cache_key(args: &[Value]) -> u64 {
    match args {
        [] => 0,
        [single] if !single.is_list() => hash_value(single),
        _ => {
            let mut h = XxHash64::with_seed(SEED);
            h.write_u8(0xFF);
            h.write_u64(args.len() as u64);
            for arg in args {
                write_value(&mut h, arg);
            }
            h.finish()
        }
    }
}

fn write_value(h: &mut impl Hasher, value: &Value) {
    match value {
        Value::Null => h.write_u8(0),
        Value::Bool(b) => {
            h.write_u8(1);
            h.write_u8(u8::from(*b));
        }
        Value::Int(i) => {
            h.write_u8(2);
            h.write_i64(*i);
        }
        Value::Float(f) => {
            h.write_u8(3);
            h.write_u64(canonical_bits(*f));
        }
        Value::String(s) => {
            h.write_u8(4);
            write_bytes(h, s.as_bytes());
        }
        Value::Bytes(b) => {
            h.write_u8(5);
            write_bytes(h, b);
        }
        Value::List(items) => {
            h.write_u8(6);
            h.write_u64(items.len() as u64);
            for item in items {
                write_value(h, item);
            }
        }
        Value::Map(entries) => {
            h.write_u8(7);
            h.write_u64(entries.len() as u64);
            for (k, v) in entries {
                write_bytes(h, k.as_bytes());
                write_value(h, v);
            }
        }
    }
}

fn write_bytes(h: &mut impl Hasher, bytes: &[u8]) {
    h.write_u64(bytes.len() as u64);
    h.write(bytes);
}

// -0.0 == 0.0 and every NaN hash alike.
fn canonical_bits(f: f64) -> u64 {
    if f == 0.0 {
        0
    } else if f.is_nan() {
        f64::NAN.to_bits()
    } else {
        f.to_bits()
    }
}
