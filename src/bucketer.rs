//! Bucketing: turning a context into a stable number in `[0, MAX_BUCKETED_NUMBER)`.
use std::io::Cursor;

use crate::{context::get_value_from_context, datafile::BucketBy, Context};

/// Bucketed numbers fall into `[0, MAX_BUCKETED_NUMBER)`. 100% maps to 100_000, which gives three
/// decimal digits of percentage precision.
pub const MAX_BUCKETED_NUMBER: u32 = 100_000;

const HASH_SEED: u32 = 1;
const MAX_HASH_VALUE: f64 = 4_294_967_296.0; // 2^32

const BUCKET_KEY_SEPARATOR: &str = ".";

/// Hash `bucket_key` into `[0, MAX_BUCKETED_NUMBER)`.
///
/// ```
/// # use featurevisor::bucketer::get_bucketed_number;
/// assert_eq!(get_bucketed_number("foo"), 20602);
/// ```
pub fn get_bucketed_number(bucket_key: &str) -> u32 {
    let hash = murmurhash3_32(bucket_key.as_bytes(), HASH_SEED);
    let ratio = hash as f64 / MAX_HASH_VALUE;
    (ratio * MAX_BUCKETED_NUMBER as f64).floor() as u32
}

/// Build the bucket key for a feature out of the context attributes listed in `bucket_by`.
///
/// Attributes missing from the context are skipped. The feature key is always the last part.
pub fn get_bucket_key(feature_key: &str, bucket_by: &BucketBy, context: &Context) -> String {
    let mut parts: Vec<String> = Vec::new();

    match bucket_by {
        BucketBy::Plain(attribute) => {
            if let Some(value) = get_value_from_context(context, attribute) {
                parts.push(value.to_bucket_key_part());
            }
        }
        BucketBy::And(attributes) => {
            parts.extend(
                attributes
                    .iter()
                    .filter_map(|attribute| get_value_from_context(context, attribute))
                    .map(|value| value.to_bucket_key_part()),
            );
        }
        BucketBy::Or { or } => {
            if let Some(value) = or
                .iter()
                .find_map(|attribute| get_value_from_context(context, attribute))
            {
                parts.push(value.to_bucket_key_part());
            }
        }
    }

    parts.push(feature_key.to_owned());
    parts.join(BUCKET_KEY_SEPARATOR)
}

/// MurmurHash3, x86 32-bit variant.
fn murmurhash3_32(data: &[u8], seed: u32) -> u32 {
    // Reading from an in-memory cursor does not fail.
    murmur3::murmur3_32(&mut Cursor::new(data), seed).unwrap_or_default()
}
