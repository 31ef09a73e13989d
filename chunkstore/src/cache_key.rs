//! Cache key encoding.
//!
//! A cache key is a deterministic, injective encoding of a sequence of values.
//! Each value is written with a type tag and, for variable-length values, a length prefix, so distinct sequences never encode to the same key.

use serde_json::Value;

/// Encodes values into a cache key.
#[derive(Debug, Default, Clone)]
pub struct CacheKeyEncoder {
    key: String,
}

impl CacheKeyEncoder {
    /// Create an empty encoder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `value`.
    pub fn encode(&mut self, value: &(impl EncodeCacheKey + ?Sized)) -> &mut Self {
        value.encode_cache_key(self);
        self
    }

    fn write_tagged(&mut self, tag: char, value: &str) {
        self.key.push(tag);
        self.key.push_str(itoa::Buffer::new().format(value.len()));
        self.key.push(':');
        self.key.push_str(value);
    }

    /// The encoded key.
    #[must_use]
    pub fn finish(self) -> String {
        self.key
    }
}

/// A value that can be encoded into a cache key.
pub trait EncodeCacheKey {
    /// Append the value to `encoder`.
    fn encode_cache_key(&self, encoder: &mut CacheKeyEncoder);
}

impl EncodeCacheKey for str {
    fn encode_cache_key(&self, encoder: &mut CacheKeyEncoder) {
        encoder.write_tagged('s', self);
    }
}

impl EncodeCacheKey for String {
    fn encode_cache_key(&self, encoder: &mut CacheKeyEncoder) {
        self.as_str().encode_cache_key(encoder);
    }
}

impl EncodeCacheKey for u64 {
    fn encode_cache_key(&self, encoder: &mut CacheKeyEncoder) {
        encoder.key.push('u');
        encoder.key.push_str(itoa::Buffer::new().format(*self));
        encoder.key.push(';');
    }
}

impl EncodeCacheKey for bool {
    fn encode_cache_key(&self, encoder: &mut CacheKeyEncoder) {
        encoder.key.push(if *self { 'T' } else { 'F' });
    }
}

impl EncodeCacheKey for Value {
    fn encode_cache_key(&self, encoder: &mut CacheKeyEncoder) {
        encoder.write_tagged('j', &self.to_string());
    }
}

impl<T: EncodeCacheKey> EncodeCacheKey for Option<T> {
    fn encode_cache_key(&self, encoder: &mut CacheKeyEncoder) {
        match self {
            Some(value) => {
                encoder.key.push('1');
                value.encode_cache_key(encoder);
            }
            None => encoder.key.push('0'),
        }
    }
}

impl<T: EncodeCacheKey> EncodeCacheKey for [T] {
    fn encode_cache_key(&self, encoder: &mut CacheKeyEncoder) {
        (self.len() as u64).encode_cache_key(encoder);
        for value in self {
            value.encode_cache_key(encoder);
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn key(f: impl FnOnce(&mut CacheKeyEncoder)) -> String {
        let mut encoder = CacheKeyEncoder::new();
        f(&mut encoder);
        encoder.finish()
    }

    #[test]
    fn cache_key_injective() {
        assert_ne!(
            key(|e| {
                e.encode("ab").encode("c");
            }),
            key(|e| {
                e.encode("a").encode("bc");
            })
        );
        assert_ne!(
            key(|e| {
                e.encode(&Some(1u64));
            }),
            key(|e| {
                e.encode(&None::<u64>).encode(&1u64);
            })
        );
        assert_ne!(
            key(|e| {
                e.encode(&json!("1"));
            }),
            key(|e| {
                e.encode(&json!(1));
            })
        );
    }

    #[test]
    fn cache_key_deterministic() {
        let encode = || {
            key(|e| {
                e.encode("zarr")
                    .encode(&[2u64, 3][..])
                    .encode(&true)
                    .encode(&json!({"id": "zlib", "level": 1}));
            })
        };
        assert_eq!(encode(), encode());
    }
}
