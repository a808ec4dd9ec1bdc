//! Cache key generation.
//!
//! Keys are the lowercase hex SHA-256 of a canonical encoding of the
//! parameters. Entries are visited in sorted order and every name and value
//! is length-prefixed with its type tagged, so distinct parameter sets
//! cannot collide by concatenation.

use sha2::{Digest, Sha256};

use crate::model::{ParamValue, Params};

/// Derives a cache key from request parameters.
pub trait KeyGenerator: Send + Sync {
    fn key(&self, params: &Params) -> String;
}

/// SHA-256 over the canonical parameter encoding.
#[derive(Debug, Clone, Copy, Default)]
pub struct ParamsHashKeyGenerator;

impl ParamsHashKeyGenerator {
    pub fn hash(params: &Params) -> String {
        let mut hasher = Sha256::new();
        for (name, value) in params.iter() {
            write_bytes(&mut hasher, name.as_bytes());
            match value {
                ParamValue::Str(s) => {
                    hasher.update(b"s");
                    write_bytes(&mut hasher, s.as_bytes());
                }
                ParamValue::Int(i) => {
                    hasher.update(b"i");
                    hasher.update(i.to_be_bytes());
                }
                ParamValue::Float(x) => {
                    hasher.update(b"f");
                    hasher.update(x.to_bits().to_be_bytes());
                }
                ParamValue::Bool(b) => {
                    hasher.update(b"b");
                    hasher.update([u8::from(*b)]);
                }
            }
        }
        hex::encode(hasher.finalize())
    }
}

fn write_bytes(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u64).to_be_bytes());
    hasher.update(bytes);
}

impl KeyGenerator for ParamsHashKeyGenerator {
    fn key(&self, params: &Params) -> String {
        Self::hash(params)
    }
}

/// Prepends a fixed namespace to another generator's keys.
pub struct PrefixKeyGenerator<G> {
    prefix: String,
    inner: G,
}

impl<G: KeyGenerator> PrefixKeyGenerator<G> {
    pub fn new(prefix: impl Into<String>, inner: G) -> Self {
        Self {
            prefix: prefix.into(),
            inner,
        }
    }
}

impl<G: KeyGenerator> KeyGenerator for PrefixKeyGenerator<G> {
    fn key(&self, params: &Params) -> String {
        format!("{}{}", self.prefix, self.inner.key(params))
    }
}
