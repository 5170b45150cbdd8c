//! Encryption of environment variable values at rest

mod codec;

pub use codec::{AesGcmCodec, SecretsCodec};
