//! Random byte sources for anti-forgery tokens

use rand::rngs::OsRng;
use rand::RngCore;

/// A cryptographically strong source of random bytes
pub trait SecureRandom: Send + Sync {
    fn fill_bytes(&self, dest: &mut [u8]) -> Result<(), rand::Error>;
}

/// Operating system CSPRNG
#[derive(Debug, Clone, Copy, Default)]
pub struct OsRandom;

impl SecureRandom for OsRandom {
    fn fill_bytes(&self, dest: &mut [u8]) -> Result<(), rand::Error> {
        OsRng.try_fill_bytes(dest)
    }
}
