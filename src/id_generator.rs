//! Random short-code generation
//!
//! The generator closure is built on first use and cached for the lifetime of the
//! owning [`IdGenerator`]. A failed construction is reported to the caller and retried
//! on the next request.

use crate::error::{MappingError, Result};
use once_cell::sync::OnceCell;
use rand::distributions::Uniform;
use rand::Rng;
use std::sync::Arc;
use tracing::debug;

/// Symbols codes are drawn from
pub const CODE_ALPHABET: &str = "0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Length of generated codes
pub const CODE_LENGTH: usize = 10;

/// Shared code-producing closure
pub type CodeFn = Arc<dyn Fn() -> String + Send + Sync>;

/// Lazily constructed random code generator
pub struct IdGenerator {
    alphabet: Vec<char>,
    length: usize,
    generator: OnceCell<CodeFn>,
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl IdGenerator {
    /// Generator over [`CODE_ALPHABET`] producing [`CODE_LENGTH`]-character codes
    pub fn new() -> Self {
        Self::with_alphabet(CODE_ALPHABET, CODE_LENGTH)
    }

    /// Generator over a custom alphabet; validated on first use
    pub fn with_alphabet(alphabet: &str, length: usize) -> Self {
        Self {
            alphabet: alphabet.chars().collect(),
            length,
            generator: OnceCell::new(),
        }
    }

    /// Draw a fresh code
    pub fn generate(&self) -> Result<String> {
        let generator = self.generator()?;
        Ok(generator())
    }

    /// The cached generator, constructing it if needed
    pub fn generator(&self) -> Result<CodeFn> {
        self.generator
            .get_or_try_init(|| self.build())
            .map(Arc::clone)
    }

    fn build(&self) -> Result<CodeFn> {
        if self.length == 0 {
            return Err(MappingError::internal("code length must be positive"));
        }

        if self.alphabet.is_empty() {
            return Err(MappingError::internal("code alphabet must not be empty"));
        }

        let alphabet = self.alphabet.clone();
        let length = self.length;
        // indices drawn from here are always in bounds for `alphabet`
        let symbols = Uniform::new(0, alphabet.len());

        debug!(
            alphabet_size = alphabet.len(),
            length = length,
            "Code generator initialized"
        );

        Ok(Arc::new(move || {
            rand::thread_rng()
                .sample_iter(&symbols)
                .take(length)
                .map(|index| alphabet[index])
                .collect()
        }))
    }
}
