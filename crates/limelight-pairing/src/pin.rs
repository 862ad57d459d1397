//! Pairing PIN validation.

use limelight_core::error::PairingError;
use rand::Rng;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Number of digits in a pairing PIN.
pub const PIN_LEN: usize = 4;

/// Validated 4-digit pairing PIN.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct Pin(String);

impl Pin {
    /// Validate user input. Surrounding whitespace is not accepted.
    pub fn parse(input: &str) -> Result<Self, PairingError> {
        if input.len() != PIN_LEN {
            return Err(PairingError::InvalidPin(format!(
                "expected {} digits, got {} characters",
                PIN_LEN,
                input.chars().count()
            )));
        }
        if !input.bytes().all(|b| b.is_ascii_digit()) {
            return Err(PairingError::InvalidPin("PIN must contain only digits".to_string()));
        }
        Ok(Self(input.to_string()))
    }

    /// Random PIN for a host to display.
    pub fn random() -> Self {
        let value: u16 = rand::thread_rng().gen_range(0..10_000);
        Self(format!("{:04}", value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Pin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Pin(****)")
    }
}
