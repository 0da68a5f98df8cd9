//! Signal gate: adaptive noise floor classification and echo suppression.

pub mod echo;
pub mod gate;

pub use echo::{EchoGuard, EchoGuardConfig};
pub use gate::{AudioClass, NoiseGate, NoiseGateConfig};
