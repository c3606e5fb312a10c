//! Domain entities: pure data plus invariants, no I/O
//!
//! - [`Alert`]: one observed condition and its lifecycle state machine
//! - [`AckEvent`]: append-only acknowledgment audit record
//! - [`SilenceMark`]: time-boxed suppression rule

mod ack;
mod alert;
mod silence;

pub use ack::{AckEvent, Actor, Source};
pub use alert::{Alert, AlertReport, AlertState, InvalidTransition, Severity, UnknownVariant};
pub use silence::{SilenceMark, SilenceSelectors, SilenceStatus};
