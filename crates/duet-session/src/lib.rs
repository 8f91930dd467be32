//! Signed-in state of one partner: account session, pairing, shared
//! telemetry, and the date and map arithmetic the home screen shows.

pub mod error;
pub mod geo;
pub mod milestones;
pub mod pairing;
pub mod session;
pub mod telemetry;

pub use error::{PairingError, SessionError};
pub use pairing::{ConnectionCode, RelationshipDates};
pub use session::{Registration, Route, Session};
pub use telemetry::{DeviceTelemetry, TelemetryPublisher};
