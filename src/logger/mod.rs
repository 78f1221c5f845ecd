//! Session, chunk and batch lifecycle around a [`SampleStore`](crate::store::SampleStore).

mod buffer;
mod chunk;
mod controller;
mod recovery;
mod session;
mod state;

pub use buffer::{AppendOutcome, BatchBuffer};
pub use chunk::{plan_rollover, rollover_due, ChunkRollover};
pub use controller::{FlushOutcome, SensorLogger, TickOutcome};
pub use recovery::{recover, Recovered, ResumeInfo};
pub use session::new_session_id;
pub use state::{AchievedRate, PublicState};
