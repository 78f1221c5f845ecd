pub mod batch;
pub mod chunk;
pub mod record;
pub mod session;

pub use batch::Batch;
pub use chunk::{Chunk, ChunkSummary};
pub use record::{Record, SampleContext, RECORD_KEYS};
pub use session::{DeviceInfo, Session};
