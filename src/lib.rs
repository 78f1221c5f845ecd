pub mod app;
pub mod clock;
pub mod config;
pub mod db;
pub mod export;
pub mod logger;
pub mod sampler;
pub mod sensors;
pub mod store;
mod utils;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{LoggerConfig, RecoveryMode};
pub use db::Database;
pub use export::{chunk_file_name, collect_chunk_records, ChunkExporter, ExportSummary};
pub use logger::{FlushOutcome, PublicState, ResumeInfo, SensorLogger, TickOutcome};
pub use sampler::SamplerDriver;
pub use sensors::{SensorSnapshot, SharedSnapshot, SnapshotProvider};
pub use store::{MemoryStore, SampleStore};

pub fn run() {
    utils::logging::init_logging(log::LevelFilter::Info);

    let args = match app::CliArgs::parse(std::env::args().skip(1)) {
        Ok(args) => args,
        Err(err) => {
            eprintln!("{err:#}");
            eprintln!("usage: sensor-logger [DB_PATH] [SECONDS] [RATE_HZ]");
            std::process::exit(2);
        }
    };

    log::info!("sensor-logger starting up...");

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(err) => {
            log::error!("failed to start async runtime: {err}");
            std::process::exit(1);
        }
    };

    if let Err(err) = runtime.block_on(app::run_cli(args)) {
        log::error!("sensor-logger failed: {err:?}");
        std::process::exit(1);
    }
}
