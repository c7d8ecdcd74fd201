pub mod call;
pub mod causality;
pub mod crash_state;
pub mod dot;
pub mod error;
pub mod frontier;
pub mod fsconfig;
pub mod graph;
pub mod ingest;
pub mod layout;
pub mod objmap;
pub mod reduce;
pub mod replay;
pub mod sandbox;
pub mod server;
pub mod workload;

pub use call::{Call, CallArena, CallId, CallKind};
pub use crash_state::CrashState;
pub use error::{CheckerFailed, ConfigError, EngineError, IngestError, MappingError, PfsUnavailable, ReplayError};
pub use fsconfig::FsType;
pub use graph::ExecGraph;
pub use server::{Server, ServerRole};
pub use workload::Workload;
