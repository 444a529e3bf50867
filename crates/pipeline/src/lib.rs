//! Per-upload orchestration: client geolocation and the
//! extract → assemble → record state machine.

pub mod geo;
pub mod orchestrator;

pub use geo::{GeoLookup, GeoResolver, OfflineGeoResolver};
pub use orchestrator::{
    PipelineError, PipelineOrchestrator, PipelineState, SessionResponse, UploadRequest,
};
