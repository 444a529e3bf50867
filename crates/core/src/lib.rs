//! Domain logic for session replay uploads: metadata parsing, frame
//! extraction, device and locale normalization, geolocation records, video
//! assembly, and on-disk session storage.

pub mod archive;
pub mod assembly;
pub mod config;
pub mod device;
pub mod error;
pub mod ffmpeg;
pub mod geo;
pub mod scratch;
pub mod session;
pub mod storage;
pub mod types;
