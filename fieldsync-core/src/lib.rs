mod client;
mod wire;

pub use client::{FailureClass, IMPORT_STRATEGY, TrackerClient, TrackerError};
pub use wire::{
    ImportResponse, ImportSummaries, RawConflict, RawImportSummary, TrackerPayload, WireRecord,
};
