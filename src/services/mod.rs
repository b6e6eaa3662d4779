//! Services bridging the workflow to external collaborators

pub mod tracker_sync;

pub use tracker_sync::TrackerSyncService;
