mod presence;

pub use presence::{PresenceReport, PresenceStage};
