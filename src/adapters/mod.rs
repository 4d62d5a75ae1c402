//! Roon link and the lifecycle/pairing traits it implements

pub mod roon;
pub mod traits;

pub use roon::{RoonLink, RoonLinkStatus};
pub use traits::{CoreLink, Startable};
