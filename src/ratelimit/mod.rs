//! Rate limiting logic and state management.

mod clock;
mod key;
mod policy;
mod rules;
mod store;
mod sweeper;
mod window;

pub use clock::{Clock, ManualClock, SystemClock};
pub use key::{IdentifierKind, PartitionKey, RequestIdentity, UNKNOWN_ORIGIN};
pub use policy::{AdmissionPolicy, Decision, RateLimitInfo};
pub use rules::{KeyStrategy, Rule, RuleConfig, RuleSet};
pub use store::{
    StoreOptions, SweepStats, WindowStore, DEFAULT_MAX_ENTRIES_PER_PARTITION, DEFAULT_STALE_AFTER,
};
pub use sweeper::{Sweeper, MIN_SWEEP_INTERVAL};
pub use window::{Verdict, WindowEntry};
