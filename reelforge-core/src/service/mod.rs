pub mod jobs;
pub mod lifecycle;
pub mod rate_limit;

pub use jobs::{JobStore, JobTracker};
pub use lifecycle::{ArtifactStore, LifecycleManager, SessionStore, SweepReport, Sweeper};
pub use rate_limit::{
    CounterStore, IdentityKind, LocalCounterStore, QuotaStatus, RateLimitDecision, RateLimiter,
    RedisCounterStore, Window, WindowUsage,
};
