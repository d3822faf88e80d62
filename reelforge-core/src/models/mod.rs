pub mod artifact;
pub mod avatar;
pub mod id;
pub mod job;
pub mod session;

pub use artifact::TemporaryArtifact;
pub use avatar::{AvatarPlacement, TimeRange};
pub use id::{generate_id, ArtifactId, JobId, SessionId};
pub use job::{GenerationJob, JobResult, JobStatus, ProgressReporter, ProgressUpdate};
pub use session::ClientSession;
