pub mod capabilities;
pub mod scheduler;

pub use capabilities::{AllowAllCapabilities, TriggerableCapabilities};
pub use scheduler::{
    now_unix, CommitSetSpec, CreateGroupRequest, CreatedGroup, RepositoryKey, RootUpload,
    Scheduler, TestGroupUpdate,
};
