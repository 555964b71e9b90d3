use serde::{Deserialize, Serialize};

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(
            Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        pub struct $name(pub i64);

        impl $name {
            pub fn as_i64(self) -> i64 {
                self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_newtype!(TaskId);
id_newtype!(RepositoryId);
id_newtype!(CommitId);
id_newtype!(CommitSetId);
id_newtype!(BuildRequestId);
id_newtype!(TestGroupId);
id_newtype!(TriggerableId);
id_newtype!(PlatformId);
id_newtype!(TestId);
id_newtype!(UploadedFileId);
