//! Status helper enums mapping to SMALLINT lookup tables.
//!
//! Each enum variant's discriminant and name match the seed rows of the
//! corresponding `*_statuses` table.

use serde::{Serialize, Serializer};

/// Status ID type matching SMALLINT in the database.
pub type StatusId = i16;

macro_rules! define_status_enum {
    (
        $(#[$meta:meta])*
        $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident = ($val:expr, $label:literal) ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[repr(i16)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $( $(#[$vmeta])* $variant = $val ),+
        }

        impl $name {
            /// Every variant, in discriminant order.
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            /// Return the database status ID.
            pub fn id(self) -> StatusId {
                self as StatusId
            }

            /// Return the `name` column of the lookup row.
            pub fn name(self) -> &'static str {
                match self {
                    $( $name::$variant => $label ),+
                }
            }

            pub fn from_id(id: StatusId) -> Option<Self> {
                Self::ALL.iter().copied().find(|s| s.id() == id)
            }

            pub fn from_name(name: &str) -> Option<Self> {
                Self::ALL.iter().copied().find(|s| s.name() == name)
            }
        }

        impl From<$name> for StatusId {
            fn from(value: $name) -> Self {
                value as StatusId
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(self.name())
            }
        }
    };
}

define_status_enum! {
    /// Background job execution status.
    JobStatus {
        Pending = (1, "pending"),
        Running = (2, "running"),
        Completed = (3, "completed"),
        Failed = (4, "failed"),
        Cancelled = (5, "cancelled"),
    }
}

impl JobStatus {
    /// Completed, failed and cancelled jobs never change status again.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_status_ids_match_seed_data() {
        assert_eq!(JobStatus::Pending.id(), 1);
        assert_eq!(JobStatus::Running.id(), 2);
        assert_eq!(JobStatus::Completed.id(), 3);
        assert_eq!(JobStatus::Failed.id(), 4);
        assert_eq!(JobStatus::Cancelled.id(), 5);
    }

    #[test]
    fn status_into_status_id() {
        let id: StatusId = JobStatus::Running.into();
        assert_eq!(id, 2);
    }

    #[test]
    fn lookup_by_id_and_name() {
        for status in JobStatus::ALL {
            assert_eq!(JobStatus::from_id(status.id()), Some(*status));
            assert_eq!(JobStatus::from_name(status.name()), Some(*status));
        }
        assert_eq!(JobStatus::from_id(99), None);
        assert_eq!(JobStatus::from_name("retrying"), None);
    }

    #[test]
    fn only_finished_states_are_terminal() {
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
    }

    #[test]
    fn serializes_as_name() {
        assert_eq!(
            serde_json::to_value(JobStatus::Cancelled).unwrap(),
            serde_json::json!("cancelled")
        );
    }
}
