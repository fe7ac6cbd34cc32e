//! Per-instantiation identifiers

use std::time::{SystemTime, UNIX_EPOCH};
use uuid::{NoContext, Timestamp, Uuid};

/// Time-ordered unique id of one sandbox instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId(Uuid);

impl InstanceId {
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    pub fn to_instance_name(&self) -> String {
        format!("instance-{}", self.0)
    }
}

impl std::fmt::Display for InstanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum IdError {
    #[error("failed to create V7 UUID: system clock is before the Unix epoch")]
    ClockBeforeEpoch,
}

/// Source of fresh instance ids
pub trait InstanceIdSource: Send + Sync {
    fn next_id(&self) -> Result<InstanceId, IdError>;
}

/// UUIDv7 from the system clock
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidV7Source;

impl InstanceIdSource for UuidV7Source {
    fn next_id(&self) -> Result<InstanceId, IdError> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|_| IdError::ClockBeforeEpoch)?;
        let ts = Timestamp::from_unix(NoContext, now.as_secs(), now.subsec_nanos());
        Ok(InstanceId(Uuid::new_v7(ts)))
    }
}
