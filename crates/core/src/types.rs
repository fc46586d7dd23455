/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Unique id assigned to every script invocation.
pub type InvocationId = uuid::Uuid;
