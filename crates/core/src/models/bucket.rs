use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 分桶归属记录
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Bucket {
    /// 取值 [1, N]
    pub bucket: u32,
    pub broker_id: String,
    pub updated_at: DateTime<Utc>,
}

impl Bucket {
    pub fn new(bucket: u32, broker_id: impl Into<String>) -> Self {
        Self {
            bucket,
            broker_id: broker_id.into(),
            updated_at: Utc::now(),
        }
    }
}
