//! 跨进程稳定的哈希工具
//!
//! 分桶和一致性哈希都要求不同Broker、不同进程重启后对同一个键得到相同结果，
//! 因此不能使用标准库带随机种子的哈希器。

use sha2::{Digest, Sha256};

/// 默认分桶数量
pub const DEFAULT_BUCKET_COUNT: u32 = 64;

/// 对任意字节计算64位稳定哈希
pub fn stable_hash(bytes: &[u8]) -> u64 {
    let digest = Sha256::digest(bytes);
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(head)
}

/// 计算资源所属的分桶编号，取值范围 [1, bucket_count]
///
/// 结果只与资源ID和分桶数量有关，与集群成员无关。
pub fn bucket_of(resource_id: i64, bucket_count: u32) -> u32 {
    let count = bucket_count.max(1) as u64;
    (stable_hash(&resource_id.to_be_bytes()) % count) as u32 + 1
}

/// 计算内容哈希并以十六进制字符串返回
pub fn content_hash(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}
