//! Record id generation. Ids are `<prefix>_<millis>_<8 hex>` so they stay
//! globally unique and sort by creation time.

use chrono::Utc;
use uuid::Uuid;

pub const CHANGE_PREFIX: &str = "change";
pub const BACKUP_PREFIX: &str = "backup";
pub const RECOVERY_PREFIX: &str = "recovery";
pub const ASSESSMENT_PREFIX: &str = "assess";
pub const TREND_PREFIX: &str = "trend";
pub const OPTIMIZATION_PREFIX: &str = "opt";
pub const INTEGRITY_CHECK_PREFIX: &str = "check";
pub const TEST_PREFIX: &str = "test";
pub const MODEL_PREFIX: &str = "model";

pub fn generate_id(prefix: &str) -> String {
    let millis = Utc::now().timestamp_millis();
    let tail = Uuid::new_v4().simple().to_string();
    format!("{prefix}_{millis:013}_{}", &tail[..8])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_carry_prefix_and_are_unique() {
        let first = generate_id(CHANGE_PREFIX);
        let second = generate_id(CHANGE_PREFIX);
        assert!(first.starts_with("change_"));
        assert_ne!(first, second);
    }

    #[test]
    fn ids_sort_by_creation_time() {
        let earlier = generate_id(BACKUP_PREFIX);
        std::thread::sleep(std::time::Duration::from_millis(2));
        let later = generate_id(BACKUP_PREFIX);
        assert!(earlier < later);
    }
}
