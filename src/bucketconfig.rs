//! Typed accessors over a bucket's `BucketConfigEntry` rows (spec.md §6
//! "Bucket-config keys recognized by the core").

use crate::models::BucketConfigEntry;

pub struct BucketConfig<'a>(pub &'a [BucketConfigEntry]);

impl<'a> BucketConfig<'a> {
    fn raw(&self, key: &str) -> Option<&str> {
        self.0.iter().find(|e| e.key == key).map(|e| e.value.as_str())
    }

    fn bool(&self, key: &str, default: bool) -> bool {
        self.raw(key).map(|v| v == "true" || v == "1").unwrap_or(default)
    }

    fn number(&self, key: &str, default: i64) -> i64 {
        self.raw(key).and_then(|v| v.parse().ok()).unwrap_or(default)
    }

    pub fn path_caching_enabled(&self) -> bool {
        self.bool("cache_path_caching_enable", false)
    }

    pub fn path_caching_ttl_seconds(&self) -> u64 {
        self.number("cache_path_caching_ttl_seconds", 300).max(0) as u64
    }

    pub fn send_folder_index(&self) -> bool {
        self.bool("files_send_folder_index", false)
    }

    pub fn image_transform_enabled(&self) -> bool {
        self.bool("files_image_transform_enable", false)
    }

    pub fn image_transform_cache_enabled(&self) -> bool {
        self.bool("files_image_transform_cache_enable", false)
    }

    pub fn image_transform_cache_ttl_seconds(&self) -> u64 {
        self.number("files_image_transform_cache_ttl_seconds", 300).max(0) as u64
    }

    pub fn image_transform_cache_max_size_bytes(&self) -> i64 {
        self.number("files_image_transform_cache_max_size", 10) * 1024 * 1024
    }

    pub fn clear_empty_parents(&self) -> bool {
        self.bool("s3_clear_empty_parents", false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::BucketConfigType;
    use uuid::Uuid;

    #[test]
    fn falls_back_to_documented_defaults() {
        let cfg = BucketConfig(&[]);
        assert!(!cfg.path_caching_enabled());
        assert_eq!(cfg.path_caching_ttl_seconds(), 300);
        assert_eq!(cfg.image_transform_cache_max_size_bytes(), 10 * 1024 * 1024);
    }

    #[test]
    fn reads_explicit_values() {
        let entries = vec![BucketConfigEntry {
            bucket_id: Uuid::nil(),
            key: "cache_path_caching_enable".to_string(),
            value: "true".to_string(),
            config_type: BucketConfigType::Boolean,
        }];
        let cfg = BucketConfig(&entries);
        assert!(cfg.path_caching_enabled());
    }
}
