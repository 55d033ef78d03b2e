use super::*;

fn temp_path(label: &str) -> PathBuf {
    std::env::temp_dir()
        .join(format!("habitbloom-store-{label}-{}", uuid::Uuid::new_v4().simple()))
        .join("credentials.json")
}

// =============================================================================
// CredentialPair
// =============================================================================

#[test]
fn pair_debug_redacts_tokens() {
    let pair = CredentialPair::new("secret-access", "secret-refresh");
    let debug = format!("{pair:?}");
    assert!(!debug.contains("secret"));
    assert!(debug.contains("redacted"));
}

#[test]
fn pair_serializes_with_fixed_keys() {
    let pair = CredentialPair::new("A1", "R1");
    let json: serde_json::Value = serde_json::to_value(&pair).unwrap();
    assert_eq!(json["accessToken"], "A1");
    assert_eq!(json["refreshToken"], "R1");
}

// =============================================================================
// MemoryStore
// =============================================================================

#[test]
fn memory_store_starts_empty() {
    assert!(MemoryStore::new().load().unwrap().is_none());
}

#[test]
fn memory_store_save_load_clear() {
    let store = MemoryStore::new();
    store.save(&CredentialPair::new("A1", "R1")).unwrap();
    assert_eq!(store.load().unwrap(), Some(CredentialPair::new("A1", "R1")));
    store.clear().unwrap();
    assert!(store.load().unwrap().is_none());
}

#[test]
fn memory_store_update_access_keeps_refresh() {
    let store = MemoryStore::with_pair(CredentialPair::new("A1", "R1"));
    let updated = store.update_access("R1", "A2", None).unwrap();
    assert_eq!(updated, Some(CredentialPair::new("A2", "R1")));
    assert_eq!(store.load().unwrap(), updated);
}

#[test]
fn memory_store_update_access_applies_rotation() {
    let store = MemoryStore::with_pair(CredentialPair::new("A1", "R1"));
    store.update_access("R1", "A2", Some("R2")).unwrap();
    assert_eq!(store.load().unwrap(), Some(CredentialPair::new("A2", "R2")));
}

#[test]
fn memory_store_update_after_clear_writes_nothing() {
    let store = MemoryStore::new();
    assert!(store.update_access("R1", "A2", None).unwrap().is_none());
    assert!(store.load().unwrap().is_none());
}

#[test]
fn memory_store_update_for_replaced_pair_writes_nothing() {
    let store = MemoryStore::with_pair(CredentialPair::new("B1", "S1"));
    assert!(store.update_access("R1", "A2", None).unwrap().is_none());
    assert_eq!(store.load().unwrap(), Some(CredentialPair::new("B1", "S1")));
}

#[test]
fn memory_store_clear_if_current_matches_refresh_token() {
    let store = MemoryStore::with_pair(CredentialPair::new("B1", "S1"));
    assert!(!store.clear_if_current("R1").unwrap());
    assert!(store.load().unwrap().is_some());
    assert!(store.clear_if_current("S1").unwrap());
    assert!(store.load().unwrap().is_none());
    assert!(!store.clear_if_current("S1").unwrap());
}

// =============================================================================
// FileStore
// =============================================================================

#[test]
fn file_store_missing_file_is_absent() {
    let store = FileStore::new(temp_path("missing"));
    assert!(store.load().unwrap().is_none());
    store.clear().unwrap();
}

#[test]
fn file_store_round_trips_through_disk() {
    let path = temp_path("roundtrip");
    let store = FileStore::new(&path);
    store.save(&CredentialPair::new("A1", "R1")).unwrap();

    let reopened = FileStore::new(&path);
    assert_eq!(reopened.load().unwrap(), Some(CredentialPair::new("A1", "R1")));

    reopened.update_access("R1", "A2", None).unwrap();
    assert_eq!(store.load().unwrap(), Some(CredentialPair::new("A2", "R1")));

    store.clear().unwrap();
    assert!(!path.exists());
    assert!(store.load().unwrap().is_none());
}

#[test]
fn file_store_compare_and_swap_respects_new_session() {
    let path = temp_path("cas");
    let store = FileStore::new(&path);
    store.save(&CredentialPair::new("B1", "S1")).unwrap();

    assert!(store.update_access("R1", "A2", None).unwrap().is_none());
    assert!(!store.clear_if_current("R1").unwrap());
    assert_eq!(store.load().unwrap(), Some(CredentialPair::new("B1", "S1")));

    assert!(store.clear_if_current("S1").unwrap());
    assert!(!path.exists());
}

#[test]
fn file_store_leaves_no_temp_files() {
    let path = temp_path("tmpfiles");
    let store = FileStore::new(&path);
    store.save(&CredentialPair::new("A1", "R1")).unwrap();
    store.save(&CredentialPair::new("A2", "R2")).unwrap();

    let entries: Vec<_> = std::fs::read_dir(path.parent().unwrap()).unwrap().collect();
    assert_eq!(entries.len(), 1);
}

#[test]
fn file_store_half_pair_reads_as_absent() {
    let path = temp_path("half");
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, r#"{"accessToken":"A1","refreshToken":""}"#).unwrap();
    assert!(FileStore::new(&path).load().unwrap().is_none());
}

#[test]
fn file_store_corrupt_file_reads_as_absent() {
    let path = temp_path("corrupt");
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, "{not json").unwrap();
    assert!(FileStore::new(&path).load().unwrap().is_none());
}

#[cfg(unix)]
#[test]
fn file_store_writes_owner_only_file() {
    use std::os::unix::fs::PermissionsExt;
    let path = temp_path("mode");
    FileStore::new(&path).save(&CredentialPair::new("A1", "R1")).unwrap();
    let mode = std::fs::metadata(&path).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o600);
}

// =============================================================================
// load_or_absent
// =============================================================================

struct BrokenStore;

impl CredentialStore for BrokenStore {
    fn save(&self, _pair: &CredentialPair) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("disk gone".into()))
    }
    fn load(&self) -> Result<Option<CredentialPair>, StoreError> {
        Err(StoreError::Unavailable("disk gone".into()))
    }
    fn clear(&self) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("disk gone".into()))
    }
    fn update_access(&self, _expected: &str, _access: &str, _rotated: Option<&str>) -> Result<Option<CredentialPair>, StoreError> {
        Err(StoreError::Unavailable("disk gone".into()))
    }
    fn clear_if_current(&self, _refresh_token: &str) -> Result<bool, StoreError> {
        Err(StoreError::Unavailable("disk gone".into()))
    }
}

#[test]
fn unavailable_store_reads_as_absent() {
    assert!(load_or_absent(&BrokenStore).is_none());
}
