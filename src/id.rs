use uuid::Uuid;

/// Mints a time-ordered id for a record that has never been migrated before.
pub fn new_uuid_v7() -> String {
    Uuid::now_v7().to_string()
}
