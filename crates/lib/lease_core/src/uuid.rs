// Helper for generating UUIDv7 (timestamp-sortable UUIDs).
//
// Used for refresh token IDs (`jti`) so registry rows sort by mint time.
// User IDs keep PG's gen_random_uuid() (v4).

use uuid::Uuid;

/// Generate a new UUIDv7 (timestamp-sortable).
pub fn uuidv7() -> Uuid {
    Uuid::now_v7()
}
