/// Max resources one store will hold.
pub const MAX_RESOURCES: usize = 100_000;

/// Max live reservations on a single resource.
pub const MAX_RESERVATIONS_PER_RESOURCE: usize = 10_000;

/// Longest reservation accepted, in nights.
pub const MAX_SPAN_DAYS: i64 = 366;

/// Max ratings stored per resource.
pub const MAX_RATINGS_PER_RESOURCE: usize = 100_000;
