//! Constants module - generator vocabularies and workload defaults

// =============================================================================
// Path vocabulary
// =============================================================================

/// Segment separator used in every type path.
pub const SEPARATOR: char = '.';

/// First-level segments.
pub const TOP_LEVEL: [&str; 7] = [
    "labs",
    "pharmacy",
    "billing",
    "auth",
    "etl",
    "notifications",
    "analytics",
];

/// Second-level segments under `labs`.
pub const LABS_L2: [&str; 4] = ["result_webhooks", "orders", "catalog_sync", "providers"];

/// Third-level segments under `labs.result_webhooks`.
pub const RESULT_WEBHOOK_VENDORS: [&str; 4] = ["quest", "labcorp", "bioreference", "avalon"];

/// Numbered second-level segments for every other top level: `sub_1..=sub_10`.
pub const GENERIC_L2_COUNT: u32 = 10;
/// Numbered third-level segments outside `labs.result_webhooks`: `comp_1..=comp_50`.
pub const GENERIC_L3_COUNT: u32 = 50;
/// Numbered segments at depth four and below: `node_1..=node_100`.
pub const GENERIC_NODE_COUNT: u32 = 100;

/// Hot paths that are always part of the heavy pool.
pub const CANONICAL_HEAVY_PATHS: [&str; 2] =
    ["labs.result_webhooks.quest", "labs.result_webhooks.labcorp"];

/// Used by the level checker when the store has no path with four segments.
pub const FALLBACK_DEEP_PATH: &str = "labs.result_webhooks.quest.alpha";

// =============================================================================
// Generator defaults
// =============================================================================

pub const DEFAULT_HEAVY_PATH_COUNT: usize = 20;
/// Heavy paths are built no deeper than this.
pub const DEFAULT_DEPTH_MEAN: usize = 3;
pub const DEFAULT_MAX_DEPTH: usize = 5;
/// Zipf exponent for path depth. Must be > 1.
pub const DEFAULT_ZIPF_EXPONENT: f64 = 2.0;
pub const DEFAULT_ERROR_RATE: f64 = 0.05;

/// Chance that a generated record reuses a heavy path.
pub const HEAVY_PATH_PROBABILITY: f64 = 0.6;
/// Chance that a generated timestamp falls inside the burst window.
pub const BURST_PROBABILITY: f64 = 0.2;

const MICROS_PER_HOUR: i64 = 3_600 * 1_000_000;

/// Trailing window for bursty timestamps: 48 hours.
pub const BURST_WINDOW_US: i64 = 48 * MICROS_PER_HOUR;
/// Trailing window for background timestamps: 30 days.
pub const HISTORY_WINDOW_US: i64 = 30 * 24 * MICROS_PER_HOUR;

/// Placeholder payload stored with every generated operation.
pub const PLACEHOLDER_PAYLOAD: &[u8] = b"{}";
