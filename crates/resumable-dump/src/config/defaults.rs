/// Configuration default values
///
/// This module contains all the default values for configuration options,
/// making them easily changeable in one central location.
// Database defaults
pub const DEFAULT_DATABASE_URL: &str = "mysql://root@localhost:3306/wordpress";
pub const DEFAULT_MAX_CONNECTIONS: u32 = 1;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 5;

// Storage defaults
pub const DEFAULT_STATE_DIR: &str = "./data/state";
pub const DEFAULT_OUTPUT_DIR: &str = "./data/dumps";
pub const DEFAULT_COMPRESS: bool = true;

// Engine defaults
pub const DEFAULT_RUN_BUDGET_SECS: u64 = 25;
pub const DEFAULT_FETCH_BATCH_SIZE: usize = 1000;
pub const DEFAULT_MAX_STATEMENT_BYTES: usize = 524_288;
pub const DEFAULT_YIELD_DELAY_SECS: u64 = 60;
pub const DEFAULT_TABLE_PREFIX: &str = "wp_";

// Catalog ordering defaults (relative to the table prefix)
pub const DEFAULT_PRIORITY_TABLES: &[&str] = &["options", "site", "blogs", "users", "usermeta"];
pub const DEFAULT_CORE_TABLES: &[&str] = &[
    "terms",
    "term_taxonomy",
    "termmeta",
    "term_relationships",
    "commentmeta",
    "comments",
    "links",
    "postmeta",
    "posts",
    "site",
    "sitemeta",
    "blogs",
    "blogversions",
    "blogmeta",
];

// Reschedule policy defaults
pub const DEFAULT_RESUME_INTERVAL_SECS: u64 = 100;
pub const DEFAULT_MIN_RESUME_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_MAX_OVERLAP_INTERVAL_SECS: u64 = 900;
pub const DEFAULT_ACTIVITY_MARGIN_SECS: u64 = 30;
pub const DEFAULT_RESCHEDULE_WINDOW_SECS: u64 = 45;
pub const DEFAULT_OVERLAP_INCREASE_SECS: u64 = 120;
pub const DEFAULT_ESCALATE_FROM_RESUMPTION: u32 = 9;
pub const DEFAULT_ESCALATION_FLOOR_SECS: u64 = 75;
pub const DEFAULT_LONG_RUN_THRESHOLD_SECS: u64 = 720;
pub const DEFAULT_LONG_RUN_DELAY_SECS: u64 = 600;
pub const DEFAULT_CLEAR_RESUMPTIONS_UP_TO: u32 = 100;
pub const DEFAULT_INTERVAL_TTL_SECS: u64 = 8 * 86_400;
pub const DEFAULT_STALL_THRESHOLD_SECS: u64 = 30;
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;
pub const DEFAULT_MAX_TICKS_PER_POLL: usize = 10;

// Dump binary defaults
pub const DEFAULT_DUMP_BINARY_ENABLED: bool = true;
pub const DEFAULT_DUMP_BINARY_CANDIDATES: &[&str] = &[
    "/usr/bin/mysqldump",
    "/bin/mysqldump",
    "/usr/local/bin/mysqldump",
    "/usr/sfw/bin/mysqldump",
    "/usr/xdg4/bin/mysqldump",
    "/opt/bin/mysqldump",
];
pub const DEFAULT_MAX_ALLOWED_PACKET: &str = "64M";

// Lock defaults
pub const DEFAULT_LOCK_DATABASE_URL: &str = "sqlite://./data/state/locks.db?mode=rwc";
pub const DEFAULT_LOCK_TABLE: &str = "dump_locks";
pub const DEFAULT_CREATE_LOCK_TTL_SECS: u64 = 300;
