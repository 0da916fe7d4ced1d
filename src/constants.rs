/// Process exit codes. The three run outcomes must stay distinguishable by
/// whatever scheduler launches the job.
pub const EXIT_LOADED: i32 = 0;
pub const EXIT_STARTUP_FAILURE: i32 = 1;
pub const EXIT_QUALITY_FAILURE: i32 = 2;
pub const EXIT_ABORTED: i32 = 3;

// GDELT 2.0 endpoints used when the config does not override them
pub const DEFAULT_MASTER_LIST_URL: &str = "http://data.gdeltproject.org/gdeltv2/lastupdate.txt";
pub const EXPORT_MARKER: &str = "export";

// GDELT 2.0 event export layout
pub const GDELT_EXPORT_COLUMNS: usize = 61;
pub const GDELT_DATE_FORMAT: &str = "%Y%m%d";
pub const GDELT_DATETIME_FORMAT: &str = "%Y%m%d%H%M%S";

// Default load target table
pub const DEFAULT_TARGET_TABLE: &str = "base_data";

pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

/// Points this close (in degrees) to a ring edge count as on the boundary.
pub const BOUNDARY_TOLERANCE_DEG: f64 = 1e-9;

/// Label used when a code has no mapping.
pub const UNKNOWN_LABEL: &str = "Unknown";
