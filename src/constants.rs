// Constants module - centralized default values and on-disk identifiers
//
// Anything written to disk is named here so that a layout change is a
// single, visible edit (and a format version bump).

// =============================================================================
// On-disk format
// =============================================================================

/// Version of the header record layout. Bump on any incompatible change.
pub const DISK_FORMAT_VERSION: u32 = 6;

/// Version of the vary record layout, numbered independently of headers.
pub const VARY_FORMAT_VERSION: u32 = 5;

/// Suffix of the file holding the encoded header record
pub const CACHE_HEADER_SUFFIX: &str = "header";

/// Suffix of the file holding the response body
pub const CACHE_DATA_SUFFIX: &str = "data";

/// Suffix of the file holding the vary record of a negotiated resource
pub const CACHE_VARY_SUFFIX: &str = "vary";

/// Fixed base of every temporary file name; a random suffix follows
pub const TEMPFILE_BASE: &str = "kuratmp";

/// Number of random characters appended to `TEMPFILE_BASE`
pub const TEMPFILE_RAND_LEN: usize = 10;

/// Name of the marker recording the fan-out parameters of a cache root
pub const LAYOUT_MARKER: &str = ".layout";

/// Identifier of the key hashing scheme, recorded in the layout marker
pub const HASH_SCHEME: &str = "sha256-hex22";

/// Number of characters in a hashed file name
pub const CACHEFILE_LEN: usize = 22;

/// Upper bound for `dirlevels * dirlength`, leaving at least two
/// characters for the file stem
pub const MAX_FANOUT_CHARS: usize = 20;

// =============================================================================
// Disk cache defaults
// =============================================================================

/// Default number of directory levels below the cache root
pub const DEFAULT_DIRLEVELS: usize = 2;

/// Default number of hash characters consumed per directory level
pub const DEFAULT_DIRLENGTH: usize = 2;

/// Default minimum body size accepted for caching (bytes)
pub const DEFAULT_MIN_FILE_SIZE: u64 = 1;

/// Default maximum body size accepted for caching (bytes)
pub const DEFAULT_MAX_FILE_SIZE: u64 = 1_000_000;

/// Default set-aside size; 0 writes every chunk straight to the temp file
pub const DEFAULT_READSIZE: u64 = 0;

/// Default set-aside time in milliseconds; 0 disables the time trigger
pub const DEFAULT_READTIME_MS: u64 = 0;

/// Default age after which an orphaned temp file is swept (1 hour)
pub const DEFAULT_STALE_TEMP_SECS: u64 = 3600;

/// Default cache root
pub const DEFAULT_CACHE_ROOT: &str = "/var/cache/kura";

/// Chunk size used when streaming a cached body back to the caller
pub const BODY_CHUNK_SIZE: usize = 64 * 1024;
