//! Project-wide names and defaults.

pub const APP_NAME: &str = "e2factory";

/// Directory (relative to the project root) holding tool state.
pub const STATE_DIR: &str = ".e2";

pub const PROJECT_CONFIG: &str = "proj/config";
pub const SERVERS_CONFIG: &str = "proj/servers";
pub const LICENCES_CONFIG: &str = "proj/licences";
pub const INIT_DIR: &str = "proj/init";
pub const SOURCES_DIR: &str = "src";
pub const RESULTS_DIR: &str = "res";
pub const CONFIG_FILE: &str = "config";
pub const BUILD_SCRIPT: &str = "build-script";

/// Local output directory for built results.
pub const OUT_DIR: &str = "out";

/// Default location of VCS working copies, `in/<source>`.
pub const WORKING_COPY_DIR: &str = "in";

/// Server name for the project root itself.
pub const PROJECT_SERVER: &str = ".";
pub const RESULTS_SERVER: &str = "results";
pub const RELEASES_SERVER: &str = "releases";

pub const RESULT_ARCHIVE: &str = "result.tar";
pub const CHECKSUM_SUFFIX: &str = ".sha256";

/// Source-id input used for every VCS working copy.
pub const WORKING_COPY_ID: &str = "working-copy";

pub const ENV_CACHE_DIR: &str = "E2_CACHE_DIR";
