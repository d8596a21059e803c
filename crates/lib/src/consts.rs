/// Application name used for data directories.
pub const APP_NAME: &str = "dynrescan";

/// Display name of the pipeline step.
pub const STEP_DISPLAY_NAME: &str = "Dynamic Rescan with Veracode Pipeline";

/// Directory under a node's root that holds the provisioned scan tool.
pub const TOOLS_DIR_NAME: &str = "veracode";

/// Fixed stem the versioned artifact is published under.
pub const CANONICAL_STEM: &str = "VeracodeJavaAPI";

/// File extension of scan tool artifacts.
pub const ARTIFACT_EXTENSION: &str = ".jar";

/// Suffix of in-flight canonical copies; never matches the artifact filter.
pub const PUBLISH_TMP_SUFFIX: &str = ".publish.tmp";

/// Replacement shown in place of secret argument values.
pub const MASK: &str = "********";

/// Environment variable overriding the local staging directory.
pub const STAGING_DIR_ENV: &str = "DYNRESCAN_STAGING_DIR";

/// Environment variables supplying API credentials.
pub const API_ID_ENV: &str = "VERACODE_API_ID";
pub const API_KEY_ENV: &str = "VERACODE_API_KEY";
