//! Security utilities and validation functions.
//!
//! This module provides security-related functionality including:
//! - Path validation for archive entries and package output locations
//! - Tool name sanitization for cache and package directories
//! - Credential scrubbing for download URLs before they are logged

pub mod credential_scrubber;
pub mod path_validator;

pub use credential_scrubber::{safe_error_message, scrub_url};
pub use path_validator::{safe_join, sanitize_filename, validate_output_path};
