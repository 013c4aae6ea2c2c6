//! Utility functions for common operations.
//!
//! - **Name sanitizing**: strips control characters and ANSI escapes from
//!   user-entered category and course names before they reach the store
//! - **Text layout**: Unicode-aware truncation for CLI columns
//!
//! # Examples
//!
//! ```
//! use course_catalog::util::{strip_control_chars, truncate_to_width};
//!
//! assert_eq!(strip_control_chars("Math\x1b[31m"), "Math");
//! assert_eq!(truncate_to_width("Introduction to Algebra", 10), "Introdu...");
//! ```

mod text;

pub use text::{display_width, strip_control_chars, truncate_to_width};
