//! Silver and gold builders.
//!
//! Pure functions over in-memory frames. Output is validated against the
//! declared schemas in [`crate::schema`] before it is returned.

pub mod gold;
pub mod silver;

pub use gold::{to_gold_frame, GoldContext};
pub use silver::from_bea_payload;
