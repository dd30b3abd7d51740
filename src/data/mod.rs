/// Data layer: core types, parsing, and signal preprocessing.
///
/// Architecture:
/// ```text
///  .csv / .xml (path or uploaded bytes)
///        │
///        ▼
///   ┌──────────┐
///   │  loader   │  parse file → Parsed { Series, skipped }
///   └──────────┘
///        │
///        ▼
///   ┌──────────────┐
///   │  preprocess   │  sort → grid → resample → smooth → normalise
///   └──────────────┘
///        │
///        ▼
///   ProcessedVector (length L, fed to the model)
///
///   features: derivative / peaks / moments for non-inference consumers
/// ```

pub mod features;
pub mod loader;
pub mod model;
pub mod preprocess;
