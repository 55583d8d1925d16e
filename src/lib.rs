// =============================================================================
// GPV — Goal Portfolio Overlay Core
// =============================================================================
//
// Two-tier system behind a privacy-preserving portfolio analytics overlay:
//
//   Client tier (library): passive endpoint interception, payload
//   normalisation into a bucket × goal-type × goal model, per-goal
//   performance series with window-return derivation, target/drift/projection
//   analytics, envelope encryption, and an end-to-end-encrypted config-only
//   sync client.
//
//   Server tier (`gpv-syncd` binary): authenticated opaque-blob storage with
//   conflict detection. The service never decrypts user data.
//
// The overlay's DOM chrome is external — view-model builders here emit plain
// data structures only.
// =============================================================================

pub mod analytics;
pub mod config;
pub mod crypto;
pub mod intercept;
pub mod model;
pub mod performance;
pub mod server;
pub mod store;
pub mod sync;
