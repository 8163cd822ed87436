//! Hexagonal architecture boundaries for BrowserGrid's control plane.
//!
//! Outbound ports define how the system depends on its external
//! collaborators (database, broker, compute providers); `browsergrid-api`
//! and `browsergrid-scheduler` each depend on these directly rather than
//! through a driving port, since both already share `AppState`/handler
//! construction with the concrete adapters at the binary's wiring point.

pub mod outbound;
