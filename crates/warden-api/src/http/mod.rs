//! Admin HTTP API.
//!
//! | Endpoint | Method | Description |
//! |----------|--------|-------------|
//! | `/health` | GET | Liveness |
//! | `/ready` | GET | Graph backend reachable |
//! | `/metrics` | GET | Prometheus exposition |
//! | `/v1/schema` | GET | Published schema text |
//! | `/v1/check` | POST | Permission check for the caller |
//! | `/v1/relations` | POST, GET, DELETE | Relation management |
//! | `/v1/resources` | POST, GET | Create / list resources |
//! | `/v1/resources/:id` | GET, DELETE | Get / delete one resource |

pub mod routes;
pub mod state;

pub use routes::{create_router, create_router_with_observability, DEFAULT_BODY_LIMIT};
pub use state::AppState;
