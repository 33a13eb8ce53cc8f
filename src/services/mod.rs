// =============================================================================
// SERVICES MODULE
// =============================================================================
// Business logic, independent of HTTP. Services are cheap structs of
// borrowed dependencies, built per request from AppState:
//
//   let orders = OrderService::new(&state.db, state.gateway.as_ref(), &state.clock);
//
// Each public operation opens and commits its own storage transaction.
// =============================================================================

pub mod auth;
pub mod cart;
pub mod catalog;
pub mod notifications;
pub mod orders;
pub mod payment;

pub use auth::AuthService;
pub use cart::CartService;
pub use catalog::CatalogService;
pub use notifications::{Notifier, SimulatedMailer};
pub use orders::OrderService;
pub use payment::{PaymentGateway, SimulatedGateway};
