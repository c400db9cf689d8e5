pub mod pricing;
pub mod checkout;
pub mod locks;
pub mod memory;
pub mod coordinator;
pub mod mock;

pub use pricing::{OrderTotals, PricingRules};
pub use checkout::build_order;
pub use locks::OrderLocks;
pub use memory::InMemoryOrderRepository;
pub use coordinator::{
    Dashboard, DashboardRequest, DispatchOptions, FulfillmentCoordinator, FulfillmentError,
};
pub use mock::ScriptedCourier;
