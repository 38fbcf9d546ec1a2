pub mod effects;
pub mod gateway;
pub mod reconciler;

pub use effects::{LoggingNotifier, LoggingReceipts, NotificationDispatcher, ReceiptGenerator};
pub use gateway::GatewayService;
pub use reconciler::{ReconcilePolicy, Reconciler, TickReport};
