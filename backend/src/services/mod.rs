//! Business logic services for the POS inventory core

pub mod daily_summary;
pub mod ledger;
pub mod notification;
pub mod order_return;
pub mod payment;
pub mod retry;

pub use daily_summary::DailySummaryService;
pub use ledger::LedgerService;
pub use notification::{DomainEvent, EventPublisher, Notifier};
pub use order_return::OrderReturnService;
pub use payment::OrderPaymentService;
pub use retry::retry_on_conflict;
