pub mod alert_reconciler;
