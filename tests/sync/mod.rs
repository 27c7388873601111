// Test module entry point for sync tests
// Reconciliation passes and live sync against the in-memory remote

mod common;
mod mapper_tests;
mod reconcile_tests;
