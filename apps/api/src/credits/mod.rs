// Credit accounting subsystem: pricing configuration, per-user ledgers, the
// consumption gate, atomic deduction, and purchase crediting.
// Handlers stay thin; the rules live in service.rs and the repository SQL.

pub mod handlers;
pub mod memory;
pub mod month;
pub mod policy;
pub mod repository;
pub mod service;
