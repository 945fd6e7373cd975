//! Integration-style tests that exercise more than one module together.
//! Per-module behavior has its own `#[cfg(test)] mod tests` colocated with
//! the module; this directory is for the seams between them.
