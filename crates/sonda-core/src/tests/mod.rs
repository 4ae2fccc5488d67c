//! Cross-module test infrastructure.
//!
//! Unit tests live next to the code they exercise; this tree holds the
//! shared subprocess fakes and the end-to-end orchestrator scenarios.
