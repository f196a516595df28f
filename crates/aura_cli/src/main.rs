//! CLI smoke entry point.
//!
//! # Responsibility
//! - Provide a minimal executable to verify `aura_core` linkage.
//! - Keep output deterministic for quick local sanity checks.

fn main() {
    println!("aura_core ping={}", aura_core::ping());
    println!("aura_core version={}", aura_core::core_version());
}
