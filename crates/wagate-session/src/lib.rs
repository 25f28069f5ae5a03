//! # wagate-session
//!
//! Per-number WhatsApp client lifecycle: pairing, link-state tracking,
//! outbound sends, webhook fan-out, and sqlx-backed session persistence.
//!
//! All protocol work (Noise handshake, Signal encryption, QR pairing) is
//! delegated to `whatsapp-rust`; this crate only manages client lifetimes
//! and reconciles their state with the per-number session stores.

mod events;
mod handle;
pub mod manager;
pub mod qr;
mod send;
pub mod store;
pub mod webhook;


pub use manager::SessionManager;
